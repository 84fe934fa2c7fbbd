//! Session Demo
//!
//! Walks a host and a joiner through a full session lifecycle over the
//! in-memory loopback transport: create, join, start, actions, chat, end,
//! leave. Inbound envelopes are pumped by hand to keep the run scripted.

use std::sync::Arc;

use anyhow::Result;
use serde_json::json;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::info;
use tracing_subscriber::EnvFilter;

use p2p_session::{
    Envelope, GameData, GameMessage, GameSession, LoopbackHub, PeerId, SessionId, VERSION,
};

/// Apply everything currently queued for a session.
fn pump(session: &mut GameSession, rx: &mut UnboundedReceiver<(PeerId, Envelope)>) {
    while let Ok((from, envelope)) = rx.try_recv() {
        session.dispatch(from, envelope);
    }
}

fn game_data(pairs: &[(&str, serde_json::Value)]) -> GameData {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("P2P Session demo v{}", VERSION);

    let hub = LoopbackHub::new();
    let host_id = PeerId::new("host-peer");
    let (host_transport, mut host_rx) = hub.register(host_id.clone());
    let (joiner_transport, mut joiner_rx) = hub.register(PeerId::new("joiner-peer"));

    // Host creates the session; on this transport the session is addressed
    // by the host's own peer id.
    let mut host = GameSession::new();
    host.bind_transport(Arc::new(host_transport));
    host.create_session(SessionId::from(host_id), "Alice")?;

    let mut joiner = GameSession::new();
    joiner.bind_transport(Arc::new(joiner_transport));
    joiner.on_player_action(|peer, payload| {
        info!(%peer, %payload, "action received");
    });
    joiner.on_chat_message(|peer, payload| {
        info!(%peer, %payload, "chat received");
    });
    joiner
        .join_session(SessionId::new("host-peer"), "Bob")
        .await?;

    // Host sees the join and answers with a snapshot; joiner converges.
    pump(&mut host, &mut host_rx);
    pump(&mut joiner, &mut joiner_rx);
    info!(
        players = joiner.session_info().player_count,
        "joiner roster after snapshot"
    );

    // Host starts the game.
    host.start_session(game_data(&[("round", json!(1)), ("target", json!(21))]))?;
    pump(&mut joiner, &mut joiner_rx);
    info!(
        started = joiner.session_info().is_game_started,
        "joiner sees game start"
    );

    // Host pushes a state update; both sides converge on the merged data.
    host.update_state(game_data(&[("round", json!(2))]));
    pump(&mut joiner, &mut joiner_rx);

    // Joiner plays an action and says hello. The host has its own hooks.
    host.on_player_action(|peer, payload| {
        info!(%peer, %payload, "action received");
    });
    host.on_chat_message(|peer, payload| {
        info!(%peer, %payload, "chat received");
    });
    joiner.send_message(GameMessage::PlayerAction(json!({ "move": "draw" })), None)?;
    joiner.send_message(GameMessage::ChatMessage(json!("good game!")), None)?;
    joiner.update_state(game_data(&[("last_move", json!("draw"))]));
    pump(&mut host, &mut host_rx);

    // Host ends the game with results.
    host.end_session(game_data(&[("winner", json!("Bob"))]));
    pump(&mut joiner, &mut joiner_rx);

    let info = joiner.session_info();
    info!(
        started = info.is_game_started,
        winner = %info.game_data.get("winner").cloned().unwrap_or_default(),
        "final state on joiner"
    );

    // Everyone leaves; local state resets unconditionally.
    joiner.leave_session();
    pump(&mut host, &mut host_rx);
    info!(
        players = host.session_info().player_count,
        "host roster after joiner left"
    );
    host.leave_session();

    Ok(())
}
