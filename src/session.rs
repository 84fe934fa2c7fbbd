//! Session Management
//!
//! Host-authoritative session lifecycle, player roster, and state merge
//! rules. One [`GameSession`] value exists per active session; it is the
//! single owner of session state, and inbound envelopes are applied one at a
//! time through [`GameSession::dispatch`].

use std::sync::Arc;
use std::time::Duration;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{info, warn, debug};

use crate::protocol::{Envelope, GameData, GameMessage, PeerId, Player, SessionId};
use crate::transport::Transport;

/// Current time in milliseconds since epoch.
fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// =============================================================================
// ERRORS
// =============================================================================

/// Session lifecycle errors.
///
/// Send failures are deliberately not represented here: a failed broadcast is
/// logged and never rolls back the local state change that preceded it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// No transport bound when a lifecycle operation needed one.
    #[error("Transport not bound")]
    NotInitialized,

    /// A host-only operation was called by a non-host peer.
    #[error("Only the host can perform this operation")]
    NotHost,
}

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Configuration for a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Upper bound on the wait for transport readiness during join.
    ///
    /// Joining proceeds (with a warning) when the transport never fires its
    /// readiness signal within this window.
    pub ready_timeout: Duration,
    /// Capacity of the session event broadcast channel.
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ready_timeout: Duration::from_secs(5),
            event_capacity: 64,
        }
    }
}

// =============================================================================
// SESSION EVENTS
// =============================================================================

/// Observable session state changes.
///
/// Emitted on an explicit broadcast channel; subscribe via
/// [`GameSession::subscribe`]. Lagging or absent subscribers never block
/// dispatch.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A player was added to the roster.
    PlayerJoined(Player),
    /// A player left the session.
    PlayerLeft(PeerId),
    /// The game started (locally or via an inbound GameStart).
    GameStarted,
    /// The game ended.
    GameEnded,
    /// An authoritative state snapshot was applied.
    StateSynced,
    /// The local peer left; session state was reset.
    SessionLeft,
}

// =============================================================================
// ROSTER
// =============================================================================

/// The set of players in a session, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    players: Vec<Player>,
}

impl Roster {
    /// Create an empty roster.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a player, overwriting in place if the identity already exists.
    pub fn add(&mut self, player: Player) {
        match self.players.iter_mut().find(|p| p.id == player.id) {
            Some(slot) => *slot = player,
            None => self.players.push(player),
        }
    }

    /// Remove a player by identity. No-op if absent; returns whether a
    /// player was removed.
    pub fn remove(&mut self, id: &PeerId) -> bool {
        let before = self.players.len();
        self.players.retain(|p| &p.id != id);
        self.players.len() != before
    }

    /// Ordered snapshot of the current players.
    pub fn snapshot(&self) -> Vec<Player> {
        self.players.clone()
    }

    /// Clear and repopulate from a host-provided sequence.
    ///
    /// Only used when applying an inbound GameState snapshot; insertion
    /// order is whatever the host sent.
    pub fn replace_all(&mut self, players: Vec<Player>) {
        self.players = players;
    }

    /// Look up a player by identity.
    pub fn get(&self, id: &PeerId) -> Option<&Player> {
        self.players.iter().find(|p| &p.id == id)
    }

    /// The player flagged as host, if any.
    pub fn host(&self) -> Option<&Player> {
        self.players.iter().find(|p| p.is_host)
    }

    /// Number of players.
    pub fn len(&self) -> usize {
        self.players.len()
    }

    /// Whether the roster is empty.
    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    /// Remove all players.
    pub fn clear(&mut self) {
        self.players.clear();
    }
}

// =============================================================================
// STATE STORE
// =============================================================================

/// Session-defined game data plus the started flag.
///
/// Data is merged, never replaced: each incoming key overwrites the stored
/// key, keys absent from the update are preserved. Last write per key wins;
/// acceptable because the host is the sole authoritative writer.
#[derive(Debug, Clone, Default)]
pub struct StateStore {
    data: GameData,
    started: bool,
}

impl StateStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Shallow key-wise overlay of `partial` onto the stored data.
    pub fn merge(&mut self, partial: &GameData) {
        for (key, value) in partial {
            self.data.insert(key.clone(), value.clone());
        }
    }

    /// Set the started flag.
    pub fn set_started(&mut self, started: bool) {
        self.started = started;
    }

    /// Whether the game is currently started.
    pub fn started(&self) -> bool {
        self.started
    }

    /// Owned snapshot of the game data.
    pub fn data(&self) -> GameData {
        self.data.clone()
    }

    /// Look up a single key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Reset to empty, not started.
    pub fn clear(&mut self) {
        self.data.clear();
        self.started = false;
    }
}

// =============================================================================
// SESSION INFO
// =============================================================================

/// Read-only snapshot of a session, detached from the live state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    /// Session identifier; `None` when no session is active.
    pub game_id: Option<SessionId>,
    /// Players in insertion order.
    pub players: Vec<Player>,
    /// Current game data.
    pub game_data: GameData,
    /// Whether the game is started.
    pub is_game_started: bool,
    /// Whether the local peer is the host.
    pub is_host: bool,
    /// The host's identity, when known.
    pub host_id: Option<PeerId>,
    /// Number of players in the roster.
    pub player_count: usize,
}

// =============================================================================
// GAME SESSION
// =============================================================================

/// Handler for session-defined payloads (player actions, chat).
///
/// Receives the sender identity and the opaque payload, exactly once per
/// envelope, in arrival order.
pub type PayloadHandler = Box<dyn FnMut(&PeerId, &Value) + Send>;

/// Session lifecycle controller and message dispatcher.
///
/// Owns the roster and state store for one session. All mutation flows
/// through the lifecycle methods or [`dispatch`](Self::dispatch); under the
/// single-threaded dispatch model this gives a total order over local state
/// changes. Cross-peer consistency rests on the host being the sole
/// authoritative writer.
pub struct GameSession {
    config: SessionConfig,
    transport: Option<Arc<dyn Transport>>,
    game_id: Option<SessionId>,
    host_id: Option<PeerId>,
    roster: Roster,
    store: StateStore,
    action_handler: Option<PayloadHandler>,
    chat_handler: Option<PayloadHandler>,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl GameSession {
    /// Create a session context with default configuration.
    pub fn new() -> Self {
        Self::with_config(SessionConfig::default())
    }

    /// Create a session context with explicit configuration.
    pub fn with_config(config: SessionConfig) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_capacity);
        Self {
            config,
            transport: None,
            game_id: None,
            host_id: None,
            roster: Roster::new(),
            store: StateStore::new(),
            action_handler: None,
            chat_handler: None,
            event_tx,
        }
    }

    /// Bind the peer transport. Must happen before create/join/start.
    pub fn bind_transport(&mut self, transport: Arc<dyn Transport>) {
        self.transport = Some(transport);
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// Register the handler for inbound PlayerAction payloads.
    pub fn on_player_action(&mut self, handler: impl FnMut(&PeerId, &Value) + Send + 'static) {
        self.action_handler = Some(Box::new(handler));
    }

    /// Register the handler for inbound ChatMessage payloads.
    pub fn on_chat_message(&mut self, handler: impl FnMut(&PeerId, &Value) + Send + 'static) {
        self.chat_handler = Some(Box::new(handler));
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Create a new session as host.
    ///
    /// Sets the host identity to the local transport identity and seeds the
    /// roster with the local player. Contacts no peer (there are none yet).
    pub fn create_session(
        &mut self,
        session_id: SessionId,
        display_name: &str,
    ) -> Result<SessionId, SessionError> {
        let transport = self.transport.as_ref().ok_or(SessionError::NotInitialized)?;
        let local = transport.local_id();

        self.reset_local();
        self.game_id = Some(session_id.clone());
        self.host_id = Some(local.clone());
        self.store.set_started(false);
        self.roster.add(Player {
            id: local,
            name: display_name.to_string(),
            is_host: true,
            joined_at: now_ms(),
        });

        info!(session = %session_id, "session created");
        Ok(session_id)
    }

    /// Join an existing session.
    ///
    /// Connects to the session's address, waits for the transport's readiness
    /// signal (bounded by [`SessionConfig::ready_timeout`]), then announces
    /// itself with a PlayerJoin broadcast. The local roster converges once
    /// the host answers with a full GameState snapshot.
    pub async fn join_session(
        &mut self,
        session_id: SessionId,
        display_name: &str,
    ) -> Result<(), SessionError> {
        let transport = Arc::clone(
            self.transport.as_ref().ok_or(SessionError::NotInitialized)?,
        );

        self.reset_local();
        self.game_id = Some(session_id.clone());

        let ready = transport.connect(&session_id);
        match tokio::time::timeout(self.config.ready_timeout, ready).await {
            Ok(Ok(())) => debug!(session = %session_id, "transport ready"),
            Ok(Err(_)) => {
                warn!(session = %session_id, "transport gave no readiness signal, proceeding")
            }
            Err(_) => warn!(
                session = %session_id,
                timeout_ms = self.config.ready_timeout.as_millis() as u64,
                "readiness wait timed out, proceeding"
            ),
        }

        let local = transport.local_id();
        let envelope = Envelope::new(
            GameMessage::PlayerJoin {
                player_name: display_name.to_string(),
                player_id: local.clone(),
            },
            local,
        );
        if !transport.broadcast(&envelope) {
            warn!(session = %session_id, "join announcement failed to send");
        }

        info!(session = %session_id, "joined session");
        Ok(())
    }

    /// Start the game. Host only.
    ///
    /// Merges `initial_data` into the game data and broadcasts GameStart
    /// with the full merged map. Fails with [`SessionError::NotHost`] before
    /// any mutation or send when called by a non-host.
    pub fn start_session(&mut self, initial_data: GameData) -> Result<(), SessionError> {
        let transport = self.transport.as_ref().ok_or(SessionError::NotInitialized)?;
        let local = transport.local_id();
        if self.current_host_id().as_ref() != Some(&local) {
            return Err(SessionError::NotHost);
        }

        self.store.set_started(true);
        self.store.merge(&initial_data);

        let message = GameMessage::GameStart {
            game_data: self.store.data(),
            started_at: now_ms(),
        };
        let _ = self.send_message(message, None);

        info!("game started");
        let _ = self.event_tx.send(SessionEvent::GameStarted);
        Ok(())
    }

    /// End the game.
    ///
    /// Deliberately not host-gated: any participant may end the session, as
    /// observed in the protocol this crate replicates. Merges `results` into
    /// the game data and broadcasts GameEnd best-effort.
    pub fn end_session(&mut self, results: GameData) {
        self.store.set_started(false);
        self.store.merge(&results);

        match &self.transport {
            Some(transport) => {
                let envelope = Envelope::new(
                    GameMessage::GameEnd {
                        results,
                        ended_at: now_ms(),
                    },
                    transport.local_id(),
                );
                if !transport.broadcast(&envelope) {
                    warn!("game end broadcast failed");
                }
            }
            None => warn!("no transport bound, game end not broadcast"),
        }

        info!("game ended");
        let _ = self.event_tx.send(SessionEvent::GameEnded);
    }

    /// Leave the session.
    ///
    /// Best-effort PlayerLeave broadcast and transport disconnect, then an
    /// unconditional reset of all session state. Always succeeds locally and
    /// is legal from any state.
    pub fn leave_session(&mut self) {
        if let Some(transport) = &self.transport {
            let local = transport.local_id();
            let envelope = Envelope::new(
                GameMessage::PlayerLeave {
                    player_id: local.clone(),
                },
                local,
            );
            if !transport.broadcast(&envelope) {
                warn!("leave announcement failed to send");
            }
            transport.disconnect();
        }

        self.reset_local();
        info!("left session");
        let _ = self.event_tx.send(SessionEvent::SessionLeft);
    }

    /// Merge `updates` into the local game data; if the local peer is the
    /// host, broadcast the full merged map as an authoritative GameState.
    pub fn update_state(&mut self, updates: GameData) {
        self.store.merge(&updates);

        if !self.is_host() {
            return;
        }
        let message = GameMessage::GameState {
            players: None,
            game_data: Some(self.store.data()),
            is_game_started: None,
        };
        let _ = self.send_message(message, None);
    }

    /// Send a session message: directed when `target` is given, broadcast
    /// otherwise.
    ///
    /// Fire-and-forget: a transport-level failure is logged and does not
    /// surface as an error.
    pub fn send_message(
        &self,
        message: GameMessage,
        target: Option<&PeerId>,
    ) -> Result<(), SessionError> {
        let transport = self.transport.as_ref().ok_or(SessionError::NotInitialized)?;
        let envelope = Envelope::new(message, transport.local_id());
        let delivered = match target {
            Some(peer) => transport.send_to(peer, &envelope),
            None => transport.broadcast(&envelope),
        };
        if !delivered {
            warn!(
                kind = envelope.message.kind(),
                target = target.map(PeerId::as_str).unwrap_or("*"),
                "send failed"
            );
        }
        Ok(())
    }

    /// Read-only snapshot of the session.
    pub fn session_info(&self) -> SessionInfo {
        let host_id = self.current_host_id();
        SessionInfo {
            game_id: self.game_id.clone(),
            players: self.roster.snapshot(),
            game_data: self.store.data(),
            is_game_started: self.store.started(),
            is_host: self.is_host(),
            host_id,
            player_count: self.roster.len(),
        }
    }

    /// Whether the local peer is the session host.
    pub fn is_host(&self) -> bool {
        match (&self.transport, self.current_host_id()) {
            (Some(transport), Some(host)) => transport.local_id() == host,
            _ => false,
        }
    }

    // -------------------------------------------------------------------------
    // Inbound dispatch
    // -------------------------------------------------------------------------

    /// Apply one inbound envelope.
    ///
    /// The feed point for transport events. Envelopes must be applied one at
    /// a time; each is fully processed, including any outbound send it
    /// triggers, before the next. `sender` is the transport-reported origin
    /// and takes precedence over the envelope's claimed sender.
    pub fn dispatch(&mut self, sender: PeerId, envelope: Envelope) {
        debug!(kind = envelope.message.kind(), sender = %sender, "inbound envelope");

        match envelope.message {
            GameMessage::PlayerJoin { player_name, .. } => {
                self.handle_player_join(sender, player_name);
            }

            GameMessage::PlayerLeave { .. } => {
                if self.roster.remove(&sender) {
                    info!(peer = %sender, "player left");
                    let _ = self.event_tx.send(SessionEvent::PlayerLeft(sender));
                }
            }

            GameMessage::GameStart { game_data, .. } => {
                self.store.set_started(true);
                self.store.merge(&game_data);
                info!(peer = %sender, "game started by remote");
                let _ = self.event_tx.send(SessionEvent::GameStarted);
            }

            GameMessage::GameState { players, game_data, is_game_started } => {
                if let Some(players) = players {
                    self.roster.replace_all(players);
                }
                if let Some(data) = game_data {
                    self.store.merge(&data);
                }
                if let Some(started) = is_game_started {
                    self.store.set_started(started);
                }
                let _ = self.event_tx.send(SessionEvent::StateSynced);
            }

            GameMessage::PlayerAction(payload) => {
                match &mut self.action_handler {
                    Some(handler) => handler(&sender, &payload),
                    None => debug!(peer = %sender, "player action with no handler registered"),
                }
            }

            GameMessage::GameEnd { results, .. } => {
                self.store.set_started(false);
                self.store.merge(&results);
                info!(peer = %sender, "game ended by remote");
                let _ = self.event_tx.send(SessionEvent::GameEnded);
            }

            GameMessage::ChatMessage(payload) => {
                match &mut self.chat_handler {
                    Some(handler) => handler(&sender, &payload),
                    None => debug!(peer = %sender, "chat message with no handler registered"),
                }
            }
        }
    }

    /// Decode and apply one inbound envelope from its JSON wire form.
    ///
    /// Undecodable input, including an unknown message kind, is logged and
    /// dropped; it is never fatal and never mutates session state.
    pub fn dispatch_json(&mut self, sender: PeerId, raw: &str) {
        match Envelope::from_json(raw) {
            Ok(envelope) => self.dispatch(sender, envelope),
            Err(err) => warn!(peer = %sender, %err, "dropping undecodable envelope"),
        }
    }

    fn handle_player_join(&mut self, sender: PeerId, player_name: String) {
        let player = Player {
            id: sender.clone(),
            name: player_name,
            is_host: false,
            joined_at: now_ms(),
        };
        info!(peer = %sender, name = %player.name, "player joined");
        self.roster.add(player.clone());
        let _ = self.event_tx.send(SessionEvent::PlayerJoined(player));

        // The host answers every join with a full authoritative snapshot,
        // directed at the joiner.
        if !self.is_host() {
            return;
        }
        let snapshot = GameMessage::GameState {
            players: Some(self.roster.snapshot()),
            game_data: Some(self.store.data()),
            is_game_started: Some(self.store.started()),
        };
        let _ = self.send_message(snapshot, Some(&sender));
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    /// The host's identity: set locally at create time, or learned from the
    /// roster once a host-flagged player is known.
    fn current_host_id(&self) -> Option<PeerId> {
        self.host_id
            .clone()
            .or_else(|| self.roster.host().map(|p| p.id.clone()))
    }

    /// Reset all session-scoped state. The transport binding survives.
    fn reset_local(&mut self) {
        self.game_id = None;
        self.host_id = None;
        self.roster.clear();
        self.store.clear();
    }
}

impl Default for GameSession {
    fn default() -> Self {
        Self::new()
    }
}
