//! Protocol Messages
//!
//! Wire format for peer-to-peer session communication.
//! Envelopes are serialized as JSON; the transport decides how the
//! resulting text travels between peers.

use serde::{Serialize, Deserialize};
use serde_json::Value;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Opaque peer identity assigned by the transport.
///
/// Unique within a session. The core never inspects its contents.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    /// Wrap an existing transport-assigned identity.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random identity (UUID v4).
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// The identity as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque session identifier, chosen by the host at creation.
///
/// Joiners use it to locate the session. On transports where sessions are
/// addressed by their host, this is the host's peer id.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Wrap a session identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<PeerId> for SessionId {
    fn from(peer: PeerId) -> Self {
        Self(peer.0)
    }
}

// =============================================================================
// PLAYERS AND SESSION DATA
// =============================================================================

/// Open string-keyed map of session-defined game data.
///
/// Merged shallowly, never replaced wholesale: each incoming key overwrites
/// the corresponding stored key, absent keys are preserved.
pub type GameData = serde_json::Map<String, Value>;

/// A player in a session's roster.
///
/// Immutable once created, except via a full roster overwrite applied from a
/// host GameState snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    /// Peer identity, unique within the session.
    pub id: PeerId,
    /// Display name.
    pub name: String,
    /// Whether this player created (and owns) the session.
    pub is_host: bool,
    /// Join time, milliseconds since epoch.
    pub joined_at: i64,
}

// =============================================================================
// MESSAGE PAYLOADS
// =============================================================================

/// Session message payloads, one variant per wire kind.
///
/// A closed union: dispatch matches exhaustively, so adding a kind forces
/// every handler site to be revisited at compile time. An unknown kind on the
/// wire fails JSON decoding and is logged and dropped at the decoding feed
/// point (`GameSession::dispatch_json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
#[serde(rename_all_fields = "camelCase")]
pub enum GameMessage {
    /// A peer announces itself to the session.
    PlayerJoin {
        /// Display name chosen by the joiner.
        player_name: String,
        /// The joiner's own peer identity.
        player_id: PeerId,
    },

    /// A peer is leaving the session.
    PlayerLeave {
        /// The leaver's peer identity.
        player_id: PeerId,
    },

    /// The host starts the game.
    GameStart {
        /// Full game data at start time.
        game_data: GameData,
        /// Start time, milliseconds since epoch.
        started_at: i64,
    },

    /// Full or partial authoritative state snapshot.
    ///
    /// Every field is optional; an absent field means "no update".
    GameState {
        /// Full roster replacement, insertion-ordered.
        #[serde(skip_serializing_if = "Option::is_none", default)]
        players: Option<Vec<Player>>,
        /// Game data to merge in.
        #[serde(skip_serializing_if = "Option::is_none", default)]
        game_data: Option<GameData>,
        /// Started flag override.
        #[serde(skip_serializing_if = "Option::is_none", default)]
        is_game_started: Option<bool>,
    },

    /// Session-defined player action; the core only delivers it.
    PlayerAction(Value),

    /// The game has ended.
    GameEnd {
        /// Final results to merge into game data.
        results: GameData,
        /// End time, milliseconds since epoch.
        ended_at: i64,
    },

    /// Session-defined chat payload; the core only delivers it.
    ChatMessage(Value),
}

impl GameMessage {
    /// Wire name of this message's kind, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            GameMessage::PlayerJoin { .. } => "player_join",
            GameMessage::PlayerLeave { .. } => "player_leave",
            GameMessage::GameStart { .. } => "game_start",
            GameMessage::GameState { .. } => "game_state",
            GameMessage::PlayerAction(_) => "player_action",
            GameMessage::GameEnd { .. } => "game_end",
            GameMessage::ChatMessage(_) => "chat_message",
        }
    }
}

// =============================================================================
// ENVELOPE
// =============================================================================

/// The unit of cross-peer communication.
///
/// Wire shape: `{ kind, payload, timestamp, senderId }`. Immutable once
/// constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Kind and payload, flattened to the wire's `kind`/`payload` fields.
    #[serde(flatten)]
    pub message: GameMessage,
    /// Emission time, milliseconds since epoch.
    pub timestamp: i64,
    /// Identity of the emitting peer.
    #[serde(rename = "senderId")]
    pub sender_id: PeerId,
}

impl Envelope {
    /// Construct an envelope stamped with the current time.
    pub fn new(message: GameMessage, sender_id: PeerId) -> Self {
        Self {
            message,
            timestamp: chrono::Utc::now().timestamp_millis(),
            sender_id,
        }
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data(pairs: &[(&str, Value)]) -> GameData {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_envelope_wire_shape() {
        let msg = GameMessage::PlayerJoin {
            player_name: "Alice".to_string(),
            player_id: PeerId::new("peer-a"),
        };
        let env = Envelope::new(msg, PeerId::new("peer-a"));
        let json: Value = serde_json::from_str(&env.to_json().unwrap()).unwrap();

        assert_eq!(json["kind"], "player_join");
        assert_eq!(json["payload"]["playerName"], "Alice");
        assert_eq!(json["payload"]["playerId"], "peer-a");
        assert_eq!(json["senderId"], "peer-a");
        assert!(json["timestamp"].is_i64());
    }

    #[test]
    fn test_envelope_roundtrip() {
        let msg = GameMessage::GameStart {
            game_data: data(&[("round", json!(1))]),
            started_at: 1_700_000_000_000,
        };
        let env = Envelope::new(msg, PeerId::new("host"));

        let parsed = Envelope::from_json(&env.to_json().unwrap()).unwrap();
        assert_eq!(parsed.sender_id, PeerId::new("host"));
        match parsed.message {
            GameMessage::GameStart { game_data, started_at } => {
                assert_eq!(game_data.get("round"), Some(&json!(1)));
                assert_eq!(started_at, 1_700_000_000_000);
            }
            other => panic!("wrong kind: {}", other.kind()),
        }
    }

    #[test]
    fn test_game_state_optional_fields() {
        // Absent fields must decode as None, not as errors.
        let raw = r#"{
            "kind": "game_state",
            "payload": { "gameData": { "x": 1 } },
            "timestamp": 0,
            "senderId": "host"
        }"#;
        let env = Envelope::from_json(raw).unwrap();
        match env.message {
            GameMessage::GameState { players, game_data, is_game_started } => {
                assert!(players.is_none());
                assert!(is_game_started.is_none());
                assert_eq!(game_data.unwrap().get("x"), Some(&json!(1)));
            }
            other => panic!("wrong kind: {}", other.kind()),
        }
    }

    #[test]
    fn test_game_state_skips_absent_fields() {
        let msg = GameMessage::GameState {
            players: None,
            game_data: None,
            is_game_started: Some(true),
        };
        let env = Envelope::new(msg, PeerId::new("host"));
        let json: Value = serde_json::from_str(&env.to_json().unwrap()).unwrap();

        assert!(json["payload"].get("players").is_none());
        assert!(json["payload"].get("gameData").is_none());
        assert_eq!(json["payload"]["isGameStarted"], true);
    }

    #[test]
    fn test_player_wire_fields() {
        let player = Player {
            id: PeerId::new("p1"),
            name: "Bob".to_string(),
            is_host: true,
            joined_at: 42,
        };
        let json = serde_json::to_value(&player).unwrap();
        assert_eq!(json["id"], "p1");
        assert_eq!(json["isHost"], true);
        assert_eq!(json["joinedAt"], 42);
    }

    #[test]
    fn test_unknown_kind_is_an_error() {
        let raw = r#"{
            "kind": "teleport",
            "payload": {},
            "timestamp": 0,
            "senderId": "x"
        }"#;
        assert!(Envelope::from_json(raw).is_err());
    }

    #[test]
    fn test_opaque_payload_passthrough() {
        let action = json!({ "move": "e4", "seq": 7 });
        let env = Envelope::new(
            GameMessage::PlayerAction(action.clone()),
            PeerId::new("p2"),
        );
        let parsed = Envelope::from_json(&env.to_json().unwrap()).unwrap();
        match parsed.message {
            GameMessage::PlayerAction(v) => assert_eq!(v, action),
            other => panic!("wrong kind: {}", other.kind()),
        }
    }

    #[test]
    fn test_all_kind_names() {
        let variants = [
            (GameMessage::PlayerLeave { player_id: PeerId::new("p") }, "player_leave"),
            (GameMessage::GameEnd { results: GameData::new(), ended_at: 0 }, "game_end"),
            (GameMessage::ChatMessage(json!("hi")), "chat_message"),
        ];
        for (msg, kind) in variants {
            assert_eq!(msg.kind(), kind);
            let env = Envelope::new(msg, PeerId::new("p"));
            let json: Value = serde_json::from_str(&env.to_json().unwrap()).unwrap();
            assert_eq!(json["kind"], kind);
        }
    }
}
