//! # P2P Session
//!
//! Host-authoritative session-state replication for small peer groups over an
//! already-established peer transport.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       P2P SESSION                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  protocol.rs  - Wire types                                   │
//! │  ├── PeerId / SessionId  - Opaque identities                 │
//! │  ├── GameMessage         - Closed payload union (7 kinds)    │
//! │  └── Envelope            - {kind, payload, timestamp, sender}│
//! │                                                              │
//! │  session.rs   - Session core                                 │
//! │  ├── Roster              - Insertion-ordered player set      │
//! │  ├── StateStore          - Merge-on-receive game data        │
//! │  └── GameSession         - Lifecycle + inbound dispatch      │
//! │                                                              │
//! │  transport.rs - Transport seam (consumed, not owned)         │
//! │  ├── Transport           - Capability trait                  │
//! │  └── LoopbackHub         - In-memory transport for tests     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Authority Model
//!
//! One participant (the host) owns the canonical state. Non-host peers
//! converge from the host's messages: every join is answered with a full
//! state snapshot, game start and authoritative state updates originate from
//! the host, and game data is merged key-wise with last-write-wins. Inbound
//! envelopes are applied one at a time through
//! [`GameSession::dispatch`](session::GameSession::dispatch), so all local
//! state changes are totally ordered.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod protocol;
pub mod session;
pub mod transport;

// Re-export commonly used types
pub use protocol::{Envelope, GameData, GameMessage, PeerId, Player, SessionId};
pub use session::{
    GameSession, Roster, SessionConfig, SessionError, SessionEvent, SessionInfo, StateStore,
};
pub use transport::{LoopbackHub, LoopbackTransport, Transport};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
