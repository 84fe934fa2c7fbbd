//! Transport Capability
//!
//! The session core consumes an already-established peer transport through
//! the [`Transport`] trait; it never owns connection establishment itself.
//! A loopback implementation is provided for tests and the demo binary.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::protocol::{Envelope, PeerId, SessionId};

/// Capability contract for the underlying peer transport.
///
/// Sends are fire-and-forget: a `false` return means the transport could not
/// hand the envelope off, and the core logs it without rolling back state.
pub trait Transport: Send + Sync {
    /// The stable local peer identity assigned by the transport.
    fn local_id(&self) -> PeerId;

    /// Begin connecting to the peer group addressed by `target`.
    ///
    /// The returned receiver fires once the connection is usable. A transport
    /// that cannot report readiness may drop the sender; callers then fall
    /// back to a bounded wait.
    fn connect(&self, target: &SessionId) -> oneshot::Receiver<()>;

    /// Tear down all peer connections.
    fn disconnect(&self);

    /// Send an envelope to a single peer. Returns false on failure.
    fn send_to(&self, peer: &PeerId, envelope: &Envelope) -> bool;

    /// Send an envelope to every connected peer. Returns false if it could
    /// not be handed to any peer.
    fn broadcast(&self, envelope: &Envelope) -> bool;
}

// =============================================================================
// LOOPBACK TRANSPORT (tests / demo)
// =============================================================================

/// An inbound envelope as delivered by the loopback transport.
pub type Inbound = (PeerId, Envelope);

type PeerMap = HashMap<PeerId, mpsc::UnboundedSender<Inbound>>;

/// In-memory hub connecting [`LoopbackTransport`] endpoints.
///
/// Every registered endpoint can reach every other one; `connect` resolves
/// immediately when the target is registered. Envelopes travel as cloned
/// values, no serialization involved. Cloning the hub yields another handle
/// to the same peer group.
#[derive(Default, Clone)]
pub struct LoopbackHub {
    peers: Arc<Mutex<PeerMap>>,
}

impl LoopbackHub {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new endpoint, returning its transport handle and the
    /// receiver its inbound envelopes arrive on.
    pub fn register(
        &self,
        local: PeerId,
    ) -> (LoopbackTransport, mpsc::UnboundedReceiver<Inbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.peers
            .lock()
            .expect("loopback peer map poisoned")
            .insert(local.clone(), tx);
        let transport = LoopbackTransport {
            hub: self.clone(),
            local,
        };
        (transport, rx)
    }

    fn remove(&self, peer: &PeerId) {
        self.peers
            .lock()
            .expect("loopback peer map poisoned")
            .remove(peer);
    }

    fn deliver(&self, from: &PeerId, to: &PeerId, envelope: &Envelope) -> bool {
        let peers = self.peers.lock().expect("loopback peer map poisoned");
        match peers.get(to) {
            Some(tx) => tx.send((from.clone(), envelope.clone())).is_ok(),
            None => false,
        }
    }

    fn fan_out(&self, from: &PeerId, envelope: &Envelope) -> bool {
        let peers = self.peers.lock().expect("loopback peer map poisoned");
        let mut delivered = false;
        for (id, tx) in peers.iter() {
            if id == from {
                continue;
            }
            if tx.send((from.clone(), envelope.clone())).is_ok() {
                delivered = true;
            }
        }
        delivered
    }

    fn is_registered(&self, peer: &PeerId) -> bool {
        self.peers
            .lock()
            .expect("loopback peer map poisoned")
            .contains_key(peer)
    }
}

/// A single endpoint on a [`LoopbackHub`].
pub struct LoopbackTransport {
    hub: LoopbackHub,
    local: PeerId,
}

impl Transport for LoopbackTransport {
    fn local_id(&self) -> PeerId {
        self.local.clone()
    }

    fn connect(&self, target: &SessionId) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        // Sessions are addressed by their host: readiness means the host
        // endpoint exists on the hub.
        if self.hub.is_registered(&PeerId::new(target.as_str())) {
            let _ = tx.send(());
        } else {
            debug!(target = %target, "loopback connect: target not registered");
            // tx dropped: the caller's readiness wait times out.
        }
        rx
    }

    fn disconnect(&self) {
        self.hub.remove(&self.local);
    }

    fn send_to(&self, peer: &PeerId, envelope: &Envelope) -> bool {
        self.hub.deliver(&self.local, peer, envelope)
    }

    fn broadcast(&self, envelope: &Envelope) -> bool {
        self.hub.fan_out(&self.local, envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::GameMessage;
    use serde_json::json;

    fn chat(from: &PeerId) -> Envelope {
        Envelope::new(GameMessage::ChatMessage(json!("hi")), from.clone())
    }

    #[tokio::test]
    async fn test_directed_send() {
        let hub = LoopbackHub::new();
        let (a, _rx_a) = hub.register(PeerId::new("a"));
        let (_b, mut rx_b) = hub.register(PeerId::new("b"));

        assert!(a.send_to(&PeerId::new("b"), &chat(&a.local_id())));
        let (from, env) = rx_b.recv().await.unwrap();
        assert_eq!(from, PeerId::new("a"));
        assert_eq!(env.message.kind(), "chat_message");
    }

    #[tokio::test]
    async fn test_broadcast_skips_sender() {
        let hub = LoopbackHub::new();
        let (a, mut rx_a) = hub.register(PeerId::new("a"));
        let (_b, mut rx_b) = hub.register(PeerId::new("b"));
        let (_c, mut rx_c) = hub.register(PeerId::new("c"));

        assert!(a.broadcast(&chat(&a.local_id())));
        assert!(rx_b.recv().await.is_some());
        assert!(rx_c.recv().await.is_some());
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_send_to_unknown_peer_fails() {
        let hub = LoopbackHub::new();
        let (a, _rx_a) = hub.register(PeerId::new("a"));
        assert!(!a.send_to(&PeerId::new("ghost"), &chat(&a.local_id())));
    }

    #[tokio::test]
    async fn test_broadcast_with_no_peers_fails() {
        let hub = LoopbackHub::new();
        let (a, _rx_a) = hub.register(PeerId::new("a"));
        assert!(!a.broadcast(&chat(&a.local_id())));
    }

    #[tokio::test]
    async fn test_connect_readiness() {
        let hub = LoopbackHub::new();
        let (_host, _rx_h) = hub.register(PeerId::new("host"));
        let (joiner, _rx_j) = hub.register(PeerId::new("joiner"));

        // Registered target: readiness fires.
        let rx = joiner.connect(&SessionId::new("host"));
        assert!(rx.await.is_ok());

        // Unregistered target: sender dropped, receive errors.
        let rx = joiner.connect(&SessionId::new("nobody"));
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn test_disconnect_removes_endpoint() {
        let hub = LoopbackHub::new();
        let (a, _rx_a) = hub.register(PeerId::new("a"));
        let (b, _rx_b) = hub.register(PeerId::new("b"));

        b.disconnect();
        assert!(!a.send_to(&PeerId::new("b"), &chat(&a.local_id())));
    }
}
