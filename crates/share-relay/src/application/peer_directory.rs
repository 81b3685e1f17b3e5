//! Registration and routing of signaling envelopes.
//!
//! Every live WebSocket connection owns one outbound queue.  The directory
//! maps endpoint ids to those queues; routing an envelope is a map lookup and
//! a non-blocking push.  Each registration carries the id of the connection
//! that made it, so a connection that already lost its slot cannot remove
//! the one that replaced it.

use std::collections::HashMap;
use std::sync::Mutex;

use share_core::{EndpointId, RelayFrame, SignalEnvelope};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

/// Outbound queue of one connection.
pub type PeerSender = mpsc::UnboundedSender<RelayFrame>;

/// Errors reported back to the sending peer as `error` frames.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    #[error("endpoint id '{0}' is already registered")]
    AlreadyRegistered(EndpointId),

    #[error("no endpoint registered as '{0}'")]
    UnknownTarget(EndpointId),

    #[error("endpoint '{0}' disconnected")]
    TargetGone(EndpointId),

    #[error("connection is registered as '{registered}' but sent as '{claimed}'")]
    SenderMismatch { registered: EndpointId, claimed: EndpointId },

    #[error("connection must register before sending signals")]
    NotRegistered,
}

struct PeerEntry {
    connection: Uuid,
    tx: PeerSender,
}

/// Shared map of registered endpoints.
#[derive(Default)]
pub struct PeerDirectory {
    peers: Mutex<HashMap<EndpointId, PeerEntry>>,
}

impl PeerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `id` for `connection`.
    ///
    /// A slot whose queue is already closed counts as free.
    ///
    /// # Errors
    ///
    /// [`RelayError::AlreadyRegistered`] if another live connection owns `id`.
    pub fn register(&self, id: EndpointId, connection: Uuid, tx: PeerSender) -> Result<(), RelayError> {
        let mut peers = self.peers.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = peers.get(&id) {
            if existing.connection != connection && !existing.tx.is_closed() {
                return Err(RelayError::AlreadyRegistered(id));
            }
        }
        info!(endpoint = %id, %connection, "endpoint registered");
        peers.insert(id, PeerEntry { connection, tx });
        Ok(())
    }

    /// Releases `id` if `connection` still owns it.
    pub fn unregister(&self, id: &EndpointId, connection: Uuid) -> bool {
        let mut peers = self.peers.lock().unwrap_or_else(|e| e.into_inner());
        match peers.get(id) {
            Some(entry) if entry.connection == connection => {
                peers.remove(id);
                info!(endpoint = %id, %connection, "endpoint unregistered");
                true
            }
            _ => false,
        }
    }

    /// Forwards `envelope` from the connection registered as `sender`.
    ///
    /// # Errors
    ///
    /// - [`RelayError::SenderMismatch`] if `envelope.from` is not `sender`.
    /// - [`RelayError::UnknownTarget`] if nobody is registered as `envelope.to`.
    /// - [`RelayError::TargetGone`] if the target's connection is closing.
    pub fn route(&self, sender: &EndpointId, envelope: SignalEnvelope) -> Result<(), RelayError> {
        if envelope.from != *sender {
            return Err(RelayError::SenderMismatch {
                registered: sender.clone(),
                claimed: envelope.from,
            });
        }
        let tx = self
            .peers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&envelope.to)
            .map(|entry| entry.tx.clone())
            .ok_or_else(|| RelayError::UnknownTarget(envelope.to.clone()))?;

        let target = envelope.to.clone();
        debug!(from = %envelope.from, to = %target, kind = envelope.payload.label(), "routing signal");
        tx.send(RelayFrame::Signal(envelope)).map_err(|_| RelayError::TargetGone(target))
    }

    pub fn is_registered(&self, id: &EndpointId) -> bool {
        self.peers.lock().unwrap_or_else(|e| e.into_inner()).contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.peers.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use share_core::{SessionDescription, SignalPayload};

    use super::*;

    fn id(s: &str) -> EndpointId {
        EndpointId::new(s)
    }

    fn offer(from: &str, to: &str) -> SignalEnvelope {
        SignalEnvelope::new(id(from), id(to), SessionDescription::offer("v=0"))
    }

    // ── register / unregister ────────────────────────────────────────────────

    #[test]
    fn test_register_then_duplicate_is_rejected() {
        // Arrange
        let dir = PeerDirectory::new();
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();

        // Act
        dir.register(id("connectionA"), Uuid::new_v4(), tx1).unwrap();
        let second = dir.register(id("connectionA"), Uuid::new_v4(), tx2);

        // Assert
        assert_eq!(second, Err(RelayError::AlreadyRegistered(id("connectionA"))));
        assert_eq!(dir.len(), 1);
    }

    #[test]
    fn test_closed_slot_can_be_reclaimed() {
        let dir = PeerDirectory::new();
        let (tx1, rx1) = mpsc::unbounded_channel();
        dir.register(id("connectionA"), Uuid::new_v4(), tx1).unwrap();
        drop(rx1);

        let (tx2, _rx2) = mpsc::unbounded_channel();
        assert!(dir.register(id("connectionA"), Uuid::new_v4(), tx2).is_ok());
    }

    #[test]
    fn test_unregister_only_by_owner() {
        let dir = PeerDirectory::new();
        let owner = Uuid::new_v4();
        let (tx, _rx) = mpsc::unbounded_channel();
        dir.register(id("connectionA"), owner, tx).unwrap();

        assert!(!dir.unregister(&id("connectionA"), Uuid::new_v4()));
        assert!(dir.is_registered(&id("connectionA")));
        assert!(dir.unregister(&id("connectionA"), owner));
        assert!(dir.is_empty());
    }

    // ── route ────────────────────────────────────────────────────────────────

    #[test]
    fn test_route_delivers_to_target_queue() {
        // Arrange
        let dir = PeerDirectory::new();
        let (tx_a, _rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        dir.register(id("connectionA"), Uuid::new_v4(), tx_a).unwrap();
        dir.register(id("connectionB"), Uuid::new_v4(), tx_b).unwrap();

        // Act
        dir.route(&id("connectionA"), offer("connectionA", "connectionB")).unwrap();

        // Assert
        let Ok(RelayFrame::Signal(envelope)) = rx_b.try_recv() else {
            panic!("expected a signal frame");
        };
        assert_eq!(envelope.from, id("connectionA"));
        assert!(matches!(envelope.payload, SignalPayload::Description(_)));
    }

    #[test]
    fn test_route_to_unknown_target_fails() {
        let dir = PeerDirectory::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        dir.register(id("connectionA"), Uuid::new_v4(), tx).unwrap();

        let result = dir.route(&id("connectionA"), offer("connectionA", "nobody"));

        assert_eq!(result, Err(RelayError::UnknownTarget(id("nobody"))));
    }

    #[test]
    fn test_route_with_spoofed_sender_fails() {
        let dir = PeerDirectory::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        dir.register(id("connectionB"), Uuid::new_v4(), tx).unwrap();

        let result = dir.route(&id("connectionA"), offer("mallory", "connectionB"));

        assert!(matches!(result, Err(RelayError::SenderMismatch { .. })));
    }

    #[test]
    fn test_route_to_closed_queue_reports_target_gone() {
        let dir = PeerDirectory::new();
        let (tx, rx) = mpsc::unbounded_channel();
        dir.register(id("connectionB"), Uuid::new_v4(), tx).unwrap();
        drop(rx);

        let result = dir.route(&id("connectionA"), offer("connectionA", "connectionB"));

        assert_eq!(result, Err(RelayError::TargetGone(id("connectionB"))));
    }
}
