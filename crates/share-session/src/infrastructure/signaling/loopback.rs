//! In-process signaling hub.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use share_core::{EndpointId, SignalEnvelope, SignalPayload};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::application::signaling::{SignalingError, SignalingTransport};

/// Routes envelopes between endpoints registered on the same hub.
#[derive(Default)]
pub struct LoopbackSignalingHub {
    inboxes: Mutex<HashMap<EndpointId, mpsc::UnboundedSender<SignalEnvelope>>>,
}

impl LoopbackSignalingHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers `id` and returns its transport handle.
    ///
    /// Registering an id again replaces the earlier inbox.
    pub fn register(self: &Arc<Self>, id: EndpointId) -> Arc<LoopbackSignaling> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inboxes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.clone(), tx);
        debug!(endpoint = %id, "registered on loopback signaling hub");
        Arc::new(LoopbackSignaling {
            hub: Arc::clone(self),
            id,
            inbox: Mutex::new(Some(rx)),
            closed: AtomicBool::new(false),
        })
    }

    fn route(&self, envelope: SignalEnvelope) -> Result<(), SignalingError> {
        let inboxes = self.inboxes.lock().unwrap_or_else(|e| e.into_inner());
        let tx = inboxes
            .get(&envelope.to)
            .ok_or_else(|| SignalingError::UnknownPeer(envelope.to.clone()))?;
        let to = envelope.to.clone();
        tx.send(envelope).map_err(|_| SignalingError::UnknownPeer(to))
    }

    fn unregister(&self, id: &EndpointId) {
        self.inboxes.lock().unwrap_or_else(|e| e.into_inner()).remove(id);
    }
}

/// One endpoint's handle on a [`LoopbackSignalingHub`].
pub struct LoopbackSignaling {
    hub: Arc<LoopbackSignalingHub>,
    id: EndpointId,
    inbox: Mutex<Option<mpsc::UnboundedReceiver<SignalEnvelope>>>,
    closed: AtomicBool,
}

#[async_trait]
impl SignalingTransport for LoopbackSignaling {
    fn local_id(&self) -> &EndpointId {
        &self.id
    }

    async fn send(&self, to: &EndpointId, payload: SignalPayload) -> Result<(), SignalingError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SignalingError::Closed);
        }
        trace!(from = %self.id, %to, kind = payload.label(), "loopback signal");
        self.hub.route(SignalEnvelope::new(self.id.clone(), to.clone(), payload))
    }

    fn take_inbox(&self) -> Option<mpsc::UnboundedReceiver<SignalEnvelope>> {
        self.inbox.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.hub.unregister(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use share_core::{IceCandidate, SessionDescription};

    use super::*;

    #[tokio::test]
    async fn test_envelopes_reach_the_addressed_endpoint() {
        // Arrange
        let hub = LoopbackSignalingHub::new();
        let a = hub.register(EndpointId::new("connectionA"));
        let b = hub.register(EndpointId::new("connectionB"));
        let mut inbox_b = b.take_inbox().unwrap();

        // Act
        a.send(b.local_id(), SessionDescription::offer("v=0\r\n").into())
            .await
            .unwrap();
        a.send(b.local_id(), IceCandidate::new("candidate:0").into()).await.unwrap();

        // Assert
        let first = inbox_b.recv().await.unwrap();
        assert_eq!(first.from, EndpointId::new("connectionA"));
        assert_eq!(first.payload.label(), "offer");
        assert_eq!(inbox_b.recv().await.unwrap().payload.label(), "candidate");
    }

    #[tokio::test]
    async fn test_unknown_peer_is_an_error() {
        let hub = LoopbackSignalingHub::new();
        let a = hub.register(EndpointId::new("connectionA"));

        let err = a
            .send(&EndpointId::new("nobody"), SignalPayload::NegotiationRequest)
            .await
            .unwrap_err();

        assert!(matches!(err, SignalingError::UnknownPeer(id) if id.as_str() == "nobody"));
    }

    #[tokio::test]
    async fn test_closed_handle_refuses_to_send_and_unregisters() {
        let hub = LoopbackSignalingHub::new();
        let a = hub.register(EndpointId::new("connectionA"));
        let b = hub.register(EndpointId::new("connectionB"));

        b.close().await;
        b.close().await;

        assert!(matches!(
            a.send(b.local_id(), SignalPayload::NegotiationRequest).await,
            Err(SignalingError::UnknownPeer(_))
        ));
        assert!(matches!(
            b.send(a.local_id(), SignalPayload::NegotiationRequest).await,
            Err(SignalingError::Closed)
        ));
    }

    #[test]
    fn test_inbox_can_be_taken_once() {
        let hub = LoopbackSignalingHub::new();
        let a = hub.register(EndpointId::new("connectionA"));
        assert!(a.take_inbox().is_some());
        assert!(a.take_inbox().is_none());
    }
}
