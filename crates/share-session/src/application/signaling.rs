//! Signaling transport port.
//!
//! A signaling transport ferries [`SignalPayload`]s between two endpoints
//! before (and while) the media connection exists.  The payloads are opaque
//! to the transport.

use async_trait::async_trait;
use share_core::{EndpointId, SignalEnvelope, SignalPayload};
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors from a signaling transport.
#[derive(Debug, Error)]
pub enum SignalingError {
    /// The relay could not be reached or dropped the connection.
    #[error("signaling relay unavailable at {url}: {reason}")]
    TransportUnavailable { url: String, reason: String },

    /// No endpoint with this id is registered.
    #[error("unknown signaling peer {0}")]
    UnknownPeer(EndpointId),

    /// The relay refused a request.
    #[error("relay rejected request: {0}")]
    Rejected(String),

    /// A frame could not be encoded or decoded.
    #[error("signaling frame codec error: {0}")]
    Frame(#[from] serde_json::Error),

    /// The transport was closed locally.
    #[error("signaling transport closed")]
    Closed,
}

/// Delivers negotiation payloads for one local endpoint.
#[async_trait]
pub trait SignalingTransport: Send + Sync {
    /// Endpoint this handle sends as.
    fn local_id(&self) -> &EndpointId;

    /// Sends `payload` to `to`.  Payloads are passed by value.
    async fn send(&self, to: &EndpointId, payload: SignalPayload) -> Result<(), SignalingError>;

    /// Takes the stream of envelopes addressed to this endpoint.
    ///
    /// Returns `None` after the first call.
    fn take_inbox(&self) -> Option<mpsc::UnboundedReceiver<SignalEnvelope>>;

    async fn close(&self);
}
