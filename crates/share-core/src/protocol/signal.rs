//! Signaling payloads and the relay's WebSocket frames.
//!
//! Both are JSON.  A [`SignalEnvelope`] carries one negotiation payload from
//! one endpoint to another; the relay wraps envelopes in [`RelayFrame`]s and
//! never looks inside the payload.

use serde::{Deserialize, Serialize};

use crate::domain::candidate::IceCandidate;
use crate::domain::description::SessionDescription;
use crate::domain::endpoint::EndpointId;

/// A negotiation payload travelling between two endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalPayload {
    /// An offer or an answer.
    Description(SessionDescription),
    /// One gathered network path, forwarded as soon as it is generated.
    Candidate(IceCandidate),
    /// Asks the designated offerer to start a new negotiation round.
    NegotiationRequest,
}

impl SignalPayload {
    /// Short label for log lines.
    pub fn label(&self) -> &'static str {
        match self {
            SignalPayload::Description(d) => match d.kind {
                crate::SdpKind::Offer => "offer",
                crate::SdpKind::Answer => "answer",
            },
            SignalPayload::Candidate(_) => "candidate",
            SignalPayload::NegotiationRequest => "negotiation-request",
        }
    }
}

impl From<SessionDescription> for SignalPayload {
    fn from(desc: SessionDescription) -> Self {
        SignalPayload::Description(desc)
    }
}

impl From<IceCandidate> for SignalPayload {
    fn from(candidate: IceCandidate) -> Self {
        SignalPayload::Candidate(candidate)
    }
}

/// Addressed payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalEnvelope {
    pub from: EndpointId,
    pub to: EndpointId,
    pub payload: SignalPayload,
}

impl SignalEnvelope {
    pub fn new(from: EndpointId, to: EndpointId, payload: impl Into<SignalPayload>) -> Self {
        Self {
            from,
            to,
            payload: payload.into(),
        }
    }
}

/// One WebSocket text frame between a peer and the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RelayFrame {
    /// Client → relay: claim an endpoint id for this connection.
    Register { endpoint_id: EndpointId },
    /// Relay → client: registration accepted.
    Registered { endpoint_id: EndpointId },
    /// Either direction: an envelope to forward / a forwarded envelope.
    Signal(SignalEnvelope),
    /// Relay → client: the last request could not be served.
    Error { reason: String },
}

impl RelayFrame {
    /// Serializes the frame to its JSON text form.
    ///
    /// # Errors
    ///
    /// Propagates [`serde_json::Error`]; in practice this cannot fail for
    /// the types involved.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parses a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns [`serde_json::Error`] for malformed JSON or an unknown `op`.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
