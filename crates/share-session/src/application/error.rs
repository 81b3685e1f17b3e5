//! Session-level error type.
//!
//! Every failure the host application can observe maps onto one variant of
//! [`SessionError`].  Lower-layer errors are wrapped with `#[from]` so `?`
//! works across layer boundaries.

use share_core::{
    CodecError, DataChannelState, DescriptionError, EndpointId, NegotiationError,
};
use thiserror::Error;

use crate::application::media::TransportError;
use crate::application::signaling::SignalingError;
use crate::infrastructure::frame_source::CaptureError;

/// Errors surfaced by the engine, the orchestrator and the input channel.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Invalid state, malformed description, illegal ICE step, or closed endpoint.
    #[error(transparent)]
    Negotiation(#[from] NegotiationError),

    /// The media engine failed an operation other than description handling.
    #[error("media transport error: {0}")]
    Transport(#[from] TransportError),

    /// A message was sent on a data channel that is not `open`.
    #[error("data channel `{label}` is not ready ({state})")]
    ChannelNotReady {
        label: String,
        state: DataChannelState,
    },

    /// A remote-input message could not be decoded.
    #[error("malformed remote-input message: {0}")]
    MalformedMessage(#[from] CodecError),

    /// ICE reached `failed` for this endpoint.
    #[error("connection failed for endpoint {0}")]
    ConnectionFailed(EndpointId),

    /// Signaling relay unreachable or signaling delivery failed.
    #[error(transparent)]
    Signaling(#[from] SignalingError),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error("session already started")]
    AlreadyStarted,

    #[error("session is stopped")]
    Stopped,

    #[error("no local endpoint {0} in this session")]
    UnknownEndpoint(EndpointId),
}

impl SessionError {
    /// Wraps an engine's refusal of a description as a description error.
    pub(crate) fn from_description_transport(err: TransportError) -> Self {
        match err {
            TransportError::DescriptionRejected(reason) => {
                SessionError::Negotiation(NegotiationError::Description(DescriptionError::Rejected(reason)))
            }
            other => SessionError::Transport(other),
        }
    }

    /// Maps a data-channel send failure.
    pub(crate) fn from_channel_transport(err: TransportError) -> Self {
        match err {
            TransportError::ChannelNotReady { label, state } => SessionError::ChannelNotReady { label, state },
            other => SessionError::Transport(other),
        }
    }

    /// `true` for the "operation outside its valid signaling state" class.
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, SessionError::Negotiation(NegotiationError::InvalidState { .. }))
    }

    /// `true` for malformed or rejected descriptions.
    pub fn is_description_error(&self) -> bool {
        matches!(self, SessionError::Negotiation(NegotiationError::Description(_)))
    }

    /// `true` when signaling could not reach the relay.
    pub fn is_transport_unavailable(&self) -> bool {
        matches!(
            self,
            SessionError::Signaling(SignalingError::TransportUnavailable { .. })
        )
    }
}
