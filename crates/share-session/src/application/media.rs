//! Media transport ports.
//!
//! The session core drives a peer-to-peer media engine through these traits
//! and never looks at its internals.  A connection reports what happens on
//! its own (gathered candidates, ICE state changes, channels and tracks
//! opened by the peer) as [`TransportEvent`]s on a channel taken once with
//! [`MediaConnection::take_events`].

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use share_core::{
    CapturedFrame, DataChannelState, EndpointId, IceCandidate, IceConnectionState,
    IceGatheringState, SessionDescription,
};
use thiserror::Error;
use tokio::sync::{mpsc, watch};

/// Errors reported by a media engine.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The engine refused a session description.
    #[error("description rejected: {0}")]
    DescriptionRejected(String),

    /// The engine refused a remote candidate.
    #[error("candidate rejected: {0}")]
    CandidateRejected(String),

    /// A send was attempted on a data channel that is not `open`.
    #[error("data channel `{label}` is {state}, not open")]
    ChannelNotReady {
        label: String,
        state: DataChannelState,
    },

    /// The call does not fit the engine's own negotiation state.
    #[error("invalid transport state: {0}")]
    InvalidState(String),

    /// One-time engine setup failed.
    #[error("media engine initialization failed: {0}")]
    Initialization(String),

    /// The connection, channel or track is closed.
    #[error("closed")]
    Closed,
}

/// How media lines are bundled onto transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BundlePolicy {
    #[default]
    Balanced,
    MaxBundle,
    MaxCompat,
}

/// Settings for one peer connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Endpoint that owns the connection (used in logs).
    pub endpoint_id: EndpointId,
    pub bundle_policy: BundlePolicy,
}

impl ConnectionConfig {
    pub fn new(endpoint_id: EndpointId) -> Self {
        Self {
            endpoint_id,
            bundle_policy: BundlePolicy::default(),
        }
    }
}

/// An inbound video track announced by the peer.
#[derive(Debug)]
pub struct RemoteVideoTrack {
    pub track_id: String,
    /// Frames as received, in sending order.
    pub frames: mpsc::Receiver<CapturedFrame>,
}

/// Something a connection did on its own.
pub enum TransportEvent {
    /// A local candidate was discovered and should go to the peer now.
    CandidateGenerated(IceCandidate),
    GatheringStateChanged(IceGatheringState),
    ConnectionStateChanged(IceConnectionState),
    /// Tracks or channels changed after the first handshake.
    NegotiationNeeded,
    /// The peer opened a data channel towards us.
    DataChannelOpened(Arc<dyn DataChannel>),
    /// The peer started sending a video track.
    RemoteTrack(RemoteVideoTrack),
}

impl fmt::Debug for TransportEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CandidateGenerated(c) => f.debug_tuple("CandidateGenerated").field(c).finish(),
            Self::GatheringStateChanged(s) => f.debug_tuple("GatheringStateChanged").field(s).finish(),
            Self::ConnectionStateChanged(s) => f.debug_tuple("ConnectionStateChanged").field(s).finish(),
            Self::NegotiationNeeded => f.write_str("NegotiationNeeded"),
            Self::DataChannelOpened(ch) => f.debug_tuple("DataChannelOpened").field(&ch.label()).finish(),
            Self::RemoteTrack(t) => f.debug_tuple("RemoteTrack").field(&t.track_id).finish(),
        }
    }
}

/// A media engine able to create peer connections.
#[async_trait]
pub trait MediaTransport: Send + Sync {
    /// Performs process-wide engine setup.
    ///
    /// Must be safe to call more than once; only the first call does work.
    fn initialize(&self) -> Result<(), TransportError>;

    /// Creates a connection in the `new` / `stable` state.
    async fn create_connection(
        &self,
        config: ConnectionConfig,
    ) -> Result<Arc<dyn MediaConnection>, TransportError>;
}

/// One peer connection as seen by the negotiation engine.
#[async_trait]
pub trait MediaConnection: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription, TransportError>;

    async fn create_answer(&self) -> Result<SessionDescription, TransportError>;

    /// Applies a local description.  The first call starts candidate gathering.
    async fn set_local_description(&self, desc: &SessionDescription) -> Result<(), TransportError>;

    async fn set_remote_description(&self, desc: &SessionDescription) -> Result<(), TransportError>;

    /// Discards a pending local offer.
    async fn rollback(&self) -> Result<(), TransportError>;

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), TransportError>;

    /// Attaches an outbound video track and returns the sink frames are pushed into.
    async fn add_video_track(&self, track_id: &str) -> Result<Arc<dyn VideoSink>, TransportError>;

    /// Creates a data channel; it stays `connecting` until negotiated and connected.
    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannel>, TransportError>;

    /// Takes the event stream.  Returns `None` after the first call.
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>>;

    /// Closes the connection with every channel and track on it.
    async fn close(&self);
}

/// A bidirectional ordered message channel.
#[async_trait]
pub trait DataChannel: Send + Sync {
    fn label(&self) -> &str;

    fn state(&self) -> DataChannelState;

    /// Observes state changes.
    fn watch_state(&self) -> watch::Receiver<DataChannelState>;

    /// Sends one message.
    ///
    /// # Errors
    ///
    /// [`TransportError::ChannelNotReady`] unless the channel is `open`.
    async fn send(&self, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Receives the next message; `None` once the channel is closed.
    async fn recv(&self) -> Option<Vec<u8>>;

    async fn close(&self);
}

/// Ingestion point of an outbound video track.
#[async_trait]
pub trait VideoSink: Send + Sync {
    /// Hands one frame to the transport.  May wait while the transport is busy.
    async fn deliver(&self, frame: CapturedFrame) -> Result<(), TransportError>;
}
