//! # share-core
//!
//! Shared library for ScreenShare containing the negotiation state machine,
//! the session data model, and the remote-input codec.
//!
//! This crate is used by both the session runtime and the signaling relay.
//! It has zero dependencies on async runtimes, sockets, or capture APIs.
//!
//! # Architecture overview (for beginners)
//!
//! ScreenShare connects two peers: a *sharer* that streams its screen and a
//! *viewer* that renders the stream and sends pointer events back.  Before any
//! media can flow, the two peers must agree on how to talk to each other.
//! That agreement is called *negotiation*:
//!
//! 1. One side creates an **offer** describing what it wants to send.
//! 2. The other side replies with an **answer**.
//! 3. Meanwhile both sides discover network paths (**ICE candidates**) and
//!    trade them so the transport can find a route.
//!
//! This crate (`share-core`) is the shared foundation.  It defines:
//!
//! - **`domain`** – Pure negotiation rules with no I/O.  The most important
//!   piece is [`NegotiationState`]: the per-endpoint state machine that says
//!   which operation is legal in which state and buffers early candidates.
//!
//! - **`protocol`** – How bytes travel between peers.  Pointer events are
//!   encoded into a compact tagged binary map, and signaling payloads are
//!   JSON frames understood by the relay.

pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `share_core::NegotiationState` instead of the full module path.
pub use domain::candidate::IceCandidate;
pub use domain::description::{DescriptionError, SdpKind, SessionDescription};
pub use domain::endpoint::{EndpointId, NegotiationRole};
pub use domain::frame::{CapturedFrame, FrameError, PixelBuffer, PixelFormat, Rotation};
pub use domain::negotiation::{
    CandidateDisposition, EndpointSnapshot, NegotiationError, NegotiationState, RemoteOutcome, RemotePlan,
};
pub use domain::state::{DataChannelState, IceConnectionState, IceGatheringState, SignalingState};
pub use protocol::codec::{decode_pointer_event, encode_pointer_event, CodecError};
pub use protocol::pointer::{PointerEvent, PointerKind};
pub use protocol::signal::{RelayFrame, SignalEnvelope, SignalPayload};
