//! Wire formats: the remote-input codec and the signaling frames.

pub mod codec;
pub mod pointer;
pub mod signal;

pub use codec::{decode_pointer_event, encode_pointer_event, CodecError, POINTER_EVENT_TYPE};
pub use pointer::{PointerEvent, PointerKind};
pub use signal::{RelayFrame, SignalEnvelope, SignalPayload};
