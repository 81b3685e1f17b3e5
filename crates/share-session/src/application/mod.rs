//! Application layer of the session runtime.
//!
//! - **`negotiate`** – [`NegotiationEngine`](negotiate::NegotiationEngine):
//!   one endpoint's offer/answer/candidate logic, serialized behind a
//!   single-writer lock and applied to a media connection.
//! - **`orchestrate`** – [`SessionOrchestrator`](orchestrate::SessionOrchestrator):
//!   owns the engines, relays payloads, exposes `start` / `stop`.
//! - **`capture_pipeline`** – frame handoff from the capture thread to the
//!   outbound video track (most recent frame wins).
//! - **`remote_input`** – pointer events over the control data channel.
//! - **`media`** / **`signaling`** – the ports implemented by the
//!   infrastructure layer.

pub mod capture_pipeline;
pub mod error;
pub mod media;
pub mod negotiate;
pub mod orchestrate;
pub mod remote_input;
pub mod signaling;
