//! Signaling transport implementations.
//!
//! - [`loopback`]: an in-process hub; both endpoints live in one process.
//! - [`websocket`]: a client of the `share-relay` WebSocket server.

pub mod loopback;
pub mod websocket;

pub use loopback::{LoopbackSignaling, LoopbackSignalingHub};
pub use websocket::{WebSocketSignaling, DEFAULT_RELAY_URL};
