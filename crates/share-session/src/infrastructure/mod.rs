//! Infrastructure layer: concrete adapters behind the application ports.
//!
//! - [`frame_source`]: synthetic and mock screen capture.
//! - [`loopback_media`]: in-process media engine.
//! - [`signaling`]: in-process hub and WebSocket relay client.
//! - [`storage`]: TOML configuration.
//! - [`sinks`]: recording input injector and frame renderer.

pub mod frame_source;
pub mod loopback_media;
pub mod signaling;
pub mod sinks;
pub mod storage;
