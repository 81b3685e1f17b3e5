//! share-relay library crate.
//!
//! A minimal signaling relay: each WebSocket connection registers under one
//! endpoint id, and every `signal` frame it sends is forwarded to the
//! connection registered under the envelope's target id.  The relay never
//! inspects the negotiation payload.
//!
//! ```text
//! connectionA ──ws──┐                  ┌──ws── connectionB
//!                   └─ share-relay ────┘
//!   domain/          RelayConfig
//!   application/     PeerDirectory: id → outbound queue
//!   infrastructure/  ws_server: accept loop, per-peer tasks
//! ```
//!
//! There is no authentication: the first connection to claim an id owns it
//! until it disconnects.

/// Domain layer: plain configuration types (no I/O).
pub mod domain;

/// Application layer: registration and routing.
pub mod application;

/// Infrastructure layer: the WebSocket server.
pub mod infrastructure;
