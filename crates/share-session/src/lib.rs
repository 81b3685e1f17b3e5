//! share-session library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # What does share-session do? (for beginners)
//!
//! A screen-sharing session has two peers.  The *sharer* captures its screen
//! and streams it; the *viewer* renders the stream and sends pointer events
//! back so it can remote-control the sharer.
//!
//! Getting there takes three cooperating pieces:
//!
//! 1. A **negotiation engine** per endpoint drives the offer/answer exchange
//!    and forwards network-path candidates to the peer.
//! 2. A **session orchestrator** owns the engines, relays payloads between
//!    them through a signaling transport, and wires the video track and the
//!    control data channel once the connection is up.
//! 3. A **capture pipeline** timestamps screen frames and hands them to the
//!    outbound track without ever blocking the capture thread.
//!
//! The media engine itself is behind the [`application::media`] traits.  The
//! infrastructure layer ships an in-process loopback engine that is enough to
//! run a full session inside one process.

/// Application layer: engine, orchestrator, pipelines and the ports they drive.
pub mod application;

/// Infrastructure layer: loopback media, signaling transports, frame sources
/// and configuration storage.
pub mod infrastructure;
