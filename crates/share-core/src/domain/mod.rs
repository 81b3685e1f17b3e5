//! Domain entities for ScreenShare.
//!
//! This module contains pure negotiation logic with no infrastructure
//! dependencies.
//!
//! # What lives here? (for beginners)
//!
//! Domain code describes *what* a screen-sharing session is, independent of
//! *how* bytes move:
//!
//! - [`endpoint`] – identity of a peer and the deterministic offerer rule.
//! - [`description`] / [`candidate`] – the opaque payloads peers exchange.
//! - [`state`] – the state enums (signaling, ICE gathering, ICE connection,
//!   data channel) and their legal transitions.
//! - [`negotiation`] – the per-endpoint state machine tying it all together.
//! - [`frame`] – captured video frames handed from the capture source to the
//!   transport.
//!
//! Nothing in this module spawns tasks, opens sockets, or reads the clock
//! (except frame timestamps supplied by the caller), so every rule can be
//! unit-tested in isolation.

pub mod candidate;
pub mod description;
pub mod endpoint;
pub mod frame;
pub mod negotiation;
pub mod state;
