//! Application layer for share-relay.
//!
//! Knows which connection owns which endpoint id and where an envelope must
//! go.  Sockets and framing live in the infrastructure layer.

pub mod peer_directory;

pub use peer_directory::{PeerDirectory, RelayError};
