//! Infrastructure layer for share-relay: the WebSocket listener and the
//! per-peer tasks.  Routing decisions live in the application layer.

pub mod ws_server;

pub use ws_server::{run_server, RelayServer};
