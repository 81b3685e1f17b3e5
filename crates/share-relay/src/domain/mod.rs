//! Domain layer for share-relay.

pub mod config;

pub use config::RelayConfig;
