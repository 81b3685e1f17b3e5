//! Storage infrastructure: configuration file persistence.
//!
//! The `config` sub-module reads the TOML configuration file from the
//! platform config directory, falls back to defaults on first run, and writes
//! it back when asked.

pub mod config;
