//! Relay configuration.
//!
//! A plain struct populated by `main.rs` from CLI arguments and environment
//! variables.  Tests build it directly.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Port the relay listens on unless told otherwise.
pub const DEFAULT_RELAY_PORT: u16 = 8080;

/// All runtime settings of the relay.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address the WebSocket listener binds to.
    pub bind_addr: SocketAddr,

    /// How long a new connection may take to send its `register` frame.
    pub register_timeout: Duration,
}

impl RelayConfig {
    /// Loopback listener on an OS-assigned port.
    pub fn ephemeral() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
            ..Self::default()
        }
    }
}

impl Default for RelayConfig {
    /// | Field            | Default        |
    /// |------------------|----------------|
    /// | bind_addr        | `0.0.0.0:8080` |
    /// | register_timeout | 10 seconds     |
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_RELAY_PORT)),
            register_timeout: Duration::from_secs(10),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_binds_all_interfaces_on_8080() {
        // Arrange / Act
        let cfg = RelayConfig::default();

        // Assert
        assert_eq!(cfg.bind_addr.to_string(), "0.0.0.0:8080");
    }

    #[test]
    fn test_ephemeral_is_loopback_port_zero() {
        let cfg = RelayConfig::ephemeral();
        assert!(cfg.bind_addr.ip().is_loopback());
        assert_eq!(cfg.bind_addr.port(), 0);
        assert_eq!(cfg.register_timeout, RelayConfig::default().register_timeout);
    }
}
