//! ScreenShare signaling relay.
//!
//! Ferries negotiation payloads (offers, answers, candidates) between
//! session endpoints that cannot reach each other in-process.
//!
//! # Usage
//!
//! ```text
//! share-relay [OPTIONS]
//!
//! Options:
//!   --bind <ADDR>   Address to listen on [default: 0.0.0.0]
//!   --port <PORT>   Port to listen on [default: 8080]
//! ```
//!
//! # Environment variable overrides
//!
//! | Variable           | Default   | Description        |
//! |--------------------|-----------|--------------------|
//! | `SHARE_RELAY_BIND` | `0.0.0.0` | Listen address     |
//! | `SHARE_RELAY_PORT` | `8080`    | Listen port        |
//! | `RUST_LOG`         | `info`    | tracing filter     |

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use share_relay::domain::config::DEFAULT_RELAY_PORT;
use share_relay::domain::RelayConfig;
use share_relay::infrastructure::run_server;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// ScreenShare signaling relay.
#[derive(Debug, Parser)]
#[command(name = "share-relay", about = "WebSocket signaling relay for ScreenShare sessions", version)]
struct Cli {
    /// IP address to bind the relay to.
    #[arg(long, default_value = "0.0.0.0", env = "SHARE_RELAY_BIND")]
    bind: String,

    /// TCP port to listen on.
    #[arg(long, default_value_t = DEFAULT_RELAY_PORT, env = "SHARE_RELAY_PORT")]
    port: u16,

    /// Seconds a new connection may take to register.
    #[arg(long, default_value_t = 10, env = "SHARE_RELAY_REGISTER_TIMEOUT")]
    register_timeout: u64,
}

impl Cli {
    /// # Errors
    ///
    /// Returns an error if `--bind` is not a valid IP address.
    fn into_relay_config(self) -> anyhow::Result<RelayConfig> {
        let bind_addr: SocketAddr = format!("{}:{}", self.bind, self.port)
            .parse()
            .with_context(|| format!("invalid relay bind address: '{}:{}'", self.bind, self.port))?;
        Ok(RelayConfig {
            bind_addr,
            register_timeout: Duration::from_secs(self.register_timeout),
        })
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = cli.into_relay_config()?;
    info!("ScreenShare relay starting on {}", config.bind_addr);

    let running = Arc::new(AtomicBool::new(true));
    let running_signal = Arc::clone(&running);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl+C signal: {e}");
            return;
        }
        info!("received Ctrl+C, shutting down");
        running_signal.store(false, Ordering::SeqCst);
    });

    run_server(config, running).await?;
    info!("ScreenShare relay stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults_give_default_config() {
        // Arrange
        let cli = Cli::parse_from(["share-relay"]);

        // Act
        let cfg = cli.into_relay_config().unwrap();

        // Assert
        assert_eq!(cfg.bind_addr, RelayConfig::default().bind_addr);
        assert_eq!(cfg.register_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_cli_custom_bind_and_port() {
        let cli = Cli::parse_from(["share-relay", "--bind", "127.0.0.1", "--port", "9100"]);
        let cfg = cli.into_relay_config().unwrap();
        assert_eq!(cfg.bind_addr.to_string(), "127.0.0.1:9100");
    }

    #[test]
    fn test_cli_invalid_bind_is_rejected() {
        let cli = Cli::parse_from(["share-relay", "--bind", "not-an-ip"]);
        assert!(cli.into_relay_config().is_err());
    }
}
