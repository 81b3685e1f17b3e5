//! WebSocket server: accept loop and per-peer tasks.
//!
//! Each accepted connection goes through:
//!
//! 1. the WebSocket upgrade handshake,
//! 2. registration: the first text frame must be `register`, answered with
//!    `registered` or `error`,
//! 3. forwarding: `signal` frames are routed through the [`PeerDirectory`];
//!    routing failures are reported back as `error` frames and do not close
//!    the connection.
//!
//! A writer task drains the connection's outbound queue, so routing never
//! waits on a slow peer's socket.  The accept loop polls a shared `running`
//! flag so Ctrl+C in `main.rs` stops it.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use share_core::{EndpointId, RelayFrame};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::{accept_async, WebSocketStream};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::application::peer_directory::{PeerDirectory, PeerSender, RelayError};
use crate::domain::config::RelayConfig;

const ACCEPT_POLL: Duration = Duration::from_millis(200);

type WsReader = SplitStream<WebSocketStream<TcpStream>>;

// ── Public API ────────────────────────────────────────────────────────────────

/// A bound relay that has not started accepting yet.
pub struct RelayServer {
    listener: TcpListener,
    config: Arc<RelayConfig>,
    directory: Arc<PeerDirectory>,
}

impl RelayServer {
    /// Binds the listener on `config.bind_addr`.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is in use or cannot be bound.
    pub async fn bind(config: RelayConfig) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(config.bind_addr)
            .await
            .with_context(|| format!("failed to bind signaling relay on {}", config.bind_addr))?;
        Ok(Self {
            listener,
            config: Arc::new(config),
            directory: Arc::new(PeerDirectory::new()),
        })
    }

    /// Address actually bound; differs from the config when port 0 was used.
    ///
    /// # Errors
    ///
    /// Propagates the OS error from `getsockname`.
    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        self.listener.local_addr().context("failed to read relay listener address")
    }

    pub fn directory(&self) -> Arc<PeerDirectory> {
        Arc::clone(&self.directory)
    }

    /// Accepts connections until `running` is cleared.
    pub async fn run(self, running: Arc<AtomicBool>) -> anyhow::Result<()> {
        info!("signaling relay listening on {}", self.local_addr()?);

        loop {
            if !running.load(Ordering::Relaxed) {
                info!("shutdown flag set; stopping accept loop");
                break;
            }

            match timeout(ACCEPT_POLL, self.listener.accept()).await {
                Ok(Ok((stream, peer_addr))) => {
                    debug!("new relay connection from {peer_addr}");
                    let config = Arc::clone(&self.config);
                    let directory = Arc::clone(&self.directory);
                    tokio::spawn(async move {
                        handle_peer(stream, peer_addr, config, directory).await;
                    });
                }
                Ok(Err(e)) => error!("accept error: {e}"),
                Err(_) => {}
            }
        }
        Ok(())
    }
}

/// Binds `config.bind_addr` and serves until `running` is cleared.
///
/// # Errors
///
/// Returns an error if the listener cannot be bound.
pub async fn run_server(config: RelayConfig, running: Arc<AtomicBool>) -> anyhow::Result<()> {
    RelayServer::bind(config).await?.run(running).await
}

// ── Per-peer handler ──────────────────────────────────────────────────────────

async fn handle_peer(stream: TcpStream, peer_addr: SocketAddr, config: Arc<RelayConfig>, directory: Arc<PeerDirectory>) {
    match run_peer(stream, peer_addr, &config, &directory).await {
        Ok(()) => info!("relay connection {peer_addr} closed"),
        Err(e) => warn!("relay connection {peer_addr} closed with error: {e:#}"),
    }
}

async fn run_peer(
    stream: TcpStream,
    peer_addr: SocketAddr,
    config: &RelayConfig,
    directory: &PeerDirectory,
) -> anyhow::Result<()> {
    let ws = accept_async(stream)
        .await
        .with_context(|| format!("WebSocket handshake failed with {peer_addr}"))?;
    let (mut sink, mut reader) = ws.split();

    // Writer: everything this peer receives goes through one queue.
    let (tx, mut rx) = mpsc::unbounded_channel::<RelayFrame>();
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let text = match frame.to_json() {
                Ok(text) => text,
                Err(e) => {
                    error!("relay frame serialization error: {e}");
                    continue;
                }
            };
            if sink.send(WsMessage::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let connection = Uuid::new_v4();
    let registered = match timeout(config.register_timeout, await_register(&mut reader, &tx, directory, connection)).await
    {
        Ok(result) => result,
        Err(_) => {
            let _ = tx.send(RelayFrame::Error {
                reason: "registration timed out".to_string(),
            });
            None
        }
    };

    if let Some(id) = &registered {
        info!(endpoint = %id, "relay peer {peer_addr} registered");
        forward_signals(&mut reader, &tx, directory, id).await;
        directory.unregister(id, connection);
    }

    drop(tx);
    let _ = writer.await;
    Ok(())
}

/// Reads frames until a successful `register`.  `None` if the peer left first.
async fn await_register(
    reader: &mut WsReader,
    tx: &PeerSender,
    directory: &PeerDirectory,
    connection: Uuid,
) -> Option<EndpointId> {
    while let Some(text) = next_text(reader).await {
        match RelayFrame::from_json(&text) {
            Ok(RelayFrame::Register { endpoint_id }) => {
                match directory.register(endpoint_id.clone(), connection, tx.clone()) {
                    Ok(()) => {
                        let _ = tx.send(RelayFrame::Registered { endpoint_id: endpoint_id.clone() });
                        return Some(endpoint_id);
                    }
                    Err(e) => reply_error(tx, &e),
                }
            }
            Ok(_) => reply_error(tx, &RelayError::NotRegistered),
            Err(e) => {
                let _ = tx.send(RelayFrame::Error {
                    reason: format!("invalid frame: {e}"),
                });
            }
        }
    }
    None
}

async fn forward_signals(reader: &mut WsReader, tx: &PeerSender, directory: &PeerDirectory, id: &EndpointId) {
    while let Some(text) = next_text(reader).await {
        match RelayFrame::from_json(&text) {
            Ok(RelayFrame::Signal(envelope)) => {
                if let Err(e) = directory.route(id, envelope) {
                    debug!(endpoint = %id, "routing failed: {e}");
                    reply_error(tx, &e);
                }
            }
            Ok(other) => debug!(endpoint = %id, ?other, "unexpected frame after registration"),
            Err(e) => {
                warn!(endpoint = %id, "invalid relay frame: {e}");
                let _ = tx.send(RelayFrame::Error {
                    reason: format!("invalid frame: {e}"),
                });
            }
        }
    }
}

/// Next text frame, skipping control frames.  `None` once the peer is gone.
async fn next_text(reader: &mut WsReader) -> Option<String> {
    loop {
        match reader.next().await? {
            Ok(WsMessage::Text(text)) => return Some(text),
            Ok(WsMessage::Close(_)) => return None,
            Ok(WsMessage::Binary(_)) => warn!("unexpected binary WebSocket frame (ignored)"),
            Ok(_) => {}
            Err(WsError::ConnectionClosed | WsError::Protocol(_)) => return None,
            Err(e) => {
                warn!("relay WebSocket error: {e}");
                return None;
            }
        }
    }
}

fn reply_error(tx: &PeerSender, err: &RelayError) {
    // The peer may already be gone.
    let _ = tx.send(RelayFrame::Error { reason: err.to_string() });
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_on_port_zero_reports_real_port() {
        // Arrange / Act
        let server = RelayServer::bind(RelayConfig::ephemeral()).await.unwrap();

        // Assert
        assert_ne!(server.local_addr().unwrap().port(), 0);
    }

    #[tokio::test]
    async fn test_bind_conflict_is_an_error() {
        let first = RelayServer::bind(RelayConfig::ephemeral()).await.unwrap();
        let taken = first.local_addr().unwrap();

        let second = RelayServer::bind(RelayConfig {
            bind_addr: taken,
            ..RelayConfig::default()
        })
        .await;

        assert!(second.is_err());
    }

    #[tokio::test]
    async fn test_run_returns_when_flag_cleared() {
        let server = RelayServer::bind(RelayConfig::ephemeral()).await.unwrap();
        let running = Arc::new(AtomicBool::new(false));

        let result = timeout(Duration::from_secs(2), server.run(running)).await;

        assert!(matches!(result, Ok(Ok(()))));
    }
}
