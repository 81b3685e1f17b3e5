//! WebSocket client of the signaling relay.
//!
//! On connect the client claims its endpoint id with a `register` frame and
//! waits for `registered`.  Afterwards a reader task forwards every `signal`
//! frame addressed to us into the inbox, and [`SignalingTransport::send`]
//! writes `signal` frames through the shared write half.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use share_core::{EndpointId, RelayFrame, SignalEnvelope, SignalPayload};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::application::signaling::{SignalingError, SignalingTransport};

/// Relay address used when none is configured.
pub const DEFAULT_RELAY_URL: &str = "ws://localhost:8080/";

const REGISTER_TIMEOUT: Duration = Duration::from_secs(5);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Signaling over a `share-relay` WebSocket connection.
pub struct WebSocketSignaling {
    url: String,
    id: EndpointId,
    writer: tokio::sync::Mutex<SplitSink<WsStream, Message>>,
    inbox: Mutex<Option<mpsc::UnboundedReceiver<SignalEnvelope>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl WebSocketSignaling {
    /// Connects to `url` and registers as `local_id`.
    ///
    /// # Errors
    ///
    /// - [`SignalingError::TransportUnavailable`] if the relay cannot be
    ///   reached, drops the connection, or does not answer in time.
    /// - [`SignalingError::Rejected`] if the relay refuses the id.
    pub async fn connect(url: &str, local_id: EndpointId) -> Result<Arc<Self>, SignalingError> {
        let unavailable = |reason: String| SignalingError::TransportUnavailable {
            url: url.to_string(),
            reason,
        };

        let (stream, _response) = connect_async(url).await.map_err(|e| unavailable(e.to_string()))?;
        let (mut writer, mut reader) = stream.split();

        let register = RelayFrame::Register {
            endpoint_id: local_id.clone(),
        }
        .to_json()?;
        writer
            .send(Message::Text(register))
            .await
            .map_err(|e| unavailable(e.to_string()))?;

        match timeout(REGISTER_TIMEOUT, wait_registered(&mut reader, url)).await {
            Ok(result) => result?,
            Err(_) => return Err(unavailable("timed out waiting for registration".to_string())),
        }
        info!(endpoint = %local_id, %url, "registered with signaling relay");

        let (tx, rx) = mpsc::unbounded_channel();
        let reader_task = tokio::spawn(read_loop(reader, tx, local_id.clone()));

        Ok(Arc::new(Self {
            url: url.to_string(),
            id: local_id,
            writer: tokio::sync::Mutex::new(writer),
            inbox: Mutex::new(Some(rx)),
            reader: Mutex::new(Some(reader_task)),
            closed: AtomicBool::new(false),
        }))
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

async fn wait_registered(reader: &mut SplitStream<WsStream>, url: &str) -> Result<(), SignalingError> {
    while let Some(message) = reader.next().await {
        let message = message.map_err(|e| SignalingError::TransportUnavailable {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        let Message::Text(text) = message else {
            continue;
        };
        match RelayFrame::from_json(&text)? {
            RelayFrame::Registered { .. } => return Ok(()),
            RelayFrame::Error { reason } => return Err(SignalingError::Rejected(reason)),
            other => debug!(?other, "ignoring frame before registration"),
        }
    }
    Err(SignalingError::TransportUnavailable {
        url: url.to_string(),
        reason: "relay closed the connection during registration".to_string(),
    })
}

async fn read_loop(
    mut reader: SplitStream<WsStream>,
    inbox: mpsc::UnboundedSender<SignalEnvelope>,
    local_id: EndpointId,
) {
    while let Some(message) = reader.next().await {
        match message {
            Ok(Message::Text(text)) => match RelayFrame::from_json(&text) {
                Ok(RelayFrame::Signal(envelope)) => {
                    if inbox.send(envelope).is_err() {
                        break;
                    }
                }
                Ok(RelayFrame::Error { reason }) => warn!(endpoint = %local_id, "relay error: {reason}"),
                Ok(other) => debug!(?other, "unexpected relay frame"),
                Err(e) => warn!(endpoint = %local_id, "undecodable relay frame: {e}"),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(endpoint = %local_id, "relay connection error: {e}");
                break;
            }
        }
    }
    info!(endpoint = %local_id, "relay connection closed");
}

#[async_trait]
impl SignalingTransport for WebSocketSignaling {
    fn local_id(&self) -> &EndpointId {
        &self.id
    }

    async fn send(&self, to: &EndpointId, payload: SignalPayload) -> Result<(), SignalingError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SignalingError::Closed);
        }
        let frame = RelayFrame::Signal(SignalEnvelope::new(self.id.clone(), to.clone(), payload)).to_json()?;
        self.writer
            .lock()
            .await
            .send(Message::Text(frame))
            .await
            .map_err(|e| SignalingError::TransportUnavailable {
                url: self.url.clone(),
                reason: e.to_string(),
            })
    }

    fn take_inbox(&self) -> Option<mpsc::UnboundedReceiver<SignalEnvelope>> {
        self.inbox.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(e) = self.writer.lock().await.close().await {
            debug!("relay close handshake failed: {e}");
        }
        if let Some(task) = self.reader.lock().unwrap_or_else(|e| e.into_inner()).take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_relay_is_transport_unavailable() {
        // Arrange: grab a free port, then release it so nothing listens there.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        // Act
        let result = WebSocketSignaling::connect(&format!("ws://127.0.0.1:{port}/"), EndpointId::new("a")).await;

        // Assert
        assert!(matches!(result, Err(SignalingError::TransportUnavailable { .. })));
    }

    #[tokio::test]
    async fn test_malformed_url_is_transport_unavailable() {
        let result = WebSocketSignaling::connect("not a url", EndpointId::new("a")).await;
        assert!(matches!(result, Err(SignalingError::TransportUnavailable { .. })));
    }
}
