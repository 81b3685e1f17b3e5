//! End-to-end tests of the relay over real WebSocket connections.

use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use share_core::{EndpointId, IceCandidate, RelayFrame, SignalEnvelope};
use share_relay::application::PeerDirectory;
use share_relay::domain::RelayConfig;
use share_relay::infrastructure::RelayServer;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ── Helpers ───────────────────────────────────────────────────────────────────

async fn start_relay(config: RelayConfig) -> (SocketAddr, Arc<PeerDirectory>, Arc<AtomicBool>) {
    let server = RelayServer::bind(config).await.unwrap();
    let addr = server.local_addr().unwrap();
    let directory = server.directory();
    let running = Arc::new(AtomicBool::new(true));
    tokio::spawn(server.run(Arc::clone(&running)));
    (addr, directory, running)
}

async fn connect(addr: SocketAddr) -> Client {
    let (ws, _) = connect_async(format!("ws://{addr}/")).await.unwrap();
    ws
}

async fn send(ws: &mut Client, frame: RelayFrame) {
    ws.send(Message::Text(frame.to_json().unwrap())).await.unwrap();
}

async fn recv(ws: &mut Client) -> RelayFrame {
    loop {
        let msg = timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("relay did not answer")
            .expect("relay closed the stream")
            .unwrap();
        if let Message::Text(text) = msg {
            return RelayFrame::from_json(&text).unwrap();
        }
    }
}

async fn register(addr: SocketAddr, id: &str) -> Client {
    let mut ws = connect(addr).await;
    send(&mut ws, RelayFrame::Register { endpoint_id: EndpointId::new(id) }).await;
    assert_eq!(recv(&mut ws).await, RelayFrame::Registered { endpoint_id: EndpointId::new(id) });
    ws
}

fn candidate(from: &str, to: &str) -> SignalEnvelope {
    SignalEnvelope::new(
        EndpointId::new(from),
        EndpointId::new(to),
        IceCandidate::new("candidate:0 1 udp 2130706431 127.0.0.1 50000 typ host").with_media_line("0", 0),
    )
}

// ── Routing ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_signal_reaches_registered_target() {
    // Arrange
    let (addr, _, _running) = start_relay(RelayConfig::ephemeral()).await;
    let mut a = register(addr, "connectionA").await;
    let mut b = register(addr, "connectionB").await;

    // Act
    send(&mut a, RelayFrame::Signal(candidate("connectionA", "connectionB"))).await;

    // Assert
    assert_eq!(recv(&mut b).await, RelayFrame::Signal(candidate("connectionA", "connectionB")));
}

#[tokio::test]
async fn test_unknown_target_is_reported_to_sender() {
    let (addr, _, _running) = start_relay(RelayConfig::ephemeral()).await;
    let mut a = register(addr, "connectionA").await;

    send(&mut a, RelayFrame::Signal(candidate("connectionA", "nobody"))).await;

    let RelayFrame::Error { reason } = recv(&mut a).await else {
        panic!("expected an error frame");
    };
    assert!(reason.contains("nobody"), "reason: {reason}");
}

#[tokio::test]
async fn test_duplicate_registration_is_rejected() {
    let (addr, _, _running) = start_relay(RelayConfig::ephemeral()).await;
    let _first = register(addr, "connectionA").await;

    let mut second = connect(addr).await;
    send(&mut second, RelayFrame::Register { endpoint_id: EndpointId::new("connectionA") }).await;

    assert!(matches!(recv(&mut second).await, RelayFrame::Error { .. }));
}

#[tokio::test]
async fn test_signal_before_register_is_rejected() {
    let (addr, _, _running) = start_relay(RelayConfig::ephemeral()).await;
    let mut ws = connect(addr).await;

    send(&mut ws, RelayFrame::Signal(candidate("connectionA", "connectionB"))).await;

    let RelayFrame::Error { reason } = recv(&mut ws).await else {
        panic!("expected an error frame");
    };
    assert!(reason.contains("register"), "reason: {reason}");
}

// ── Lifecycle ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_disconnect_releases_the_id() {
    // Arrange
    let (addr, directory, _running) = start_relay(RelayConfig::ephemeral()).await;
    let a = register(addr, "connectionA").await;
    assert!(directory.is_registered(&EndpointId::new("connectionA")));

    // Act
    drop(a);

    // Assert
    timeout(Duration::from_secs(5), async {
        while directory.is_registered(&EndpointId::new("connectionA")) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("id was never released");
    let _again = register(addr, "connectionA").await;
}

#[tokio::test]
async fn test_silent_connection_times_out() {
    let (addr, _, _running) = start_relay(RelayConfig {
        register_timeout: Duration::from_millis(100),
        ..RelayConfig::ephemeral()
    })
    .await;
    let mut ws = connect(addr).await;

    let RelayFrame::Error { reason } = recv(&mut ws).await else {
        panic!("expected an error frame");
    };
    assert!(reason.contains("timed out"), "reason: {reason}");
}
