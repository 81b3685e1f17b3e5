//! In-process media engine.
//!
//! `LoopbackMediaTransport` implements the media ports without sockets or
//! codecs.  Connections created by the same transport share a network
//! registry keyed by ICE username fragment, so two endpoints in one process
//! can find each other from the descriptions and candidates they trade.  The
//! engine still behaves like a real one from the negotiation engine's point
//! of view:
//!
//! - descriptions are SDP text and must carry `a=ice-ufrag`,
//! - the first local description starts candidate gathering,
//! - ICE goes `checking` then `connected` (or `failed`) once both
//!   descriptions and at least one remote candidate are present,
//! - channels and tracks open on the peer only after a completed round on a
//!   connected transport.

mod channel;
mod connection;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use tracing::info;

pub use channel::{LoopbackDataChannel, LoopbackVideoSender};
pub use connection::LoopbackConnection;

use crate::application::media::{ConnectionConfig, MediaConnection, MediaTransport, TransportError};
use connection::ConnectionInner;

/// Host candidates gathered per connection unless configured otherwise.
pub const DEFAULT_CANDIDATE_COUNT: usize = 2;

const FIRST_PORT: u16 = 50_000;

/// Registry shared by all connections of one transport.
#[derive(Default)]
pub(crate) struct LoopbackNetwork {
    peers: Mutex<HashMap<String, Weak<ConnectionInner>>>,
    unreachable: AtomicBool,
    next_port: AtomicU16,
}

impl LoopbackNetwork {
    fn register(&self, ufrag: &str, inner: &Arc<ConnectionInner>) {
        self.peers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(ufrag.to_string(), Arc::downgrade(inner));
    }

    pub(crate) fn unregister(&self, ufrag: &str) {
        self.peers.lock().unwrap_or_else(|e| e.into_inner()).remove(ufrag);
    }

    pub(crate) fn lookup(&self, ufrag: &str) -> Option<Arc<ConnectionInner>> {
        self.peers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(ufrag)
            .and_then(Weak::upgrade)
    }

    pub(crate) fn is_unreachable(&self) -> bool {
        self.unreachable.load(Ordering::Acquire)
    }

    pub(crate) fn allocate_port(&self) -> u16 {
        FIRST_PORT.wrapping_add(self.next_port.fetch_add(1, Ordering::Relaxed))
    }
}

/// Media engine whose connections talk to each other inside the process.
pub struct LoopbackMediaTransport {
    network: Arc<LoopbackNetwork>,
    initialized: AtomicBool,
    candidate_count: usize,
}

impl LoopbackMediaTransport {
    pub fn new() -> Self {
        Self::with_candidate_count(DEFAULT_CANDIDATE_COUNT)
    }

    /// Transport whose connections gather `count` host candidates each.
    pub fn with_candidate_count(count: usize) -> Self {
        Self {
            network: Arc::new(LoopbackNetwork::default()),
            initialized: AtomicBool::new(false),
            candidate_count: count.max(1),
        }
    }

    /// Makes every later connectivity check fail.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.network.unreachable.store(unreachable, Ordering::Release);
    }
}

impl Default for LoopbackMediaTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaTransport for LoopbackMediaTransport {
    fn initialize(&self) -> Result<(), TransportError> {
        if !self.initialized.swap(true, Ordering::AcqRel) {
            info!(candidates = self.candidate_count, "loopback media engine initialized");
        }
        Ok(())
    }

    async fn create_connection(&self, config: ConnectionConfig) -> Result<Arc<dyn MediaConnection>, TransportError> {
        if !self.initialized.load(Ordering::Acquire) {
            return Err(TransportError::Initialization(
                "initialize() must be called before creating connections".to_string(),
            ));
        }
        let inner = ConnectionInner::new(config, Arc::clone(&self.network), self.candidate_count);
        self.network.register(inner.ufrag(), &inner);
        Ok(Arc::new(LoopbackConnection::from_inner(inner)))
    }
}
