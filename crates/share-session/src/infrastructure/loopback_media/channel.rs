//! In-process data channels and video senders.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use share_core::{CapturedFrame, DataChannelState};
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace};

use crate::application::media::{DataChannel, TransportError, VideoSink};

/// One end of an in-process message channel.
///
/// A channel starts `connecting`.  [`LoopbackDataChannel::link`] pairs two
/// ends and opens both; closing either end closes the pair.  Messages already
/// queued when the pair closes are still delivered by [`DataChannel::recv`].
pub struct LoopbackDataChannel {
    label: String,
    state_tx: watch::Sender<DataChannelState>,
    inbound_tx: mpsc::UnboundedSender<Vec<u8>>,
    inbound_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    peer: Mutex<Weak<LoopbackDataChannel>>,
}

impl LoopbackDataChannel {
    pub fn new(label: impl Into<String>) -> Self {
        let (state_tx, _) = watch::channel(DataChannelState::Connecting);
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            label: label.into(),
            state_tx,
            inbound_tx,
            inbound_rx: tokio::sync::Mutex::new(inbound_rx),
            peer: Mutex::new(Weak::new()),
        }
    }

    /// Pairs two `connecting` ends and opens both.
    pub fn link(a: &Arc<LoopbackDataChannel>, b: &Arc<LoopbackDataChannel>) {
        *a.peer.lock().unwrap_or_else(|e| e.into_inner()) = Arc::downgrade(b);
        *b.peer.lock().unwrap_or_else(|e| e.into_inner()) = Arc::downgrade(a);
        a.open();
        b.open();
    }

    fn open(&self) {
        self.state_tx.send_if_modified(|state| {
            if state.can_transition_to(DataChannelState::Open) {
                *state = DataChannelState::Open;
                true
            } else {
                false
            }
        });
    }

    /// Moves this end to `closed` at once.  Returns `false` if it was
    /// already closing or closed.
    pub(crate) fn shut(&self) -> bool {
        let began = self.begin_close();
        self.finish_close();
        began
    }

    fn begin_close(&self) -> bool {
        self.state_tx.send_if_modified(|state| {
            if matches!(*state, DataChannelState::Connecting | DataChannelState::Open) {
                *state = DataChannelState::Closing;
                true
            } else {
                false
            }
        })
    }

    fn finish_close(&self) {
        let changed = self.state_tx.send_if_modified(|state| {
            if state.can_transition_to(DataChannelState::Closed) {
                *state = DataChannelState::Closed;
                true
            } else {
                false
            }
        });
        if changed {
            debug!(label = %self.label, "data channel closed");
        }
    }

    fn peer(&self) -> Option<Arc<LoopbackDataChannel>> {
        self.peer.lock().unwrap_or_else(|e| e.into_inner()).upgrade()
    }
}

#[async_trait]
impl DataChannel for LoopbackDataChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn state(&self) -> DataChannelState {
        *self.state_tx.borrow()
    }

    fn watch_state(&self) -> watch::Receiver<DataChannelState> {
        self.state_tx.subscribe()
    }

    async fn send(&self, payload: Vec<u8>) -> Result<(), TransportError> {
        let state = self.state();
        if !state.is_sendable() {
            return Err(TransportError::ChannelNotReady {
                label: self.label.clone(),
                state,
            });
        }
        let peer = self.peer().ok_or(TransportError::Closed)?;
        trace!(label = %self.label, len = payload.len(), "data channel send");
        peer.inbound_tx.send(payload).map_err(|_| TransportError::Closed)
    }

    async fn recv(&self) -> Option<Vec<u8>> {
        let mut rx = self.inbound_rx.lock().await;
        let mut state = self.state_tx.subscribe();
        loop {
            if let Ok(message) = rx.try_recv() {
                return Some(message);
            }
            if *state.borrow_and_update() == DataChannelState::Closed {
                return None;
            }
            tokio::select! {
                message = rx.recv() => return message,
                changed = state.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
            }
        }
    }

    async fn close(&self) {
        if !self.begin_close() {
            return;
        }
        let peer = self.peer();
        if let Some(peer) = &peer {
            peer.begin_close();
        }
        // Let state watchers observe `closing` before the pair goes `closed`.
        tokio::task::yield_now().await;
        if let Some(peer) = peer {
            peer.finish_close();
        }
        self.finish_close();
    }
}

/// Outbound video track.  Frames are dropped until the track is paired.
pub struct LoopbackVideoSender {
    track_id: String,
    peer_tx: Mutex<Option<mpsc::Sender<CapturedFrame>>>,
    closed: AtomicBool,
}

impl LoopbackVideoSender {
    pub(crate) fn new(track_id: impl Into<String>) -> Self {
        Self {
            track_id: track_id.into(),
            peer_tx: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn track_id(&self) -> &str {
        &self.track_id
    }

    pub(crate) fn attach(&self, tx: mpsc::Sender<CapturedFrame>) {
        *self.peer_tx.lock().unwrap_or_else(|e| e.into_inner()) = Some(tx);
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.peer_tx.lock().unwrap_or_else(|e| e.into_inner()).take();
    }
}

#[async_trait]
impl VideoSink for LoopbackVideoSender {
    async fn deliver(&self, frame: CapturedFrame) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        let tx = self.peer_tx.lock().unwrap_or_else(|e| e.into_inner()).clone();
        match tx {
            Some(tx) => tx.send(frame).await.map_err(|_| TransportError::Closed),
            None => {
                trace!(track = %self.track_id, "track not connected yet, frame dropped");
                Ok(())
            }
        }
    }
}
