//! Remote input: pointer events from the viewer to the sharer.
//!
//! The viewer wraps the control data channel in a [`RemoteInputChannel`] and
//! sends one encoded [`PointerEvent`] per channel message.  The sharer runs
//! [`dispatch_remote_input`], which decodes each message and hands it to an
//! [`InputInjector`].  Malformed messages are logged and skipped; they never
//! tear the channel down.

use std::sync::Arc;

use share_core::{decode_pointer_event, encode_pointer_event, CapturedFrame, CodecError, DataChannelState, PointerEvent};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::application::error::SessionError;
use crate::application::media::DataChannel;

/// Error returned by an input-injection sink.
#[derive(Debug, Error)]
pub enum InjectionError {
    #[error("input injection failed: {0}")]
    Platform(String),
}

/// Sink that turns pointer events into local input (external collaborator).
#[cfg_attr(test, mockall::automock)]
pub trait InputInjector: Send + Sync {
    fn inject(&self, event: PointerEvent) -> Result<(), InjectionError>;
}

/// Sink for frames of an inbound video track (external collaborator).
pub trait FrameRenderer: Send + Sync {
    fn render(&self, frame: CapturedFrame);
}

/// Pointer-event view of a data channel.
#[derive(Clone)]
pub struct RemoteInputChannel {
    channel: Arc<dyn DataChannel>,
}

impl RemoteInputChannel {
    pub fn new(channel: Arc<dyn DataChannel>) -> Self {
        Self { channel }
    }

    pub fn label(&self) -> &str {
        self.channel.label()
    }

    pub fn state(&self) -> DataChannelState {
        self.channel.state()
    }

    /// Waits until the channel is `open`.
    ///
    /// # Errors
    ///
    /// [`SessionError::ChannelNotReady`] if the channel closes first.
    pub async fn wait_open(&self) -> Result<(), SessionError> {
        let mut rx: watch::Receiver<DataChannelState> = self.channel.watch_state();
        let reached = rx
            .wait_for(|s| matches!(s, DataChannelState::Open | DataChannelState::Closing | DataChannelState::Closed))
            .await
            .map(|s| *s);
        match reached {
            Ok(DataChannelState::Open) => Ok(()),
            Ok(state) => Err(SessionError::ChannelNotReady {
                label: self.label().to_string(),
                state,
            }),
            Err(_) => Err(SessionError::ChannelNotReady {
                label: self.label().to_string(),
                state: DataChannelState::Closed,
            }),
        }
    }

    /// Encodes and sends one pointer event.
    ///
    /// # Errors
    ///
    /// [`SessionError::ChannelNotReady`] unless the channel is `open`.
    pub async fn send_pointer(&self, event: &PointerEvent) -> Result<(), SessionError> {
        let state = self.channel.state();
        if !state.is_sendable() {
            return Err(SessionError::ChannelNotReady {
                label: self.label().to_string(),
                state,
            });
        }
        self.channel
            .send(encode_pointer_event(event))
            .await
            .map_err(SessionError::from_channel_transport)
    }

    /// Receives and decodes the next message.
    ///
    /// Returns `None` once the channel is closed.
    pub async fn recv_pointer(&self) -> Option<Result<PointerEvent, CodecError>> {
        let bytes = self.channel.recv().await?;
        Some(decode_pointer_event(&bytes))
    }
}

/// Counters of one dispatch loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub injected: u64,
    pub malformed: u64,
    pub failed: u64,
}

/// Reads pointer events from `channel` and injects them until it closes.
pub async fn dispatch_remote_input(
    channel: RemoteInputChannel,
    injector: Arc<dyn InputInjector>,
) -> DispatchStats {
    let mut stats = DispatchStats::default();
    info!(label = channel.label(), "remote input dispatch started");
    while let Some(message) = channel.recv_pointer().await {
        match message {
            Ok(event) => match injector.inject(event) {
                Ok(()) => {
                    stats.injected += 1;
                    debug!(kind = ?event.kind, x = event.x, y = event.y, "pointer event injected");
                }
                Err(e) => {
                    stats.failed += 1;
                    warn!("{e}");
                }
            },
            Err(e) => {
                stats.malformed += 1;
                warn!(label = channel.label(), "dropping malformed remote-input message: {e}");
            }
        }
    }
    info!(
        injected = stats.injected,
        malformed = stats.malformed,
        failed = stats.failed,
        "remote input dispatch stopped"
    );
    stats
}

// ── Tests ─────────────────────────────────────────────────────────────────────
