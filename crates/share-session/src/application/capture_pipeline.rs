//! Capture pipeline: from the capture thread to the outbound video track.
//!
//! The frame source calls [`CapturePipeline::push_frame`] on its own thread.
//! That call never waits on the transport: it converts the timestamp, swaps
//! the frame into a single-slot mailbox and wakes the delivery task.  If the
//! slot still holds an undelivered frame, that older frame is dropped.  The
//! queue depth is therefore exactly one and the most recent frame wins.
//!
//! ```text
//! capture thread                     tokio task
//! ──────────────                     ──────────
//! push_frame(f) ─► [ slot ] ─notify─► run_delivery ─► VideoSink::deliver
//!                     ▲
//!        replaces an undelivered frame (counted as dropped)
//! ```
//!
//! # Clock conversion
//!
//! Source timestamps are in the source's clock domain.  The first frame
//! anchors the two clocks: its transport timestamp is "now" on the transport
//! clock, and every later frame keeps its offset from the first frame.  The
//! result is clamped so it never decreases, even if the source clock jumps
//! backwards.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use share_core::{CapturedFrame, PixelFormat};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::application::media::{TransportError, VideoSink};

/// Monotonic nanosecond clock of the media transport.
#[derive(Debug, Clone, Copy)]
pub struct TransportClock {
    origin: Instant,
}

impl TransportClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Nanoseconds since the clock was created.
    pub fn now_ns(&self) -> i64 {
        self.origin.elapsed().as_nanos() as i64
    }
}

impl Default for TransportClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of handing one frame to the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// The slot was empty.
    Queued,
    /// An undelivered older frame was replaced.
    ReplacedStale,
    /// The frame's pixel format does not match the capture settings.
    Rejected,
    /// The pipeline is closed.
    Closed,
}

/// Delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub delivered: u64,
    pub dropped: u64,
    pub rejected: u64,
}

#[derive(Debug, Default)]
struct ClockState {
    /// `(first source timestamp, its transport timestamp)`.
    anchor: Option<(i64, i64)>,
    last_ts: Option<i64>,
}

/// Single-slot handoff between the capture thread and the transport.
pub struct CapturePipeline {
    format: PixelFormat,
    clock: TransportClock,
    clock_state: Mutex<ClockState>,
    slot: Mutex<Option<CapturedFrame>>,
    notify: Notify,
    closed: AtomicBool,
    delivered: AtomicU64,
    dropped: AtomicU64,
    rejected: AtomicU64,
}

impl CapturePipeline {
    pub fn new(format: PixelFormat, clock: TransportClock) -> Self {
        Self {
            format,
            clock,
            clock_state: Mutex::new(ClockState::default()),
            slot: Mutex::new(None),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    /// Hands a frame over.  Never blocks on the transport.
    pub fn push_frame(&self, mut frame: CapturedFrame) -> PushOutcome {
        if self.closed.load(Ordering::Acquire) {
            return PushOutcome::Closed;
        }
        if frame.pixels.format() != self.format {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            warn!(
                expected = ?self.format,
                actual = ?frame.pixels.format(),
                "frame with unexpected pixel format rejected"
            );
            return PushOutcome::Rejected;
        }

        frame.timestamp_ns = self.to_transport_time(frame.timestamp_ns);

        let stale = {
            let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
            slot.replace(frame)
        };
        self.notify.notify_one();

        if stale.is_some() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            PushOutcome::ReplacedStale
        } else {
            PushOutcome::Queued
        }
    }

    /// Converts a source timestamp into the transport clock domain.
    fn to_transport_time(&self, source_ns: i64) -> i64 {
        let mut state = self.clock_state.lock().unwrap_or_else(|e| e.into_inner());
        let (source_origin, transport_origin) = *state
            .anchor
            .get_or_insert_with(|| (source_ns, self.clock.now_ns()));
        let mut ts = transport_origin.saturating_add(source_ns.saturating_sub(source_origin));
        if let Some(last) = state.last_ts {
            if ts < last {
                debug!(ts, last, "source clock went backwards, clamping");
                ts = last;
            }
        }
        state.last_ts = Some(ts);
        ts
    }

    /// Takes the pending frame, if any.
    fn take_pending(&self) -> Option<CapturedFrame> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    /// Drains the slot into `sink` until [`close`](Self::close) is called or
    /// the sink reports it is closed.
    pub async fn run_delivery(self: Arc<Self>, sink: Arc<dyn VideoSink>) {
        info!("capture delivery started");
        loop {
            if self.closed.load(Ordering::Acquire) {
                break;
            }
            let Some(frame) = self.take_pending() else {
                self.notify.notified().await;
                continue;
            };
            match sink.deliver(frame).await {
                Ok(()) => {
                    self.delivered.fetch_add(1, Ordering::Relaxed);
                }
                Err(TransportError::Closed) => {
                    debug!("video sink closed");
                    break;
                }
                Err(e) => warn!("frame delivery failed: {e}"),
            }
        }
        let stats = self.stats();
        info!(
            delivered = stats.delivered,
            dropped = stats.dropped,
            rejected = stats.rejected,
            "capture delivery stopped"
        );
    }

    /// Stops accepting frames and ends the delivery loop.  Idempotent.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.take_pending();
            self.notify.notify_one();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
