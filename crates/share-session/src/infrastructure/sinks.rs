//! Recording input injector and frame renderer.
//!
//! There is no OS input injection or on-screen rendering in this crate.
//! These sinks log what they receive and keep it in memory, which is what the
//! demo binary shows and what integration tests assert on.

use std::sync::Mutex;

use share_core::{CapturedFrame, PointerEvent};
use tracing::{debug, trace};

use crate::application::remote_input::{FrameRenderer, InjectionError, InputInjector};

/// Records every injected pointer event.
#[derive(Default)]
pub struct RecordingInjector {
    pub events: Mutex<Vec<PointerEvent>>,
    /// When `true`, every injection fails.
    pub should_fail: bool,
}

impl RecordingInjector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recorded(&self) -> Vec<PointerEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl InputInjector for RecordingInjector {
    fn inject(&self, event: PointerEvent) -> Result<(), InjectionError> {
        if self.should_fail {
            return Err(InjectionError::Platform("mock injection failure".to_string()));
        }
        debug!(kind = ?event.kind, x = event.x, y = event.y, "pointer event");
        self.events.lock().unwrap_or_else(|e| e.into_inner()).push(event);
        Ok(())
    }
}

/// Records the timestamp of every rendered frame.
#[derive(Default)]
pub struct RecordingRenderer {
    pub timestamps: Mutex<Vec<i64>>,
}

impl RecordingRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timestamps(&self) -> Vec<i64> {
        self.timestamps.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn frame_count(&self) -> usize {
        self.timestamps.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl FrameRenderer for RecordingRenderer {
    fn render(&self, frame: CapturedFrame) {
        trace!(
            ts = frame.timestamp_ns,
            width = frame.pixels.width(),
            height = frame.pixels.height(),
            "frame rendered"
        );
        self.timestamps
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(frame.timestamp_ns);
    }
}
