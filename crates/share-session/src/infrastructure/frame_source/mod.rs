//! Frame sources: where captured screen frames come from.
//!
//! A [`FrameSource`] pushes [`CapturedFrame`]s into a callback on a thread of
//! its own, at its native cadence.  The callback must return quickly: the
//! capture pipeline only swaps the frame into a single-slot mailbox.
//!
//! The pixel format is fixed by the [`CaptureSettings`] passed to
//! [`FrameSource::start`]; no format negotiation happens afterwards.
//!
//! # Testability
//!
//! [`mock::MockFrameSource`] lets tests emit frames by hand, on the test's
//! own thread, with exact timestamps.

use serde::{Deserialize, Serialize};
use share_core::{CapturedFrame, PixelFormat};

pub mod mock;
pub mod synthetic;

/// Per-frame callback invoked on the source's delivery thread.
pub type FrameCallback = Box<dyn FnMut(CapturedFrame) + Send + 'static>;

/// Capture session settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    pub width: u32,
    pub height: u32,
    pub frames_per_second: u32,
    pub pixel_format: PixelFormat,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            frames_per_second: 30,
            pixel_format: PixelFormat::Bgra8,
        }
    }
}

/// Error type for frame source operations.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("frame source is already running")]
    AlreadyRunning,
    #[error("invalid capture settings: {0}")]
    InvalidSettings(String),
    #[error("failed to start capture thread: {0}")]
    ThreadSpawn(#[source] std::io::Error),
}

/// Trait abstracting screen frame production.
pub trait FrameSource: Send + Sync {
    /// Starts delivering frames to `on_frame`.
    fn start(&self, settings: CaptureSettings, on_frame: FrameCallback) -> Result<(), CaptureError>;
    /// Stops delivery.  Calling it on a stopped source does nothing.
    fn stop(&self);
    fn is_running(&self) -> bool;
}
