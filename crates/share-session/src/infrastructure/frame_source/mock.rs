//! Mock frame source for tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use share_core::CapturedFrame;

use super::{CaptureError, CaptureSettings, FrameCallback, FrameSource};

/// A [`FrameSource`] that emits frames only when told to.
#[derive(Default)]
pub struct MockFrameSource {
    callback: Mutex<Option<FrameCallback>>,
    settings: Mutex<Option<CaptureSettings>>,
    start_calls: AtomicUsize,
    stop_calls: AtomicUsize,
}

impl MockFrameSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers `frame` through the registered callback, on the caller's thread.
    ///
    /// Returns `false` if the source is not running.
    pub fn emit(&self, frame: CapturedFrame) -> bool {
        let mut guard = self.callback.lock().unwrap_or_else(|e| e.into_inner());
        match guard.as_mut() {
            Some(callback) => {
                callback(frame);
                true
            }
            None => false,
        }
    }

    /// Settings passed to the last `start`.
    pub fn settings(&self) -> Option<CaptureSettings> {
        *self.settings.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    /// Number of `stop` calls that actually stopped a running source.
    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }
}

impl FrameSource for MockFrameSource {
    fn start(&self, settings: CaptureSettings, on_frame: FrameCallback) -> Result<(), CaptureError> {
        let mut guard = self.callback.lock().unwrap_or_else(|e| e.into_inner());
        if guard.is_some() {
            return Err(CaptureError::AlreadyRunning);
        }
        *guard = Some(on_frame);
        *self.settings.lock().unwrap_or_else(|e| e.into_inner()) = Some(settings);
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) {
        let previous = self.callback.lock().unwrap_or_else(|e| e.into_inner()).take();
        if previous.is_some() {
            self.stop_calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn is_running(&self) -> bool {
        self.callback.lock().unwrap_or_else(|e| e.into_inner()).is_some()
    }
}
