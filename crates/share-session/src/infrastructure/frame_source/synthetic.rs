//! Synthetic frame source producing a test pattern at a fixed cadence.
//!
//! Frames are generated on a dedicated OS thread, like a real screen capture
//! callback would be.  Timestamps come from the source's own clock (wall
//! time at start plus monotonic elapsed time), which deliberately differs
//! from the transport clock the capture pipeline converts into.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use share_core::{CapturedFrame, PixelBuffer};
use tracing::{debug, info};

use super::{CaptureError, CaptureSettings, FrameCallback, FrameSource};

const MAX_FPS: u32 = 240;

/// Generates uniformly shaded frames whose shade changes every frame.
#[derive(Default)]
pub struct SyntheticFrameSource {
    running: Arc<AtomicBool>,
    produced: Arc<AtomicU64>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SyntheticFrameSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames produced since the source was created.
    pub fn frames_produced(&self) -> u64 {
        self.produced.load(Ordering::Relaxed)
    }
}

fn validate(settings: &CaptureSettings) -> Result<(), CaptureError> {
    if settings.width == 0 || settings.height == 0 {
        return Err(CaptureError::InvalidSettings(format!(
            "frame size {}x{} is empty",
            settings.width, settings.height
        )));
    }
    if settings.frames_per_second == 0 || settings.frames_per_second > MAX_FPS {
        return Err(CaptureError::InvalidSettings(format!(
            "frame rate {} outside 1..={MAX_FPS}",
            settings.frames_per_second
        )));
    }
    Ok(())
}

impl FrameSource for SyntheticFrameSource {
    fn start(&self, settings: CaptureSettings, mut on_frame: FrameCallback) -> Result<(), CaptureError> {
        validate(&settings)?;
        let mut worker = self.worker.lock().unwrap_or_else(|e| e.into_inner());
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(CaptureError::AlreadyRunning);
        }

        let running = Arc::clone(&self.running);
        let produced = Arc::clone(&self.produced);
        let period = Duration::from_secs(1) / settings.frames_per_second;
        let wall_base_ns = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as i64)
            .unwrap_or(0);

        let handle = std::thread::Builder::new()
            .name("synthetic-capture".to_string())
            .spawn(move || {
                let started = Instant::now();
                let mut next_tick = started;
                let mut index: u64 = 0;
                while running.load(Ordering::Acquire) {
                    let shade = (index % 256) as u8;
                    let pixels = PixelBuffer::filled(settings.width, settings.height, settings.pixel_format, shade);
                    let timestamp_ns = wall_base_ns + started.elapsed().as_nanos() as i64;
                    on_frame(CapturedFrame::new(pixels, timestamp_ns));
                    produced.fetch_add(1, Ordering::Relaxed);
                    index += 1;

                    next_tick += period;
                    let now = Instant::now();
                    if next_tick > now {
                        std::thread::sleep(next_tick - now);
                    } else {
                        // Fell behind; do not try to catch up with a burst.
                        next_tick = now;
                    }
                }
                debug!(frames = index, "synthetic capture thread exiting");
            })
            .map_err(|e| {
                self.running.store(false, Ordering::Release);
                CaptureError::ThreadSpawn(e)
            })?;

        info!(
            width = settings.width,
            height = settings.height,
            fps = settings.frames_per_second,
            format = ?settings.pixel_format,
            "synthetic capture started"
        );
        *worker = Some(handle);
        Ok(())
    }

    fn stop(&self) {
        self.running.store(false, Ordering::Release);
        let handle = self.worker.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            let _ = handle.join();
            info!("synthetic capture stopped");
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl Drop for SyntheticFrameSource {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use share_core::PixelFormat;

    use super::*;

    fn fast_settings() -> CaptureSettings {
        CaptureSettings {
            width: 4,
            height: 4,
            frames_per_second: 200,
            pixel_format: PixelFormat::I420,
        }
    }

    #[test]
    fn test_frames_arrive_with_non_decreasing_timestamps() {
        // Arrange
        let source = SyntheticFrameSource::new();
        let (tx, rx) = mpsc::channel();

        // Act
        source
            .start(fast_settings(), Box::new(move |f| {
                let _ = tx.send(f);
            }))
            .unwrap();
        let frames: Vec<CapturedFrame> = (0..5)
            .map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap())
            .collect();
        source.stop();

        // Assert
        assert!(frames.windows(2).all(|w| w[0].timestamp_ns <= w[1].timestamp_ns));
        assert!(frames.iter().all(|f| f.pixels.format() == PixelFormat::I420));
        assert!(source.frames_produced() >= 5);
    }

    #[test]
    fn test_rejects_zero_frame_rate() {
        let source = SyntheticFrameSource::new();
        let settings = CaptureSettings {
            frames_per_second: 0,
            ..fast_settings()
        };
        assert!(matches!(
            source.start(settings, Box::new(|_| {})),
            Err(CaptureError::InvalidSettings(_))
        ));
        assert!(!source.is_running());
    }

    #[test]
    fn test_double_start_is_rejected_and_stop_is_idempotent() {
        let source = SyntheticFrameSource::new();
        source.start(fast_settings(), Box::new(|_| {})).unwrap();

        assert!(matches!(
            source.start(fast_settings(), Box::new(|_| {})),
            Err(CaptureError::AlreadyRunning)
        ));

        source.stop();
        source.stop();
        assert!(!source.is_running());
    }
}
