//! Captured video frames.
//!
//! A [`CapturedFrame`] is produced by the frame source and *moved* into the
//! transport.  Nothing keeps a copy after delivery, so a frame's pixel memory
//! lives exactly as long as it takes to hand it over.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Pixel layout of a frame.  Fixed per capture session by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// 4 bytes per pixel, blue-green-red-alpha.
    #[default]
    Bgra8,
    /// Full-resolution luma plane followed by an interleaved half-resolution chroma plane.
    Nv12,
    /// Full-resolution luma plane followed by two half-resolution chroma planes.
    I420,
}

impl PixelFormat {
    /// Number of bytes a tightly-packed buffer of `width × height` occupies.
    pub fn expected_len(self, width: u32, height: u32) -> usize {
        let (w, h) = (width as usize, height as usize);
        match self {
            PixelFormat::Bgra8 => w * h * 4,
            PixelFormat::Nv12 | PixelFormat::I420 => {
                // Chroma planes are subsampled 2×2, rounding up on odd sizes.
                let chroma = w.div_ceil(2) * h.div_ceil(2);
                w * h + 2 * chroma
            }
        }
    }
}

/// Clockwise rotation the renderer must apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    /// Converts a degree value (0, 90, 180, 270) into a [`Rotation`].
    pub fn from_degrees(degrees: u16) -> Option<Self> {
        match degrees {
            0 => Some(Rotation::Deg0),
            90 => Some(Rotation::Deg90),
            180 => Some(Rotation::Deg180),
            270 => Some(Rotation::Deg270),
            _ => None,
        }
    }

    pub fn degrees(self) -> u16 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }
}

/// A pixel buffer whose size does not match its declared format.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{format:?} buffer of {width}x{height} needs {expected} bytes, got {actual}")]
pub struct FrameError {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub expected: usize,
    pub actual: usize,
}

/// Owned image memory plus its geometry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    format: PixelFormat,
    data: Vec<u8>,
}

impl PixelBuffer {
    /// Wraps `data`, checking that its length matches the format.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError`] if `data.len()` differs from
    /// [`PixelFormat::expected_len`].
    pub fn new(width: u32, height: u32, format: PixelFormat, data: Vec<u8>) -> Result<Self, FrameError> {
        let expected = format.expected_len(width, height);
        if data.len() != expected {
            return Err(FrameError {
                format,
                width,
                height,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            format,
            data,
        })
    }

    /// Allocates a buffer filled with `fill`.
    pub fn filled(width: u32, height: u32, format: PixelFormat, fill: u8) -> Self {
        Self {
            width,
            height,
            format,
            data: vec![fill; format.expected_len(width, height)],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// One frame handed from the frame source to the media transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedFrame {
    pub pixels: PixelBuffer,
    /// Capture time in nanoseconds.  Source clock on the way in, transport
    /// clock once the capture pipeline has converted it.
    pub timestamp_ns: i64,
    pub rotation: Rotation,
}

impl CapturedFrame {
    pub fn new(pixels: PixelBuffer, timestamp_ns: i64) -> Self {
        Self {
            pixels,
            timestamp_ns,
            rotation: Rotation::Deg0,
        }
    }

    pub fn with_rotation(mut self, rotation: Rotation) -> Self {
        self.rotation = rotation;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bgra_expected_len_is_four_bytes_per_pixel() {
        assert_eq!(PixelFormat::Bgra8.expected_len(1920, 1080), 1920 * 1080 * 4);
    }

    #[test]
    fn test_yuv_expected_len_rounds_odd_chroma_up() {
        // 3x3 luma = 9, chroma 2x2 per plane = 4, two planes = 8.
        assert_eq!(PixelFormat::I420.expected_len(3, 3), 17);
        assert_eq!(PixelFormat::Nv12.expected_len(4, 2), 8 + 4);
    }

    #[test]
    fn test_pixel_buffer_rejects_wrong_length() {
        // Arrange / Act
        let result = PixelBuffer::new(2, 2, PixelFormat::Bgra8, vec![0; 15]);

        // Assert
        let err = result.unwrap_err();
        assert_eq!(err.expected, 16);
        assert_eq!(err.actual, 15);
    }

    #[test]
    fn test_filled_buffer_has_expected_len() {
        let buf = PixelBuffer::filled(8, 6, PixelFormat::Nv12, 0x80);
        assert_eq!(buf.data().len(), PixelFormat::Nv12.expected_len(8, 6));
        assert!(buf.data().iter().all(|&b| b == 0x80));
    }

    #[test]
    fn test_rotation_from_degrees() {
        assert_eq!(Rotation::from_degrees(90), Some(Rotation::Deg90));
        assert_eq!(Rotation::from_degrees(45), None);
        assert_eq!(Rotation::Deg270.degrees(), 270);
    }
}
