//! Pointer events sent from the viewer back to the sharer.
//!
//! Coordinates are normalized to the remote view's bounding box: `(0, 0)` is
//! the top-left corner and `(1, 1)` the bottom-right corner.  The receiver maps
//! them back to its own pixel grid with [`PointerEvent::to_pixels`], so the two
//! peers never need to agree on a resolution.

use serde::{Deserialize, Serialize};

use crate::protocol::codec::CodecError;

/// Pointer action carried by a [`PointerEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum PointerKind {
    Move = 0,
    Down = 1,
    Up = 2,
}

impl PointerKind {
    /// Wire value of the `event` key.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Parses a wire value; `None` for anything other than 0, 1 or 2.
    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(Self::Move),
            1 => Some(Self::Down),
            2 => Some(Self::Up),
            _ => None,
        }
    }
}

/// A normalized pointer event.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointerEvent {
    pub kind: PointerKind,
    pub x: f64,
    pub y: f64,
}

impl PointerEvent {
    /// Creates an event, rejecting coordinates outside `[0, 1]` or NaN.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::OutOfRange`] naming the offending axis.
    pub fn new(kind: PointerKind, x: f64, y: f64) -> Result<Self, CodecError> {
        check_unit("x", x)?;
        check_unit("y", y)?;
        Ok(Self { kind, x, y })
    }

    pub fn moved(x: f64, y: f64) -> Result<Self, CodecError> {
        Self::new(PointerKind::Move, x, y)
    }

    /// Normalizes a point given in view coordinates.
    ///
    /// Points outside the view are clamped onto its edge.  A zero-sized view
    /// maps everything to the origin.
    pub fn from_view_point(kind: PointerKind, px: f64, py: f64, width: f64, height: f64) -> Self {
        Self {
            kind,
            x: normalize(px, width),
            y: normalize(py, height),
        }
    }

    /// Maps the normalized coordinates onto a `width × height` pixel grid.
    pub fn to_pixels(&self, width: u32, height: u32) -> (f64, f64) {
        (self.x * f64::from(width), self.y * f64::from(height))
    }
}

fn normalize(value: f64, extent: f64) -> f64 {
    if extent.is_nan() || extent <= 0.0 || value.is_nan() {
        return 0.0;
    }
    (value / extent).clamp(0.0, 1.0)
}

pub(crate) fn check_unit(field: &'static str, value: f64) -> Result<(), CodecError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(CodecError::OutOfRange { field, value })
    }
}
