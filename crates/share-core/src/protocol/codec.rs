//! Binary codec for remote-input messages.
//!
//! A message is a single-level map in a MessagePack-compatible encoding.
//! [`encode_pointer_event`] always writes the same 36 bytes for the same
//! event, keys in a fixed order:
//!
//! ```text
//! 0x84                      fixmap, 4 entries
//! 0xa4 "type"   0x00        positive fixint: 0 = pointer event
//! 0xa5 "event"  0x0K        positive fixint: 0 move, 1 down, 2 up
//! 0xa1 "x"      0xcb f64    float64, big-endian
//! 0xa1 "y"      0xcb f64    float64, big-endian
//! ```
//!
//! [`decode_pointer_event`] is more lenient than the encoder: keys may come in
//! any order, integers may use any unsigned width, coordinates may be
//! `float32`, `float64` or an integer, and unknown keys with scalar values are
//! skipped.  A message without `event` is a move.  Anything structurally wrong
//! is a [`CodecError`]; there is no partial result.

use thiserror::Error;

use crate::protocol::pointer::{check_unit, PointerEvent, PointerKind};

/// Value of the `type` key for pointer events.
pub const POINTER_EVENT_TYPE: u64 = 0;

/// Encoded size of a pointer event.
pub const POINTER_EVENT_LEN: usize = 36;

// MessagePack markers used by this codec.
const FIXMAP_MASK: u8 = 0x80;
const MAP16: u8 = 0xde;
const FIXSTR_MASK: u8 = 0xa0;
const STR8: u8 = 0xd9;
const NIL: u8 = 0xc0;
const FALSE: u8 = 0xc2;
const TRUE: u8 = 0xc3;
const FLOAT32: u8 = 0xca;
const FLOAT64: u8 = 0xcb;
const UINT8: u8 = 0xcc;
const UINT16: u8 = 0xcd;
const UINT32: u8 = 0xce;
const UINT64: u8 = 0xcf;
const INT8: u8 = 0xd0;
const INT16: u8 = 0xd1;
const INT32: u8 = 0xd2;
const INT64: u8 = 0xd3;

/// Decode failures.  Every variant means "malformed message".
#[derive(Debug, Error, PartialEq)]
pub enum CodecError {
    #[error("truncated message: need {needed} bytes, got {available}")]
    Truncated { needed: usize, available: usize },

    #[error("unexpected marker 0x{marker:02X} at offset {offset}")]
    UnexpectedMarker { marker: u8, offset: usize },

    #[error("map key at offset {offset} is not valid UTF-8")]
    InvalidKey { offset: usize },

    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("field `{0}` appears more than once")]
    DuplicateField(&'static str),

    #[error("field `{field}` has the wrong type")]
    WrongType { field: &'static str },

    #[error("unknown message type {0}")]
    UnknownMessageType(u64),

    #[error("unknown pointer event kind {0}")]
    UnknownPointerKind(u64),

    #[error("field `{field}` out of range: {value}")]
    OutOfRange { field: &'static str, value: f64 },

    #[error("{extra} trailing bytes after message")]
    TrailingBytes { extra: usize },
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a pointer event into its wire form.
///
/// # Examples
///
/// ```rust
/// use share_core::{decode_pointer_event, encode_pointer_event, PointerEvent};
///
/// let ev = PointerEvent::moved(0.25, 0.75).unwrap();
/// let bytes = encode_pointer_event(&ev);
/// assert_eq!(bytes.len(), 36);
/// assert_eq!(decode_pointer_event(&bytes).unwrap(), ev);
/// ```
pub fn encode_pointer_event(event: &PointerEvent) -> Vec<u8> {
    let mut buf = Vec::with_capacity(POINTER_EVENT_LEN);
    buf.push(FIXMAP_MASK | 4);
    write_fixstr(&mut buf, "type");
    buf.push(POINTER_EVENT_TYPE as u8);
    write_fixstr(&mut buf, "event");
    buf.push(event.kind.code());
    write_fixstr(&mut buf, "x");
    write_f64(&mut buf, event.x);
    write_fixstr(&mut buf, "y");
    write_f64(&mut buf, event.y);
    buf
}

/// Decodes a pointer event from exactly one message.
///
/// # Errors
///
/// Returns [`CodecError`] for truncated input, unexpected markers, missing or
/// duplicated fields, ill-typed values, an unknown message type, coordinates
/// outside `[0, 1]`, or bytes left over after the map.
pub fn decode_pointer_event(bytes: &[u8]) -> Result<PointerEvent, CodecError> {
    let mut cur = Cursor::new(bytes);
    let entries = cur.read_map_len()?;

    let mut msg_type: Option<u64> = None;
    let mut kind: Option<u64> = None;
    let mut x: Option<f64> = None;
    let mut y: Option<f64> = None;

    for _ in 0..entries {
        let key = cur.read_key()?;
        let value = cur.read_scalar()?;
        match key {
            "type" => set_once(&mut msg_type, "type", value.as_uint("type")?)?,
            "event" => set_once(&mut kind, "event", value.as_uint("event")?)?,
            "x" => set_once(&mut x, "x", value.as_float("x")?)?,
            "y" => set_once(&mut y, "y", value.as_float("y")?)?,
            _ => {}
        }
    }

    if cur.remaining() > 0 {
        return Err(CodecError::TrailingBytes {
            extra: cur.remaining(),
        });
    }

    let msg_type = msg_type.ok_or(CodecError::MissingField("type"))?;
    if msg_type != POINTER_EVENT_TYPE {
        return Err(CodecError::UnknownMessageType(msg_type));
    }
    let kind = match kind {
        Some(code) => PointerKind::from_code(code).ok_or(CodecError::UnknownPointerKind(code))?,
        None => PointerKind::Move,
    };
    let x = x.ok_or(CodecError::MissingField("x"))?;
    let y = y.ok_or(CodecError::MissingField("y"))?;
    check_unit("x", x)?;
    check_unit("y", y)?;

    Ok(PointerEvent { kind, x, y })
}

// ── Encoding helpers ──────────────────────────────────────────────────────────

fn write_fixstr(buf: &mut Vec<u8>, s: &str) {
    debug_assert!(s.len() < 32);
    buf.push(FIXSTR_MASK | s.len() as u8);
    buf.extend_from_slice(s.as_bytes());
}

fn write_f64(buf: &mut Vec<u8>, v: f64) {
    buf.push(FLOAT64);
    buf.extend_from_slice(&v.to_be_bytes());
}

// ── Decoding helpers ──────────────────────────────────────────────────────────

fn set_once<T>(slot: &mut Option<T>, field: &'static str, value: T) -> Result<(), CodecError> {
    if slot.is_some() {
        return Err(CodecError::DuplicateField(field));
    }
    *slot = Some(value);
    Ok(())
}

/// A decoded scalar map value.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Scalar {
    Nil,
    Bool,
    UInt(u64),
    Int(i64),
    Float(f64),
    /// A string value; only its presence matters.
    Str,
}

impl Scalar {
    fn as_uint(self, field: &'static str) -> Result<u64, CodecError> {
        match self {
            Scalar::UInt(v) => Ok(v),
            Scalar::Int(v) if v >= 0 => Ok(v as u64),
            _ => Err(CodecError::WrongType { field }),
        }
    }

    fn as_float(self, field: &'static str) -> Result<f64, CodecError> {
        match self {
            Scalar::Float(v) => Ok(v),
            Scalar::UInt(v) => Ok(v as f64),
            Scalar::Int(v) => Ok(v as f64),
            _ => Err(CodecError::WrongType { field }),
        }
    }
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn require_len(&self, n: usize) -> Result<(), CodecError> {
        if self.remaining() < n {
            return Err(CodecError::Truncated {
                needed: self.pos + n,
                available: self.buf.len(),
            });
        }
        Ok(())
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        self.require_len(n)?;
        let buf: &'a [u8] = self.buf;
        let slice = &buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    fn unexpected(&self, marker: u8) -> CodecError {
        CodecError::UnexpectedMarker {
            marker,
            offset: self.pos - 1,
        }
    }

    fn read_map_len(&mut self) -> Result<usize, CodecError> {
        let marker = self.read_u8()?;
        match marker {
            0x80..=0x8f => Ok((marker & 0x0f) as usize),
            MAP16 => Ok(u16::from_be_bytes(self.take_array()?) as usize),
            _ => Err(self.unexpected(marker)),
        }
    }

    fn read_key(&mut self) -> Result<&'a str, CodecError> {
        let marker = self.read_u8()?;
        let len = match marker {
            0xa0..=0xbf => (marker & 0x1f) as usize,
            STR8 => self.read_u8()? as usize,
            _ => return Err(self.unexpected(marker)),
        };
        let offset = self.pos;
        let raw = self.take(len)?;
        std::str::from_utf8(raw).map_err(|_| CodecError::InvalidKey { offset })
    }

    fn read_scalar(&mut self) -> Result<Scalar, CodecError> {
        let marker = self.read_u8()?;
        let value = match marker {
            0x00..=0x7f => Scalar::UInt(u64::from(marker)),
            0xe0..=0xff => Scalar::Int(i64::from(marker as i8)),
            NIL => Scalar::Nil,
            FALSE | TRUE => Scalar::Bool,
            UINT8 => Scalar::UInt(u64::from(self.read_u8()?)),
            UINT16 => Scalar::UInt(u64::from(u16::from_be_bytes(self.take_array()?))),
            UINT32 => Scalar::UInt(u64::from(u32::from_be_bytes(self.take_array()?))),
            UINT64 => Scalar::UInt(u64::from_be_bytes(self.take_array()?)),
            INT8 => Scalar::Int(i64::from(self.read_u8()? as i8)),
            INT16 => Scalar::Int(i64::from(i16::from_be_bytes(self.take_array()?))),
            INT32 => Scalar::Int(i64::from(i32::from_be_bytes(self.take_array()?))),
            INT64 => Scalar::Int(i64::from_be_bytes(self.take_array()?)),
            FLOAT32 => Scalar::Float(f64::from(f32::from_be_bytes(self.take_array()?))),
            FLOAT64 => Scalar::Float(f64::from_be_bytes(self.take_array()?)),
            0xa0..=0xbf => {
                self.take((marker & 0x1f) as usize)?;
                Scalar::Str
            }
            STR8 => {
                let len = self.read_u8()? as usize;
                self.take(len)?;
                Scalar::Str
            }
            // Nested maps, arrays, binary and extension types are not part of
            // the message format.
            _ => return Err(self.unexpected(marker)),
        };
        Ok(value)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
