//! Payload codecs.
//!
//! Two kinds of payload arrive from the device:
//!
//! - **Encoded arrays**: a `(dtype, base64)` pair holding a flat numeric
//!   buffer in little-endian byte order. The profile arrays inside a BPM
//!   result use this form.
//! - **Video frames**: an opaque byte blob. Decoding it is delegated to a
//!   [`FrameDecoder`]; [`VideoImageDecoder`] understands the common Lima
//!   `VIDEO_IMAGE` layout.
//!
//! Structured payloads (BPM results) are JSON and go through serde.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ndarray::Array2;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

use crate::error::{AppResult, ViewerError};

// =============================================================================
// Encoded arrays
// =============================================================================

/// Element type of an encoded array, named as numpy names it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dtype {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    F32,
    F64,
}

impl Dtype {
    /// Parse a dtype tag such as `"float64"` or `"<u2"`.
    pub fn parse(tag: &str) -> AppResult<Self> {
        let tag = tag.trim().trim_start_matches(['<', '=', '|']);
        let dtype = match tag {
            "uint8" | "u1" | "B" => Dtype::U8,
            "int8" | "i1" | "b" => Dtype::I8,
            "uint16" | "u2" | "H" => Dtype::U16,
            "int16" | "i2" | "h" => Dtype::I16,
            "uint32" | "u4" | "I" => Dtype::U32,
            "int32" | "i4" | "i" => Dtype::I32,
            "uint64" | "u8" | "Q" => Dtype::U64,
            "int64" | "i8" | "q" => Dtype::I64,
            "float32" | "f4" | "f" => Dtype::F32,
            "float64" | "f8" | "d" => Dtype::F64,
            _ => return Err(ViewerError::UnsupportedDtype(tag.to_string())),
        };
        Ok(dtype)
    }

    /// Canonical tag
    pub fn name(&self) -> &'static str {
        match self {
            Dtype::U8 => "uint8",
            Dtype::I8 => "int8",
            Dtype::U16 => "uint16",
            Dtype::I16 => "int16",
            Dtype::U32 => "uint32",
            Dtype::I32 => "int32",
            Dtype::U64 => "uint64",
            Dtype::I64 => "int64",
            Dtype::F32 => "float32",
            Dtype::F64 => "float64",
        }
    }

    /// Bytes per element
    pub fn item_size(&self) -> usize {
        match self {
            Dtype::U8 | Dtype::I8 => 1,
            Dtype::U16 | Dtype::I16 => 2,
            Dtype::U32 | Dtype::I32 | Dtype::F32 => 4,
            Dtype::U64 | Dtype::I64 | Dtype::F64 => 8,
        }
    }

    fn read_le(&self, chunk: &[u8]) -> f64 {
        // chunk length is exactly item_size(), checked by the caller
        let mut buf = [0u8; 8];
        buf[..chunk.len()].copy_from_slice(chunk);
        match self {
            Dtype::U8 => f64::from(chunk[0]),
            Dtype::I8 => f64::from(chunk[0] as i8),
            Dtype::U16 => f64::from(u16::from_le_bytes([buf[0], buf[1]])),
            Dtype::I16 => f64::from(i16::from_le_bytes([buf[0], buf[1]])),
            Dtype::U32 => f64::from(u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]])),
            Dtype::I32 => f64::from(i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]])),
            Dtype::F32 => f64::from(f32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]])),
            Dtype::U64 => u64::from_le_bytes(buf) as f64,
            Dtype::I64 => i64::from_le_bytes(buf) as f64,
            Dtype::F64 => f64::from_le_bytes(buf),
        }
    }
}

/// A `(dtype, base64)` pair, serialized as a two-element JSON array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedArray(pub String, pub String);

impl EncodedArray {
    /// Dtype tag
    pub fn dtype(&self) -> &str {
        &self.0
    }

    /// Base64 body
    pub fn data(&self) -> &str {
        &self.1
    }

    /// Decode into `f64` values.
    pub fn decode(&self) -> AppResult<Vec<f64>> {
        decode_base64_array(&self.0, &self.1)
    }
}

/// Decode a base64 little-endian buffer of `dtype` elements.
///
/// An empty body decodes to an empty vector. A byte count that is not a
/// multiple of the element size is rejected.
pub fn decode_base64_array(dtype: &str, data: &str) -> AppResult<Vec<f64>> {
    let dtype = Dtype::parse(dtype)?;
    let bytes = STANDARD.decode(data.trim())?;
    let item_size = dtype.item_size();
    if bytes.len() % item_size != 0 {
        return Err(ViewerError::ArrayLength {
            dtype: dtype.name().to_string(),
            len: bytes.len(),
            item_size,
        });
    }
    Ok(bytes
        .chunks_exact(item_size)
        .map(|chunk| dtype.read_le(chunk))
        .collect())
}

/// Encode values as a `float64` array.
pub fn encode_base64_array(values: &[f64]) -> EncodedArray {
    let mut bytes = Vec::with_capacity(values.len() * 8);
    for value in values {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    EncodedArray(Dtype::F64.name().to_string(), STANDARD.encode(bytes))
}

// =============================================================================
// Structured payloads
// =============================================================================

/// Decode a JSON payload.
///
/// Devices sometimes wrap the document as `["json", {...}]`; the wrapper is
/// stripped when present. Bare `NaN`/`Infinity` literals, which Python
/// encoders emit, decode as `null`.
pub fn decode_structured<T: DeserializeOwned>(text: &str) -> AppResult<T> {
    let text = null_non_finite(text);
    let value: serde_json::Value = serde_json::from_str(&text)?;
    let document = match value {
        serde_json::Value::Array(mut items)
            if items.len() == 2 && items[0].as_str() == Some("json") =>
        {
            match items.pop() {
                Some(serde_json::Value::String(inner)) => {
                    serde_json::from_str(&null_non_finite(&inner))?
                }
                Some(inner) => inner,
                None => serde_json::Value::Null,
            }
        }
        other => other,
    };
    Ok(serde_json::from_value(document)?)
}

/// Replace `NaN`, `Infinity` and `-Infinity` tokens outside string literals
/// with `null`.
fn null_non_finite(text: &str) -> Cow<'_, str> {
    const TOKENS: [&str; 3] = ["-Infinity", "Infinity", "NaN"];
    if !TOKENS.iter().any(|t| text.contains(t)) {
        return Cow::Borrowed(text);
    }

    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;
    let mut rest = text;
    while let Some(c) = rest.chars().next() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
        } else if c == '"' {
            in_string = true;
        } else if let Some(token) = TOKENS.iter().find(|t| rest.starts_with(*t)) {
            out.push_str("null");
            rest = &rest[token.len()..];
            continue;
        }
        out.push(c);
        rest = &rest[c.len_utf8()..];
    }
    Cow::Owned(out)
}

// =============================================================================
// Video frames
// =============================================================================

/// A decoded camera frame.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedImage {
    /// Frame number reported inside the payload, if any
    pub frame_number: Option<i64>,
    /// Pixel data, `rows x cols`
    pub pixels: Array2<f64>,
}

/// Turns an opaque video payload into pixels.
pub trait FrameDecoder: Send + Sync {
    /// Decode one payload.
    fn decode(&self, payload: &[u8]) -> AppResult<DecodedImage>;
}

/// Decoder for the Lima `VIDEO_IMAGE` layout.
///
/// The payload starts with a 32-byte big-endian header:
///
/// | field        | type |
/// |--------------|------|
/// | magic        | u32  |
/// | version      | u16  |
/// | image mode   | u16  |
/// | frame number | i64  |
/// | width        | i32  |
/// | height       | i32  |
/// | endianness   | u16  |
/// | header size  | u16  |
/// | padding      | 2×u16|
///
/// followed by `width * height` greyscale pixels.
#[derive(Debug, Clone, Copy, Default)]
pub struct VideoImageDecoder;

/// Magic number at the start of every `VIDEO_IMAGE` payload ("VDEO").
pub const VIDEO_IMAGE_MAGIC: u32 = 0x5644_454f;

/// Size of the fixed `VIDEO_IMAGE` header.
pub const VIDEO_HEADER_SIZE: usize = 32;

fn be_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([bytes[at], bytes[at + 1]])
}

fn be_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn be_i64(bytes: &[u8], at: usize) -> i64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[at..at + 8]);
    i64::from_be_bytes(buf)
}

impl VideoImageDecoder {
    fn pixel_dtype(mode: u16) -> AppResult<Dtype> {
        match mode {
            0 => Ok(Dtype::U8),
            1 => Ok(Dtype::U16),
            2 => Ok(Dtype::U32),
            3 => Ok(Dtype::U64),
            other => Err(ViewerError::VideoFrame(format!(
                "unsupported image mode {other}"
            ))),
        }
    }
}

impl FrameDecoder for VideoImageDecoder {
    fn decode(&self, payload: &[u8]) -> AppResult<DecodedImage> {
        if payload.len() < VIDEO_HEADER_SIZE {
            return Err(ViewerError::VideoFrame(format!(
                "payload of {} bytes is shorter than the header",
                payload.len()
            )));
        }
        let magic = be_u32(payload, 0);
        if magic != VIDEO_IMAGE_MAGIC {
            return Err(ViewerError::VideoFrame(format!("bad magic {magic:#010x}")));
        }
        let mode = be_u16(payload, 6);
        let frame_number = be_i64(payload, 8);
        let width = be_u32(payload, 16) as i32;
        let height = be_u32(payload, 20) as i32;
        let big_endian = be_u16(payload, 24) != 0;
        let header_size = usize::from(be_u16(payload, 26)).max(VIDEO_HEADER_SIZE);

        if width < 0 || height < 0 {
            return Err(ViewerError::VideoFrame(format!(
                "negative dimensions {width}x{height}"
            )));
        }
        let (width, height) = (width as usize, height as usize);
        let dtype = Self::pixel_dtype(mode)?;
        let item_size = dtype.item_size();
        let expected = width
            .checked_mul(height)
            .and_then(|n| n.checked_mul(item_size))
            .ok_or_else(|| {
                ViewerError::VideoFrame(format!("frame size {width}x{height} overflows"))
            })?;
        let body = payload.get(header_size..).unwrap_or_default();
        if body.len() < expected {
            return Err(ViewerError::VideoFrame(format!(
                "expected {expected} pixel bytes, got {}",
                body.len()
            )));
        }

        let mut scratch = [0u8; 8];
        let values: Vec<f64> = body[..expected]
            .chunks_exact(item_size)
            .map(|chunk| {
                if big_endian {
                    let out = &mut scratch[..item_size];
                    out.copy_from_slice(chunk);
                    out.reverse();
                    dtype.read_le(out)
                } else {
                    dtype.read_le(chunk)
                }
            })
            .collect();

        let pixels = Array2::from_shape_vec((height, width), values)
            .map_err(|e| ViewerError::VideoFrame(e.to_string()))?;
        Ok(DecodedImage {
            frame_number: Some(frame_number),
            pixels,
        })
    }
}

/// Build a `VIDEO_IMAGE` payload from 16-bit pixels.
///
/// Used by the simulator and by tests that feed a mock device.
pub fn encode_video_image(frame_number: i64, pixels: &Array2<u16>) -> Vec<u8> {
    let (height, width) = pixels.dim();
    let mut out = Vec::with_capacity(VIDEO_HEADER_SIZE + width * height * 2);
    out.extend_from_slice(&VIDEO_IMAGE_MAGIC.to_be_bytes());
    out.extend_from_slice(&1u16.to_be_bytes());
    out.extend_from_slice(&1u16.to_be_bytes());
    out.extend_from_slice(&frame_number.to_be_bytes());
    out.extend_from_slice(&(width as i32).to_be_bytes());
    out.extend_from_slice(&(height as i32).to_be_bytes());
    out.extend_from_slice(&0u16.to_be_bytes());
    out.extend_from_slice(&(VIDEO_HEADER_SIZE as u16).to_be_bytes());
    out.extend_from_slice(&[0u8; 4]);
    for value in pixels.iter() {
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}
