//! # Serial-Typed Value Decoding
//!
//! Turns a serial type plus a body byte span into a concrete [`Value`].
//! Integers of 1-8 bytes are sign-extended two's-complement; text is
//! decoded in the database encoding declared by the header. Decoding is
//! lossy for text on purpose: carved records routinely contain partially
//! overwritten strings and a forensic tool must surface what survives
//! rather than fail.

use crate::config::{TEXT_ENCODING_UTF16BE, TEXT_ENCODING_UTF16LE, TEXT_ENCODING_UTF8};
use crate::encoding::serial::serial_type_content_length;
use crate::errors::ParsingError;

/// Database text encoding from header byte 56.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Utf8,
    Utf16Le,
    Utf16Be,
}

impl TextEncoding {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            TEXT_ENCODING_UTF8 => Some(TextEncoding::Utf8),
            TEXT_ENCODING_UTF16LE => Some(TextEncoding::Utf16Le),
            TEXT_ENCODING_UTF16BE => Some(TextEncoding::Utf16Be),
            _ => None,
        }
    }

    /// Decodes `bytes` into a string, replacing undecodable sequences.
    pub fn decode(&self, bytes: &[u8]) -> String {
        match self {
            TextEncoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            TextEncoding::Utf16Le => {
                let units: Vec<u16> = bytes
                    .chunks_exact(2)
                    .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                    .collect();
                String::from_utf16_lossy(&units)
            }
            TextEncoding::Utf16Be => {
                let units: Vec<u16> = bytes
                    .chunks_exact(2)
                    .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                    .collect();
                String::from_utf16_lossy(&units)
            }
        }
    }
}

/// A decoded column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

/// Decodes the value for `serial_type` starting at `offset` in `body`.
///
/// Returns the value and its content length.
pub fn decode_value(
    serial_type: u64,
    body: &[u8],
    offset: usize,
    encoding: TextEncoding,
) -> Result<(Value, usize), ParsingError> {
    let content_length = serial_type_content_length(serial_type)? as usize;
    let bytes = body
        .get(offset..offset + content_length)
        .ok_or_else(|| ParsingError::Record {
            detail: format!(
                "serial type {serial_type} needs {content_length} bytes at offset {offset}, body has {}",
                body.len()
            ),
        })?;

    let value = match serial_type {
        0 => Value::Null,
        1..=6 => Value::Integer(read_be_int(bytes)),
        7 => {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(bytes);
            Value::Real(f64::from_be_bytes(raw))
        }
        8 => Value::Integer(0),
        9 => Value::Integer(1),
        n if n >= 12 && n % 2 == 0 => Value::Blob(bytes.to_vec()),
        _ => Value::Text(encoding.decode(bytes)),
    };

    Ok((value, content_length))
}

/// Sign-extending big-endian integer read for 1-8 byte widths.
fn read_be_int(bytes: &[u8]) -> i64 {
    let mut value: i64 = 0;
    for &byte in bytes {
        value = (value << 8) | i64::from(byte);
    }
    let shift = 64 - bytes.len() * 8;
    (value << shift) >> shift
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_and_constants() {
        assert_eq!(
            decode_value(0, &[], 0, TextEncoding::Utf8).unwrap(),
            (Value::Null, 0)
        );
        assert_eq!(
            decode_value(8, &[], 0, TextEncoding::Utf8).unwrap(),
            (Value::Integer(0), 0)
        );
        assert_eq!(
            decode_value(9, &[], 0, TextEncoding::Utf8).unwrap(),
            (Value::Integer(1), 0)
        );
    }

    #[test]
    fn integers_sign_extend() {
        assert_eq!(
            decode_value(1, &[0xff], 0, TextEncoding::Utf8).unwrap(),
            (Value::Integer(-1), 1)
        );
        assert_eq!(
            decode_value(1, &[0x7f], 0, TextEncoding::Utf8).unwrap(),
            (Value::Integer(127), 1)
        );
        assert_eq!(
            decode_value(2, &[0x80, 0x00], 0, TextEncoding::Utf8).unwrap(),
            (Value::Integer(-32768), 2)
        );
        assert_eq!(
            decode_value(3, &[0xff, 0xff, 0xfe], 0, TextEncoding::Utf8).unwrap(),
            (Value::Integer(-2), 3)
        );
        assert_eq!(
            decode_value(5, &[0x00, 0x00, 0x00, 0x00, 0x01, 0x00], 0, TextEncoding::Utf8).unwrap(),
            (Value::Integer(256), 6)
        );
        assert_eq!(
            decode_value(6, &0x1122_3344_5566_7788i64.to_be_bytes(), 0, TextEncoding::Utf8)
                .unwrap(),
            (Value::Integer(0x1122_3344_5566_7788), 8)
        );
    }

    #[test]
    fn real_roundtrips() {
        let bytes = 1.5f64.to_be_bytes();
        assert_eq!(
            decode_value(7, &bytes, 0, TextEncoding::Utf8).unwrap(),
            (Value::Real(1.5), 8)
        );
    }

    #[test]
    fn text_in_each_encoding() {
        // 'hi' -> serial type 13 + 2*2 = 17
        assert_eq!(
            decode_value(17, b"hi", 0, TextEncoding::Utf8).unwrap(),
            (Value::Text("hi".into()), 2)
        );
        assert_eq!(
            decode_value(21, &[b'h', 0, b'i', 0], 0, TextEncoding::Utf16Le).unwrap(),
            (Value::Text("hi".into()), 4)
        );
        assert_eq!(
            decode_value(21, &[0, b'h', 0, b'i'], 0, TextEncoding::Utf16Be).unwrap(),
            (Value::Text("hi".into()), 4)
        );
    }

    #[test]
    fn blob_copies_bytes() {
        assert_eq!(
            decode_value(16, &[1, 2, 9, 9], 0, TextEncoding::Utf8).unwrap(),
            (Value::Blob(vec![1, 2]), 2)
        );
    }

    #[test]
    fn short_body_fails() {
        assert!(decode_value(6, &[0x00; 4], 0, TextEncoding::Utf8).is_err());
    }

    #[test]
    fn offset_is_respected() {
        assert_eq!(
            decode_value(1, &[9, 9, 5], 2, TextEncoding::Utf8).unwrap(),
            (Value::Integer(5), 1)
        );
    }
}
