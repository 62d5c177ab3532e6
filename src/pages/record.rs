//! # Record Payloads
//!
//! A record is the payload body of a table or index cell: a header holding
//! its own length varint followed by one serial-type varint per column,
//! then the column contents packed in order.
//!
//! ```text
//! +------------------+----------------------+--------------------+
//! | header length    | serial type varints  | column contents    |
//! | (varint)         | (one per column)     | (packed, no gaps)  |
//! +------------------+----------------------+--------------------+
//! ```
//!
//! The header length counts its own bytes. The sum of the serial types'
//! content lengths must equal the remaining body exactly; both shortfall
//! and surplus are structural violations.

use smallvec::SmallVec;

use crate::encoding::{decode_value, decode_varint, serial_type_content_length, TextEncoding, Value};
use crate::errors::ParsingError;

/// A fully decoded record payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub header_length: u64,
    pub serial_types: SmallVec<[u64; 16]>,
    pub values: Vec<Value>,
    /// Total bytes consumed (header + body).
    pub length: usize,
}

impl Record {
    /// Parses a record from the start of `payload`.
    pub fn parse(payload: &[u8], encoding: TextEncoding) -> Result<Self, ParsingError> {
        let (header_length, header_length_size) =
            decode_varint(payload, 0).map_err(|_| ParsingError::Record {
                detail: "truncated record header length".into(),
            })?;

        let header_end = usize::try_from(header_length).map_err(|_| ParsingError::Record {
            detail: format!("record header length {header_length} overflows"),
        })?;
        if header_end > payload.len() || header_end < header_length_size {
            return Err(ParsingError::Record {
                detail: format!(
                    "record header length {header_length} outside payload of {} bytes",
                    payload.len()
                ),
            });
        }

        let mut serial_types = SmallVec::new();
        let mut offset = header_length_size;
        while offset < header_end {
            let (serial_type, size) =
                decode_varint(payload, offset).map_err(|_| ParsingError::Record {
                    detail: "truncated serial type varint".into(),
                })?;
            if offset + size > header_end {
                return Err(ParsingError::Record {
                    detail: "serial type varint crosses the header boundary".into(),
                });
            }
            serial_types.push(serial_type);
            offset += size;
        }

        let mut values = Vec::with_capacity(serial_types.len());
        let mut body_offset = header_end;
        for &serial_type in &serial_types {
            let (value, content_length) =
                decode_value(serial_type, payload, body_offset, encoding)?;
            values.push(value);
            body_offset += content_length;
        }

        Ok(Self {
            header_length,
            serial_types,
            values,
            length: body_offset,
        })
    }

    /// Sum of the body content lengths declared by the header.
    pub fn body_length(&self) -> u64 {
        self.serial_types
            .iter()
            .map(|&t| serial_type_content_length(t).unwrap_or(0))
            .sum()
    }

    pub fn column_count(&self) -> usize {
        self.serial_types.len()
    }
}
