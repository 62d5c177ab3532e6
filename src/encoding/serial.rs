//! # Serial Types
//!
//! A serial type is the compact type-and-size code stored in a record
//! header, one per column:
//!
//! | Serial type | Content | Bytes |
//! |-------------|---------|-------|
//! | 0           | NULL    | 0 |
//! | 1..=6       | big-endian two's-complement integer | 1,2,3,4,6,8 |
//! | 7           | big-endian IEEE 754 f64 | 8 |
//! | 8, 9        | integer constants 0 and 1 | 0 |
//! | 10, 11      | reserved, never written | - |
//! | n >= 12, even | BLOB | (n-12)/2 |
//! | n >= 13, odd  | TEXT in the database encoding | (n-13)/2 |
//!
//! For signature comparison every serial type collapses to one of five
//! storage classes; the constants 8 and 9 are integers.

use crate::config::{
    BLOB_SERIAL_TYPE_BASE, RESERVED_SERIAL_TYPE_10, RESERVED_SERIAL_TYPE_11, TEXT_SERIAL_TYPE_BASE,
};
use crate::errors::ParsingError;

/// The five storage classes a serial type simplifies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StorageClass {
    Null,
    Integer,
    Real,
    Text,
    Blob,
}

impl StorageClass {
    pub fn name(&self) -> &'static str {
        match self {
            StorageClass::Null => "NULL",
            StorageClass::Integer => "INTEGER",
            StorageClass::Real => "REAL",
            StorageClass::Text => "TEXT",
            StorageClass::Blob => "BLOB",
        }
    }
}

/// Number of body bytes a serial type occupies.
///
/// Reserved types 10 and 11 are rejected; they never occur in well-formed
/// files and their appearance in carved data disqualifies the candidate.
pub fn serial_type_content_length(serial_type: u64) -> Result<u64, ParsingError> {
    match serial_type {
        0 | 8 | 9 => Ok(0),
        1 => Ok(1),
        2 => Ok(2),
        3 => Ok(3),
        4 => Ok(4),
        5 => Ok(6),
        6 | 7 => Ok(8),
        RESERVED_SERIAL_TYPE_10 | RESERVED_SERIAL_TYPE_11 => Err(ParsingError::Record {
            detail: format!("reserved serial type {serial_type}"),
        }),
        n if n >= BLOB_SERIAL_TYPE_BASE && n % 2 == 0 => Ok((n - BLOB_SERIAL_TYPE_BASE) / 2),
        n => Ok((n - TEXT_SERIAL_TYPE_BASE) / 2),
    }
}

/// Collapses a serial type to its storage class.
///
/// Reserved types simplify to `Blob`/`Text` by parity, which only matters
/// for diagnostics; parsing rejects them before this is observable.
pub fn simplify_serial_type(serial_type: u64) -> StorageClass {
    match serial_type {
        0 => StorageClass::Null,
        1..=6 | 8 | 9 => StorageClass::Integer,
        7 => StorageClass::Real,
        n if n % 2 == 0 => StorageClass::Blob,
        _ => StorageClass::Text,
    }
}
