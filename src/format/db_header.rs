//! # Database File Header
//!
//! The 100-byte header at the start of page 1. The layout is fixed and
//! big-endian:
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  -------------------------------------------
//! 0       16    magic "SQLite format 3\0"
//! 16      2     page size (1 means 65536)
//! 18      1     file format write version
//! 19      1     file format read version
//! 20      1     reserved bytes per page
//! 21      1     maximum embedded payload fraction (must be 64)
//! 22      1     minimum embedded payload fraction (must be 32)
//! 23      1     leaf payload fraction (must be 32)
//! 24      4     file change counter
//! 28      4     database size in pages
//! 32      4     first freelist trunk page
//! 36      4     freelist page count
//! 40      4     schema cookie
//! 44      4     schema format number (1..4)
//! 48      4     default page cache size
//! 52      4     largest root b-tree page (auto-vacuum)
//! 56      4     text encoding (1, 2, 3)
//! 60      4     user version
//! 64      4     incremental-vacuum mode
//! 68      4     application id
//! 72      20    reserved for expansion (zero)
//! 92      4     version-valid-for number
//! 96      4     SQLite version number
//! ```
//!
//! ## Strict vs Non-Strict
//!
//! Strict mode rejects a bad magic, an out-of-range or non-power-of-two
//! page size, payload fractions other than 64/32/32, a text encoding
//! outside 1..=3 or a schema format outside 1..=4. Non-strict mode records
//! each of those as a warning and keeps the declared values so that
//! downstream decoders can still make best-effort progress. A bad magic is
//! fatal in both modes; without it there is no reason to believe anything
//! that follows.
//!
//! ## Stale Page Counts
//!
//! The stored database size is only trustworthy when `version_valid_for`
//! equals the file change counter. When it does not, or when the stored
//! size is zero, the size is re-derived from the file length and a warning
//! is recorded.

use zerocopy::big_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, KnownLayout, Unaligned};

use crate::be_getters;
use crate::config::{
    DB_HEADER_SIZE, DB_MAGIC, LEAF_PAYLOAD_FRACTION, MAX_EMBEDDED_PAYLOAD_FRACTION,
    MAX_PAGE_SIZE, MAX_SCHEMA_FORMAT, MIN_EMBEDDED_PAYLOAD_FRACTION, MIN_PAGE_SIZE,
    PAGE_SIZE_SENTINEL,
};
use crate::encoding::TextEncoding;
use crate::errors::ParsingError;
use crate::storage::Warnings;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, Immutable, KnownLayout, Unaligned)]
struct RawDatabaseHeader {
    magic: [u8; 16],
    page_size: U16,
    write_version: u8,
    read_version: u8,
    reserved_bytes_per_page: u8,
    max_embedded_payload_fraction: u8,
    min_embedded_payload_fraction: u8,
    leaf_payload_fraction: u8,
    file_change_counter: U32,
    database_size_in_pages: U32,
    first_freelist_trunk_page: U32,
    freelist_page_count: U32,
    schema_cookie: U32,
    schema_format: U32,
    default_page_cache_size: U32,
    largest_root_btree_page: U32,
    text_encoding: U32,
    user_version: U32,
    incremental_vacuum_mode: U32,
    application_id: U32,
    reserved: [u8; 20],
    version_valid_for: U32,
    sqlite_version_number: U32,
}

const _: () = assert!(std::mem::size_of::<RawDatabaseHeader>() == DB_HEADER_SIZE);

impl RawDatabaseHeader {
    be_getters! {
        page_size: u16,
        file_change_counter: u32,
        database_size_in_pages: u32,
        first_freelist_trunk_page: u32,
        freelist_page_count: u32,
        schema_cookie: u32,
        schema_format: u32,
        default_page_cache_size: u32,
        largest_root_btree_page: u32,
        text_encoding: u32,
        user_version: u32,
        incremental_vacuum_mode: u32,
        application_id: u32,
        version_valid_for: u32,
        sqlite_version_number: u32,
    }
}

/// Decoded and validated database header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseHeader {
    /// Resolved page size in bytes (sentinel 1 already expanded to 65536).
    pub page_size: u32,
    pub write_version: u8,
    pub read_version: u8,
    pub reserved_bytes_per_page: u8,
    pub max_embedded_payload_fraction: u8,
    pub min_embedded_payload_fraction: u8,
    pub leaf_payload_fraction: u8,
    pub file_change_counter: u32,
    /// Size stored in the header; see [`DatabaseHeader::effective_page_count`].
    pub database_size_in_pages: u32,
    pub first_freelist_trunk_page: u32,
    pub freelist_page_count: u32,
    pub schema_cookie: u32,
    pub schema_format: u32,
    pub default_page_cache_size: u32,
    pub largest_root_btree_page: u32,
    pub text_encoding: TextEncoding,
    pub user_version: u32,
    pub incremental_vacuum_mode: u32,
    pub application_id: u32,
    pub version_valid_for: u32,
    pub sqlite_version_number: u32,
}

impl DatabaseHeader {
    /// Decodes and validates the first 100 bytes of page 1.
    pub fn parse(
        bytes: &[u8],
        strict: bool,
        warnings: &Warnings,
    ) -> Result<Self, ParsingError> {
        let raw = RawDatabaseHeader::ref_from_bytes(
            bytes
                .get(..DB_HEADER_SIZE)
                .ok_or_else(|| header_error("file shorter than the 100-byte header"))?,
        )
        .map_err(|_| header_error("header window rejected by layout validation"))?;

        if &raw.magic != DB_MAGIC {
            // Without the magic nothing downstream can be trusted; fatal in
            // both modes.
            return Err(header_error(format!(
                "bad magic {:02x?}",
                &raw.magic[..]
            )));
        }

        let raw_page_size = raw.page_size();
        let page_size = if raw_page_size == PAGE_SIZE_SENTINEL {
            MAX_PAGE_SIZE
        } else {
            u32::from(raw_page_size)
        };

        let deviation = |offset: u64, detail: String| -> Result<(), ParsingError> {
            if strict {
                Err(header_error(detail))
            } else {
                warnings.push(Some(offset), detail);
                Ok(())
            }
        };

        if !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&page_size) || !page_size.is_power_of_two() {
            deviation(16, format!("invalid page size {raw_page_size}"))?;
        }
        // SQLite requires at least 480 usable bytes per page.
        if u32::from(raw.reserved_bytes_per_page) > page_size.saturating_sub(480) {
            deviation(
                20,
                format!(
                    "reserved space {} leaves fewer than 480 usable bytes",
                    raw.reserved_bytes_per_page
                ),
            )?;
        }
        if raw.max_embedded_payload_fraction != MAX_EMBEDDED_PAYLOAD_FRACTION {
            deviation(
                21,
                format!(
                    "maximum embedded payload fraction {} (expected {})",
                    raw.max_embedded_payload_fraction, MAX_EMBEDDED_PAYLOAD_FRACTION
                ),
            )?;
        }
        if raw.min_embedded_payload_fraction != MIN_EMBEDDED_PAYLOAD_FRACTION {
            deviation(
                22,
                format!(
                    "minimum embedded payload fraction {} (expected {})",
                    raw.min_embedded_payload_fraction, MIN_EMBEDDED_PAYLOAD_FRACTION
                ),
            )?;
        }
        if raw.leaf_payload_fraction != LEAF_PAYLOAD_FRACTION {
            deviation(
                23,
                format!(
                    "leaf payload fraction {} (expected {})",
                    raw.leaf_payload_fraction, LEAF_PAYLOAD_FRACTION
                ),
            )?;
        }
        if !(1..=MAX_SCHEMA_FORMAT).contains(&raw.schema_format()) {
            deviation(44, format!("schema format {}", raw.schema_format()))?;
        }

        let text_encoding = match TextEncoding::from_raw(raw.text_encoding()) {
            Some(encoding) => encoding,
            None => {
                deviation(56, format!("text encoding {}", raw.text_encoding()))?;
                TextEncoding::Utf8
            }
        };

        Ok(Self {
            page_size,
            write_version: raw.write_version,
            read_version: raw.read_version,
            reserved_bytes_per_page: raw.reserved_bytes_per_page,
            max_embedded_payload_fraction: raw.max_embedded_payload_fraction,
            min_embedded_payload_fraction: raw.min_embedded_payload_fraction,
            leaf_payload_fraction: raw.leaf_payload_fraction,
            file_change_counter: raw.file_change_counter(),
            database_size_in_pages: raw.database_size_in_pages(),
            first_freelist_trunk_page: raw.first_freelist_trunk_page(),
            freelist_page_count: raw.freelist_page_count(),
            schema_cookie: raw.schema_cookie(),
            schema_format: raw.schema_format(),
            default_page_cache_size: raw.default_page_cache_size(),
            largest_root_btree_page: raw.largest_root_btree_page(),
            text_encoding,
            user_version: raw.user_version(),
            incremental_vacuum_mode: raw.incremental_vacuum_mode(),
            application_id: raw.application_id(),
            version_valid_for: raw.version_valid_for(),
            sqlite_version_number: raw.sqlite_version_number(),
        })
    }

    /// Usable bytes per page after the reserved region.
    pub fn usable_page_size(&self) -> u32 {
        self.page_size - u32::from(self.reserved_bytes_per_page)
    }

    /// True when auto-vacuum (and therefore pointer-map pages) is enabled.
    pub fn auto_vacuum(&self) -> bool {
        self.largest_root_btree_page != 0
    }

    /// The page count to use for iteration.
    ///
    /// The stored count is only valid when `version_valid_for` matches the
    /// change counter; otherwise (or when zero) the count is derived from
    /// the file length and a warning is recorded.
    pub fn effective_page_count(&self, file_length: u64, warnings: &Warnings) -> u32 {
        let derived = (file_length / u64::from(self.page_size)) as u32;
        let stored = self.database_size_in_pages;

        if stored != 0 && self.version_valid_for == self.file_change_counter {
            if u64::from(stored) * u64::from(self.page_size) != file_length {
                warnings.push(
                    Some(28),
                    format!(
                        "header page count {stored} disagrees with file length {file_length}; using {derived}"
                    ),
                );
                return derived;
            }
            return stored;
        }

        warnings.push(
            Some(92),
            format!(
                "stale header page count (version_valid_for {} != change counter {}); derived {derived} from file length",
                self.version_valid_for, self.file_change_counter
            ),
        );
        derived
    }
}

fn header_error(detail: impl Into<String>) -> ParsingError {
    ParsingError::Header {
        detail: detail.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_header_bytes() -> Vec<u8> {
        let mut bytes = vec![0u8; DB_HEADER_SIZE];
        bytes[..16].copy_from_slice(DB_MAGIC);
        bytes[16..18].copy_from_slice(&4096u16.to_be_bytes());
        bytes[18] = 1;
        bytes[19] = 1;
        bytes[20] = 0;
        bytes[21] = 64;
        bytes[22] = 32;
        bytes[23] = 32;
        bytes[24..28].copy_from_slice(&7u32.to_be_bytes()); // change counter
        bytes[28..32].copy_from_slice(&2u32.to_be_bytes()); // size in pages
        bytes[44..48].copy_from_slice(&4u32.to_be_bytes()); // schema format
        bytes[56..60].copy_from_slice(&1u32.to_be_bytes()); // utf-8
        bytes[92..96].copy_from_slice(&7u32.to_be_bytes()); // version valid for
        bytes[96..100].copy_from_slice(&3_045_001u32.to_be_bytes());
        bytes
    }

    #[test]
    fn parses_a_valid_header() {
        let warnings = Warnings::new();
        let header = DatabaseHeader::parse(&valid_header_bytes(), true, &warnings).unwrap();

        assert_eq!(header.page_size, 4096);
        assert_eq!(header.file_change_counter, 7);
        assert_eq!(header.database_size_in_pages, 2);
        assert_eq!(header.schema_format, 4);
        assert_eq!(header.text_encoding, TextEncoding::Utf8);
        assert_eq!(header.usable_page_size(), 4096);
        assert!(!header.auto_vacuum());
        assert!(warnings.is_empty());
    }

    #[test]
    fn sentinel_page_size_means_65536() {
        let mut bytes = valid_header_bytes();
        bytes[16..18].copy_from_slice(&1u16.to_be_bytes());
        let warnings = Warnings::new();
        let header = DatabaseHeader::parse(&bytes, true, &warnings).unwrap();
        assert_eq!(header.page_size, 65536);
    }

    #[test]
    fn bad_magic_is_fatal_even_when_lenient() {
        let mut bytes = valid_header_bytes();
        bytes[0] = b'X';
        let warnings = Warnings::new();
        assert!(DatabaseHeader::parse(&bytes, false, &warnings).is_err());
    }

    #[test]
    fn strict_rejects_bad_fraction_lenient_warns() {
        let mut bytes = valid_header_bytes();
        bytes[21] = 200;

        let warnings = Warnings::new();
        assert!(DatabaseHeader::parse(&bytes, true, &warnings).is_err());

        let warnings = Warnings::new();
        let header = DatabaseHeader::parse(&bytes, false, &warnings).unwrap();
        assert_eq!(header.max_embedded_payload_fraction, 200);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn strict_rejects_invalid_page_size() {
        let mut bytes = valid_header_bytes();
        bytes[16..18].copy_from_slice(&1000u16.to_be_bytes());
        let warnings = Warnings::new();
        assert!(DatabaseHeader::parse(&bytes, true, &warnings).is_err());
    }

    #[test]
    fn strict_rejects_unknown_text_encoding() {
        let mut bytes = valid_header_bytes();
        bytes[56..60].copy_from_slice(&9u32.to_be_bytes());

        let warnings = Warnings::new();
        assert!(DatabaseHeader::parse(&bytes, true, &warnings).is_err());

        // Lenient mode falls back to UTF-8 with a warning.
        let warnings = Warnings::new();
        let header = DatabaseHeader::parse(&bytes, false, &warnings).unwrap();
        assert_eq!(header.text_encoding, TextEncoding::Utf8);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn effective_page_count_trusts_a_fresh_header() {
        let warnings = Warnings::new();
        let header = DatabaseHeader::parse(&valid_header_bytes(), true, &warnings).unwrap();
        assert_eq!(header.effective_page_count(2 * 4096, &warnings), 2);
        assert!(warnings.is_empty());
    }

    #[test]
    fn effective_page_count_derives_when_stale() {
        let mut bytes = valid_header_bytes();
        bytes[92..96].copy_from_slice(&3u32.to_be_bytes()); // != change counter
        let warnings = Warnings::new();
        let header = DatabaseHeader::parse(&bytes, true, &warnings).unwrap();

        assert_eq!(header.effective_page_count(3 * 4096, &warnings), 3);
        assert_eq!(warnings.len(), 1);
    }
}
