//! # Rollback Journal Header
//!
//! The rollback journal is the legacy companion file. Its header is the
//! only structured part carvedb reads; the page records that follow are
//! treated as opaque blocks (optionally handed to the carver as raw
//! unallocated regions, never interpreted as cells).
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  -----------------------------------------
//! 0       8     magic d9 d5 05 f9 20 a1 63 d7
//! 8       4     page record count (0xffffffff = unknown)
//! 12      4     random nonce for record checksums
//! 16      4     initial database size in pages
//! 20      4     disk sector size
//! 24      4     journal page size
//! ```
//!
//! A zeroed or truncated header is normal for a committed transaction
//! (SQLite invalidates journals by zeroing); that case parses as an
//! invalidated journal rather than an error.

use zerocopy::big_endian::U32;
use zerocopy::{FromBytes, Immutable, KnownLayout, Unaligned};

use crate::be_getters;
use crate::config::{JOURNAL_HEADER_SIZE, JOURNAL_MAGIC, JOURNAL_PAGE_COUNT_SENTINEL};
use crate::errors::ParsingError;
use crate::storage::FileSource;

/// The sector size SQLite pads the journal header to when the stored
/// value is unusable (zeroed header).
pub const DEFAULT_JOURNAL_SECTOR_SIZE: u32 = 512;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, Immutable, KnownLayout, Unaligned)]
struct RawJournalHeader {
    magic: [u8; 8],
    page_record_count: U32,
    nonce: U32,
    initial_database_size: U32,
    sector_size: U32,
    page_size: U32,
}

const _: () = assert!(std::mem::size_of::<RawJournalHeader>() == JOURNAL_HEADER_SIZE);

impl RawJournalHeader {
    be_getters! {
        page_record_count: u32,
        nonce: u32,
        initial_database_size: u32,
        sector_size: u32,
        page_size: u32,
    }
}

/// Decoded rollback-journal header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JournalHeader {
    /// False when the header was zeroed by a committed transaction.
    pub valid_magic: bool,
    /// `None` when the sentinel "all following records" value is stored.
    pub page_record_count: Option<u32>,
    pub nonce: u32,
    pub initial_database_size: u32,
    pub sector_size: u32,
    pub page_size: u32,
}

impl JournalHeader {
    pub fn parse(bytes: &[u8]) -> Result<Self, ParsingError> {
        let raw = RawJournalHeader::ref_from_bytes(
            bytes
                .get(..JOURNAL_HEADER_SIZE)
                .ok_or_else(|| ParsingError::Header {
                    detail: "journal shorter than its 28-byte header".into(),
                })?,
        )
        .map_err(|_| ParsingError::Header {
            detail: "journal header window rejected by layout validation".into(),
        })?;

        let valid_magic = raw.magic == JOURNAL_MAGIC;
        let page_record_count = match raw.page_record_count() {
            JOURNAL_PAGE_COUNT_SENTINEL => None,
            n => Some(n),
        };

        Ok(Self {
            valid_magic,
            page_record_count,
            nonce: raw.nonce(),
            initial_database_size: raw.initial_database_size(),
            sector_size: raw.sector_size(),
            page_size: raw.page_size(),
        })
    }
}

/// One page record located inside the journal body.
///
/// The record's structure (4-byte page number, page image, 4-byte
/// checksum) is positional only; the image itself stays opaque here and
/// is only ever handed onward as a raw block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JournalPageRecord {
    pub page_number: u32,
    /// Offset of the page image within the journal file.
    pub data_offset: u64,
    /// Bytes of the image present; less than a page for the cut-off tail.
    pub data_length: u32,
}

/// Walks the journal body for page records.
///
/// `page_size` comes from the database, not the journal header, which is
/// zeroed on commit. A trailing partial record is included with its
/// surviving length.
pub fn journal_page_records(
    source: &FileSource,
    page_size: u32,
    sector_size: u32,
) -> Vec<JournalPageRecord> {
    let sector_size = if sector_size == 0 {
        DEFAULT_JOURNAL_SECTOR_SIZE
    } else {
        sector_size
    };
    let record_size = 4 + u64::from(page_size) + 4;

    let mut records = Vec::new();
    let mut offset = u64::from(sector_size);
    while offset + 4 <= source.len() {
        let Ok(number_bytes) = source.slice(offset, 4) else {
            break;
        };
        let page_number = u32::from_be_bytes([
            number_bytes[0],
            number_bytes[1],
            number_bytes[2],
            number_bytes[3],
        ]);
        let available = source.len() - offset - 4;
        let data_length = available.min(u64::from(page_size)) as u32;
        if page_number == 0 || data_length == 0 {
            break;
        }
        records.push(JournalPageRecord {
            page_number,
            data_offset: offset + 4,
            data_length,
        });
        offset += record_size;
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn header_bytes(count: u32) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&JOURNAL_MAGIC);
        bytes.extend_from_slice(&count.to_be_bytes());
        bytes.extend_from_slice(&0xdead_beefu32.to_be_bytes());
        bytes.extend_from_slice(&2u32.to_be_bytes());
        bytes.extend_from_slice(&512u32.to_be_bytes());
        bytes.extend_from_slice(&4096u32.to_be_bytes());
        bytes
    }

    #[test]
    fn parses_a_hot_journal_header() {
        let header = JournalHeader::parse(&header_bytes(3)).unwrap();
        assert!(header.valid_magic);
        assert_eq!(header.page_record_count, Some(3));
        assert_eq!(header.nonce, 0xdead_beef);
        assert_eq!(header.initial_database_size, 2);
        assert_eq!(header.sector_size, 512);
        assert_eq!(header.page_size, 4096);
    }

    #[test]
    fn sentinel_count_is_none() {
        let header = JournalHeader::parse(&header_bytes(0xffff_ffff)).unwrap();
        assert_eq!(header.page_record_count, None);
    }

    #[test]
    fn zeroed_header_is_invalidated_not_an_error() {
        let header = JournalHeader::parse(&[0u8; JOURNAL_HEADER_SIZE]).unwrap();
        assert!(!header.valid_magic);
        assert_eq!(header.page_record_count, Some(0));
    }

    #[test]
    fn truncated_header_fails() {
        assert!(JournalHeader::parse(&[0u8; 10]).is_err());
    }

    #[test]
    fn page_records_walk_from_the_first_sector() {
        const PAGE_SIZE: u32 = 512;
        let mut journal = vec![0u8; 512]; // padded header sector
        // Two full records for pages 2 and 3, then a cut-off tail for 4.
        for (page, fill) in [(2u32, 0xaa), (3, 0xbb)] {
            journal.extend_from_slice(&page.to_be_bytes());
            journal.extend_from_slice(&vec![fill; PAGE_SIZE as usize]);
            journal.extend_from_slice(&0u32.to_be_bytes());
        }
        journal.extend_from_slice(&4u32.to_be_bytes());
        journal.extend_from_slice(&[0xcc; 100]);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("case.db-journal");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(&journal).unwrap();
        let source = FileSource::open(&path).unwrap();

        let records = journal_page_records(&source, PAGE_SIZE, 512);
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].page_number, 2);
        assert_eq!(records[0].data_offset, 516);
        assert_eq!(records[0].data_length, PAGE_SIZE);
        assert_eq!(records[1].page_number, 3);
        assert_eq!(records[2].page_number, 4);
        assert_eq!(records[2].data_length, 100);
    }
}
