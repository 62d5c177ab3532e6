//! # Carver
//!
//! Applies a table's signature to the dead space of table-leaf pages:
//! freeblocks first, then the unallocated span between the cell pointer
//! array and the cell content area. Freelist-leaf pages and rollback
//! journal page images are carved as pure unallocated regions.
//!
//! ## Matching Model
//!
//! A candidate is a run of serial-type varints whose per-column types are
//! admitted by the signature. Matches are located by a direct byte walk
//! (no regex): at each offset, consume one varint per column and test it
//! against that column's allowed set. Serial-type varints longer than 5
//! bytes are never admitted, and only TEXT/BLOB columns may have
//! multi-byte varints at all.
//!
//! Matches are processed from the highest offset downward. SQLite
//! allocates cells backward from the page end, so the record at the
//! highest offset is the most recently written and the most likely to be
//! intact; every record below it may have had its tail overwritten by the
//! one above. The moving *cutoff* captures that: a record's body may not
//! extend past the start of anything carved above it, and columns that
//! would are reported truncated.
//!
//! ## Freeblocks
//!
//! The first four bytes of a freeblock overwrite the dead cell's payload
//! length and rowid varints, and usually the header length and first
//! serial type with them. The freeblock walk therefore runs both passes
//! over the surviving content: full-header matches (for records whose
//! varint prefix was 4 bytes or longer) and suffix matches starting at
//! the second column, with the first serial type recovered
//! probabilistically from the signature when its content length is
//! unambiguous.
//!
//! ## Duplicate Suppression
//!
//! Carved record spans whose MD5 digest equals a live cell's record span
//! on the same page are stale copies of surviving rows and are dropped.

pub mod carved_cell;

pub use carved_cell::{CarvedCell, CarvedCellKind, CarvedColumn, TruncationReason};

use hashbrown::HashSet;

use crate::config::FREEBLOCK_HEADER_SIZE;
use crate::encoding::serial::serial_type_content_length;
use crate::encoding::{StorageClass, TextEncoding};
use crate::pages::btree::BTreePage;
use crate::pages::{BTreePageType, Cell};
use crate::signatures::{SerialTypeSet, SignatureFlavor, TableSignature};

use carved_cell::{build_carved_cell, CarveContext};

/// Carver for one table: a signature plus the flavor to test against.
#[derive(Debug)]
pub struct Carver<'a> {
    signature: &'a TableSignature,
    flavor: SignatureFlavor,
}

/// One located serial-type match inside a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct HeaderMatch {
    start: usize,
    end: usize,
}

impl<'a> Carver<'a> {
    pub fn new(signature: &'a TableSignature) -> Self {
        Self {
            signature,
            flavor: signature.effective_flavor(),
        }
    }

    pub fn with_flavor(signature: &'a TableSignature, flavor: SignatureFlavor) -> Self {
        Self { signature, flavor }
    }

    /// Carves every freeblock and the unallocated span of a table-leaf
    /// page, suppressing duplicates of its live cells.
    pub fn carve_leaf_page(
        &self,
        page: &BTreePage,
        page_bytes: &[u8],
        encoding: TextEncoding,
    ) -> Vec<CarvedCell> {
        debug_assert_eq!(page.header.page_type, BTreePageType::TableLeaf);

        let mut cells = Vec::new();
        cells.extend(self.carve_freeblocks(page, page_bytes, encoding));
        cells.extend(self.carve_unallocated(
            page.number,
            page.unallocated.start,
            page_bytes.get(page.unallocated.clone()).unwrap_or(&[]),
            encoding,
        ));

        let live_digests = live_record_digests(page, page_bytes);
        cells.retain(|cell| !live_digests.contains(&cell.digest));
        cells
    }

    /// Carves the freeblock chain of a table-leaf page.
    pub fn carve_freeblocks(
        &self,
        page: &BTreePage,
        page_bytes: &[u8],
        encoding: TextEncoding,
    ) -> Vec<CarvedCell> {
        let mut carved = Vec::new();

        for freeblock in &page.freeblocks {
            if freeblock.size < FREEBLOCK_HEADER_SIZE + 2 {
                continue;
            }
            let range = freeblock.content_range();
            let Some(content) = page_bytes.get(range.clone()) else {
                continue;
            };
            let context = CarveContext {
                region: content,
                region_page_offset: range.start,
                page_number: page.number,
                kind: CarvedCellKind::Freeblock,
                encoding,
                allow_reverse_recovery: false,
            };
            carved.extend(self.carve_region(&context));
        }

        carved
    }

    /// Carves one unallocated region (page gap, freelist-leaf page body,
    /// or journal page image).
    pub fn carve_unallocated(
        &self,
        page_number: u32,
        region_page_offset: usize,
        region: &[u8],
        encoding: TextEncoding,
    ) -> Vec<CarvedCell> {
        let context = CarveContext {
            region,
            region_page_offset,
            page_number,
            kind: CarvedCellKind::Unallocated,
            encoding,
            allow_reverse_recovery: true,
        };
        self.carve_region(&context)
    }

    /// The shared region walk: full-header matches first, then suffix
    /// matches in the gaps the full matches left uncovered.
    fn carve_region(&self, context: &CarveContext<'_>) -> Vec<CarvedCell> {
        let region = context.region;
        let column_count = self.signature.column_count();
        let mut carved = Vec::new();

        // Pass 1: matches carrying the full column sequence.
        let full_matches = self.find_matches(region, 0);
        let mut cutoff = region.len();
        for header_match in full_matches.iter().rev() {
            if let Some(cell) = build_carved_cell(
                context,
                header_match.start,
                header_match.end,
                0,
                None,
                column_count,
                cutoff,
            ) {
                cutoff = header_match.start;
                carved.push(cell);
            }
        }

        // Pass 2: suffix matches (first column lost) in the uncovered
        // gaps. Single-column tables have no suffix to match.
        if column_count > 1 {
            let gaps = uncovered_gaps(region.len(), &full_matches);
            let recovered_first = self.recover_first_serial_type();
            let mut suffix_cutoff = region.len();
            for header_match in self.find_matches(region, 1).iter().rev() {
                let Some(&gap) = gaps
                    .iter()
                    .find(|gap| header_match.start >= gap.0 && header_match.end <= gap.1)
                else {
                    continue;
                };
                if let Some(cell) = build_carved_cell(
                    context,
                    header_match.start,
                    header_match.end,
                    1,
                    recovered_first,
                    column_count,
                    suffix_cutoff.min(gap.1),
                ) {
                    suffix_cutoff = header_match.start;
                    carved.push(cell);
                }
            }
        }

        carved.sort_by_key(|cell| cell.start_offset);
        carved
    }

    /// Finds every offset where columns `first..` match consecutively.
    fn find_matches(&self, region: &[u8], first: usize) -> Vec<HeaderMatch> {
        let mut matches = Vec::new();
        for start in 0..region.len() {
            if let Some(end) = self.match_columns_at(region, start, first) {
                matches.push(HeaderMatch { start, end });
            }
        }
        matches
    }

    /// Matches the serial-type sequence of columns `first..` at `offset`.
    ///
    /// A full-width match is always accepted. A shorter run is accepted
    /// only when the table's observed history contains rows that short
    /// (columns added by ALTER TABLE are missing from older records).
    fn match_columns_at(&self, region: &[u8], offset: usize, first: usize) -> Option<usize> {
        let columns = &self.signature.columns[first..];
        let mut cursor = offset;
        let mut matched = 0usize;

        for column in columns {
            let Some((serial_type, length)) = read_serial_type_varint(region, cursor) else {
                break;
            };
            let allowed = column.allowed(self.flavor);
            if length > 1 && !allowed.admits_large_types() {
                break;
            }
            if !allowed.admits(serial_type) {
                break;
            }
            if serial_type_content_length(serial_type).is_err() {
                break;
            }
            cursor += length;
            matched += 1;
        }

        if matched == 0 {
            return None;
        }
        if matched < columns.len() && matched + first < self.signature.min_column_count {
            return None;
        }
        Some(cursor)
    }

    /// Probabilistic recovery of an overwritten first serial type: only
    /// classes with a single possible content length are usable.
    fn recover_first_serial_type(&self) -> Option<u64> {
        let column = self.signature.columns.first()?;
        let allowed = column.allowed(self.flavor);
        let only_null = SerialTypeSet {
            null: true,
            ..Default::default()
        };
        // A rowid alias can only ever be NULL.
        if *allowed == only_null {
            return Some(0);
        }
        match column.dominant_class()? {
            StorageClass::Null => Some(0),
            StorageClass::Real => Some(7),
            // Integer widths and text/blob lengths are ambiguous; body
            // alignment would be a guess.
            _ => None,
        }
    }
}

/// Reads a serial-type varint capped at 5 bytes.
fn read_serial_type_varint(region: &[u8], offset: usize) -> Option<(u64, usize)> {
    let mut value: u64 = 0;
    for i in 0..5 {
        let byte = *region.get(offset + i)?;
        value = (value << 7) | u64::from(byte & 0x7f);
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
    }
    None
}

/// The spans of `0..length` not covered by any match.
fn uncovered_gaps(length: usize, matches: &[HeaderMatch]) -> Vec<(usize, usize)> {
    let mut gaps = Vec::new();
    let mut cursor = 0usize;
    for header_match in matches {
        if header_match.start > cursor {
            gaps.push((cursor, header_match.start));
        }
        cursor = cursor.max(header_match.end);
    }
    if cursor < length {
        gaps.push((cursor, length));
    }
    gaps
}

/// MD5 digests of the live record spans (payload bytes) on a page.
fn live_record_digests(page: &BTreePage, page_bytes: &[u8]) -> HashSet<[u8; 16]> {
    let mut digests = HashSet::with_capacity(page.cells.len());
    for cell in &page.cells {
        if let Cell::TableLeaf(leaf) = cell {
            if let Some(payload) =
                page_bytes.get(leaf.payload_start..leaf.payload_start + leaf.payload_inline_length)
            {
                digests.insert(crate::pages::cell::digest_of(payload));
            }
        }
    }
    digests
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::Value;
    use crate::schema::parse_create_table;
    use crate::signatures::ColumnSignature;

    /// Hand-built signature for `t(a INTEGER PRIMARY KEY, b TEXT)` with
    /// one observed row (rowid, 'hello').
    fn alias_text_signature() -> TableSignature {
        let table = parse_create_table("CREATE TABLE t(a INTEGER PRIMARY KEY, b TEXT)").unwrap();
        let mut columns = Vec::new();
        for (index, column) in table.columns.iter().enumerate() {
            let mut simplified = SerialTypeSet::default();
            let mut focused = SerialTypeSet::default();
            let probabilistic;
            if index == 0 {
                simplified.insert(0);
                focused.insert(0);
                probabilistic = vec![(StorageClass::Null, 1.0)];
            } else {
                simplified.insert_class(StorageClass::Text);
                focused.insert(23);
                probabilistic = vec![(StorageClass::Text, 1.0)];
            }
            columns.push(ColumnSignature {
                index,
                name: column.name.clone(),
                schema: SerialTypeSet::for_affinity(
                    column.affinity,
                    column.not_null,
                    column.rowid_alias,
                ),
                simplified,
                focused,
                probabilistic,
                presence: 1.0,
            });
        }
        TableSignature {
            name: "t".into(),
            table_name: "t".into(),
            columns,
            row_count: 1,
            min_column_count: 2,
        }
    }

    /// A 512-byte table-leaf page whose single row was deleted into a
    /// freeblock. The freeblock header overwrote the cell's payload
    /// length, rowid, header length and first serial type.
    fn deleted_row_page() -> (BTreePage, Vec<u8>) {
        let mut page = vec![0u8; 512];
        let fb_offset = 498;
        page[fb_offset..fb_offset + 2].copy_from_slice(&0u16.to_be_bytes());
        page[fb_offset + 2..fb_offset + 4].copy_from_slice(&14u16.to_be_bytes());
        // Surviving record tail: serial type 23 then 'hello'.
        page[fb_offset + 4] = 0x17;
        page[fb_offset + 5..fb_offset + 10].copy_from_slice(b"hello");

        page[0] = crate::config::TABLE_LEAF_PAGE_TYPE;
        page[1..3].copy_from_slice(&(fb_offset as u16).to_be_bytes());
        page[3..5].copy_from_slice(&0u16.to_be_bytes());
        page[5..7].copy_from_slice(&(fb_offset as u16).to_be_bytes());

        let parsed = BTreePage::parse(&page, 2, 512).unwrap();
        (parsed, page)
    }

    #[test]
    fn freeblock_carve_recovers_the_deleted_row() {
        let signature = alias_text_signature();
        let carver = Carver::new(&signature);
        let (page, bytes) = deleted_row_page();

        let carved = carver.carve_freeblocks(&page, &bytes, TextEncoding::Utf8);
        assert_eq!(carved.len(), 1, "carved: {carved:?}");

        let cell = &carved[0];
        assert_eq!(cell.kind, CarvedCellKind::Freeblock);
        assert_eq!(cell.rowid, None);
        assert_eq!(cell.columns.len(), 2);
        assert_eq!(cell.columns[0].serial_type, Some(0));
        assert_eq!(cell.columns[0].value, Some(Value::Null));
        assert_eq!(cell.columns[1].value, Some(Value::Text("hello".into())));
        assert!(!cell.truncated);
    }

    #[test]
    fn unallocated_carve_recovers_rowid_and_payload_length() {
        let signature = alias_text_signature();
        let carver = Carver::new(&signature);

        // Intact dead record in unallocated space, preceded by its
        // payload length (8), rowid (5) and header length (3). The 0x2a
        // filler is inadmissible as a serial type and carries no
        // continuation bit, so reverse varint recovery stops cleanly.
        let mut region = vec![0x2au8; 64];
        region[40..50]
            .copy_from_slice(&[0x08, 0x05, 0x03, 0x00, 0x17, b'h', b'e', b'l', b'l', b'o']);

        let carved = carver.carve_unallocated(2, 100, &region, TextEncoding::Utf8);
        let intact: Vec<_> = carved.iter().filter(|c| !c.truncated).collect();
        assert_eq!(intact.len(), 1, "carved: {carved:?}");
        let cell = intact[0];
        assert_eq!(cell.rowid, Some(5));
        assert_eq!(cell.payload_length, Some(8));
        assert_eq!(cell.start_offset, 140);
        assert_eq!(cell.end_offset, 150);
        assert_eq!(cell.columns[0].value, Some(Value::Null));
        assert_eq!(cell.columns[1].value, Some(Value::Text("hello".into())));
    }

    #[test]
    fn suffix_match_emits_a_truncated_cell() {
        let signature = alias_text_signature();
        let carver = Carver::new(&signature);

        // Only the tail of the record header survives; the byte before it
        // is inadmissible so the full-header pass cannot fire.
        let mut region = vec![0xaau8; 32];
        region[20] = 0x17;
        region[21..26].copy_from_slice(b"hello");

        let carved = carver.carve_unallocated(2, 0, &region, TextEncoding::Utf8);
        let recovered: Vec<_> = carved
            .iter()
            .filter(|c| c.columns[1].value == Some(Value::Text("hello".into())))
            .collect();
        assert_eq!(recovered.len(), 1, "carved: {carved:?}");
        // The first column is a rowid alias, so its serial type is
        // recovered as NULL even though the header head is gone.
        assert_eq!(recovered[0].columns[0].serial_type, Some(0));
        assert_eq!(recovered[0].rowid, None);
    }

    #[test]
    fn body_crossing_the_cutoff_truncates() {
        let signature = alias_text_signature();
        let carver = Carver::new(&signature);

        // The declared text is 10 bytes but only 3 survive before the
        // region (and therefore the cutoff) ends.
        let mut region = vec![0x2au8; 8];
        region[3] = 0x00;
        region[4] = 0x21; // text of 10 bytes
        region[5..8].copy_from_slice(b"hel");

        let carved = carver.carve_unallocated(2, 0, &region, TextEncoding::Utf8);
        assert_eq!(carved.len(), 1, "carved: {carved:?}");
        let cell = &carved[0];
        assert!(cell.truncated);
        assert_eq!(cell.columns[0].value, Some(Value::Null));
        assert_eq!(cell.columns[1].value, None);
        assert_eq!(
            cell.columns[1].truncation,
            Some(TruncationReason::Cutoff)
        );
    }

    #[test]
    fn carver_is_idempotent() {
        let signature = alias_text_signature();
        let carver = Carver::new(&signature);
        let (page, bytes) = deleted_row_page();

        let first = carver.carve_leaf_page(&page, &bytes, TextEncoding::Utf8);
        let second = carver.carve_leaf_page(&page, &bytes, TextEncoding::Utf8);
        let project = |cells: &[CarvedCell]| {
            cells
                .iter()
                .map(|c| (c.start_offset, c.columns.clone()))
                .collect::<Vec<_>>()
        };
        assert_eq!(project(&first), project(&second));
    }

    #[test]
    fn live_duplicates_are_suppressed() {
        let signature = alias_text_signature();
        let carver = Carver::new(&signature);

        // A live page whose record bytes also appear, bit for bit, in the
        // unallocated area (stale copy of the same row).
        let mut page = vec![0u8; 512];
        let cell: [u8; 10] = [0x08, 0x01, 0x03, 0x00, 0x17, b'h', b'e', b'l', b'l', b'o'];
        page[502..].copy_from_slice(&cell);
        page[300..310].copy_from_slice(&cell);

        page[0] = crate::config::TABLE_LEAF_PAGE_TYPE;
        page[3..5].copy_from_slice(&1u16.to_be_bytes());
        page[5..7].copy_from_slice(&502u16.to_be_bytes());
        page[8..10].copy_from_slice(&502u16.to_be_bytes());

        let parsed = BTreePage::parse(&page, 2, 512).unwrap();
        let carved = carver.carve_leaf_page(&parsed, &page, TextEncoding::Utf8);
        assert!(
            !carved
                .iter()
                .any(|c| c.rowid == Some(1) && !c.truncated),
            "stale intact copy should have been suppressed: {carved:?}"
        );
    }

    #[test]
    fn empty_region_carves_nothing() {
        let signature = alias_text_signature();
        let carver = Carver::new(&signature);
        assert!(carver
            .carve_unallocated(2, 0, &[], TextEncoding::Utf8)
            .is_empty());
    }

    #[test]
    fn schema_fallback_used_without_rows() {
        let table = parse_create_table("CREATE TABLE t(a INTEGER PRIMARY KEY, b TEXT)").unwrap();
        let columns = table
            .columns
            .iter()
            .enumerate()
            .map(|(index, column)| ColumnSignature {
                index,
                name: column.name.clone(),
                schema: SerialTypeSet::for_affinity(
                    column.affinity,
                    column.not_null,
                    column.rowid_alias,
                ),
                simplified: SerialTypeSet::default(),
                focused: SerialTypeSet::default(),
                probabilistic: Vec::new(),
                presence: 1.0,
            })
            .collect();
        let signature = TableSignature {
            name: "t".into(),
            table_name: "t".into(),
            columns,
            row_count: 0,
            min_column_count: 2,
        };
        assert_eq!(signature.effective_flavor(), SignatureFlavor::Schema);

        let carver = Carver::new(&signature);
        let mut region = vec![0xaau8; 32];
        region[10..20]
            .copy_from_slice(&[0x08, 0x02, 0x03, 0x00, 0x17, b'h', b'e', b'l', b'l', b'o']);
        let carved = carver.carve_unallocated(2, 0, &region, TextEncoding::Utf8);
        assert!(carved
            .iter()
            .any(|c| c.columns[1].value == Some(Value::Text("hello".into()))));
    }
}
