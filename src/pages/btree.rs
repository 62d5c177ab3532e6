//! # B-Tree Pages
//!
//! Parses the four b-tree page kinds into their header, cell pointer
//! array, resolved cells, freeblock chain and unallocated span.
//!
//! ## Page Layout
//!
//! ```text
//! +--------------------------+  <- 0 (page 1: 100, after the file header)
//! | b-tree header (8 or 12)  |
//! +--------------------------+
//! | cell pointer array       |  2 bytes per cell
//! +--------------------------+  <- unallocated span starts
//! | unallocated              |
//! +--------------------------+  <- cell content start
//! | cells and freeblocks     |
//! +--------------------------+  <- usable size (reserved region follows)
//! ```
//!
//! ## Header Fields
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  ---------------------------------------------
//! 0       1     page type (0x02, 0x05, 0x0a, 0x0d)
//! 1       2     offset of first freeblock (0 = none)
//! 3       2     cell count
//! 5       2     cell content start (0 = 65536)
//! 7       1     fragmented free byte count
//! 8       4     right-most child pointer (interior only)
//! ```
//!
//! ## Freeblocks and Fragments
//!
//! Deleted cells leave freeblocks: 4-byte headers (next offset, size)
//! chained in strictly increasing offset order inside the cell content
//! area. Gaps of 1-3 bytes cannot hold a freeblock header and are counted
//! in the fragment byte of the page header. The freeblock chain is
//! validated for monotonicity, bounds and overlap with parsed cells; a
//! violation is a structural error because every downstream consumer (the
//! carver above all) trusts these spans.

use crate::config::{
    CELL_CONTENT_START_SENTINEL, CELL_POINTER_SIZE, DB_HEADER_SIZE, FREEBLOCK_HEADER_SIZE,
    INDEX_INTERIOR_PAGE_TYPE, INDEX_LEAF_PAGE_TYPE, INTERIOR_PAGE_HEADER_SIZE,
    LEAF_PAGE_HEADER_SIZE, MAX_PAGE_SIZE, TABLE_INTERIOR_PAGE_TYPE, TABLE_LEAF_PAGE_TYPE,
};
use crate::errors::ParsingError;
use crate::pages::cell::{
    parse_index_cell, parse_table_interior_cell, parse_table_leaf_cell, Cell,
};

/// The four b-tree page kinds, discriminated by the header's first byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BTreePageType {
    IndexInterior,
    TableInterior,
    IndexLeaf,
    TableLeaf,
}

impl BTreePageType {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            INDEX_INTERIOR_PAGE_TYPE => Some(BTreePageType::IndexInterior),
            TABLE_INTERIOR_PAGE_TYPE => Some(BTreePageType::TableInterior),
            INDEX_LEAF_PAGE_TYPE => Some(BTreePageType::IndexLeaf),
            TABLE_LEAF_PAGE_TYPE => Some(BTreePageType::TableLeaf),
            _ => None,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, BTreePageType::IndexLeaf | BTreePageType::TableLeaf)
    }

    pub fn is_table(&self) -> bool {
        matches!(self, BTreePageType::TableInterior | BTreePageType::TableLeaf)
    }

    pub fn header_size(&self) -> usize {
        if self.is_leaf() {
            LEAF_PAGE_HEADER_SIZE
        } else {
            INTERIOR_PAGE_HEADER_SIZE
        }
    }
}

/// Decoded b-tree page header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BTreePageHeader {
    pub page_type: BTreePageType,
    /// Offset of the first freeblock; 0 means the chain is empty.
    pub first_freeblock: u16,
    pub cell_count: u16,
    /// Cell content start with the 0-means-65536 sentinel resolved.
    pub cell_content_start: u32,
    pub fragment_bytes: u8,
    /// Right-most child; interior pages only.
    pub right_most_page: Option<u32>,
}

/// One freeblock: `size` includes the 4-byte freeblock header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Freeblock {
    pub offset: usize,
    pub size: usize,
}

impl Freeblock {
    /// The span of the freeblock that can hold remains of a deleted cell
    /// (past the overwritten next/size words).
    pub fn content_range(&self) -> std::ops::Range<usize> {
        self.offset + FREEBLOCK_HEADER_SIZE..self.offset + self.size
    }
}

/// A fully parsed b-tree page.
#[derive(Debug, Clone)]
pub struct BTreePage {
    pub number: u32,
    pub header: BTreePageHeader,
    /// 0 for ordinary pages, 100 on page 1.
    pub header_offset: usize,
    pub cell_pointers: Vec<u16>,
    /// Cells in cell-pointer-array order.
    pub cells: Vec<Cell>,
    pub freeblocks: Vec<Freeblock>,
    /// The gap between the cell pointer array and the cell content area.
    pub unallocated: std::ops::Range<usize>,
}

impl BTreePage {
    /// Parses page `number` from its raw bytes.
    ///
    /// `usable` is `page_size - reserved_space`; cells and freeblocks must
    /// stay inside it.
    pub fn parse(
        page: &[u8],
        number: u32,
        usable: u32,
    ) -> Result<Self, ParsingError> {
        let header_offset = if number == 1 { DB_HEADER_SIZE } else { 0 };
        let page_error = |detail: String| ParsingError::BTreePage {
            page: number,
            detail,
        };

        let type_byte = *page
            .get(header_offset)
            .ok_or_else(|| page_error("page shorter than its header".into()))?;
        let page_type = BTreePageType::from_byte(type_byte)
            .ok_or_else(|| page_error(format!("invalid b-tree page type {type_byte:#04x}")))?;

        let header_size = page_type.header_size();
        let header_bytes = page
            .get(header_offset..header_offset + header_size)
            .ok_or_else(|| page_error("page shorter than its header".into()))?;

        let first_freeblock = u16::from_be_bytes([header_bytes[1], header_bytes[2]]);
        let cell_count = u16::from_be_bytes([header_bytes[3], header_bytes[4]]);
        let raw_content_start = u16::from_be_bytes([header_bytes[5], header_bytes[6]]);
        let cell_content_start = if raw_content_start == CELL_CONTENT_START_SENTINEL {
            MAX_PAGE_SIZE
        } else {
            u32::from(raw_content_start)
        };
        let fragment_bytes = header_bytes[7];
        let right_most_page = if page_type.is_leaf() {
            None
        } else {
            Some(u32::from_be_bytes([
                header_bytes[8],
                header_bytes[9],
                header_bytes[10],
                header_bytes[11],
            ]))
        };

        let header = BTreePageHeader {
            page_type,
            first_freeblock,
            cell_count,
            cell_content_start,
            fragment_bytes,
            right_most_page,
        };

        let pointer_array_start = header_offset + header_size;
        let pointer_array_end =
            pointer_array_start + usize::from(cell_count) * CELL_POINTER_SIZE;
        let pointer_bytes = page
            .get(pointer_array_start..pointer_array_end)
            .ok_or_else(|| page_error("cell pointer array past end of page".into()))?;

        let cell_pointers: Vec<u16> = pointer_bytes
            .chunks_exact(CELL_POINTER_SIZE)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();

        let mut cells = Vec::with_capacity(cell_pointers.len());
        for (index, &pointer) in cell_pointers.iter().enumerate() {
            let offset = usize::from(pointer);
            if offset < pointer_array_end || offset >= usable as usize {
                return Err(page_error(format!(
                    "cell pointer {index} targets offset {offset} outside the content area"
                )));
            }
            let cell = match page_type {
                BTreePageType::TableLeaf => Cell::TableLeaf(parse_table_leaf_cell(
                    page,
                    number,
                    index as u16,
                    offset,
                    usable,
                )?),
                BTreePageType::TableInterior => Cell::TableInterior(
                    parse_table_interior_cell(page, number, index as u16, offset)?,
                ),
                BTreePageType::IndexLeaf => Cell::IndexLeaf(parse_index_cell(
                    page,
                    number,
                    index as u16,
                    offset,
                    usable,
                    false,
                )?),
                BTreePageType::IndexInterior => Cell::IndexInterior(parse_index_cell(
                    page,
                    number,
                    index as u16,
                    offset,
                    usable,
                    true,
                )?),
            };
            cells.push(cell);
        }

        let freeblocks = walk_freeblocks(page, number, first_freeblock, usable, &cells)?;

        let unallocated = pointer_array_end..cell_content_start as usize;

        Ok(Self {
            number,
            header,
            header_offset,
            cell_pointers,
            cells,
            freeblocks,
            unallocated,
        })
    }

    /// Verifies that header, pointers, cells, freeblocks, fragments and the
    /// unallocated span tile the page exactly; returns the tally.
    ///
    /// Overlapping cells make the tally undercount, so a mismatch is a
    /// reliable structural signal.
    pub fn accounting(&self, usable: u32) -> PageAccounting {
        let cell_bytes: usize = self.cells.iter().map(Cell::on_page_size).sum();
        let freeblock_bytes: usize = self.freeblocks.iter().map(|f| f.size).sum();
        PageAccounting {
            header_bytes: self.header_offset + self.header.page_type.header_size(),
            pointer_array_bytes: self.cell_pointers.len() * CELL_POINTER_SIZE,
            unallocated_bytes: self.unallocated.len(),
            cell_bytes,
            freeblock_bytes,
            fragment_bytes: usize::from(self.header.fragment_bytes),
            usable: usable as usize,
        }
    }
}

/// Byte tally of one page; `balances()` when everything is accounted for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageAccounting {
    pub header_bytes: usize,
    pub pointer_array_bytes: usize,
    pub unallocated_bytes: usize,
    pub cell_bytes: usize,
    pub freeblock_bytes: usize,
    pub fragment_bytes: usize,
    pub usable: usize,
}

impl PageAccounting {
    pub fn total(&self) -> usize {
        self.header_bytes
            + self.pointer_array_bytes
            + self.unallocated_bytes
            + self.cell_bytes
            + self.freeblock_bytes
            + self.fragment_bytes
    }

    pub fn balances(&self) -> bool {
        self.total() == self.usable
    }
}

/// Walks the freeblock chain, validating order, bounds and cell overlap.
fn walk_freeblocks(
    page: &[u8],
    number: u32,
    first_freeblock: u16,
    usable: u32,
    cells: &[Cell],
) -> Result<Vec<Freeblock>, ParsingError> {
    let page_error = |detail: String| ParsingError::BTreePage {
        page: number,
        detail,
    };

    let mut freeblocks = Vec::new();
    let mut offset = usize::from(first_freeblock);
    let mut previous = 0usize;

    while offset != 0 {
        if offset <= previous {
            return Err(page_error(format!(
                "freeblock chain not strictly increasing at offset {offset}"
            )));
        }
        let header = page
            .get(offset..offset + FREEBLOCK_HEADER_SIZE)
            .ok_or_else(|| page_error(format!("freeblock header at {offset} out of bounds")))?;
        let next = usize::from(u16::from_be_bytes([header[0], header[1]]));
        let size = usize::from(u16::from_be_bytes([header[2], header[3]]));

        if size < FREEBLOCK_HEADER_SIZE || offset + size > usable as usize {
            return Err(page_error(format!(
                "freeblock at {offset} with size {size} out of bounds"
            )));
        }
        for cell in cells {
            let (cell_start, cell_end) = (cell.offset(), cell.end_offset());
            if offset < cell_end && cell_start < offset + size {
                return Err(page_error(format!(
                    "freeblock at {offset}..{} overlaps cell at {cell_start}..{cell_end}",
                    offset + size
                )));
            }
        }

        freeblocks.push(Freeblock { offset, size });
        previous = offset;
        offset = next;
    }

    Ok(freeblocks)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE_SIZE: usize = 512;

    /// A table-leaf page with one (rowid 1, (NULL, 'hello')) cell at the
    /// tail and an optional freeblock.
    fn leaf_page(freeblock: Option<(usize, usize)>) -> Vec<u8> {
        let mut page = vec![0u8; PAGE_SIZE];
        let cell: [u8; 10] = [0x08, 0x01, 0x03, 0x00, 0x17, b'h', b'e', b'l', b'l', b'o'];
        let cell_offset = PAGE_SIZE - cell.len();
        page[cell_offset..].copy_from_slice(&cell);

        page[0] = TABLE_LEAF_PAGE_TYPE;
        let mut content_start = cell_offset;
        if let Some((offset, size)) = freeblock {
            page[1..3].copy_from_slice(&(offset as u16).to_be_bytes());
            page[offset..offset + 2].copy_from_slice(&0u16.to_be_bytes());
            page[offset + 2..offset + 4].copy_from_slice(&(size as u16).to_be_bytes());
            content_start = content_start.min(offset);
        }
        page[3..5].copy_from_slice(&1u16.to_be_bytes());
        page[5..7].copy_from_slice(&(content_start as u16).to_be_bytes());
        page[8..10].copy_from_slice(&(cell_offset as u16).to_be_bytes());
        page
    }

    #[test]
    fn parses_a_leaf_page() {
        let page = leaf_page(None);
        let parsed = BTreePage::parse(&page, 2, PAGE_SIZE as u32).unwrap();

        assert_eq!(parsed.header.page_type, BTreePageType::TableLeaf);
        assert_eq!(parsed.header.cell_count, 1);
        assert_eq!(parsed.cells.len(), 1);
        assert!(parsed.freeblocks.is_empty());
        assert_eq!(parsed.unallocated, 10..502);

        match &parsed.cells[0] {
            Cell::TableLeaf(cell) => {
                assert_eq!(cell.rowid, 1);
                assert_eq!(cell.payload_length, 8);
            }
            other => panic!("expected a table leaf cell, got {other:?}"),
        }
    }

    #[test]
    fn page_bytes_balance() {
        let page = leaf_page(None);
        let parsed = BTreePage::parse(&page, 2, PAGE_SIZE as u32).unwrap();
        let accounting = parsed.accounting(PAGE_SIZE as u32);
        assert!(accounting.balances(), "tally: {accounting:?}");
    }

    #[test]
    fn page_bytes_balance_with_freeblock() {
        // Freeblock of 20 bytes just below the live cell.
        let page = leaf_page(Some((482, 20)));
        let parsed = BTreePage::parse(&page, 2, PAGE_SIZE as u32).unwrap();
        assert_eq!(
            parsed.freeblocks,
            vec![Freeblock { offset: 482, size: 20 }]
        );
        assert!(parsed.accounting(PAGE_SIZE as u32).balances());
    }

    #[test]
    fn freeblock_content_skips_its_header() {
        let fb = Freeblock { offset: 100, size: 24 };
        assert_eq!(fb.content_range(), 104..124);
    }

    #[test]
    fn rejects_invalid_page_type() {
        let mut page = leaf_page(None);
        page[0] = 0x42;
        assert!(BTreePage::parse(&page, 2, PAGE_SIZE as u32).is_err());
    }

    #[test]
    fn rejects_freeblock_overlapping_cell() {
        // Freeblock that runs into the cell at 502.
        let page = leaf_page(Some((494, 16)));
        assert!(BTreePage::parse(&page, 2, PAGE_SIZE as u32).is_err());
    }

    #[test]
    fn rejects_backward_freeblock_chain() {
        let mut page = leaf_page(Some((400, 8)));
        // Second freeblock pointing backwards.
        page[400..402].copy_from_slice(&300u16.to_be_bytes());
        page[300..302].copy_from_slice(&0u16.to_be_bytes());
        page[302..304].copy_from_slice(&8u16.to_be_bytes());
        assert!(BTreePage::parse(&page, 2, PAGE_SIZE as u32).is_err());
    }

    #[test]
    fn page_one_header_starts_after_the_file_header() {
        let mut page = vec![0u8; PAGE_SIZE];
        let cell: [u8; 10] = [0x08, 0x01, 0x03, 0x00, 0x17, b'h', b'e', b'l', b'l', b'o'];
        page[502..].copy_from_slice(&cell);
        page[100] = TABLE_LEAF_PAGE_TYPE;
        page[103..105].copy_from_slice(&1u16.to_be_bytes());
        page[105..107].copy_from_slice(&502u16.to_be_bytes());
        page[108..110].copy_from_slice(&502u16.to_be_bytes());

        let parsed = BTreePage::parse(&page, 1, PAGE_SIZE as u32).unwrap();
        assert_eq!(parsed.header_offset, 100);
        assert_eq!(parsed.cells.len(), 1);
        assert_eq!(parsed.unallocated, 110..502);

        // Page 1 accounting carries the 100 header bytes.
        assert!(parsed.accounting(PAGE_SIZE as u32).balances());
    }

    #[test]
    fn empty_interior_page_parses() {
        let mut page = vec![0u8; PAGE_SIZE];
        page[0] = TABLE_INTERIOR_PAGE_TYPE;
        page[5..7].copy_from_slice(&(PAGE_SIZE as u16).to_be_bytes());
        page[8..12].copy_from_slice(&5u32.to_be_bytes());

        let parsed = BTreePage::parse(&page, 3, PAGE_SIZE as u32).unwrap();
        assert_eq!(parsed.header.right_most_page, Some(5));
        assert!(parsed.cells.is_empty());
    }
}
