//! # Pointer-Map Pages
//!
//! Auto-vacuum databases interleave pointer-map pages that record, for
//! every page they cover, its role and parent. The first pointer-map page
//! is page 2; each covers `usable / 5` pages, so subsequent map pages sit
//! at `2 + (n/5 + 1) * k` intervals.
//!
//! Entry layout: one type byte (1-5) and a big-endian parent page number.

use crate::config::POINTER_MAP_ENTRY_SIZE;
use crate::errors::ParsingError;

/// One pointer-map entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointerMapEntry {
    /// Role byte: 1 root, 2 free, 3 first overflow, 4 later overflow,
    /// 5 non-root b-tree.
    pub entry_type: u8,
    pub parent_page: u32,
}

/// A decoded pointer-map page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointerMapPage {
    pub number: u32,
    pub entries: Vec<PointerMapEntry>,
}

impl PointerMapPage {
    /// Parses up to `entry_count` entries; entries past the database end
    /// are zero-filled and skipped by passing the exact count.
    pub fn parse(page: &[u8], number: u32, entry_count: usize) -> Result<Self, ParsingError> {
        let needed = entry_count * POINTER_MAP_ENTRY_SIZE;
        let window = page.get(..needed).ok_or_else(|| ParsingError::Page {
            page: number,
            detail: format!("pointer map needs {needed} bytes, page has {}", page.len()),
        })?;

        let mut entries = Vec::with_capacity(entry_count);
        for (index, raw) in window.chunks_exact(POINTER_MAP_ENTRY_SIZE).enumerate() {
            let entry_type = raw[0];
            if !(1..=5).contains(&entry_type) {
                return Err(ParsingError::Page {
                    page: number,
                    detail: format!("pointer map entry {index} has type {entry_type}"),
                });
            }
            entries.push(PointerMapEntry {
                entry_type,
                parent_page: u32::from_be_bytes([raw[1], raw[2], raw[3], raw[4]]),
            });
        }

        Ok(Self { number, entries })
    }
}

/// Entries one pointer-map page can hold.
pub fn entries_per_pointer_map_page(usable: u32) -> u32 {
    usable / POINTER_MAP_ENTRY_SIZE as u32
}

/// The pointer-map page numbers of a database with `page_count` pages.
///
/// Page 2 is always the first; the caller has already established that
/// auto-vacuum is on by checking the header's largest-root field.
pub fn pointer_map_page_numbers(page_count: u32, usable: u32) -> Vec<u32> {
    let per_page = entries_per_pointer_map_page(usable);
    let mut numbers = Vec::new();
    let mut next = 2u32;
    while next <= page_count {
        numbers.push(next);
        next += per_page + 1;
    }
    numbers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_entries() {
        let mut page = vec![0u8; 20];
        page[0] = 1;
        page[1..5].copy_from_slice(&0u32.to_be_bytes());
        page[5] = 5;
        page[6..10].copy_from_slice(&3u32.to_be_bytes());

        let map = PointerMapPage::parse(&page, 2, 2).unwrap();
        assert_eq!(
            map.entries,
            vec![
                PointerMapEntry { entry_type: 1, parent_page: 0 },
                PointerMapEntry { entry_type: 5, parent_page: 3 },
            ]
        );
    }

    #[test]
    fn rejects_unknown_entry_type() {
        let mut page = vec![0u8; 10];
        page[0] = 9;
        assert!(PointerMapPage::parse(&page, 2, 1).is_err());
    }

    #[test]
    fn map_page_positions_follow_the_interval() {
        // usable 512 -> 102 entries per map page -> maps at 2, 105, 208...
        assert_eq!(entries_per_pointer_map_page(512), 102);
        assert_eq!(pointer_map_page_numbers(300, 512), vec![2, 105, 208]);
        assert_eq!(pointer_map_page_numbers(1, 512), Vec::<u32>::new());
    }
}
