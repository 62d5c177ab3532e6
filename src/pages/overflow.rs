//! # Overflow Chains
//!
//! A payload larger than its inline cap spills to a linked list of
//! overflow pages. Each overflow page is a 4-byte next-page pointer (0
//! terminates the chain) followed by content; every page but the last is
//! filled to `usable - 4` bytes.
//!
//! Chains are followed on demand only: live-cell diffing works from the
//! on-page digest and never needs overflow bytes, so the cost is paid only
//! when a consumer asks for the full payload. Carved cells never recover
//! overflow at all; the chain of a deleted cell is unreferenced and its
//! pages are reused long before carving runs.

use hashbrown::HashSet;

use crate::config::OVERFLOW_HEADER_SIZE;
use crate::errors::ParsingError;
use crate::pages::PageSource;

/// Reads `remaining` overflow bytes starting at `first_page`.
///
/// Validates that the chain terminates with exactly the expected byte
/// count and visits no page twice.
pub fn read_overflow_chain<S: PageSource>(
    source: &S,
    first_page: u32,
    remaining: u64,
) -> Result<Vec<u8>, ParsingError> {
    let capacity = usize::try_from(remaining).unwrap_or(0);
    let mut content = Vec::with_capacity(capacity);
    let mut visited = HashSet::new();
    let mut page_number = first_page;
    let mut remaining = remaining;
    let per_page = u64::from(source.usable_page_size()) - OVERFLOW_HEADER_SIZE as u64;

    while remaining > 0 {
        if page_number == 0 {
            return Err(ParsingError::Page {
                page: page_number,
                detail: format!("overflow chain ended with {remaining} bytes outstanding"),
            });
        }
        if !visited.insert(page_number) {
            return Err(ParsingError::Page {
                page: page_number,
                detail: "overflow chain revisits a page".into(),
            });
        }

        let page = source.page_bytes(page_number)?;
        let next = u32::from_be_bytes([page[0], page[1], page[2], page[3]]);
        let take = remaining.min(per_page) as usize;
        content.extend_from_slice(&page[OVERFLOW_HEADER_SIZE..OVERFLOW_HEADER_SIZE + take]);
        remaining -= take as u64;

        if remaining == 0 && next != 0 {
            return Err(ParsingError::Page {
                page: page_number,
                detail: format!("overflow chain continues to page {next} past the payload end"),
            });
        }
        page_number = next;
    }

    Ok(content)
}
