//! # B-Tree Traversal
//!
//! Iterative traversal of a table or index b-tree: collecting the page
//! numbers a tree occupies and aggregating its leaf cells. Traversal is
//! iterative with an explicit stack; interior chains in corrupt files can
//! be deep enough to make recursion a liability.

use hashbrown::HashSet;

use crate::errors::ParsingError;
use crate::pages::btree::BTreePage;
use crate::pages::{Cell, PageKind, PageSource};

/// The pages of one b-tree, in discovery order, with their roles.
#[derive(Debug, Clone)]
pub struct BTreePages {
    pub root: u32,
    /// `(page number, kind)` for every page of the tree, overflow included.
    pub pages: Vec<(u32, PageKind)>,
}

impl BTreePages {
    pub fn page_numbers(&self) -> Vec<u32> {
        self.pages.iter().map(|&(number, _)| number).collect()
    }
}

/// Walks the b-tree rooted at `root`, returning its pages and leaf pages.
pub fn walk_btree<S: PageSource>(
    source: &S,
    root: u32,
) -> Result<(BTreePages, Vec<BTreePage>), ParsingError> {
    let mut pages = Vec::new();
    let mut leaves = Vec::new();
    let mut visited = HashSet::new();
    let mut stack = vec![root];

    while let Some(number) = stack.pop() {
        if !visited.insert(number) {
            return Err(ParsingError::BTreePage {
                page: number,
                detail: "b-tree revisits a page".into(),
            });
        }

        let page = BTreePage::parse(source.page_bytes(number)?, number, source.usable_page_size())?;
        let kind = match page.header.page_type {
            crate::pages::BTreePageType::TableLeaf => PageKind::BTreeTableLeaf,
            crate::pages::BTreePageType::TableInterior => PageKind::BTreeTableInterior,
            crate::pages::BTreePageType::IndexLeaf => PageKind::BTreeIndexLeaf,
            crate::pages::BTreePageType::IndexInterior => PageKind::BTreeIndexInterior,
        };
        pages.push((number, kind));

        for cell in &page.cells {
            if let Some(child) = cell.left_child_page() {
                stack.push(child);
            }
            if let Some(first_overflow) = cell.first_overflow_page() {
                for overflow in
                    overflow_page_numbers(source, first_overflow, cell, &mut visited)?
                {
                    pages.push((overflow, PageKind::Overflow));
                }
            }
        }
        if let Some(right) = page.header.right_most_page {
            stack.push(right);
        }

        if page.header.page_type.is_leaf() {
            leaves.push(page);
        }
    }

    Ok((BTreePages { root, pages }, leaves))
}

/// Follows a cell's overflow chain collecting page numbers only.
fn overflow_page_numbers<S: PageSource>(
    source: &S,
    first_page: u32,
    cell: &Cell,
    visited: &mut HashSet<u32>,
) -> Result<Vec<u32>, ParsingError> {
    let Some((_, inline_length)) = cell.inline_payload_span() else {
        return Ok(Vec::new());
    };
    let total = cell.payload_length().unwrap_or(0);
    let mut remaining = total.saturating_sub(inline_length as u64);
    let per_page = u64::from(source.usable_page_size()) - 4;

    let mut numbers = Vec::new();
    let mut number = first_page;
    while remaining > 0 && number != 0 {
        if !visited.insert(number) {
            return Err(ParsingError::Page {
                page: number,
                detail: "overflow chain revisits a page".into(),
            });
        }
        numbers.push(number);
        let bytes = source.page_bytes(number)?;
        number = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        remaining = remaining.saturating_sub(per_page);
    }
    Ok(numbers)
}
