//! # Version History Iteration
//!
//! Walks the version chain for one table and emits a [`Commit`] per
//! version describing what changed: cells added, updated and removed
//! (keyed by rowid, compared by MD5 fingerprint), the page-set delta of
//! the table's b-tree, the freelist delta, and any cells carved from the
//! version's dead space.
//!
//! ## Eligibility
//!
//! Cell-level events exist only for ordinary rowid tables. Index b-trees,
//! WITHOUT ROWID tables and tables whose SQL could not be parsed get
//! page-level deltas only; virtual tables have no pages at all. Carving
//! additionally requires a signature.
//!
//! ## Laziness
//!
//! The iterator is one-shot, forward-only and owns exactly one working
//! set: the previous version's cells. A version whose commit did not
//! touch any page of the table (and, when freelist carving is on, any
//! freelist page) short-circuits to an unchanged [`Commit`] without
//! re-walking the tree.

use hashbrown::{HashMap, HashSet};

use crate::carving::{CarvedCell, Carver};
use crate::encoding::Value;
use crate::errors::VersionError;
use crate::pages::walk::walk_btree;
use crate::pages::{BTreePageType, Cell, PageSource, Record};
use crate::signatures::TableSignature;
use crate::version::{Version, VersionChain};

/// Options controlling what a history iteration computes.
#[derive(Debug, Clone, Copy, Default)]
pub struct HistoryOptions {
    pub carve: bool,
    /// Additionally carve freelist-leaf pages as unallocated regions.
    pub carve_freelists: bool,
}

/// One surviving cell of the table at one version.
#[derive(Debug, Clone)]
pub struct CommitCell {
    pub page_number: u32,
    pub rowid: i64,
    pub digest: [u8; 16],
    pub values: Vec<Value>,
}

/// Per-table change event for one version.
#[derive(Debug, Clone)]
pub struct Commit {
    pub table_name: String,
    pub version_number: u32,
    pub root_page: u32,
    /// Every page of the table's b-tree in this version.
    pub b_tree_pages: Vec<u32>,
    /// Symmetric difference against the previous version's page set.
    pub updated_b_tree_pages: Vec<u32>,
    pub added_cells: Vec<CommitCell>,
    pub updated_cells: Vec<CommitCell>,
    pub removed_cells: Vec<CommitCell>,
    pub carved_cells: Vec<CarvedCell>,
    /// Freelist pages that entered or left the freelist at this version.
    pub updated_freelist_pages: Vec<u32>,
}

impl Commit {
    /// True when this version changed anything for the table.
    pub fn updated(&self) -> bool {
        !self.added_cells.is_empty()
            || !self.updated_cells.is_empty()
            || !self.removed_cells.is_empty()
            || !self.carved_cells.is_empty()
            || !self.updated_b_tree_pages.is_empty()
    }
}

/// One-shot forward iterator over a table's commits.
pub struct TableHistory<'a> {
    chain: &'a VersionChain,
    table_name: String,
    signature: Option<&'a TableSignature>,
    options: HistoryOptions,
    next_version: u32,
    previous_cells: HashMap<i64, CommitCell>,
    previous_pages: HashSet<u32>,
    previous_freelist: HashSet<u32>,
    previous_root: u32,
    /// Carved digests already reported in an earlier version.
    seen_carved: HashSet<[u8; 16]>,
}

impl<'a> TableHistory<'a> {
    pub fn new(
        chain: &'a VersionChain,
        table_name: impl Into<String>,
        signature: Option<&'a TableSignature>,
        options: HistoryOptions,
    ) -> Self {
        Self {
            chain,
            table_name: table_name.into(),
            signature,
            options,
            next_version: 0,
            previous_cells: HashMap::new(),
            previous_pages: HashSet::new(),
            previous_freelist: HashSet::new(),
            previous_root: 0,
            seen_carved: HashSet::new(),
        }
    }

    fn compute(&mut self, version: &Version) -> Result<Commit, VersionError> {
        let version_number = version.number();
        let row = version.master_schema().row_by_name(&self.table_name);
        let (root_page, cell_level) = match row {
            Some(row) => (row.root_page, row.supports_carving()),
            None => (0, false),
        };

        let freelist: HashSet<u32> = version.freelist_pages().iter().copied().collect();
        let updated_freelist_pages: Vec<u32> = freelist
            .symmetric_difference(&self.previous_freelist)
            .copied()
            .collect();

        // Short-circuit: nothing this commit wrote touches the tree.
        if version_number > 0 && root_page == self.previous_root {
            if let Some(updated) = version.updated_pages() {
                let touches_tree = self.previous_pages.iter().any(|page| updated.contains(page));
                let touches_freelist = self.options.carve
                    && self.options.carve_freelists
                    && !updated_freelist_pages.is_empty();
                if !touches_tree && !touches_freelist {
                    let mut commit = self.unchanged_commit(version_number, root_page);
                    commit.updated_freelist_pages = updated_freelist_pages;
                    self.previous_freelist = freelist;
                    return Ok(commit);
                }
            }
        }

        let mut pages = HashSet::new();
        let mut page_list = Vec::new();
        let mut current_cells: HashMap<i64, CommitCell> = HashMap::new();
        let mut carved_cells = Vec::new();

        if root_page != 0 {
            let (tree_pages, leaves) = walk_btree(version, root_page)
                .map_err(VersionError::Parsing)?;
            for &(number, _) in &tree_pages.pages {
                if pages.insert(number) {
                    page_list.push(number);
                }
            }

            if cell_level {
                for leaf in &leaves {
                    if leaf.header.page_type != BTreePageType::TableLeaf {
                        continue;
                    }
                    let page_bytes =
                        version.page_bytes(leaf.number).map_err(VersionError::Parsing)?;
                    for cell in &leaf.cells {
                        let Cell::TableLeaf(table_cell) = cell else {
                            continue;
                        };
                        let payload = cell
                            .payload(page_bytes, version)
                            .map_err(VersionError::Parsing)?
                            .expect("table leaf cells always carry a payload");
                        let record = Record::parse(&payload, version.text_encoding())
                            .map_err(VersionError::Parsing)?;
                        current_cells.insert(
                            table_cell.rowid,
                            CommitCell {
                                page_number: leaf.number,
                                rowid: table_cell.rowid,
                                digest: cell.digest(),
                                values: record.values,
                            },
                        );
                    }

                    if self.options.carve {
                        if let Some(signature) = self.signature {
                            let carver = Carver::new(signature);
                            for cell in
                                carver.carve_leaf_page(leaf, page_bytes, version.text_encoding())
                            {
                                if self.seen_carved.insert(cell.digest) {
                                    carved_cells.push(cell);
                                }
                            }
                        }
                    }
                }

                if self.options.carve && self.options.carve_freelists {
                    if let Some(signature) = self.signature {
                        let carver = Carver::new(signature);
                        let trunks: HashSet<u32> = match version {
                            Version::Base(base) => {
                                base.freelist_trunks.iter().map(|t| t.number).collect()
                            }
                            Version::Commit(commit) => {
                                commit.freelist_trunks.iter().map(|t| t.number).collect()
                            }
                        };
                        for &page_number in &freelist {
                            // Trunk pages hold live freelist structure;
                            // only leaves are raw dead space.
                            if trunks.contains(&page_number) {
                                continue;
                            }
                            let Ok(page_bytes) = version.page_bytes(page_number) else {
                                continue;
                            };
                            let usable = version.usable_page_size() as usize;
                            for cell in carver.carve_unallocated(
                                page_number,
                                0,
                                &page_bytes[..usable.min(page_bytes.len())],
                                version.text_encoding(),
                            ) {
                                if self.seen_carved.insert(cell.digest) {
                                    carved_cells.push(cell);
                                }
                            }
                        }
                    }
                }
            }
        }

        // Pages that joined or left the tree, plus tree pages this
        // commit rewrote in place.
        let mut updated_set: HashSet<u32> = pages
            .symmetric_difference(&self.previous_pages)
            .copied()
            .collect();
        if let Some(written) = version.updated_pages() {
            updated_set.extend(written.iter().copied().filter(|page| pages.contains(page)));
        }
        let updated_b_tree_pages: Vec<u32> = updated_set.into_iter().collect();

        // Rowid diff against the previous working set.
        let mut added_cells = Vec::new();
        let mut updated_cells = Vec::new();
        for (rowid, cell) in &current_cells {
            match self.previous_cells.get(rowid) {
                None => added_cells.push(cell.clone()),
                Some(previous) if previous.digest != cell.digest => {
                    updated_cells.push(cell.clone())
                }
                Some(_) => {}
            }
        }
        let mut removed_cells: Vec<CommitCell> = self
            .previous_cells
            .iter()
            .filter(|(rowid, _)| !current_cells.contains_key(*rowid))
            .map(|(_, cell)| cell.clone())
            .collect();

        added_cells.sort_by_key(|cell| cell.rowid);
        updated_cells.sort_by_key(|cell| cell.rowid);
        removed_cells.sort_by_key(|cell| cell.rowid);
        page_list.sort_unstable();
        let mut updated_b_tree_pages = updated_b_tree_pages;
        updated_b_tree_pages.sort_unstable();

        let commit = Commit {
            table_name: self.table_name.clone(),
            version_number,
            root_page,
            b_tree_pages: page_list,
            updated_b_tree_pages,
            added_cells,
            updated_cells,
            removed_cells,
            carved_cells,
            updated_freelist_pages,
        };

        self.previous_cells = current_cells;
        self.previous_pages = pages;
        self.previous_freelist = freelist;
        self.previous_root = root_page;

        Ok(commit)
    }

    fn unchanged_commit(&self, version_number: u32, root_page: u32) -> Commit {
        let mut pages: Vec<u32> = self.previous_pages.iter().copied().collect();
        pages.sort_unstable();
        Commit {
            table_name: self.table_name.clone(),
            version_number,
            root_page,
            b_tree_pages: pages,
            updated_b_tree_pages: Vec::new(),
            added_cells: Vec::new(),
            updated_cells: Vec::new(),
            removed_cells: Vec::new(),
            carved_cells: Vec::new(),
            updated_freelist_pages: Vec::new(),
        }
    }
}

impl Iterator for TableHistory<'_> {
    type Item = Result<Commit, VersionError>;

    fn next(&mut self) -> Option<Self::Item> {
        let version = self.chain.version(self.next_version)?;
        self.next_version += 1;
        Some(self.compute(version))
    }
}

/// Applies table include/exclude filters the way the driver passes them.
pub fn table_selected(
    name: &str,
    tables: &[String],
    exempted_tables: &[String],
) -> bool {
    if exempted_tables.iter().any(|t| t == name) {
        return false;
    }
    if tables.is_empty() {
        return true;
    }
    tables.iter().any(|t| t == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_filters_compose() {
        let none: Vec<String> = Vec::new();
        assert!(table_selected("t", &none, &none));

        let only = vec!["t".to_string()];
        assert!(table_selected("t", &only, &none));
        assert!(!table_selected("u", &only, &none));

        let exempt = vec!["t".to_string()];
        assert!(!table_selected("t", &none, &exempt));
        assert!(!table_selected("t", &only, &exempt));
    }
}
