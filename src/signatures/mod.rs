//! # Record Signatures
//!
//! A signature captures, per column of a table, which serial types a
//! record of that table may legally carry. The carver classifies candidate
//! byte spans by testing their serial-type sequence against these sets.
//!
//! ## Flavors
//!
//! | Flavor | Built from | Granularity |
//! |--------|-----------|-------------|
//! | schema | column affinities only | broadest legal set per affinity |
//! | simplified | surviving rows | storage classes observed |
//! | focused | surviving rows | exact types, integer widths collapsed |
//! | probabilistic | surviving rows | (storage class, frequency) pairs |
//!
//! With no surviving rows only the schema flavor exists; the carver falls
//! back to it automatically. The probabilistic flavor exists for one job:
//! guessing the overwritten first serial type of a freeblock record.
//!
//! ## Affinity Sets
//!
//! | Affinity | Allowed serial types |
//! |----------|----------------------|
//! | TEXT     | 0, odd >= 13 |
//! | BLOB/NONE| 0, even >= 12 |
//! | REAL     | 0, 7 |
//! | NUMERIC  | 0, 1..6, 7, 8, 9, odd >= 13 |
//! | INTEGER  | 0, 1..6, 8, 9 |
//!
//! `NOT NULL` removes 0. An `INTEGER PRIMARY KEY` rowid alias is always
//! stored as serial type 0, so its set is exactly {0}.
//!
//! ## Altered Tables
//!
//! Rows written before an `ALTER TABLE ADD COLUMN` carry fewer columns
//! than the schema. Each column records the fraction of observed rows that
//! contain it; the carver accepts records down to the shortest observed
//! column count instead of demanding the full width.

use hashbrown::HashMap;

use crate::encoding::serial::{simplify_serial_type, StorageClass};
use crate::errors::SignatureError;
use crate::pages::walk::walk_btree;
use crate::pages::{Cell, PageSource, Record};
use crate::schema::{MasterSchemaRow, SchemaObjectKind, TypeAffinity};
use crate::version::VersionChain;

/// A set of serial types, closed over the class structure the carver
/// needs: exact small types, plus whole-class admission for TEXT/BLOB.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SerialTypeSet {
    pub null: bool,
    /// Serial types 1..=6, by width index.
    pub integer_widths: [bool; 6],
    pub real: bool,
    pub zero: bool,
    pub one: bool,
    pub text: bool,
    pub blob: bool,
}

impl SerialTypeSet {
    pub fn admits(&self, serial_type: u64) -> bool {
        match serial_type {
            0 => self.null,
            1..=6 => self.integer_widths[(serial_type - 1) as usize],
            7 => self.real,
            8 => self.zero,
            9 => self.one,
            10 | 11 => false,
            n if n % 2 == 0 => self.blob,
            _ => self.text,
        }
    }

    /// Inserts the exact serial type (text/blob insert their class).
    pub fn insert(&mut self, serial_type: u64) {
        match serial_type {
            0 => self.null = true,
            1..=6 => self.integer_widths[(serial_type - 1) as usize] = true,
            7 => self.real = true,
            8 => self.zero = true,
            9 => self.one = true,
            10 | 11 => {}
            n if n % 2 == 0 => self.blob = true,
            _ => self.text = true,
        }
    }

    /// Inserts with integer widths collapsed: observing any of 1..=6
    /// admits all of them.
    pub fn insert_collapsed_width(&mut self, serial_type: u64) {
        if (1..=6).contains(&serial_type) {
            self.integer_widths = [true; 6];
        } else {
            self.insert(serial_type);
        }
    }

    /// Inserts a whole storage class.
    pub fn insert_class(&mut self, class: StorageClass) {
        match class {
            StorageClass::Null => self.null = true,
            StorageClass::Integer => {
                self.integer_widths = [true; 6];
                self.zero = true;
                self.one = true;
            }
            StorageClass::Real => self.real = true,
            StorageClass::Text => self.text = true,
            StorageClass::Blob => self.blob = true,
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == SerialTypeSet::default()
    }

    /// Whether any admitted serial type needs a multi-byte varint.
    pub fn admits_large_types(&self) -> bool {
        self.text || self.blob
    }

    /// Content-length bounds `(min, max)` over the admitted types.
    ///
    /// Text and blob are bounded only by the 5-byte varint cap the
    /// carver applies to serial-type varints.
    pub fn content_length_bounds(&self) -> (u64, u64) {
        const VARLEN_MAX: u64 = (1 << 35) - 1;
        let mut min = u64::MAX;
        let mut max = 0u64;
        let mut add = |low: u64, high: u64| {
            min = min.min(low);
            max = max.max(high);
        };

        if self.null || self.zero || self.one {
            add(0, 0);
        }
        for (width_index, &admitted) in self.integer_widths.iter().enumerate() {
            if admitted {
                let width = [1u64, 2, 3, 4, 6, 8][width_index];
                add(width, width);
            }
        }
        if self.real {
            add(8, 8);
        }
        if self.text || self.blob {
            add(0, VARLEN_MAX);
        }

        if min == u64::MAX {
            (0, 0)
        } else {
            (min, max)
        }
    }

    /// The allowed set an affinity grants before any data is seen.
    pub fn for_affinity(affinity: TypeAffinity, not_null: bool, rowid_alias: bool) -> Self {
        let mut set = SerialTypeSet::default();
        if rowid_alias {
            set.null = true;
            return set;
        }
        match affinity {
            TypeAffinity::Text => {
                set.text = true;
            }
            TypeAffinity::Blob => {
                set.blob = true;
            }
            TypeAffinity::Real => {
                set.real = true;
            }
            TypeAffinity::Numeric => {
                set.integer_widths = [true; 6];
                set.real = true;
                set.zero = true;
                set.one = true;
                set.text = true;
            }
            TypeAffinity::Integer => {
                set.integer_widths = [true; 6];
                set.zero = true;
                set.one = true;
            }
        }
        set.null = !not_null;
        set
    }
}

/// Which flavor the carver should test against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureFlavor {
    Schema,
    Simplified,
    Focused,
}

/// Per-column signature state.
#[derive(Debug, Clone)]
pub struct ColumnSignature {
    pub index: usize,
    pub name: String,
    pub schema: SerialTypeSet,
    pub simplified: SerialTypeSet,
    pub focused: SerialTypeSet,
    /// Observed (storage class, frequency) pairs, normalized over the rows
    /// that contain this column.
    pub probabilistic: Vec<(StorageClass, f64)>,
    /// Fraction of observed rows that contain this column at all.
    pub presence: f64,
}

impl ColumnSignature {
    /// The set the carver should use for `flavor`, with schema fallback
    /// when no rows were observed.
    pub fn allowed(&self, flavor: SignatureFlavor) -> &SerialTypeSet {
        let observed = match flavor {
            SignatureFlavor::Schema => &self.schema,
            SignatureFlavor::Simplified => &self.simplified,
            SignatureFlavor::Focused => &self.focused,
        };
        if observed.is_empty() {
            &self.schema
        } else {
            observed
        }
    }

    /// Most frequent storage class, when it is an outright majority.
    pub fn dominant_class(&self) -> Option<StorageClass> {
        let (class, frequency) = self
            .probabilistic
            .iter()
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .copied()?;
        (frequency > 0.5).then_some(class)
    }
}

/// The signature of one table at (or across) reference versions.
#[derive(Debug, Clone)]
pub struct TableSignature {
    pub name: String,
    pub table_name: String,
    pub columns: Vec<ColumnSignature>,
    /// Rows observed while building the data-driven flavors.
    pub row_count: u64,
    /// Shortest column count seen in any observed row (equals the schema
    /// width until an ALTER TABLE history shows otherwise).
    pub min_column_count: usize,
}

impl TableSignature {
    /// Builds the signature for `entry`, aggregating surviving rows across
    /// every version of the chain.
    pub fn generate(
        chain: &VersionChain,
        entry: &MasterSchemaRow,
    ) -> Result<Self, SignatureError> {
        let table = match entry.kind {
            SchemaObjectKind::Table => match &entry.table {
                Some(table) if table.without_rowid => {
                    return Err(SignatureError::WithoutRowId {
                        name: entry.name.clone(),
                    })
                }
                Some(table) => table,
                None => {
                    return Err(SignatureError::NoSql {
                        name: entry.name.clone(),
                    })
                }
            },
            SchemaObjectKind::VirtualTable => {
                return Err(SignatureError::VirtualTable {
                    name: entry.name.clone(),
                })
            }
            _ => {
                return Err(SignatureError::NotATable {
                    name: entry.name.clone(),
                })
            }
        };

        let column_count = table.columns.len();
        let mut simplified = vec![SerialTypeSet::default(); column_count];
        let mut focused = vec![SerialTypeSet::default(); column_count];
        let mut class_counts: Vec<HashMap<StorageClass, u64>> =
            vec![HashMap::new(); column_count];
        let mut present = vec![0u64; column_count];
        let mut row_count = 0u64;
        let mut min_column_count = column_count;
        let mut seen_digests = hashbrown::HashSet::new();

        for version in chain.iter() {
            let Some(row) = version.master_schema().row_by_name(&entry.name) else {
                continue;
            };
            if row.root_page == 0 {
                continue;
            }
            let (_, leaves) = walk_btree(version, row.root_page)?;
            for leaf in &leaves {
                let page_bytes = version.page_bytes(leaf.number)?;
                for cell in &leaf.cells {
                    let Cell::TableLeaf(_) = cell else { continue };
                    if !seen_digests.insert(cell.digest()) {
                        continue;
                    }
                    let Some(payload) = cell.payload(page_bytes, version)? else {
                        continue;
                    };
                    let record = Record::parse(&payload, version.text_encoding())?;

                    row_count += 1;
                    min_column_count = min_column_count.min(record.column_count());
                    for (column, &serial_type) in record.serial_types.iter().enumerate() {
                        if column >= column_count {
                            // More columns than the schema knows; ignore
                            // the surplus rather than fail the table.
                            break;
                        }
                        simplified[column].insert_class(simplify_serial_type(serial_type));
                        focused[column].insert_collapsed_width(serial_type);
                        *class_counts[column]
                            .entry(simplify_serial_type(serial_type))
                            .or_insert(0) += 1;
                        present[column] += 1;
                    }
                }
            }
        }

        let columns = table
            .columns
            .iter()
            .enumerate()
            .map(|(index, column)| {
                let total = present[index].max(1) as f64;
                let mut probabilistic: Vec<(StorageClass, f64)> = class_counts[index]
                    .iter()
                    .map(|(&class, &count)| (class, count as f64 / total))
                    .collect();
                probabilistic.sort_by(|a, b| b.1.total_cmp(&a.1));

                ColumnSignature {
                    index,
                    name: column.name.clone(),
                    schema: SerialTypeSet::for_affinity(
                        column.affinity,
                        column.not_null,
                        column.rowid_alias,
                    ),
                    simplified: simplified[index],
                    focused: focused[index],
                    probabilistic,
                    presence: if row_count == 0 {
                        1.0
                    } else {
                        present[index] as f64 / row_count as f64
                    },
                }
            })
            .collect();

        Ok(Self {
            name: entry.name.clone(),
            table_name: entry.table_name.clone(),
            columns,
            row_count,
            min_column_count,
        })
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// The flavor the carver should default to.
    pub fn effective_flavor(&self) -> SignatureFlavor {
        if self.row_count == 0 {
            SignatureFlavor::Schema
        } else {
            SignatureFlavor::Simplified
        }
    }

    /// Body-length bounds `(min, max)` over columns `from..`, used to
    /// bound carving windows.
    pub fn body_length_bounds(&self, from: usize, flavor: SignatureFlavor) -> (u64, u64) {
        let mut min = 0u64;
        let mut max = 0u64;
        for column in &self.columns[from.min(self.columns.len())..] {
            let (low, high) = column.allowed(flavor).content_length_bounds();
            min += low;
            max = max.saturating_add(high);
        }
        (min, max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn affinity_sets_match_the_table() {
        let text = SerialTypeSet::for_affinity(TypeAffinity::Text, false, false);
        assert!(text.admits(0));
        assert!(text.admits(13) && text.admits(99));
        assert!(!text.admits(1) && !text.admits(7) && !text.admits(12));

        let integer = SerialTypeSet::for_affinity(TypeAffinity::Integer, false, false);
        for t in 1..=6 {
            assert!(integer.admits(t));
        }
        assert!(integer.admits(8) && integer.admits(9));
        assert!(!integer.admits(7) && !integer.admits(13));

        let numeric = SerialTypeSet::for_affinity(TypeAffinity::Numeric, false, false);
        assert!(numeric.admits(7) && numeric.admits(13) && numeric.admits(1));
        assert!(!numeric.admits(12));

        let real = SerialTypeSet::for_affinity(TypeAffinity::Real, false, false);
        assert!(real.admits(0) && real.admits(7));
        assert!(!real.admits(1));

        let blob = SerialTypeSet::for_affinity(TypeAffinity::Blob, false, false);
        assert!(blob.admits(12) && blob.admits(0));
        assert!(!blob.admits(13));
    }

    #[test]
    fn not_null_strips_zero() {
        let set = SerialTypeSet::for_affinity(TypeAffinity::Text, true, false);
        assert!(!set.admits(0));
        assert!(set.admits(13));
    }

    #[test]
    fn rowid_alias_admits_only_null() {
        let set = SerialTypeSet::for_affinity(TypeAffinity::Integer, false, true);
        assert!(set.admits(0));
        for t in 1..=9 {
            assert!(!set.admits(t), "serial type {t} should be rejected");
        }
    }

    #[test]
    fn reserved_types_never_admitted() {
        let mut set = SerialTypeSet::default();
        set.insert_class(StorageClass::Integer);
        set.insert_class(StorageClass::Text);
        set.insert_class(StorageClass::Blob);
        assert!(!set.admits(10));
        assert!(!set.admits(11));
    }

    #[test]
    fn width_collapse_admits_sibling_widths() {
        let mut set = SerialTypeSet::default();
        set.insert_collapsed_width(1);
        for t in 1..=6 {
            assert!(set.admits(t));
        }
        assert!(!set.admits(8));

        let mut exact = SerialTypeSet::default();
        exact.insert(1);
        assert!(exact.admits(1));
        assert!(!exact.admits(2));
    }

    #[test]
    fn content_length_bounds_cover_admitted_types() {
        let mut set = SerialTypeSet::default();
        set.insert(0);
        set.insert(4);
        assert_eq!(set.content_length_bounds(), (0, 4));

        let mut with_text = SerialTypeSet::default();
        with_text.insert(2);
        with_text.insert(23);
        let (min, max) = with_text.content_length_bounds();
        assert_eq!(min, 0);
        assert!(max > 1 << 30);
    }
}
