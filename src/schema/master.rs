//! # Master Schema
//!
//! The master schema is the aggregate of the table-leaf records in the
//! b-tree rooted at page 1. Each record carries the five columns
//! `(type, name, tbl_name, rootpage, sql)` and describes one schema
//! object: an ordinary table, a virtual table, an index, a view or a
//! trigger.
//!
//! Objects whose names start with `sqlite_` are internal (the sequence
//! table, stat tables, auto-indexes). Auto-indexes have no SQL at all.
//! Virtual tables, views and triggers store root page 0.
//!
//! Ordinary tables get their CREATE TABLE SQL parsed into column
//! definitions; that parse drives signature generation and carving, so a
//! row whose SQL cannot be interpreted keeps its entry with
//! `table: None` rather than failing the whole schema.

use crate::encoding::Value;
use crate::errors::ParsingError;
use crate::pages::walk::walk_btree;
use crate::pages::{Cell, PageSource, Record};
use crate::schema::ddl::{
    parse_create_table, parse_create_virtual_table, TableDefinition, VirtualModule,
};

/// The five schema object kinds of the `type` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchemaObjectKind {
    Table,
    VirtualTable,
    Index,
    View,
    Trigger,
}

/// One row of sqlite_master, classified.
#[derive(Debug, Clone)]
pub struct MasterSchemaRow {
    pub rowid: i64,
    pub kind: SchemaObjectKind,
    pub name: String,
    pub table_name: String,
    pub root_page: u32,
    pub sql: Option<String>,
    /// Name starts with `sqlite_`.
    pub internal: bool,
    /// Parsed column layout; ordinary tables only.
    pub table: Option<TableDefinition>,
    /// Module and arguments; virtual tables only.
    pub virtual_module: Option<VirtualModule>,
}

impl MasterSchemaRow {
    /// True for entries the signature generator and carver support.
    pub fn supports_carving(&self) -> bool {
        self.kind == SchemaObjectKind::Table
            && self
                .table
                .as_ref()
                .is_some_and(|table| !table.without_rowid)
    }

    /// Builds a row from one decoded sqlite_master record.
    pub fn from_record(rowid: i64, record: &Record) -> Result<Self, ParsingError> {
        let row_error = |detail: String| ParsingError::MasterSchemaRow {
            name: format!("rowid {rowid}"),
            detail,
        };

        if record.values.len() < 5 {
            return Err(row_error(format!(
                "sqlite_master row has {} columns, expected 5",
                record.values.len()
            )));
        }

        let text_column = |index: usize, label: &str| -> Result<String, ParsingError> {
            match &record.values[index] {
                Value::Text(text) => Ok(text.clone()),
                other => Err(row_error(format!("{label} column is {other:?}, not text"))),
            }
        };

        let object_type = text_column(0, "type")?;
        let name = text_column(1, "name")?;
        let table_name = text_column(2, "tbl_name")?;
        let root_page = match &record.values[3] {
            Value::Integer(n) if *n >= 0 => *n as u32,
            // Views and triggers may store NULL instead of 0.
            Value::Null => 0,
            other => {
                return Err(row_error(format!("rootpage column is {other:?}")));
            }
        };
        let sql = match &record.values[4] {
            Value::Text(text) => Some(text.clone()),
            Value::Null => None,
            other => {
                return Err(row_error(format!("sql column is {other:?}")));
            }
        };

        let internal = name.starts_with("sqlite_");

        let mut kind = match object_type.as_str() {
            "table" => SchemaObjectKind::Table,
            "index" => SchemaObjectKind::Index,
            "view" => SchemaObjectKind::View,
            "trigger" => SchemaObjectKind::Trigger,
            other => {
                return Err(row_error(format!("unknown schema object type '{other}'")));
            }
        };

        let mut table = None;
        let mut virtual_module = None;
        if kind == SchemaObjectKind::Table {
            if let Some(sql_text) = &sql {
                let upper = sql_text.to_ascii_uppercase();
                if upper
                    .split_whitespace()
                    .collect::<Vec<_>>()
                    .join(" ")
                    .starts_with("CREATE VIRTUAL TABLE")
                {
                    kind = SchemaObjectKind::VirtualTable;
                    virtual_module = Some(parse_create_virtual_table(sql_text)?);
                } else {
                    match parse_create_table(sql_text) {
                        Ok(definition) => table = Some(definition),
                        Err(error) => {
                            // Keep the entry; the table just loses column
                            // detail (and with it carving support).
                            tracing::warn!(
                                table = %name,
                                %error,
                                "CREATE TABLE SQL could not be parsed"
                            );
                        }
                    }
                }
            }
        }

        Ok(Self {
            rowid,
            kind,
            name,
            table_name,
            root_page,
            sql,
            internal,
            table,
            virtual_module,
        })
    }
}

/// The master schema of one version: rows in rowid order.
#[derive(Debug, Clone, Default)]
pub struct MasterSchema {
    pub rows: Vec<MasterSchemaRow>,
}

impl MasterSchema {
    /// Reads the schema b-tree rooted at page 1.
    pub fn parse<S: PageSource>(source: &S) -> Result<Self, ParsingError> {
        let (_, leaves) = walk_btree(source, 1)?;

        let mut rows = Vec::new();
        for leaf in &leaves {
            let page_bytes = source.page_bytes(leaf.number)?;
            for cell in &leaf.cells {
                let Cell::TableLeaf(table_cell) = cell else {
                    continue;
                };
                let payload = cell
                    .payload(page_bytes, source)?
                    .expect("table leaf cells always carry a payload");
                let record = Record::parse(&payload, source.text_encoding())?;
                rows.push(MasterSchemaRow::from_record(table_cell.rowid, &record)?);
            }
        }
        rows.sort_by_key(|row| row.rowid);

        Ok(Self { rows })
    }

    pub fn row_by_name(&self, name: &str) -> Option<&MasterSchemaRow> {
        self.rows.iter().find(|row| row.name == name)
    }

    /// Ordinary tables eligible for cell-level history and carving.
    pub fn carvable_tables(&self) -> impl Iterator<Item = &MasterSchemaRow> {
        self.rows.iter().filter(|row| row.supports_carving())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::TextEncoding;
    use smallvec::smallvec;

    fn master_record(
        object_type: &str,
        name: &str,
        table_name: &str,
        root_page: i64,
        sql: Option<&str>,
    ) -> Record {
        Record {
            header_length: 0,
            serial_types: smallvec![],
            values: vec![
                Value::Text(object_type.into()),
                Value::Text(name.into()),
                Value::Text(table_name.into()),
                Value::Integer(root_page),
                sql.map(|s| Value::Text(s.into())).unwrap_or(Value::Null),
            ],
            length: 0,
        }
    }

    #[test]
    fn classifies_an_ordinary_table() {
        let record = master_record(
            "table",
            "t",
            "t",
            2,
            Some("CREATE TABLE t(a INTEGER PRIMARY KEY, b TEXT)"),
        );
        let row = MasterSchemaRow::from_record(1, &record).unwrap();
        assert_eq!(row.kind, SchemaObjectKind::Table);
        assert!(!row.internal);
        assert!(row.supports_carving());
        assert_eq!(row.table.as_ref().unwrap().columns.len(), 2);
    }

    #[test]
    fn classifies_a_virtual_table() {
        let record = master_record(
            "table",
            "docs",
            "docs",
            0,
            Some("CREATE VIRTUAL TABLE docs USING fts5(body)"),
        );
        let row = MasterSchemaRow::from_record(1, &record).unwrap();
        assert_eq!(row.kind, SchemaObjectKind::VirtualTable);
        assert!(!row.supports_carving());
        assert_eq!(row.virtual_module.as_ref().unwrap().module_name, "fts5");
    }

    #[test]
    fn without_rowid_tables_are_not_carvable() {
        let record = master_record(
            "table",
            "u",
            "u",
            3,
            Some("CREATE TABLE u(k TEXT PRIMARY KEY, v INTEGER) WITHOUT ROWID"),
        );
        let row = MasterSchemaRow::from_record(1, &record).unwrap();
        assert!(!row.supports_carving());
    }

    #[test]
    fn auto_index_has_no_sql() {
        let record = master_record("index", "sqlite_autoindex_u_1", "u", 4, None);
        let row = MasterSchemaRow::from_record(2, &record).unwrap();
        assert_eq!(row.kind, SchemaObjectKind::Index);
        assert!(row.internal);
        assert!(row.sql.is_none());
        assert!(!row.supports_carving());
    }

    #[test]
    fn trigger_with_null_rootpage() {
        let record = Record {
            header_length: 0,
            serial_types: smallvec![],
            values: vec![
                Value::Text("trigger".into()),
                Value::Text("tr".into()),
                Value::Text("t".into()),
                Value::Null,
                Value::Text("CREATE TRIGGER tr AFTER INSERT ON t BEGIN SELECT 1; END".into()),
            ],
            length: 0,
        };
        let row = MasterSchemaRow::from_record(3, &record).unwrap();
        assert_eq!(row.kind, SchemaObjectKind::Trigger);
        assert_eq!(row.root_page, 0);
    }

    #[test]
    fn short_row_is_rejected() {
        let record = Record {
            header_length: 0,
            serial_types: smallvec![],
            values: vec![Value::Text("table".into())],
            length: 0,
        };
        assert!(MasterSchemaRow::from_record(1, &record).is_err());
    }

    #[test]
    fn unparseable_create_sql_keeps_the_row() {
        let record = master_record("table", "t", "t", 2, Some("CREATE TABLE t"));
        let row = MasterSchemaRow::from_record(1, &record).unwrap();
        assert_eq!(row.kind, SchemaObjectKind::Table);
        assert!(row.table.is_none());
        assert!(!row.supports_carving());
    }

    #[test]
    fn unknown_type_is_rejected() {
        let record = master_record("gadget", "g", "g", 2, None);
        assert!(MasterSchemaRow::from_record(1, &record).is_err());
    }

    #[test]
    fn text_encoding_is_available_for_schema_decode() {
        // The schema itself is text; ensure the encoding plumbing exists.
        assert_eq!(TextEncoding::from_raw(1), Some(TextEncoding::Utf8));
    }
}
