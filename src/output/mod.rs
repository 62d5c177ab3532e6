//! # Output Helpers
//!
//! The writer layer proper (CSV, XLSX, SQLite, CASE) lives outside this
//! crate; commits are consumed as typed values. What lives here is the
//! part sinks cannot get wrong independently:
//!
//! - Name collision rules for SQLite sinks: a column named `row_id`
//!   collides with the built-in ROWID and is prefixed `sd_`; internal
//!   schema object names (`sqlite_*`) are prefixed `iso_`.
//! - Spreadsheet formula escaping: a cell value starting with `=` is
//!   prefixed with a single space so CSV/XLSX consumers do not execute
//!   it.
//! - Plain-text rendering of commits, schemas and signatures for the
//!   driver binary and the diagnostic emitters.

use std::borrow::Cow;
use std::fmt::Write as _;

use crate::carving::CarvedCell;
use crate::encoding::Value;
use crate::history::Commit;
use crate::schema::{MasterSchema, SchemaObjectKind};
use crate::signatures::TableSignature;

/// Renames columns that collide with a SQLite sink's built-in ROWID.
pub fn sink_column_name(name: &str) -> Cow<'_, str> {
    if name.eq_ignore_ascii_case("row_id") {
        Cow::Owned(format!("sd_{name}"))
    } else {
        Cow::Borrowed(name)
    }
}

/// Renames internal schema objects so a SQLite sink will accept them.
pub fn sink_object_name(name: &str) -> Cow<'_, str> {
    if name.starts_with("sqlite_") {
        Cow::Owned(format!("iso_{name}"))
    } else {
        Cow::Borrowed(name)
    }
}

/// Defuses spreadsheet formula injection for CSV/XLSX sinks.
pub fn escape_spreadsheet_value(value: &str) -> Cow<'_, str> {
    if value.starts_with('=') {
        Cow::Owned(format!(" {value}"))
    } else {
        Cow::Borrowed(value)
    }
}

/// Renders one value the way the text writer prints it.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Integer(n) => n.to_string(),
        Value::Real(f) => f.to_string(),
        Value::Text(s) => format!("'{s}'"),
        Value::Blob(bytes) => {
            let mut out = String::with_capacity(2 + bytes.len() * 2);
            out.push_str("x'");
            for byte in bytes {
                let _ = write!(out, "{byte:02x}");
            }
            out.push('\'');
            out
        }
    }
}

/// Plain-text rendering of one commit for the driver.
pub fn render_commit(commit: &Commit) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "version {} table {} (root page {})",
        commit.version_number, commit.table_name, commit.root_page
    );
    if !commit.updated_b_tree_pages.is_empty() {
        let _ = writeln!(out, "  updated pages: {:?}", commit.updated_b_tree_pages);
    }
    for cell in &commit.added_cells {
        let _ = writeln!(out, "  added   rowid {}: {}", cell.rowid, render_values(&cell.values));
    }
    for cell in &commit.updated_cells {
        let _ = writeln!(out, "  updated rowid {}: {}", cell.rowid, render_values(&cell.values));
    }
    for cell in &commit.removed_cells {
        let _ = writeln!(out, "  removed rowid {}: {}", cell.rowid, render_values(&cell.values));
    }
    for carved in &commit.carved_cells {
        let _ = writeln!(out, "  carved  {}", render_carved_cell(carved));
    }
    out
}

/// One-line rendering of a carved cell.
pub fn render_carved_cell(carved: &CarvedCell) -> String {
    let rowid = carved
        .rowid
        .map(|r| r.to_string())
        .unwrap_or_else(|| "?".to_string());
    let columns: Vec<String> = carved
        .columns
        .iter()
        .map(|column| match &column.value {
            Some(value) => render_value(value),
            None => "<lost>".to_string(),
        })
        .collect();
    format!(
        "rowid {rowid} ({:?} page {} offset {}{}): ({})",
        carved.kind,
        carved.page_number,
        carved.start_offset,
        if carved.truncated { ", truncated" } else { "" },
        columns.join(", ")
    )
}

fn render_values(values: &[Value]) -> String {
    let rendered: Vec<String> = values.iter().map(render_value).collect();
    format!("({})", rendered.join(", "))
}

/// Plain-text rendering of a version's master schema.
pub fn render_schema(schema: &MasterSchema) -> String {
    let mut out = String::new();
    for row in &schema.rows {
        let kind = match row.kind {
            SchemaObjectKind::Table => "table",
            SchemaObjectKind::VirtualTable => "virtual table",
            SchemaObjectKind::Index => "index",
            SchemaObjectKind::View => "view",
            SchemaObjectKind::Trigger => "trigger",
        };
        let _ = writeln!(
            out,
            "{kind} {} (root page {}){}",
            row.name,
            row.root_page,
            if row.internal { " [internal]" } else { "" }
        );
        if let Some(table) = &row.table {
            for column in &table.columns {
                let _ = writeln!(
                    out,
                    "  column {} {} ({:?}){}",
                    column.index,
                    column.name,
                    column.affinity,
                    if column.rowid_alias { " [rowid alias]" } else { "" }
                );
            }
            if table.without_rowid {
                let _ = writeln!(out, "  WITHOUT ROWID");
            }
        }
    }
    out
}

/// Plain-text rendering of one table signature.
pub fn render_signature(signature: &TableSignature) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "signature {} ({} rows observed, {} columns)",
        signature.name,
        signature.row_count,
        signature.column_count()
    );
    for column in &signature.columns {
        let classes: Vec<String> = column
            .probabilistic
            .iter()
            .map(|(class, frequency)| format!("{} {:.0}%", class.name(), frequency * 100.0))
            .collect();
        let _ = writeln!(
            out,
            "  column {} {}: presence {:.2}, observed [{}]",
            column.index,
            column.name,
            column.presence,
            classes.join(", ")
        );
    }
    out
}
