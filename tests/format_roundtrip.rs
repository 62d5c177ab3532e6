//! # Format Decoding Against Real Databases
//!
//! These tests build genuine SQLite databases with rusqlite and verify
//! that carvedb's decoders agree with what SQLite wrote:
//!
//! - header fields, page sizes at both extremes, text encodings
//! - page byte accounting (header + pointers + cells + freeblocks +
//!   fragments + unallocated = usable size)
//! - record header/body consistency on every live cell
//! - auto-vacuum pointer-map page placement

use std::path::{Path, PathBuf};

use rusqlite::Connection;
use tempfile::tempdir;

use carvedb::encoding::{serial_type_content_length, Value};
use carvedb::pages::walk::walk_btree;
use carvedb::pages::{Cell, PageSource, Record};
use carvedb::version::VersionChain;

fn populated_db(dir: &Path, name: &str, pragmas: &str) -> PathBuf {
    let path = dir.join(name);
    let conn = Connection::open(&path).unwrap();
    conn.execute_batch(pragmas).unwrap();
    conn.execute_batch(
        "CREATE TABLE t(a INTEGER PRIMARY KEY, b TEXT, c REAL, d BLOB, e INTEGER);
         INSERT INTO t VALUES (1, 'hello', 1.5, x'deadbeef', 42);
         INSERT INTO t VALUES (2, 'world', -2.25, x'00ff', -7);
         INSERT INTO t VALUES (3, NULL, NULL, NULL, 0);
         CREATE TABLE small(x TEXT);
         INSERT INTO small VALUES ('one'), ('two'), ('three');",
    )
    .unwrap();
    drop(conn);
    path
}

fn live_rows(path: &Path, table: &str) -> Vec<(i64, Vec<Value>)> {
    let chain = VersionChain::open(path, None, true).unwrap();
    let base = chain.base();
    let root = base.master_schema().row_by_name(table).unwrap().root_page;
    let (_, leaves) = walk_btree(base, root).unwrap();
    let mut rows = Vec::new();
    for leaf in &leaves {
        let bytes = base.page_bytes(leaf.number).unwrap();
        for cell in &leaf.cells {
            if let Cell::TableLeaf(table_cell) = cell {
                let payload = cell.payload(bytes, base).unwrap().unwrap();
                let record = Record::parse(&payload, base.text_encoding()).unwrap();
                rows.push((table_cell.rowid, record.values));
            }
        }
    }
    rows.sort_by_key(|(rowid, _)| *rowid);
    rows
}

#[test]
fn header_fields_match_sqlite() {
    let dir = tempdir().unwrap();
    let path = populated_db(dir.path(), "case.db", "PRAGMA page_size = 4096;");
    let chain = VersionChain::open(&path, None, true).unwrap();

    let header = chain.base().header();
    assert_eq!(header.page_size, 4096);
    assert_eq!(header.max_embedded_payload_fraction, 64);
    assert_eq!(header.min_embedded_payload_fraction, 32);
    assert_eq!(header.leaf_payload_fraction, 32);
    assert!((1..=4).contains(&header.schema_format));
    assert!(chain.warnings.is_empty());
}

#[test]
fn page_sizes_512_and_65536_parse_identically() {
    let dir = tempdir().unwrap();
    let small = populated_db(dir.path(), "small.db", "PRAGMA page_size = 512;");
    let large = populated_db(dir.path(), "large.db", "PRAGMA page_size = 65536;");

    let small_rows = live_rows(&small, "t");
    let large_rows = live_rows(&large, "t");
    assert_eq!(small_rows, large_rows);
    assert_eq!(small_rows.len(), 3);
    assert_eq!(small_rows[0].1[1], Value::Text("hello".into()));
    // The rowid alias column is stored as NULL.
    assert_eq!(small_rows[0].1[0], Value::Null);
    assert_eq!(small_rows[1].1[3], Value::Blob(vec![0x00, 0xff]));
    assert_eq!(small_rows[1].1[4], Value::Integer(-7));
}

#[test]
fn every_btree_page_balances() {
    let dir = tempdir().unwrap();
    let path = populated_db(dir.path(), "case.db", "PRAGMA page_size = 512;");
    let chain = VersionChain::open(&path, None, true).unwrap();
    let base = chain.base();

    let mut checked = 0;
    for row in &base.master_schema().rows {
        if row.root_page == 0 {
            continue;
        }
        let (_, leaves) = walk_btree(base, row.root_page).unwrap();
        for leaf in &leaves {
            let accounting = leaf.accounting(base.usable_page_size());
            assert!(
                accounting.balances(),
                "page {} of {}: {accounting:?}",
                leaf.number,
                row.name
            );
            checked += 1;
        }
    }
    assert!(checked > 0);
}

#[test]
fn record_headers_declare_exactly_the_body() {
    let dir = tempdir().unwrap();
    let path = populated_db(dir.path(), "case.db", "PRAGMA page_size = 4096;");
    let chain = VersionChain::open(&path, None, true).unwrap();
    let base = chain.base();

    let root = base.master_schema().row_by_name("t").unwrap().root_page;
    let (_, leaves) = walk_btree(base, root).unwrap();
    let mut checked = 0;
    for leaf in &leaves {
        let bytes = base.page_bytes(leaf.number).unwrap();
        for cell in &leaf.cells {
            let Cell::TableLeaf(table_cell) = cell else { continue };
            let payload = cell.payload(bytes, base).unwrap().unwrap();
            let record = Record::parse(&payload, base.text_encoding()).unwrap();

            let body: u64 = record
                .serial_types
                .iter()
                .map(|&t| serial_type_content_length(t).unwrap())
                .sum();
            assert_eq!(
                record.header_length + body,
                table_cell.payload_length,
                "rowid {}",
                table_cell.rowid
            );
            checked += 1;
        }
    }
    assert_eq!(checked, 3);
}

#[test]
fn overflowing_payloads_reassemble() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("case.db");
    let conn = Connection::open(&path).unwrap();
    let long_text = "x".repeat(5000);
    conn.execute_batch("PRAGMA page_size = 512; CREATE TABLE t(a INTEGER PRIMARY KEY, b TEXT);")
        .unwrap();
    conn.execute("INSERT INTO t VALUES (1, ?1)", [&long_text])
        .unwrap();
    drop(conn);

    let rows = live_rows(&path, "t");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].1[1], Value::Text(long_text));
}

#[test]
fn utf16_encodings_decode_without_drift() {
    for encoding in ["UTF-16le", "UTF-16be"] {
        let dir = tempdir().unwrap();
        let path = dir.path().join("case.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(&format!(
            "PRAGMA encoding = '{encoding}';
             CREATE TABLE t(a INTEGER PRIMARY KEY, b TEXT);
             INSERT INTO t VALUES (1, 'héllo wörld');",
        ))
        .unwrap();
        drop(conn);

        let rows = live_rows(&path, "t");
        assert_eq!(
            rows[0].1[1],
            Value::Text("héllo wörld".into()),
            "{encoding}"
        );
    }
}

#[test]
fn auto_vacuum_pointer_maps_sit_on_the_interval() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("case.db");
    let conn = Connection::open(&path).unwrap();
    conn.execute_batch(
        "PRAGMA auto_vacuum = FULL;
         PRAGMA page_size = 512;
         CREATE TABLE t(a INTEGER PRIMARY KEY, b TEXT);",
    )
    .unwrap();
    for _ in 0..200 {
        conn.execute("INSERT INTO t VALUES (NULL, hex(randomblob(64)))", [])
            .unwrap();
    }
    drop(conn);

    let chain = VersionChain::open(&path, None, true).unwrap();
    let base = chain.base();
    assert!(base.header().auto_vacuum());

    match base {
        carvedb::version::Version::Base(snapshot) => {
            assert!(!snapshot.pointer_map_pages.is_empty());
            assert_eq!(snapshot.pointer_map_pages[0], 2);
            // Each map page covers usable/5 pages; successive maps are
            // that interval plus one apart.
            let interval = base.usable_page_size() / 5 + 1;
            for pair in snapshot.pointer_map_pages.windows(2) {
                assert_eq!(pair[1] - pair[0], interval);
            }
        }
        _ => unreachable!("version 0 is the base"),
    }
}

#[test]
fn schema_classifies_every_object_kind() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("case.db");
    let conn = Connection::open(&path).unwrap();
    conn.execute_batch(
        "CREATE TABLE t(a INTEGER PRIMARY KEY, b TEXT NOT NULL);
         CREATE INDEX idx_b ON t(b);
         CREATE VIEW v AS SELECT b FROM t;
         CREATE TRIGGER tr AFTER INSERT ON t BEGIN SELECT 1; END;
         CREATE TABLE wr(k TEXT PRIMARY KEY, v INTEGER) WITHOUT ROWID;",
    )
    .unwrap();
    drop(conn);

    let chain = VersionChain::open(&path, None, true).unwrap();
    let schema = chain.base().master_schema();

    use carvedb::schema::SchemaObjectKind::*;
    assert_eq!(schema.row_by_name("t").unwrap().kind, Table);
    assert_eq!(schema.row_by_name("idx_b").unwrap().kind, Index);
    assert_eq!(schema.row_by_name("v").unwrap().kind, View);
    assert_eq!(schema.row_by_name("tr").unwrap().kind, Trigger);

    let wr = schema.row_by_name("wr").unwrap();
    assert_eq!(wr.kind, Table);
    assert!(wr.table.as_ref().unwrap().without_rowid);
    assert!(!wr.supports_carving());

    let t = schema.row_by_name("t").unwrap();
    assert!(t.supports_carving());
    let columns = &t.table.as_ref().unwrap().columns;
    assert!(columns[0].rowid_alias);
    assert!(columns[1].not_null);
}

#[test]
fn every_page_is_classified_exactly_once() {
    let dir = tempdir().unwrap();
    let path = populated_db(dir.path(), "case.db", "PRAGMA page_size = 512;");
    let chain = VersionChain::open(&path, None, true).unwrap();
    let base = chain.base();

    let kinds = base.classify_pages().unwrap();
    assert_eq!(kinds.len(), base.page_count() as usize);
    for number in 1..=base.page_count() {
        assert!(kinds.contains_key(&number), "page {number} unclassified");
    }
    // Page 1 is the schema b-tree's root.
    use carvedb::pages::PageKind;
    assert!(matches!(
        kinds[&1],
        PageKind::BTreeTableLeaf | PageKind::BTreeTableInterior
    ));
    // In a freshly written database nothing is unaccounted for.
    assert!(
        !kinds.values().any(|kind| *kind == PageKind::Unaccounted),
        "{kinds:?}"
    );
}

#[test]
fn freeblocks_appear_after_deletes() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("case.db");
    let conn = Connection::open(&path).unwrap();
    conn.execute_batch(
        "PRAGMA page_size = 512;
         CREATE TABLE t(a INTEGER PRIMARY KEY, b TEXT);
         INSERT INTO t VALUES (1, 'first'), (2, 'second'), (3, 'third');
         DELETE FROM t WHERE a = 2;",
    )
    .unwrap();
    drop(conn);

    let chain = VersionChain::open(&path, None, true).unwrap();
    let base = chain.base();
    let root = base.master_schema().row_by_name("t").unwrap().root_page;
    let (_, leaves) = walk_btree(base, root).unwrap();

    let freeblocks: usize = leaves.iter().map(|leaf| leaf.freeblocks.len()).sum();
    assert!(freeblocks > 0, "delete should have left a freeblock");
    for leaf in &leaves {
        assert!(leaf.accounting(base.usable_page_size()).balances());
    }
}
