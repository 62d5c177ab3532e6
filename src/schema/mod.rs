//! # Schema Module
//!
//! Parses the master schema and the CREATE TABLE SQL it stores:
//!
//! - [`master`]: sqlite_master rows, classification, the per-version
//!   [`MasterSchema`](master::MasterSchema) aggregate
//! - [`ddl`]: the CREATE TABLE / CREATE VIRTUAL TABLE text parser, type
//!   affinities and identifier unquoting
//!
//! The schema is re-read per version; a schema change between commits
//! shows up as a different master schema on the later snapshot.

pub mod ddl;
pub mod master;

pub use ddl::{
    parse_create_table, parse_create_virtual_table, ColumnDefinition, TableDefinition,
    TypeAffinity, VirtualModule,
};
pub use master::{MasterSchema, MasterSchemaRow, SchemaObjectKind};
