//! # carvedb Configuration Module
//!
//! This module centralizes the on-disk format constants for the SQLite file
//! family that carvedb parses. Constants are grouped by the file type they
//! describe and interdependencies are documented and enforced through
//! compile-time assertions.
//!
//! ## Why Centralization?
//!
//! The database file, WAL, rollback journal and WAL-index all carry fixed
//! header layouts whose sizes and magic values must agree with the structs
//! in `format`. Co-locating the numbers and asserting the relationships at
//! compile time keeps the decoders honest.
//!
//! ## Module Organization
//!
//! - [`constants`]: All format constants with dependency documentation

pub mod constants;
pub use constants::*;
