//! # Internal Macros
//!
//! This module provides internal macros for reducing boilerplate in carvedb.
//!
//! ## be_getters!
//!
//! Generates getter methods for zerocopy struct fields that use big-endian
//! wrapper types (U16, U32). The SQLite file format is big-endian throughout
//! and carvedb never writes input files, so only read accessors are
//! generated.
//!
//! ### Usage
//!
//! ```ignore
//! use zerocopy::big_endian::{U16, U32};
//!
//! #[repr(C)]
//! struct Header {
//!     page_size: U16,
//!     change_counter: U32,
//! }
//!
//! impl Header {
//!     be_getters! {
//!         page_size: u16,
//!         change_counter: u32,
//!     }
//! }
//!
//! // Generates:
//! // pub fn page_size(&self) -> u16 { self.page_size.get() }
//! // pub fn change_counter(&self) -> u32 { self.change_counter.get() }
//! ```

/// Generates getter methods for zerocopy big-endian fields.
#[macro_export]
macro_rules! be_getters {
    ($($field:ident : $native_ty:ty),* $(,)?) => {
        $(
            #[inline]
            pub fn $field(&self) -> $native_ty {
                self.$field.get()
            }
        )*
    };
}
