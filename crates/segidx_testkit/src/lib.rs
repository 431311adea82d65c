//! # segidx Testkit
//!
//! Test utilities for segidx.
//!
//! This crate provides:
//! - Record-file fixtures over in-memory and journaled backends
//! - Property-based test generators using proptest
//! - A shadow-model harness and bulk-versus-incremental comparisons
//! - Journal truncation (crash recovery) checks
//!
//! ## Usage
//!
//! ```rust
//! use segidx_testkit::prelude::*;
//!
//! with_memory_file(small_config(), |file| {
//!     let rn = file.allocate_record_number().unwrap();
//!     file.on_record_inserted(rn, &values(&[("colour", "red")])).unwrap();
//!     file.commit().unwrap();
//!     assert_eq!(file.count_for_key("colour", b"red").unwrap(), 1);
//! });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;
pub mod integration;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
pub use integration::*;
