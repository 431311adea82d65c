//! Shared helpers for the segidx benchmarks.

pub mod utils;
