//! Secondary index maintenance.
//!
//! Two paths keep an index in step with its primary file:
//!
//! - [`SecondaryIndexUpdater`]: queues per-record changes and folds them
//!   into stored segments at commit
//! - [`DeferredUpdateAccumulator`]: the bulk-load path, which builds a
//!   whole segment in memory before writing it once
//!
//! Both produce the same logical index for the same records.

mod deferred;
mod updater;

pub use deferred::{AccumulatorState, DeferredUpdateAccumulator};
pub use updater::{IndexOp, SecondaryIndexUpdater, UpdateSummary};
