//! Property-based test generators using proptest.
//!
//! Provides strategies for record numbers, index keys and record
//! operations. Generated loads keep record numbers strictly increasing, as
//! the bulk-load path expects.

use proptest::prelude::*;
use segidx_core::{IndexValues, RecordNumber};
use std::collections::BTreeMap;

/// Index names used by generated records.
pub const INDEX_NAMES: [&str; 3] = ["colour", "size", "tag"];

/// Strategy for record numbers below `max`.
pub fn record_number_strategy(max: u64) -> impl Strategy<Value = RecordNumber> {
    (0..max).prop_map(RecordNumber::new)
}

/// Strategy for index keys.
///
/// Keys come from a small alphabet so that keys collect many records and
/// cross the list-to-bitmap threshold.
pub fn key_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        4 => prop::sample::select(vec!["red", "green", "blue"]).prop_map(|k| k.as_bytes().to_vec()),
        1 => prop::string::string_regex("[a-z]{1,6}")
            .expect("Invalid regex")
            .prop_map(String::into_bytes),
    ]
}

/// Strategy for the index values of one record.
pub fn index_values_strategy() -> impl Strategy<Value = IndexValues> {
    prop::collection::btree_map(
        prop::sample::select(INDEX_NAMES.to_vec()).prop_map(str::to_owned),
        prop::collection::vec(key_strategy(), 1..3),
        0..INDEX_NAMES.len(),
    )
}

/// One record to load.
#[derive(Debug, Clone)]
pub struct RecordPlan {
    /// Record number.
    pub rn: RecordNumber,
    /// Keys the record is filed under.
    pub values: IndexValues,
}

/// Strategy for records with distinct, ascending record numbers below `max`.
pub fn load_plan_strategy(max_records: usize, max: u64) -> impl Strategy<Value = Vec<RecordPlan>> {
    prop::collection::btree_map(0..max, index_values_strategy(), 0..max_records).prop_map(
        |records: BTreeMap<u64, IndexValues>| {
            records
                .into_iter()
                .map(|(n, values)| RecordPlan {
                    rn: RecordNumber::new(n),
                    values,
                })
                .collect()
        },
    )
}

/// A change to a primary file.
#[derive(Debug, Clone)]
pub enum FileOperation {
    /// Insert a record at the next allocated number.
    Insert {
        /// Keys of the new record.
        values: IndexValues,
    },
    /// Delete the `nth` live record, counting modulo the live count.
    Delete {
        /// Which live record.
        nth: usize,
    },
    /// Refile the `nth` live record under new keys.
    Edit {
        /// Which live record.
        nth: usize,
        /// Replacement keys.
        values: IndexValues,
    },
    /// Commit pending changes.
    Commit,
    /// Abort pending changes.
    Abort,
}

/// Strategy for file operations.
pub fn file_operation_strategy() -> impl Strategy<Value = FileOperation> {
    prop_oneof![
        6 => index_values_strategy().prop_map(|values| FileOperation::Insert { values }),
        2 => any::<usize>().prop_map(|nth| FileOperation::Delete { nth }),
        2 => (any::<usize>(), index_values_strategy())
            .prop_map(|(nth, values)| FileOperation::Edit { nth, values }),
        2 => Just(FileOperation::Commit),
        1 => Just(FileOperation::Abort),
    ]
}

/// Strategy for generating a sequence of operations.
pub fn operation_sequence_strategy(
    min_ops: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<FileOperation>> {
    prop::collection::vec(file_operation_strategy(), min_ops..max_ops)
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn load_plan_is_strictly_ascending(plan in load_plan_strategy(50, 500)) {
            prop_assert!(plan.windows(2).all(|w| w[0].rn < w[1].rn));
            prop_assert!(plan.iter().all(|r| r.rn.as_u64() < 500));
        }

        #[test]
        fn index_values_use_known_indexes(values in index_values_strategy()) {
            prop_assert!(values.keys().all(|name| INDEX_NAMES.contains(&name.as_str())));
            prop_assert!(values.values().all(|keys| !keys.is_empty()));
        }
    }
}
