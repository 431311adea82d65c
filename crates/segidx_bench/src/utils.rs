//! Benchmark utilities.

use rand::seq::SliceRandom;
use rand::Rng;
use segidx_core::{IndexValues, RecordNumber};

/// Keys a benchmark record can be filed under.
pub const COLOURS: [&str; 5] = ["red", "green", "blue", "black", "white"];

/// Generate `count` distinct offsets below `segment_size`, unsorted.
pub fn random_offsets(count: usize, segment_size: u32) -> Vec<u16> {
    let mut rng = rand::thread_rng();
    let size = u16::try_from(segment_size.saturating_sub(1)).unwrap_or(u16::MAX);
    let mut all: Vec<u16> = (0..=size).collect();
    all.shuffle(&mut rng);
    all.truncate(count);
    all
}

/// Generate index values for one record: one colour and a sparse tag.
pub fn random_values() -> IndexValues {
    let mut rng = rand::thread_rng();
    let mut values = IndexValues::new();
    let colour = COLOURS[rng.gen_range(0..COLOURS.len())];
    values.insert("colour".to_owned(), vec![colour.as_bytes().to_vec()]);
    if rng.gen_bool(0.01) {
        let tag = format!("tag_{}", rng.gen_range(0..100));
        values.insert("tag".to_owned(), vec![tag.into_bytes()]);
    }
    values
}

/// Generate `count` records numbered from zero.
pub fn generate_records(count: u64) -> Vec<(RecordNumber, IndexValues)> {
    (0..count)
        .map(|n| (RecordNumber::new(n), random_values()))
        .collect()
}
