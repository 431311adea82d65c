//! Inspect command implementation.

use segidx_core::{IndexStats, RecordFile};
use segidx_storage::FileBackend;
use serde::Serialize;
use std::path::Path;

/// Inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Journal path.
    pub path: String,
    /// Journal size in bytes.
    pub journal_size: u64,
    /// Primary file name.
    pub file: String,
    /// Records per segment.
    pub segment_size: u32,
    /// Segments with an existence bitmap.
    pub existence_segments: usize,
    /// Live records.
    pub live_records: u64,
    /// Highest live record number.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub highest_record: Option<u64>,
    /// Per-index statistics.
    pub indexes: Vec<IndexSummary>,
}

/// Statistics for a single index.
#[derive(Debug, Serialize)]
pub struct IndexSummary {
    /// Index name.
    pub name: String,
    /// Distinct keys.
    pub keys: usize,
    /// Rows holding a single offset.
    pub single_rows: usize,
    /// Rows holding an offset list.
    pub list_rows: usize,
    /// Rows holding a bitmap.
    pub bitmap_rows: usize,
    /// Records filed across all keys.
    pub records: u64,
}

impl From<IndexStats> for IndexSummary {
    fn from(stats: IndexStats) -> Self {
        Self {
            name: stats.index,
            keys: stats.keys,
            single_rows: stats.single_rows,
            list_rows: stats.list_rows,
            bitmap_rows: stats.bitmap_rows,
            records: stats.records,
        }
    }
}

/// Runs the inspect command.
pub fn run(path: &Path, file: &str, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let record_file = super::open_existing(path, file)?;
    let result = inspect(&record_file)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

/// Collects the statistics of an open file.
pub fn inspect(
    record_file: &RecordFile<FileBackend>,
) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let live = record_file.live_records()?;
    let indexes = record_file
        .index_names()?
        .iter()
        .map(|index| record_file.index_stats(index).map(IndexSummary::from))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(InspectResult {
        path: record_file.backend().path().display().to_string(),
        journal_size: record_file.backend().journal_len(),
        file: record_file.name().to_owned(),
        segment_size: record_file.config().segment_size,
        existence_segments: record_file.existence().segments().count(),
        live_records: live.count(),
        highest_record: live.last().map(|rn| rn.as_u64()),
        indexes,
    })
}

fn print_text_output(result: &InspectResult) {
    println!("segidx Journal Inspection");
    println!("=========================");
    println!();
    println!("Path:         {}", result.path);
    println!("Journal size: {} bytes", result.journal_size);
    println!();
    println!("File: {}", result.file);
    println!("  Segment size:       {}", result.segment_size);
    println!("  Existence segments: {}", result.existence_segments);
    println!("  Live records:       {}", result.live_records);
    if let Some(highest) = result.highest_record {
        println!("  Highest record:     {}", highest);
    }

    if result.indexes.is_empty() {
        println!();
        println!("No indexes");
        return;
    }
    println!();
    println!(
        "{:<20} {:>8} {:>8} {:>8} {:>8} {:>10}",
        "Index", "Keys", "Single", "List", "Bitmap", "Records"
    );
    println!("{}", "-".repeat(67));
    for index in &result.indexes {
        println!(
            "{:<20} {:>8} {:>8} {:>8} {:>8} {:>10}",
            index.name,
            index.keys,
            index.single_rows,
            index.list_rows,
            index.bitmap_rows,
            index.records
        );
    }
}
