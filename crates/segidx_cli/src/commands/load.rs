//! Load command implementation.

use segidx_core::{
    BulkLoadConfig, BulkLoadSummary, IndexValues, RecordFile, RecordNumber, ReusePolicy,
    STANDARD_SEGMENT_SIZE,
};
use tracing::{info, warn};
use segidx_storage::{FileBackend, FileConfig};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Options of the load command.
#[derive(Debug, Default)]
pub struct LoadOptions {
    /// Never reuse freed record numbers. Ignored for an existing file,
    /// which keeps the policy it was created with.
    pub no_reuse: bool,
    /// Records per segment for a new file.
    pub segment_size: Option<u32>,
    /// Flush every N records within a segment.
    pub update_interval: Option<u32>,
}

/// One input line.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LoadLine {
    /// Record number; allocated when absent.
    #[serde(default)]
    record: Option<i64>,
    /// Index name to keys.
    #[serde(default)]
    fields: BTreeMap<String, Vec<String>>,
}

impl LoadLine {
    fn index_values(self) -> IndexValues {
        self.fields
            .into_iter()
            .map(|(index, keys)| (index, keys.into_iter().map(String::into_bytes).collect()))
            .collect()
    }
}

/// Runs the load command.
pub fn run(
    path: &Path,
    file: &str,
    input: &Path,
    options: &LoadOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let reader = BufReader::new(File::open(input)?);
    let summary = load(path, file, reader, options)?;

    println!("Loaded {:?} into {:?}", input, path);
    println!("  Records:            {}", summary.records);
    println!("  Indexes:            {}", summary.indexes);
    println!("  Existence segments: {}", summary.existence_segments);
    Ok(())
}

/// Bulk-loads every line of `reader` into `file`, creating the journal if
/// needed. Nothing is committed unless every line loads.
pub fn load(
    path: &Path,
    file: &str,
    reader: impl BufRead,
    options: &LoadOptions,
) -> Result<BulkLoadSummary, Box<dyn std::error::Error>> {
    let backend = FileBackend::open_with_config(path, FileConfig::default().create_dirs(true))?;
    let requested = if options.no_reuse {
        ReusePolicy::NoReuse
    } else {
        ReusePolicy::Reuse
    };
    let config = match super::stored_config(&backend, file)? {
        Some(stored) => {
            if options.no_reuse && stored.reuse_policy != requested {
                warn!(file, policy = ?stored.reuse_policy, "keeping the stored reuse policy");
            }
            stored
        }
        None => super::config_for(options.segment_size.unwrap_or(STANDARD_SEGMENT_SIZE))
            .reuse_policy(requested),
    };
    let policy = config.reuse_policy;
    info!(file, segment_size = config.segment_size, ?policy, "loading");
    let mut record_file = RecordFile::open(backend, file, config)?;

    let bulk = match options.update_interval {
        Some(interval) => BulkLoadConfig::with_update_interval(&config, interval),
        None => BulkLoadConfig::new(&config),
    };
    record_file.bulk_load_begin_with(bulk.reuse_policy(policy))?;

    if let Err(err) = load_lines(&mut record_file, reader) {
        record_file.abort()?;
        return Err(err);
    }
    Ok(record_file.bulk_load_end()?)
}

fn load_lines(
    record_file: &mut RecordFile<FileBackend>,
    reader: impl BufRead,
) -> Result<(), Box<dyn std::error::Error>> {
    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let parsed: LoadLine = serde_json::from_str(&line)
            .map_err(|e| format!("line {}: {}", number + 1, e))?;
        let rn = match parsed.record {
            Some(n) => RecordNumber::try_from(n).map_err(|e| format!("line {}: {}", number + 1, e))?,
            None => record_file.allocate_record_number()?,
        };
        record_file
            .bulk_load_record(rn, &parsed.index_values())
            .map_err(|e| format!("line {}: {}", number + 1, e))?;
    }
    Ok(())
}
