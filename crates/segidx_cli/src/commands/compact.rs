//! Compact command implementation.

use std::path::Path;

/// Runs the compact command.
pub fn run(path: &Path, file: &str, index: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let mut record_file = super::open_existing(path, file)?;
    let indexes = match index {
        Some(index) => vec![index.to_owned()],
        None => record_file.index_names()?,
    };

    println!("Compacting {:?} in {:?}", file, path);
    println!();

    let mut rewritten = 0;
    for index in &indexes {
        let summary = record_file.compact_index(index)?;
        println!(
            "  {:<20} {} rows, {} rewritten, {} bitmaps demoted",
            index, summary.rows_checked, summary.rows_rewritten, summary.bitmaps_demoted
        );
        rewritten += summary.rows_rewritten;
    }

    println!();
    if rewritten == 0 {
        println!("No compaction needed - every row is already in its smallest class");
    } else {
        println!("✓ Compaction complete");
    }
    Ok(())
}
