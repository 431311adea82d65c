//! Verify command implementation.

use segidx_core::VerifyReport;
use serde::Serialize;
use std::path::Path;

/// Verification result.
#[derive(Debug, Serialize)]
pub struct VerifyResult {
    /// Index rows checked.
    pub rows_checked: usize,
    /// Record numbers checked.
    pub records_checked: u64,
    /// Side-table rows checked.
    pub side_rows_checked: usize,
    /// Problems found.
    pub problems: Vec<String>,
}

impl From<&VerifyReport> for VerifyResult {
    fn from(report: &VerifyReport) -> Self {
        Self {
            rows_checked: report.rows_checked,
            records_checked: report.records_checked,
            side_rows_checked: report.side_rows_checked,
            problems: report.problems.iter().map(ToString::to_string).collect(),
        }
    }
}

/// Runs the verify command.
pub fn run(path: &Path, file: &str, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let record_file = super::open_existing(path, file)?;
    let report = record_file.verify()?;
    let result = VerifyResult::from(&report);

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            println!("Verifying {:?} in {:?}", file, path);
            println!();
            println!("  Rows checked:      {}", result.rows_checked);
            println!("  Records checked:   {}", result.records_checked);
            println!("  Side rows checked: {}", result.side_rows_checked);
            for problem in &result.problems {
                println!("  ✗ {}", problem);
            }
            println!();
        }
    }

    if report.is_ok() {
        if format != "json" {
            println!("✓ Verification passed");
        }
        Ok(())
    } else {
        Err(format!("Verification failed with {} problems", report.problems.len()).into())
    }
}
