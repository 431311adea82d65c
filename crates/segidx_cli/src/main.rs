//! segidx CLI
//!
//! Command-line tools for segment index journals.
//!
//! # Commands
//!
//! - `inspect` - Display index and existence statistics
//! - `verify` - Check stored indexes for consistency
//! - `load` - Bulk-load records from JSON Lines
//! - `compact` - Re-encode index rows in their smallest class

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Segment index command-line tools.
#[derive(Parser)]
#[command(name = "segidx")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the journal file
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Primary file within the journal
    #[arg(global = true, short, long, default_value = "records")]
    file: String,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display index and existence statistics
    Inspect {
        /// Output format (text, json)
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Check stored indexes for consistency
    Verify {
        /// Output format (text, json)
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Bulk-load records from a JSON Lines file
    Load {
        /// Input file, one `{"record": n, "fields": {...}}` object per line
        #[arg(short, long)]
        input: PathBuf,

        /// Never reuse freed record numbers
        #[arg(long)]
        no_reuse: bool,

        /// Records per segment for a new file
        #[arg(long)]
        segment_size: Option<u32>,

        /// Flush every N records within a segment
        #[arg(long)]
        update_interval: Option<u32>,
    },

    /// Re-encode index rows in their smallest class
    Compact {
        /// Index to compact (all indexes if omitted)
        #[arg(short, long)]
        index: Option<String>,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Journal path required for inspect")?;
            commands::inspect::run(&path, &cli.file, &format)?;
        }
        Commands::Verify { format } => {
            let path = cli.path.ok_or("Journal path required for verify")?;
            commands::verify::run(&path, &cli.file, &format)?;
        }
        Commands::Load {
            input,
            no_reuse,
            segment_size,
            update_interval,
        } => {
            let path = cli.path.ok_or("Journal path required for load")?;
            let options = commands::load::LoadOptions {
                no_reuse,
                segment_size,
                update_interval,
            };
            commands::load::run(&path, &cli.file, &input, &options)?;
        }
        Commands::Compact { index } => {
            let path = cli.path.ok_or("Journal path required for compact")?;
            commands::compact::run(&path, &cli.file, index.as_deref())?;
        }
        Commands::Version => {
            println!("segidx CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("segidx Core v{}", segidx_core::VERSION);
        }
    }

    Ok(())
}
