//! EventStash CLI
//!
//! Offline tools for EventStash storage directories.
//!
//! # Commands
//!
//! - `inspect` - Show files, sizes and record counts per feature and area
//! - `verify` - Check every batch file for corruption
//! - `dump` - Print the records of one batch file
//! - `purge` - Delete batch files of a feature

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// EventStash command-line storage tools.
#[derive(Parser)]
#[command(name = "eventstash")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the storage root
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show files, sizes and record counts
    Inspect {
        /// Only this feature (default: every feature under the root)
        #[arg(short = 'F', long)]
        feature: Option<String>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Check every batch file for corruption
    Verify {
        /// Only this feature (default: every feature under the root)
        #[arg(short = 'F', long)]
        feature: Option<String>,

        /// Hex-encoded AES-256 key, to also check encrypted records
        #[arg(short, long)]
        key_hex: Option<String>,
    },

    /// Print the records of one batch file
    Dump {
        /// The batch file
        file: PathBuf,

        /// Hex-encoded AES-256 key, to decrypt encrypted records
        #[arg(short, long)]
        key_hex: Option<String>,

        /// Maximum number of records to print
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Delete batch files of a feature
    Purge {
        /// The feature to purge
        #[arg(short = 'F', long)]
        feature: String,

        /// Area to purge (authorized, unauthorized, all)
        #[arg(short, long, default_value = "all")]
        area: String,

        /// Dry run - show what would be deleted
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect { feature, format } => {
            let path = cli.path.ok_or("Storage path required for inspect")?;
            commands::inspect::run(&path, feature.as_deref(), &format)?;
        }
        Commands::Verify { feature, key_hex } => {
            let path = cli.path.ok_or("Storage path required for verify")?;
            commands::verify::run(&path, feature.as_deref(), key_hex.as_deref())?;
        }
        Commands::Dump {
            file,
            key_hex,
            limit,
            format,
        } => {
            commands::dump::run(&file, key_hex.as_deref(), limit, &format)?;
        }
        Commands::Purge {
            feature,
            area,
            dry_run,
        } => {
            let path = cli.path.ok_or("Storage path required for purge")?;
            commands::purge::run(&path, &feature, &area, dry_run)?;
        }
        Commands::Version => commands::print_version(),
    }

    Ok(())
}
