//! mqstore CLI
//!
//! Maintenance tools for a broker data directory.
//!
//! # Commands
//!
//! - `inspect` - Load the journal and show files, live bytes and records
//! - `verify` - Scan journal files and pages without modifying them
//! - `compact` - Load, compact and stop the journal
//! - `dump` - Print journal records
//! - `pages` - List paged addresses and their pages

mod commands;
mod dir;
mod error;

use clap::{Parser, Subcommand};
use commands::Format;
use dir::{DataDir, JournalNames};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// mqstore journal and paging tools.
#[derive(Parser)]
#[command(name = "mqstore")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the broker data directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Journal file name prefix
    #[arg(global = true, long, default_value = "mq-data")]
    prefix: String,

    /// Journal file name extension
    #[arg(global = true, long, default_value = "mqj")]
    extension: String,

    /// Journal file size in bytes
    #[arg(global = true, long, default_value_t = 10 * 1024 * 1024)]
    file_size: u64,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load the journal and show its statistics
    Inspect {
        /// Show per-file details
        #[arg(long)]
        files: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Check journal files and pages without modifying them
    Verify {
        /// Skip page files
        #[arg(long)]
        no_pages: bool,
    },

    /// Compact the journal
    Compact {
        /// Compact even below the configured thresholds
        #[arg(long)]
        force: bool,

        /// Show what would be done
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Dump journal records for debugging
    Dump {
        /// Only this file
        #[arg(long)]
        file: Option<String>,

        /// Maximum number of records to dump
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List paged addresses
    Pages {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
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

    let names = JournalNames {
        prefix: cli.prefix,
        extension: cli.extension,
        file_size: cli.file_size,
    };

    match cli.command {
        Commands::Inspect { files, format } => {
            let path = cli.path.ok_or("data directory required for inspect")?;
            let dir = DataDir::lock(&path)?;
            commands::inspect::run(&dir, &names, files, Format::parse(&format)?)?;
        }
        Commands::Verify { no_pages } => {
            let path = cli.path.ok_or("data directory required for verify")?;
            let dir = DataDir::read_only(&path)?;
            commands::verify::run(&dir, &names, !no_pages)?;
        }
        Commands::Compact { force, dry_run } => {
            let path = cli.path.ok_or("data directory required for compact")?;
            let dir = DataDir::lock(&path)?;
            commands::compact::run(&dir, &names, force, dry_run)?;
        }
        Commands::Dump { file, limit, format } => {
            let path = cli.path.ok_or("data directory required for dump")?;
            let dir = DataDir::read_only(&path)?;
            commands::dump::run(&dir, &names, file.as_deref(), limit, Format::parse(&format)?)?;
        }
        Commands::Pages { format } => {
            let path = cli.path.ok_or("data directory required for pages")?;
            let dir = DataDir::read_only(&path)?;
            commands::pages::run(&dir, Format::parse(&format)?)?;
        }
        Commands::Version => {
            println!("mqstore CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
