//! PageDB CLI
//!
//! Command-line tools for PageDB data files.
//!
//! # Commands
//!
//! - `inspect` - Display header, log and engine statistics
//! - `verify` - Scan the log and check every record
//! - `checkpoint` - Fold the log into the data file

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// PageDB command-line tools.
#[derive(Parser)]
#[command(name = "pagedb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the data file
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Lock timeout in milliseconds
    #[arg(global = true, long, default_value = "5000")]
    timeout_ms: u64,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display header, log and engine statistics
    Inspect {
        /// List pages whose latest image is in the log
        #[arg(short, long)]
        logged_pages: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Scan the log and check every record
    Verify,

    /// Fold the log into the data file
    Checkpoint,

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let timeout = std::time::Duration::from_millis(cli.timeout_ms);
    match cli.command {
        Commands::Inspect {
            logged_pages,
            format,
        } => {
            let path = cli.path.ok_or("Data file path required for inspect")?;
            commands::inspect::run(&path, timeout, logged_pages, &format)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Data file path required for verify")?;
            commands::verify::run(&path)?;
        }
        Commands::Checkpoint => {
            let path = cli.path.ok_or("Data file path required for checkpoint")?;
            commands::checkpoint::run(&path, timeout)?;
        }
        Commands::Version => {
            println!("PageDB CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("PageDB Core v{}", pagedb_core::VERSION);
        }
    }

    Ok(())
}
