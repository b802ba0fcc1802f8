//! studycache CLI
//!
//! Maintenance tools for a durable studycache store directory.
//!
//! # Commands
//!
//! - `inspect` - Table sizes, cached artifacts, queues and sync status
//! - `sweep` - Remove expired artifacts
//! - `queue` - Dump an owner's queued actions in delivery order
//! - `retry` / `discard` - Manage dead letters
//! - `compact` - Rewrite the log with only live rows

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// studycache store maintenance tools.
#[derive(Parser)]
#[command(name = "studycache")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store directory
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
    /// Display store statistics, queues and sync status
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Remove every expired artifact
    Sweep,

    /// Dump an owner's queued actions in delivery order
    Queue {
        /// Owner id
        #[arg(short, long)]
        owner: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Give a dead letter a fresh retry budget
    Retry {
        /// Owner id
        #[arg(short, long)]
        owner: String,

        /// Action sequence number
        #[arg(short, long)]
        sequence: u64,
    },

    /// Drop a dead letter, unblocking the owner's queue
    Discard {
        /// Owner id
        #[arg(short, long)]
        owner: String,

        /// Action sequence number
        #[arg(short, long)]
        sequence: u64,
    },

    /// Rewrite the log keeping only live rows
    Compact,

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
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Store path required for inspect")?;
            commands::inspect::run(&path, &format)?;
        }
        Commands::Sweep => {
            let path = cli.path.ok_or("Store path required for sweep")?;
            commands::sweep::run(&path)?;
        }
        Commands::Queue { owner, format } => {
            let path = cli.path.ok_or("Store path required for queue")?;
            commands::queue::run(&path, &owner, &format)?;
        }
        Commands::Retry { owner, sequence } => {
            let path = cli.path.ok_or("Store path required for retry")?;
            commands::dead_letter::retry(&path, &owner, sequence)?;
        }
        Commands::Discard { owner, sequence } => {
            let path = cli.path.ok_or("Store path required for discard")?;
            commands::dead_letter::discard(&path, &owner, sequence)?;
        }
        Commands::Compact => {
            let path = cli.path.ok_or("Store path required for compact")?;
            commands::compact::run(&path)?;
        }
        Commands::Version => {
            println!("studycache CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("studycache core v{}", studycache_core::VERSION);
        }
    }

    Ok(())
}
