//! CloudCache CLI
//!
//! Command-line tools for exercising and debugging CloudCache.
//!
//! # Commands
//!
//! - `sync` - Run a bootstrap pass against a fixture remote store
//! - `classify` - Show how a remote error code is handled
//! - `assets` - List or purge cached blobs

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// CloudCache command-line tools.
#[derive(Parser)]
#[command(name = "cloudcache")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the local state file (cursors and subscription ids)
    #[arg(global = true, short, long)]
    state: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bootstrap a cache from a fixture of remote records
    Sync {
        /// JSON file with the remote records
        #[arg(long)]
        fixture: PathBuf,

        /// Application name used for state keys
        #[arg(long, default_value = "cloudcache")]
        app: String,

        /// Partitions to create at bootstrap
        #[arg(long = "partition")]
        partitions: Vec<String>,

        /// Also sync the shared database
        #[arg(long)]
        shared: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show how a remote error code is classified
    Classify {
        /// Error code, by name (zone_busy) or number (23)
        code: String,

        /// Server retry hint in seconds
        #[arg(short, long)]
        retry_after: Option<u64>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Inspect the blob cache of a record type
    Assets {
        /// Root directory of the blob cache
        #[arg(long)]
        root: PathBuf,

        /// Record type whose blobs to inspect
        #[arg(long)]
        record_type: String,

        #[command(subcommand)]
        action: AssetAction,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum AssetAction {
    /// List cached blobs
    List,
    /// Delete every blob of a record
    Purge {
        /// Record name
        id: String,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Sync {
            fixture,
            app,
            partitions,
            shared,
            format,
        } => {
            let state = cli.state.ok_or("State file path required for sync")?;
            commands::sync::run(&fixture, &state, &app, &partitions, shared, &format)?;
        }
        Commands::Classify {
            code,
            retry_after,
            format,
        } => {
            commands::classify::run(&code, retry_after, &format)?;
        }
        Commands::Assets {
            root,
            record_type,
            action,
        } => match action {
            AssetAction::List => commands::assets::list(&root, &record_type)?,
            AssetAction::Purge { id } => commands::assets::purge(&root, &record_type, &id)?,
        },
        Commands::Version => {
            println!("CloudCache CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
