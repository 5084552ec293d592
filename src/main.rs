// ABOUTME: CLI entry point for state-replicator
// ABOUTME: Applies action files against a sync database or runs the periodic scheduler

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod actions;

#[derive(Parser)]
#[command(name = "state-replicator")]
#[command(about = "Snapshot diff and synchronization driver over an embedded SQLite store", long_about = None)]
#[command(version)]
struct Cli {
    /// Set the log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info", env = "STATE_REPLICATOR_LOG")]
    log: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply a sequence of JSON action files and write each result document
    Run {
        /// Engine configuration file (database path, engine type, schema statement)
        #[arg(long)]
        config: PathBuf,
        /// Action files, applied in order
        #[arg(required = true)]
        actions: Vec<PathBuf>,
        /// Directory the per-action result documents are written to
        #[arg(short, long, default_value = "out")]
        output: PathBuf,
    },
    /// Run the periodic synchronization scheduler in the foreground
    Watch {
        /// Engine configuration file, including the sync registrations
        #[arg(long)]
        config: PathBuf,
        /// Seconds between synchronization passes
        #[arg(long, default_value_t = 60)]
        interval: u64,
        /// Stop after this many seconds instead of waiting for stdin to close
        #[arg(long)]
        duration: Option<u64>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log.clone()));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    match cli.command {
        Commands::Run {
            config,
            actions,
            output,
        } => actions::run_actions(&config, &actions, &output),
        Commands::Watch {
            config,
            interval,
            duration,
        } => actions::watch(&config, interval, duration),
    }
}
