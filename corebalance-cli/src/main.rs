// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! CoreBalance CLI
//!
//! Command-line interface for the CoreBalance CPU affinity balancer.

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod console;
mod metrics;

/// CoreBalance - per-core load balancer that pins hot processes to idle cores
#[derive(Parser)]
#[command(name = "corebal")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path (defaults to ./corebalance.yaml when present)
    #[arg(short, long)]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the balancing loop in the foreground with a command console on stdin
    Run {
        /// Drive a simulated four-core machine instead of the real one
        #[arg(long)]
        simulate: bool,

        /// Print every event as a JSON line on stdout
        #[arg(long)]
        json: bool,

        /// Serve Prometheus metrics on this port
        #[arg(long)]
        metrics_port: Option<u16>,

        /// Start with monitoring stopped
        #[arg(long)]
        paused: bool,
    },

    /// Validate a configuration file
    Validate {
        /// Path to the configuration file
        file: String,
    },

    /// Show per-core load and the busiest processes
    Snapshot {
        /// Number of processes to show
        #[arg(short, long, default_value_t = 10)]
        top: usize,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Pin one process to the least-loaded core
    Balance {
        /// Process ID
        pid: u32,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging; RUST_LOG takes precedence over --verbose
    let log_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = cli.config.as_deref();

    // Dispatch to command handlers
    match cli.command {
        Commands::Run {
            simulate,
            json,
            metrics_port,
            paused,
        } => {
            let options = commands::run::RunOptions {
                simulate,
                json,
                metrics_port,
                paused,
            };
            commands::run::execute(config, options).await
        }
        Commands::Validate { file } => commands::validate::execute(&file).await,
        Commands::Snapshot { top, json } => commands::snapshot::execute(top, json).await,
        Commands::Balance { pid } => commands::balance::execute(config, pid).await,
    }
}
