//! # feedsync
//!
//! CLI tool for exercising feedsync peer replication.
//!
//! Every command runs its replicas in-process over the in-memory transport,
//! so nothing touches the network or the disk.
//!
//! ## Commands
//!
//! - `scenario`: Two replicas edit the same record offline and reconcile
//! - `simulate`: A mesh of replicas creates records and converges
//! - `config`: Show the effective engine configuration
//!
//! ## Example
//!
//! ```bash
//! # Walk through an offline edit conflict
//! feedsync scenario
//!
//! # Five replicas, three records each, with debug logging
//! RUST_LOG=feedsync_client=debug feedsync simulate --replicas 5 --records 3
//!
//! # Print the defaults merged with a config file
//! feedsync --config feedsync.toml config
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use feedsync_client::EngineConfig;
use std::path::PathBuf;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, registry, EnvFilter};

mod commands;
mod replica;

use commands::{config, scenario, simulate};

/// CLI tool for exercising feedsync peer replication.
#[derive(Parser, Debug)]
#[command(name = "feedsync")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Engine configuration file (TOML)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Two replicas edit the same record offline and reconcile
    Scenario,

    /// Run a mesh of replicas that create records and converge
    Simulate {
        /// Number of replicas
        #[arg(long, short, default_value = "3")]
        replicas: usize,

        /// Feedback records created by each replica
        #[arg(long, default_value = "2")]
        records: usize,
    },

    /// Show the effective engine configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let engine_config = match &cli.config {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => EngineConfig::default(),
    };

    match cli.command {
        Commands::Scenario => {
            scenario::run(&engine_config).await?;
        }
        Commands::Simulate { replicas, records } => {
            if replicas < 2 {
                anyhow::bail!("Need at least 2 replicas to simulate");
            }
            simulate::run(&engine_config, replicas, records).await?;
        }
        Commands::Config => {
            config::run(&engine_config)?;
        }
    }

    Ok(())
}
