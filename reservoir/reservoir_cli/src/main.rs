use anyhow::Context;
use clap::{Parser, Subcommand};
use reservoir_core::{LogLevel, ReservoirConfig};
use std::path::PathBuf;

mod commands;
mod logging;

use commands::buffer::BufferStressArgs;
use commands::pool::PoolStressArgs;

/// Reservoir Command Line Interface
///
/// Stress harness for the reservoir resource pool and bounded buffer.
/// Reports are printed to stdout as JSON; logs go to stderr.
#[derive(Parser)]
#[clap(author, version, about)]
struct Cli {
    /// TOML configuration file
    #[clap(long, global = true)]
    config: Option<PathBuf>,

    /// Log level; overrides the configuration file and RUST_LOG
    #[clap(long, global = true)]
    log_level: Option<LogLevel>,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Hammer a resource pool from many threads
    #[clap(name = "pool-stress")]
    PoolStress(PoolStressArgs),

    /// Run tagged producers and consumers through a bounded buffer
    #[clap(name = "buffer-stress")]
    BufferStress(BufferStressArgs),

    /// Print the effective configuration as TOML
    Config,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ReservoirConfig::from_file(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => ReservoirConfig::default(),
    };

    logging::init(cli.log_level, &config.logging);

    match cli.command {
        Commands::PoolStress(args) => commands::pool::execute_pool_stress(&args, &config),
        Commands::BufferStress(args) => commands::buffer::execute_buffer_stress(&args, &config),
        Commands::Config => commands::config::execute_config(&config),
    }
}
