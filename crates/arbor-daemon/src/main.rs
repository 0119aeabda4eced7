//! Arbor Daemon - Main entry point
//!
//! Builds a device tree from configuration, mounts it on an in-process
//! broker and runs the driver loop.

mod config;
mod runner;
mod state;

use anyhow::Result;
use arbor_transport::MemoryBroker;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::runner::InitialWrite;

#[derive(Parser, Debug)]
#[command(name = "arbor")]
#[command(about = "Hierarchical device tree mounted on a publish/subscribe namespace")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "arbor.toml")]
    config: PathBuf,

    /// Override the driver (root node) name
    #[arg(short, long)]
    name: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Publish topic=value on the wire after startup (repeatable)
    #[arg(long = "set", value_name = "TOPIC=VALUE")]
    set: Vec<String>,

    /// Stop after this many seconds instead of waiting for Ctrl-C
    #[arg(long)]
    run_for_secs: Option<u64>,

    /// Print a sample configuration and exit
    #[arg(long)]
    print_default_config: bool,

    /// Write a sample configuration to the --config path and exit
    #[arg(long)]
    init: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_default_config {
        print!("{}", config::default_config_toml()?);
        return Ok(());
    }

    if args.init {
        if args.config.exists() {
            anyhow::bail!("{} already exists", args.config.display());
        }
        config::save_default_config(&args.config)?;
        println!("Wrote {}", args.config.display());
        return Ok(());
    }

    // Initialize logging
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Arbor v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config = config::load_config(&args.config)?;

    // Override driver name if specified
    if let Some(name) = args.name {
        config.driver.name = name;
    }

    info!(
        driver = %config.driver.name,
        prefix = %config.driver.prefix,
        devices = config.devices.len(),
        "Configuration loaded"
    );

    let initial = args
        .set
        .iter()
        .map(|raw| InitialWrite::parse(raw))
        .collect::<Result<Vec<_>>>()?;

    let state = state::DaemonState::build(&config)?;
    let broker = MemoryBroker::new();
    let run_for = args.run_for_secs.map(Duration::from_secs);

    runner::run(state, &config, broker.clone(), initial, run_for).await?;

    if run_for.is_some() {
        runner::print_retained(&broker);
    }

    Ok(())
}
