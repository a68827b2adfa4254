mod checks;
mod config;
mod pool;
mod probe;
mod scheduler;
mod seed;
mod store;
#[cfg(test)]
mod testutil;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info};

use crate::config::Config;
use crate::scheduler::Scheduler;
use crate::store::CheckStore;
use crate::store::http::HttpCheckStore;
use crate::store::libsql::LibsqlStore;

#[derive(Parser)]
#[command(version, about = "Region-scoped uptime check agent")]
struct Cli {
    /// Path to the config file (defaults to $XDG_CONFIG_HOME/vigil/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Region to probe for, overriding env and config
    #[arg(long, global = true)]
    region: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the check agent (default)
    Run,
    /// Load check definitions from a CSV file into the local database
    SeedChecks {
        /// CSV file: id,url,interval_seconds,http_timeout_seconds,regions
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logger::init();

    let cli = Cli::parse();
    let config = Config::from_config(cli.config.as_deref()).context("loading configuration")?;
    info!("{config}");

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run_agent(config, cli.region).await,
        Command::SeedChecks { file } => seed::seed_checks(&config.store.path, &file).await,
    }
}

async fn run_agent(config: Config, region_flag: Option<String>) -> anyhow::Result<()> {
    let region = config.resolve_region(region_flag)?;
    let store = build_store(&config).await?;

    store.connect().await.context("connecting to check store")?;
    info!(region, backend = config.store.backend, "connected to check store");

    let mut scheduler = Scheduler::new(region, config.scheduler.clone(), Arc::clone(&store));
    scheduler.start().await;

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
    } else {
        info!("shutdown signal received");
    }

    scheduler.stop().await;
    store.disconnect().await;
    Ok(())
}

async fn build_store(config: &Config) -> anyhow::Result<Arc<dyn CheckStore>> {
    match config.store.backend.as_str() {
        "libsql" => {
            let store = LibsqlStore::open(&config.store.path).await?;
            Ok(Arc::new(store))
        }
        "http" => {
            let store = HttpCheckStore::new(&config.store.endpoint)?;
            Ok(Arc::new(store))
        }
        other => anyhow::bail!("unknown store backend {other:?}, expected \"libsql\" or \"http\""),
    }
}
