//! ---
//! berth_section: "05-external-interfaces"
//! berth_subsection: "binary"
//! berth_type: "source"
//! berth_scope: "code"
//! berth_description: "Operator CLI reconciling containers and networks."
//! berth_version: "v0.0.0-prealpha"
//! berth_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use berth_common::{init_tracing, AppConfig};
use berth_core::{new_registry, ReconcileMetrics, SharedRegistry};
use berth_runtime::{EngineClient, SharedRuntime};
use clap::{Parser, Subcommand};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use tokio::runtime::Runtime;
use tracing::debug;

mod container;
mod network;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Reconcile declared containers and networks against a Docker engine",
    long_about = None
)]
struct Cli {
    /// Configuration file; `BERTH_CONFIG` takes precedence when set.
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Print reconcile metrics in Prometheus text format to stderr on exit.
    #[arg(long, global = true)]
    metrics: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(subcommand, about = "Container lifecycle")]
    Container(container::ContainerCommand),
    #[command(subcommand, about = "Network lifecycle")]
    Network(network::NetworkCommand),
}

/// Everything a subcommand needs to talk to the engine.
pub struct Session {
    pub config: AppConfig,
    pub runtime: SharedRuntime,
    pub metrics: ReconcileMetrics,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;
    init_tracing("berthctl", &config.logging)?;

    let engine = EngineClient::new(
        &config.runtime.docker_host,
        &config.runtime.api_version,
        config.runtime.request_timeout,
    )
    .with_context(|| format!("cannot use docker host {}", config.runtime.docker_host))?;
    debug!(base_url = %engine.base_url(), "engine client ready");

    let registry = new_registry();
    let session = Session {
        metrics: ReconcileMetrics::new(registry.clone())?,
        runtime: Arc::new(engine),
        config,
    };

    let runtime = Runtime::new()?;
    let outcome = runtime.block_on(async {
        match cli.command {
            Commands::Container(cmd) => container::run(&session, cmd).await,
            Commands::Network(cmd) => network::run(&session, cmd).await,
        }
    });

    if cli.metrics {
        dump_metrics(&registry)?;
    }
    outcome
}

fn load_config(explicit: Option<&PathBuf>) -> Result<AppConfig> {
    let mut candidates = Vec::new();
    if let Some(path) = explicit {
        anyhow::ensure!(path.exists(), "config file {} does not exist", path.display());
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("berth.toml"));
    candidates.push(PathBuf::from("configs/berth.toml"));
    AppConfig::load(&candidates)
}

/// Print a command result as pretty JSON on stdout.
pub fn emit<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn dump_metrics(registry: &SharedRegistry) -> Result<()> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
    eprint!("{}", String::from_utf8(buffer)?);
    Ok(())
}
