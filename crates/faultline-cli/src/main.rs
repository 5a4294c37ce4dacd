//! Command-line entry point for fault-injection campaigns.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use faultline_core::config::{load_params_table, parse_overrides, NetworkConfig};
use faultline_engine::runner::{run, RunConfig};
use faultline_engine::strategy::{build_strategy, schema_for};

#[derive(Parser)]
#[command(name = "faultline")]
#[command(about = "Fault-injection harness for consensus networks", long_about = None)]
struct Cli {
    /// Strategy variant to run (passthrough, random_fuzzer, byte_mutator)
    strategy: String,

    /// Network configuration file (TOML)
    #[arg(short = 'c', long)]
    network_config: Option<PathBuf>,

    /// Strategy parameter file (TOML)
    #[arg(short = 's', long)]
    strategy_config: Option<PathBuf>,

    /// Number of consensus nodes (required without a config file)
    #[arg(short = 'n', long, required_unless_present = "network_config")]
    nodes: Option<u32>,

    /// Initial partition groups, e.g. [[0],[1,2]]
    #[arg(long)]
    partition: Option<String>,

    /// Trust lists per node, e.g. [[0,1,2],[0,1,2],[0,1,2]]
    #[arg(long)]
    unl: Option<String>,

    /// Strategy parameter override, repeatable
    #[arg(short = 'o', long = "override", value_name = "KEY=VALUE")]
    overrides: Vec<String>,

    /// Address the interception endpoint listens on
    #[arg(long, default_value = "127.0.0.1:50051")]
    listen: SocketAddr,

    /// Do not launch the node-network process; expect an external one
    #[arg(long)]
    no_spawn: bool,

    /// Root directory for action logs and run summaries
    #[arg(long, default_value = "faultline-logs")]
    log_dir: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(log_level).init();

    let mut network = match &cli.network_config {
        Some(path) => NetworkConfig::load(path)?,
        None => NetworkConfig::with_node_count(cli.nodes.unwrap_or(0)),
    };
    network.apply_overrides(cli.nodes, cli.partition.as_deref(), cli.unl.as_deref())?;

    let schema = schema_for(&cli.strategy)?;
    let table = match &cli.strategy_config {
        Some(path) => load_params_table(path)?,
        None => toml::value::Table::new(),
    };
    let overrides = parse_overrides(&cli.overrides)?;
    let params = schema.validate(&table, &overrides)?;
    let strategy = build_strategy(&cli.strategy, &params)?;

    let summary = run(
        RunConfig {
            listen: cli.listen,
            network,
            artifact_dir: cli.log_dir,
            spawn_process: !cli.no_spawn,
        },
        strategy,
    )
    .await?;

    let counts = summary
        .counts()
        .into_iter()
        .map(|(status, count)| format!("{status}={count}"))
        .collect::<Vec<_>>()
        .join(" ");
    tracing::info!(iterations = summary.iterations.len(), %counts, "campaign finished");

    if !summary.healthy() {
        anyhow::bail!("run surfaced consensus violations; inspect the artifact directory");
    }
    Ok(())
}
