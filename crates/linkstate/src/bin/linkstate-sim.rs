//! Link-state emulator binary.
//!
//! Drives a [`LinkStateService`] against an emulated mesh and prints every
//! topology diff the local node observes as one JSON line on stdout. Logs go
//! to stderr.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use mesh_linkstate::{
    LinkStateConfig, LinkStateService, NodeId, Notification, SimEvent, SimulatedNetwork,
    StateUpdate,
};
use serde_json::json;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "linkstate-sim")]
#[command(about = "Emulate a mesh and watch the local link-state view converge")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, default_value = "info")]
    log_level: String,

    /// Engine configuration (YAML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// How diffs are printed
    #[arg(long, default_value = "json")]
    format: OutputFormat,

    /// Simulated neighbor-list RPC latency in milliseconds
    #[arg(long, default_value = "0")]
    rpc_latency_ms: u64,

    /// Time to let backfill settle after each step, in milliseconds
    #[arg(long, default_value = "200")]
    settle_ms: u64,
}

#[derive(Subcommand)]
enum Commands {
    /// Play a scenario file
    Run {
        #[arg(long)]
        scenario: PathBuf,
    },

    /// Generate a random connected mesh and let the view converge
    Random {
        #[arg(long, default_value = "16")]
        nodes: usize,

        #[arg(long, default_value = "8")]
        extra_links: usize,

        #[arg(long, default_value = "1")]
        seed: u64,
    },
}

/// Output format for diffs
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// Readable JSON with hex node ids
    Json,
    /// The byte-level wire frame as JSON
    Wire,
    /// Print nothing per diff, only the final summary
    Quiet,
}

fn update_to_json(update: &StateUpdate) -> serde_json::Value {
    json!({
        "nodeAdded": update.node_added.iter().map(|entry| json!({
            "id": entry.id.to_string(),
            "cost": entry.cost.map(|cost| cost.value()),
        })).collect::<Vec<_>>(),
        "nodeRemoved": update.node_removed.iter().map(NodeId::to_string).collect::<Vec<_>>(),
        "nodeCostChanged": update.node_cost_changed.iter().map(|entry| json!({
            "id": entry.id.to_string(),
            "cost": entry.cost.value(),
        })).collect::<Vec<_>>(),
        "linkAdded": update.link_added.iter().map(link_json).collect::<Vec<_>>(),
        "linkRemoved": update.link_removed.iter().map(link_json).collect::<Vec<_>>(),
        "linkCostChanged": update.link_cost_changed.iter().map(link_json).collect::<Vec<_>>(),
    })
}

fn link_json(entry: &mesh_linkstate::LinkEntry) -> serde_json::Value {
    json!({
        "id1": entry.id1.to_string(),
        "id2": entry.id2.to_string(),
        "cost": entry.cost.map(|cost| cost.value()),
    })
}

fn print_update(format: OutputFormat, update: &StateUpdate) {
    let line = match format {
        OutputFormat::Json => update_to_json(update),
        OutputFormat::Wire => match serde_json::to_value(update.to_frame()) {
            Ok(value) => value,
            Err(e) => {
                warn!("Failed to encode wire frame: {}", e);
                return;
            }
        },
        OutputFormat::Quiet => return,
    };
    println!("{}", line);
}

async fn emit_all(network: &SimulatedNetwork, notifications: Vec<Notification>) {
    for notification in notifications {
        network.emit(notification).await;
    }
}

async fn run(
    cli: &Cli,
    network: Arc<SimulatedNetwork>,
    local: NodeId,
    events: Vec<SimEvent>,
) -> Result<()> {
    let config = match &cli.config {
        Some(path) => LinkStateConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => LinkStateConfig::default(),
    };
    let settle = Duration::from_millis(cli.settle_ms);
    let format = cli.format;

    let service = LinkStateService::start(local, network.as_ref(), network.clone(), config);
    let _subscription = service.on_state_update(move |update| print_update(format, update));

    info!(local = %local, "Announcing local links");
    emit_all(&network, network.local_view(local)).await;
    tokio::time::sleep(settle).await;

    for event in &events {
        if let SimEvent::Wait { duration } = event {
            tokio::time::sleep(*duration).await;
            continue;
        }
        if let Some(notification) = network.apply_event(event) {
            info!(kind = notification.kind(), "Playing event");
            network.emit(notification).await;
            tokio::time::sleep(settle).await;
        }
    }

    let known: BTreeSet<NodeId> =
        service.inspect(|state| state.nodes().map(|node| node.id()).collect());
    let summary = network.convergence(local, &known);
    let stats = service.fetcher_stats();
    eprintln!("{}", summary);
    eprintln!(
        "Fetches: {} issued, {} failed, {} dropped",
        stats.requests_issued, stats.requests_failed, stats.requests_dropped
    );

    if !summary.converged {
        anyhow::bail!("local view did not converge to the reachable ground truth");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let latency = Duration::from_millis(cli.rpc_latency_ms);
    match &cli.command {
        Commands::Run { scenario } => {
            let scenario = mesh_linkstate::Scenario::load(scenario)
                .with_context(|| format!("loading scenario {}", scenario.display()))?;
            let (network, local, events) = scenario.build()?;
            let network = Arc::new(network.with_rpc_latency(latency));
            run(&cli, network, local, events).await
        }
        Commands::Random {
            nodes,
            extra_links,
            seed,
        } => {
            if *nodes == 0 {
                anyhow::bail!("--nodes must be at least 1");
            }
            let network = SimulatedNetwork::random(*nodes, *extra_links, *seed);
            let local = network.node_ids()[0];
            let network = Arc::new(network.with_rpc_latency(latency));
            run(&cli, network, local, Vec::new()).await
        }
    }
}
