use anyhow::{Context, Result};
use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use placer::config::PlacerConfig;
use placer::kubeconfig::{ClusterConnection, Kubeconfig};
use placer::kernel::reactor::PlacementReactor;
use placer::services::kube::KubeClient;
use placer::services::memory::{RecordingProvisioner, StaticDirectory};
use placer::services::{Directory, Provisioner};
use placer::sim::ArenaSim;

#[derive(Debug, Parser)]
#[command(name = "placer", about = "Places a workload on a random cluster node for every resolved entity")]
struct Args {
    /// Cluster credentials (default: $HOME/.kube/config)
    #[arg(long)]
    kubeconfig: Option<PathBuf>,

    /// Kubeconfig context to use instead of its current-context
    #[arg(long)]
    context: Option<String>,

    /// Tuning overrides (default: $HOME/.kube/placer.json, if present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Use an in-process cluster with three nodes instead of the real API
    #[arg(long)]
    dry_run: bool,

    /// Seed for the arena simulation and target selection
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Stop after this many frames
    #[arg(long)]
    ticks: Option<u64>,

    /// Per-frame chance that an active entity is hit
    #[arg(long, default_value_t = 0.02)]
    hit_rate: f64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => PlacerConfig::load(path),
        None => PlacerConfig::load_or_default(&PlacerConfig::default_path()),
    }
    .context("loading placer config")?;
    tracing::info!(config = ?config, "placer starting");

    let directory: Arc<dyn Directory>;
    let provisioner: Arc<dyn Provisioner>;
    if args.dry_run {
        directory = Arc::new(StaticDirectory::new(["node-a", "node-b", "node-c"]));
        provisioner = Arc::new(RecordingProvisioner::succeeding());
    } else {
        let path = args.kubeconfig.clone().unwrap_or_else(Kubeconfig::default_path);
        let cluster = ClusterConnection::from_kubeconfig(&path, args.context.as_deref())
            .with_context(|| format!("loading kubeconfig {}", path.display()))?;
        tracing::info!(cluster = ?cluster, "cluster connection resolved");
        let client = Arc::new(KubeClient::new(&cluster, config.workload.clone(), config.request_timeout())?);
        directory = client.clone();
        provisioner = client;
    }

    let mut reactor = PlacementReactor::new(directory, provisioner, config.reactor_config())
        .with_rng(StdRng::seed_from_u64(args.seed));

    match reactor.prime().await {
        Ok(count) => tracing::info!(targets = count, "initial inventory loaded"),
        Err(kind) => tracing::warn!(error = %kind, "starting without inventory"),
    }

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let mut sim = ArenaSim::new(args.seed, args.hit_rate);
    reactor.run(&mut sim, cancel, args.ticks).await?;

    let stats = reactor.log.stats();
    tracing::info!(
        score = stats.successes,
        no_targets = stats.no_targets,
        provision_failures = stats.provision_failures,
        refresh_failures = stats.refresh_failures,
        discarded = stats.discarded,
        active_entities = reactor.arena.active_count(),
        arena_capacity = reactor.arena.capacity(),
        "session summary"
    );
    Ok(())
}
