//! # keel-controller
//!
//! Runs the workload and ethereum node reconcilers against a NATS JetStream
//! bus and the keel API server.
//!
//! ## Startup
//!
//! 1. **Configuration** - TOML file (optional) plus `KEEL_*` environment overrides
//! 2. **NATS** - connect, verify the notification streams, open the lock bucket
//! 3. **API client** - HTTP client for the API server
//! 4. **Reconcilers** - spawn the configured number of workers per reconciler
//!
//! Any startup failure is fatal. Once running, failures are handled by requeueing.
//!
//! ## Shutdown
//!
//! Ctrl+C signals every worker to stop after its current cycle and waits for
//! them to drain.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use keel_api::HttpApiClient;
use keel_core::ControllerConfig;
use keel_events::nats::{self, NatsBus, NatsLockStore};
use keel_events::{ETHEREUM_STREAM_NAME, WORKLOAD_STREAM_NAME};
use keel_reconciler::{
    InMemoryRuntime, KubeConnector, ReconcilerContext, ReconcilerSupervisor, RuntimeConnector,
};

/// keel reconciliation controller
#[derive(Parser, Debug)]
#[command(name = "keel-controller")]
#[command(version)]
#[command(about = "Reconciles keel workloads and ethereum nodes onto Kubernetes clusters")]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long, env = "KEEL_CONFIG")]
    config: Option<PathBuf>,

    /// Kubeconfig file holding the cluster contexts (defaults to the usual lookup)
    #[arg(long, conflicts_with = "dry_run")]
    kubeconfig: Option<PathBuf>,

    /// Record resources in memory instead of applying them to clusters
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = ControllerConfig::load(args.config.as_deref())
        .context("Failed to load controller configuration")?;

    init_tracing(&config.log_level);

    info!(
        controller_id = %config.controller_id,
        nats_url = %config.nats_url,
        api_url = %config.api_url,
        dry_run = args.dry_run,
        "keel controller starting"
    );

    let context = init_context(&config).await?;

    let api = HttpApiClient::with_url(&config.api_url)
        .with_context(|| format!("Invalid API server URL {}", config.api_url))?;

    let runtime: Arc<dyn RuntimeConnector> = match (args.dry_run, args.kubeconfig.as_deref()) {
        (true, _) => InMemoryRuntime::new_arc(),
        (false, Some(path)) => Arc::new(
            KubeConnector::from_file(path).context("Failed to load kubeconfig")?,
        ),
        (false, None) => Arc::new(KubeConnector::new()),
    };

    let supervisor = ReconcilerSupervisor::start(context, Arc::new(api), runtime, &config)
        .await
        .context("Failed to start reconcilers")?;

    signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    let stats = supervisor.shutdown().await;
    if stats.timed_out || stats.failed > 0 {
        warn!(?stats, "Reconcilers did not stop cleanly");
    }

    info!("keel controller stopped");
    Ok(())
}

/// Install the fmt subscriber. `RUST_LOG` wins over the configured level.
fn init_tracing(log_level: &str) {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Connect to NATS and build the shared bus and lock store handles.
async fn init_context(config: &ControllerConfig) -> Result<ReconcilerContext> {
    let jetstream = nats::connect(&config.nats_url)
        .await
        .with_context(|| format!("Failed to connect to NATS at {}", config.nats_url))?;

    let bus = NatsBus::new(jetstream.clone());
    bus.ensure_streams(&[WORKLOAD_STREAM_NAME, ETHEREUM_STREAM_NAME])
        .await
        .context("Notification streams are not available")?;

    let locks = NatsLockStore::open(
        &jetstream,
        &config.lock_bucket,
        Duration::from_secs(config.lock_ttl_secs),
    )
    .await
    .with_context(|| format!("Failed to open lock bucket {}", config.lock_bucket))?;

    Ok(ReconcilerContext::new(
        Arc::new(bus),
        Arc::new(locks),
        config.controller_id.clone(),
    ))
}
