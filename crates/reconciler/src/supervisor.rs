//! Worker supervision and graceful shutdown.
//!
//! Every reconciler runs `concurrent_reconciles` workers sharing one durable
//! consumer. Shutdown flips a watch channel and waits for each worker to finish
//! its current cycle.

use std::sync::Arc;
use std::time::Duration;

use keel_api::ControlPlaneApi;
use keel_core::{ControllerConfig, ReconcilerSettings};
use keel_events::subject_for_reconciler;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::ethereum::{EthereumNodeDefinitionReconciler, EthereumNodeInstanceReconciler};
use crate::r#loop::{ObjectReconciler, ReconcileLoop};
use crate::reconciler::{Reconciler, ReconcilerContext};
use crate::runtime::RuntimeConnector;
use crate::workload::{WorkloadDefinitionReconciler, WorkloadInstanceReconciler};

/// Upper bound on waiting for workers; one pull window plus a handler's worth.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome of [`ReconcilerSupervisor::shutdown`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownStats {
    /// Workers that exited cleanly.
    pub stopped: usize,
    /// Workers that panicked or were cancelled.
    pub failed: usize,
    /// Whether the timeout elapsed before every worker exited.
    pub timed_out: bool,
}

/// Owns the worker tasks of a controller process.
pub struct ReconcilerSupervisor {
    context: ReconcilerContext,
    shutdown_tx: watch::Sender<bool>,
    workers: Vec<(&'static str, JoinHandle<()>)>,
}

impl ReconcilerSupervisor {
    /// Create a supervisor with no workers.
    #[must_use]
    pub fn new(context: ReconcilerContext) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            context,
            shutdown_tx,
            workers: Vec::new(),
        }
    }

    /// Start the workload and ethereum node reconcilers with per-name settings from `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if any durable subscription cannot be created.
    pub async fn start(
        context: ReconcilerContext,
        api: Arc<dyn ControlPlaneApi>,
        runtime: Arc<dyn RuntimeConnector>,
        config: &ControllerConfig,
    ) -> Result<Self> {
        let mut supervisor = Self::new(context);

        supervisor
            .spawn(
                Arc::new(WorkloadDefinitionReconciler::new(Arc::clone(&api))),
                config.settings_for(WorkloadDefinitionReconciler::NAME),
            )
            .await?;
        supervisor
            .spawn(
                Arc::new(WorkloadInstanceReconciler::new(Arc::clone(&api), runtime)),
                config.settings_for(WorkloadInstanceReconciler::NAME),
            )
            .await?;
        supervisor
            .spawn(
                Arc::new(EthereumNodeDefinitionReconciler::new(Arc::clone(&api))),
                config.settings_for(EthereumNodeDefinitionReconciler::NAME),
            )
            .await?;
        supervisor
            .spawn(
                Arc::new(EthereumNodeInstanceReconciler::new(api)),
                config.settings_for(EthereumNodeInstanceReconciler::NAME),
            )
            .await?;

        info!(workers = supervisor.worker_count(), "Reconcilers started");
        Ok(supervisor)
    }

    /// Spawn `settings.concurrent_reconciles` workers for `handler`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownReconciler`] if no subject routes to `R::NAME`,
    /// or the bus error if subscribing fails.
    pub async fn spawn<R: ObjectReconciler>(
        &mut self,
        handler: Arc<R>,
        settings: ReconcilerSettings,
    ) -> Result<()> {
        let subject = subject_for_reconciler(R::NAME).ok_or_else(|| Error::UnknownReconciler {
            name: R::NAME.to_string(),
        })?;
        let filter = subject.filter();

        for worker in 0..settings.concurrent_reconciles {
            let subscription = self.context.bus.subscribe(R::NAME, &filter).await?;
            let reconcile_loop = ReconcileLoop::new(
                Reconciler::new(R::NAME, self.context.clone()),
                Arc::clone(&handler),
                settings,
            );
            let shutdown = self.shutdown_tx.subscribe();
            let handle = tokio::spawn(reconcile_loop.run(subscription, shutdown));
            self.workers.push((R::NAME, handle));
            info!(reconciler = R::NAME, worker, subject = %filter, "Spawned worker");
        }
        Ok(())
    }

    /// Number of spawned workers.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Signal every worker to stop and wait for them to drain.
    pub async fn shutdown(self) -> ShutdownStats {
        self.shutdown_with_timeout(SHUTDOWN_TIMEOUT).await
    }

    /// [`shutdown`](Self::shutdown) with an explicit wait bound.
    pub async fn shutdown_with_timeout(self, wait: Duration) -> ShutdownStats {
        info!(workers = self.workers.len(), "Stopping reconcilers");
        self.shutdown_tx.send_replace(true);

        let workers = self.workers;
        let joined = timeout(wait, async move {
            let mut stats = ShutdownStats::default();
            for (name, handle) in workers {
                match handle.await {
                    Ok(()) => stats.stopped = stats.stopped.saturating_add(1),
                    Err(e) => {
                        warn!(reconciler = name, error = %e, "Worker did not stop cleanly");
                        stats.failed = stats.failed.saturating_add(1);
                    }
                }
            }
            stats
        })
        .await;

        match joined {
            Ok(stats) => {
                info!(stopped = stats.stopped, failed = stats.failed, "Reconcilers stopped");
                stats
            }
            Err(_) => {
                warn!(timeout_secs = wait.as_secs(), "Timed out waiting for reconcilers");
                ShutdownStats {
                    timed_out: true,
                    ..ShutdownStats::default()
                }
            }
        }
    }
}
