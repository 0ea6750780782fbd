//! Notification-driven reconciliation for keel objects.
//!
//! Each object type has a reconciler that consumes the API server's change
//! notifications and drives the world toward the stored object:
//!
//! - **Core** ([`Reconciler`]): pulls messages, holds per-object locks in a TTL
//!   store and republishes failed notifications with exponential backoff
//! - **Loop** ([`ReconcileLoop`]): the per-message state machine, generic over
//!   an [`ObjectReconciler`]
//! - **Handlers**: [`workload`] definitions expand into resource definitions and
//!   instances are applied to clusters; [`ethereum`] nodes become workload
//!   instances
//! - **Supervision** ([`ReconcilerSupervisor`]): worker pools and shutdown
//!
//! # Concepts
//!
//! ## Locking
//!
//! A reconciler locks `<ReconcilerName>.<ObjectID>` before touching an object.
//! A contended or unreadable lock means "try again later", never "proceed".
//! Locks left behind by a crashed worker expire with the store's TTL.
//!
//! ## Requeue
//!
//! Failures republish the notification with `Requeue = true` and a delay of
//! `initial` on the first retry, doubling up to `max` after that. The republished
//! copy is refetched from the API before use, so retries act on current state.
//!
//! # Example
//!
//! ```ignore
//! use keel_reconciler::{ReconcilerContext, ReconcilerSupervisor, InMemoryRuntime};
//!
//! let context = ReconcilerContext::new(bus, locks, config.controller_id.clone());
//! let supervisor =
//!     ReconcilerSupervisor::start(context, api, InMemoryRuntime::new_arc(), &config).await?;
//!
//! tokio::signal::ctrl_c().await?;
//! supervisor.shutdown().await;
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod backoff;
pub mod error;
pub mod ethereum;
#[cfg(feature = "kube")]
pub mod kubernetes;
pub mod r#loop;
pub mod reconciler;
pub mod runtime;
pub mod supervisor;
pub mod workload;

pub use backoff::{set_requeue_delay, BACKOFF_FACTOR, PULL_WAIT, RAW_REQUEUE_DELAY};
pub use error::{Error, Result};
pub use ethereum::{EthereumNodeDefinitionReconciler, EthereumNodeInstanceReconciler};
#[cfg(feature = "kube")]
pub use kubernetes::KubeConnector;
pub use r#loop::{require_reconciled, CycleOutcome, ObjectReconciler, ReconcileLoop, RequeueReason};
pub use reconciler::{LockState, Reconciler, ReconcilerContext};
pub use runtime::{InMemoryRuntime, ResourceRef, RuntimeClient, RuntimeConnector};
pub use supervisor::{ReconcilerSupervisor, ShutdownStats};
pub use workload::{WorkloadDefinitionReconciler, WorkloadInstanceReconciler};
