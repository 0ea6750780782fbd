//! Change notifications and coordination primitives for keel controllers.
//!
//! The API server publishes a [`Notification`] for every client-driven
//! create/update/delete. Controllers consume them through durable pull
//! subscriptions on a [`NotificationBus`] and serialize work on a single object
//! through a TTL-bound [`LockStore`].
//!
//! - **Envelope**: [`Notification`], [`Operation`]
//! - **Routing**: [`NotificationSubject`], [`subject_for_reconciler`]
//! - **Bus**: [`NotificationBus`], [`PullSubscription`], [`InMemoryBus`]
//! - **Locks**: [`LockStore`], [`InMemoryLockStore`]
//! - **NATS JetStream** (feature `nats`): [`nats::NatsBus`], [`nats::NatsLockStore`]
//!
//! # Example
//!
//! ```ignore
//! use keel_events::{InMemoryBus, Notification, NotificationBus, Operation, WORKLOAD_DEFINITION_SUBJECT};
//!
//! let bus = InMemoryBus::new();
//! let mut sub = bus
//!     .subscribe("WorkloadDefinitionReconciler", &WORKLOAD_DEFINITION_SUBJECT.filter())
//!     .await?;
//!
//! let notif = Notification::new(Operation::Created, serde_json::json!({"ID": 1}));
//! bus.publish(&WORKLOAD_DEFINITION_SUBJECT.created(), notif.to_bytes()?).await?;
//!
//! let message = sub.fetch(std::time::Duration::from_secs(1)).await?;
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod bus;
pub mod error;
#[cfg(feature = "nats")]
pub mod nats;
pub mod store;
pub mod types;

pub use bus::{subject_matches, BusMessage, InMemoryBus, NotificationBus, PullSubscription};
pub use error::{Error, Result};
pub use store::{InMemoryLockStore, LockStore};
pub use types::{
    stream_for_subject, subject_for_reconciler, Notification, NotificationSubject, Operation,
    ETHEREUM_NODE_DEFINITION_SUBJECT, ETHEREUM_NODE_INSTANCE_SUBJECT, ETHEREUM_STREAM_NAME,
    WORKLOAD_DEFINITION_SUBJECT, WORKLOAD_INSTANCE_SUBJECT, WORKLOAD_STREAM_NAME,
};
