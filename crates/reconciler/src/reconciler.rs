//! Reconciler core: message pulls, per-object locks and requeues.
//!
//! Shared by every object-type reconciler. Nothing here is fatal to a worker:
//! failed calls are logged and reported as "could not proceed this cycle".

use std::sync::Arc;
use std::time::Duration;

use keel_events::{BusMessage, LockStore, NotificationBus, PullSubscription};
use tracing::{debug, warn};

use crate::backoff::{delay_duration, PULL_WAIT, RAW_REQUEUE_DELAY};

/// Pause after a failed pull so an unreachable bus does not spin the worker.
const PULL_ERROR_PAUSE: Duration = Duration::from_secs(1);

/// Handles shared by all workers of a controller process.
#[derive(Clone)]
pub struct ReconcilerContext {
    /// Notification transport.
    pub bus: Arc<dyn NotificationBus>,
    /// Store holding per-object locks.
    pub locks: Arc<dyn LockStore>,
    /// Value written into lock records, identifying this process.
    pub controller_id: String,
}

impl ReconcilerContext {
    /// Bundle the shared handles.
    pub fn new(
        bus: Arc<dyn NotificationBus>,
        locks: Arc<dyn LockStore>,
        controller_id: impl Into<String>,
    ) -> Self {
        Self {
            bus,
            locks,
            controller_id: controller_id.into(),
        }
    }
}

/// Result of looking up an object's lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    /// No live lock record.
    Free,
    /// A live lock record exists.
    Held,
    /// The store could not be asked; treat as held and try later.
    Unknown,
}

impl LockState {
    /// Whether this state forbids starting a reconciliation.
    #[must_use]
    pub const fn blocks(self) -> bool {
        !matches!(self, Self::Free)
    }
}

/// Per-reconciler lock and requeue operations.
#[derive(Clone)]
pub struct Reconciler {
    name: &'static str,
    context: ReconcilerContext,
}

impl Reconciler {
    /// Create the core for the reconciler called `name`.
    #[must_use]
    pub const fn new(name: &'static str, context: ReconcilerContext) -> Self {
        Self { name, context }
    }

    /// Reconciler name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Lock key for an object: `<ReconcilerName>.<ObjectID>`.
    #[must_use]
    pub fn lock_key(&self, object_id: u64) -> String {
        format!("{}.{object_id}", self.name)
    }

    /// Wait up to the pull window for the next message.
    ///
    /// Transport errors are logged and reported as no message.
    pub async fn pull_message(
        &self,
        subscription: &mut dyn PullSubscription,
    ) -> Option<BusMessage> {
        match subscription.fetch(PULL_WAIT).await {
            Ok(message) => message,
            Err(e) => {
                warn!(reconciler = self.name, error = %e, "Failed to pull message");
                tokio::time::sleep(PULL_ERROR_PAUSE).await;
                None
            }
        }
    }

    /// Look up the lock for `object_id`.
    pub async fn check_lock(&self, object_id: u64) -> LockState {
        let lock_key = self.lock_key(object_id);
        match self.context.locks.get(&lock_key).await {
            Ok(Some(_)) => LockState::Held,
            Ok(None) => LockState::Free,
            Err(e) => {
                warn!(
                    reconciler = self.name,
                    object_id,
                    lock_key = %lock_key,
                    error = %e,
                    "Failed to check lock"
                );
                LockState::Unknown
            }
        }
    }

    /// Create the lock for `object_id`. Returns false if it was taken or the store failed.
    pub async fn lock(&self, object_id: u64) -> bool {
        let lock_key = self.lock_key(object_id);
        match self
            .context
            .locks
            .create(&lock_key, &self.context.controller_id)
            .await
        {
            Ok(()) => {
                debug!(reconciler = self.name, object_id, lock_key = %lock_key, "Lock acquired");
                true
            }
            Err(e) if e.is_key_exists() => {
                debug!(reconciler = self.name, object_id, lock_key = %lock_key, "Lost lock race");
                false
            }
            Err(e) => {
                warn!(
                    reconciler = self.name,
                    object_id,
                    lock_key = %lock_key,
                    error = %e,
                    "Failed to acquire lock"
                );
                false
            }
        }
    }

    /// Delete the lock for `object_id`.
    ///
    /// A false return leaves the record to expire with its TTL.
    pub async fn release_lock(&self, object_id: u64) -> bool {
        let lock_key = self.lock_key(object_id);
        match self.context.locks.delete(&lock_key).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    reconciler = self.name,
                    object_id,
                    lock_key = %lock_key,
                    error = %e,
                    "Failed to release lock"
                );
                false
            }
        }
    }

    /// Republish `payload` on `subject` after `delay_secs`.
    ///
    /// Runs on a detached task; the caller continues immediately.
    pub fn requeue(&self, object_id: u64, subject: &str, payload: Vec<u8>, delay_secs: i64) {
        debug!(
            reconciler = self.name,
            object_id,
            subject,
            delay_secs,
            "Requeueing notification"
        );
        self.republish_after(subject, payload, delay_duration(delay_secs));
    }

    /// Release the lock (best effort) and requeue.
    pub async fn unlock_and_requeue(
        &self,
        object_id: u64,
        subject: &str,
        payload: Vec<u8>,
        delay_secs: i64,
    ) {
        self.release_lock(object_id).await;
        self.requeue(object_id, subject, payload, delay_secs);
    }

    /// Republish an undecodable payload unchanged after the fixed raw delay.
    pub fn requeue_raw(&self, subject: &str, payload: Vec<u8>) {
        debug!(
            reconciler = self.name,
            subject,
            delay_secs = RAW_REQUEUE_DELAY.as_secs(),
            "Requeueing raw message"
        );
        self.republish_after(subject, payload, RAW_REQUEUE_DELAY);
    }

    fn republish_after(&self, subject: &str, payload: Vec<u8>, delay: Duration) {
        let bus = Arc::clone(&self.context.bus);
        let subject = subject.to_string();
        let name = self.name;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = bus.publish(&subject, payload).await {
                warn!(reconciler = name, subject = %subject, error = %e, "Failed to requeue");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use keel_events::{InMemoryBus, InMemoryLockStore, LockStore, NotificationBus};

    use super::*;

    const TTL: Duration = Duration::from_secs(300);

    fn setup() -> (Reconciler, Arc<InMemoryBus>, Arc<InMemoryLockStore>) {
        let bus = InMemoryBus::new_arc();
        let locks = InMemoryLockStore::new_arc(TTL);
        let context = ReconcilerContext::new(bus.clone(), locks.clone(), "controller-1");
        (
            Reconciler::new("WorkloadInstanceReconciler", context),
            bus,
            locks,
        )
    }

    #[test]
    fn lock_key_joins_name_and_id() {
        let (reconciler, _, _) = setup();
        assert_eq!(reconciler.lock_key(42), "WorkloadInstanceReconciler.42");
    }

    #[tokio::test]
    async fn lock_is_exclusive_until_released() {
        let (reconciler, _, locks) = setup();

        assert_eq!(reconciler.check_lock(1).await, LockState::Free);
        assert!(reconciler.lock(1).await);
        assert_eq!(reconciler.check_lock(1).await, LockState::Held);
        assert!(!reconciler.lock(1).await);
        assert_eq!(
            locks
                .get("WorkloadInstanceReconciler.1")
                .await
                .unwrap()
                .as_deref(),
            Some("controller-1")
        );

        assert!(reconciler.release_lock(1).await);
        assert_eq!(reconciler.check_lock(1).await, LockState::Free);
    }

    #[tokio::test]
    async fn store_outage_is_treated_as_locked() {
        let (reconciler, _, locks) = setup();
        locks.set_unavailable(true);

        let state = reconciler.check_lock(1).await;
        assert_eq!(state, LockState::Unknown);
        assert!(state.blocks());
        assert!(!reconciler.lock(1).await);
        assert!(!reconciler.release_lock(1).await);
    }

    #[tokio::test(start_paused = true)]
    async fn requeue_publishes_after_delay() {
        let (reconciler, bus, _) = setup();

        reconciler.requeue(1, "workload.workload-instance.created", b"again".to_vec(), 8);

        tokio::time::sleep(Duration::from_secs(7)).await;
        assert!(bus.published().await.is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        let published = bus.published().await;
        assert_eq!(published.len(), 1);
        assert_eq!(
            published.first().map(|m| m.payload.clone()),
            Some(b"again".to_vec())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unlock_and_requeue_releases_even_when_publish_fails_later() {
        let (reconciler, bus, _) = setup();
        assert!(reconciler.lock(5).await);
        bus.set_unavailable(true);

        reconciler
            .unlock_and_requeue(5, "workload.workload-instance.created", vec![], 1)
            .await;

        assert_eq!(reconciler.check_lock(5).await, LockState::Free);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(bus.published().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn raw_requeue_waits_fixed_delay() {
        let (reconciler, bus, _) = setup();
        reconciler.requeue_raw("workload.workload-instance.created", b"garbage".to_vec());

        tokio::time::sleep(RAW_REQUEUE_DELAY.saturating_sub(Duration::from_secs(1))).await;
        assert!(bus.published().await.is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(bus.published().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn pull_returns_none_when_window_elapses() {
        let (reconciler, bus, _) = setup();
        let mut subscription = bus
            .subscribe("WorkloadInstanceReconciler", "workload.workload-instance.*")
            .await
            .unwrap();
        assert!(reconciler.pull_message(subscription.as_mut()).await.is_none());

        bus.publish("workload.workload-instance.created", b"m".to_vec())
            .await
            .unwrap();
        let message = reconciler.pull_message(subscription.as_mut()).await;
        assert_eq!(message.map(|m| m.payload), Some(b"m".to_vec()));
    }
}
