//! Per-object-type reconciliation loop.
//!
//! One cycle takes a single message through
//! decode → lock check → lock → refetch (requeues only) → dependency gate →
//! dispatch → mark reconciled → unlock. Any failure releases what was taken and
//! republishes the notification with a grown delay. Handlers never touch locks
//! or requeues themselves.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use keel_api::ApiObject;
use keel_core::ReconcilerSettings;
use keel_events::{BusMessage, Notification, Operation, PullSubscription};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::backoff::set_requeue_delay;
use crate::error::{Error, Result};
use crate::reconciler::Reconciler;

/// Object-type specific half of a reconciler.
#[async_trait]
pub trait ObjectReconciler: Send + Sync + 'static {
    /// Object carried in this reconciler's notifications.
    type Object: ApiObject;

    /// Reconciler name: durable consumer name and lock key prefix.
    const NAME: &'static str;

    /// Load the current state of the object.
    async fn refetch(&self, id: u64) -> Result<Self::Object>;

    /// Fail with [`Error::DependencyNotReady`] while a parent object is unsettled.
    async fn check_dependencies(&self, _object: &Self::Object) -> Result<()> {
        Ok(())
    }

    async fn on_created(&self, object: &Self::Object) -> Result<()>;

    async fn on_deleted(&self, object: &Self::Object) -> Result<()>;

    /// Record `Reconciled = true` after a successful create.
    ///
    /// Instance reconcilers keep the default no-op.
    async fn mark_reconciled(&self, _object: &Self::Object) -> Result<()> {
        Ok(())
    }
}

/// Fail while `parent` is explicitly marked unreconciled.
///
/// A parent that was never marked either way does not block.
///
/// # Errors
///
/// Returns [`Error::DependencyNotReady`] for `Reconciled = false`.
pub fn require_reconciled<T: ApiObject>(parent: &T, id: u64) -> Result<()> {
    if parent.reconciled() == Some(false) {
        return Err(Error::DependencyNotReady { kind: T::KIND, id });
    }
    Ok(())
}

/// Why a cycle republished its notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequeueReason {
    LockHeld,
    LockNotAcquired,
    RefetchFailed,
    DependencyNotReady,
    UnrecognizedOperation,
    HandlerFailed,
    MarkReconciledFailed,
}

impl fmt::Display for RequeueReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::LockHeld => "lock held",
            Self::LockNotAcquired => "lock not acquired",
            Self::RefetchFailed => "refetch failed",
            Self::DependencyNotReady => "dependency not ready",
            Self::UnrecognizedOperation => "unrecognized operation",
            Self::HandlerFailed => "handler failed",
            Self::MarkReconciledFailed => "mark reconciled failed",
        };
        f.write_str(text)
    }
}

/// What one message-processing cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// No message arrived within the pull window.
    Idle,
    /// The object was reconciled and its lock released.
    Reconciled { object_id: u64, operation: Operation },
    /// The notification was republished with backoff.
    Requeued {
        object_id: u64,
        reason: RequeueReason,
        delay_secs: i64,
    },
    /// The payload could not be decoded and was republished unchanged.
    RequeuedRaw { reason: String },
}

/// Drives one worker of an [`ObjectReconciler`].
pub struct ReconcileLoop<R: ObjectReconciler> {
    core: Reconciler,
    handler: Arc<R>,
    settings: ReconcilerSettings,
}

/// Notification after decoding, with the payload to republish on failure.
struct Decoded<T> {
    notification: Notification<Value>,
    object: T,
    object_id: u64,
    delay_secs: i64,
    requeue_payload: Vec<u8>,
}

impl<R: ObjectReconciler> ReconcileLoop<R> {
    /// Create a loop around `handler`.
    #[must_use]
    pub const fn new(core: Reconciler, handler: Arc<R>, settings: ReconcilerSettings) -> Self {
        Self {
            core,
            handler,
            settings,
        }
    }

    /// Pull and process messages until `shutdown` turns true.
    ///
    /// The signal is checked between cycles; an in-flight cycle always finishes.
    pub async fn run(self, mut subscription: Box<dyn PullSubscription>, shutdown: watch::Receiver<bool>) {
        info!(reconciler = R::NAME, "Reconciler worker started");

        while !*shutdown.borrow() {
            let Some(message) = self.core.pull_message(subscription.as_mut()).await else {
                continue;
            };
            let outcome = self.process_message(&message).await;
            debug!(reconciler = R::NAME, ?outcome, "Cycle finished");
        }

        if let Err(e) = subscription.unsubscribe().await {
            warn!(reconciler = R::NAME, error = %e, "Failed to unsubscribe");
        }
        info!(reconciler = R::NAME, "Reconciler worker stopped");
    }

    /// Take one message through the reconciliation state machine.
    pub async fn process_message(&self, message: &BusMessage) -> CycleOutcome {
        let decoded = match self.decode(&message.payload) {
            Ok(decoded) => decoded,
            Err(reason) => {
                error!(
                    reconciler = R::NAME,
                    subject = %message.subject,
                    error = %reason,
                    "Failed to decode notification"
                );
                self.core
                    .requeue_raw(&message.subject, message.payload.clone());
                return CycleOutcome::RequeuedRaw { reason };
            }
        };

        let Decoded {
            notification,
            object,
            object_id,
            delay_secs,
            requeue_payload,
        } = decoded;
        let subject = message.subject.as_str();

        let lock_state = self.core.check_lock(object_id).await;
        if lock_state.blocks() {
            debug!(
                reconciler = R::NAME,
                object_id,
                lock_key = %self.core.lock_key(object_id),
                ?lock_state,
                "Object is locked"
            );
            self.core
                .requeue(object_id, subject, requeue_payload, delay_secs);
            return CycleOutcome::Requeued {
                object_id,
                reason: RequeueReason::LockHeld,
                delay_secs,
            };
        }

        if !self.core.lock(object_id).await {
            self.core
                .requeue(object_id, subject, requeue_payload, delay_secs);
            return CycleOutcome::Requeued {
                object_id,
                reason: RequeueReason::LockNotAcquired,
                delay_secs,
            };
        }

        let requeue = |reason: RequeueReason| {
            let payload = requeue_payload.clone();
            async move {
                self.core
                    .unlock_and_requeue(object_id, subject, payload, delay_secs)
                    .await;
                CycleOutcome::Requeued {
                    object_id,
                    reason,
                    delay_secs,
                }
            }
        };

        let object = if notification.requeue {
            match self.handler.refetch(object_id).await {
                Ok(latest) => latest,
                Err(e) if e.is_not_found() && notification.operation == Operation::Deleted => {
                    debug!(reconciler = R::NAME, object_id, "Deleted object already gone, using snapshot");
                    object
                }
                Err(e) => {
                    warn!(reconciler = R::NAME, object_id, error = %e, "Failed to refetch object");
                    return requeue(RequeueReason::RefetchFailed).await;
                }
            }
        } else {
            object
        };

        if let Err(e) = self.handler.check_dependencies(&object).await {
            if e.is_dependency_wait() {
                debug!(reconciler = R::NAME, object_id, reason = %e, "Waiting on dependency");
            } else {
                warn!(reconciler = R::NAME, object_id, error = %e, "Failed to check dependencies");
            }
            return requeue(RequeueReason::DependencyNotReady).await;
        }

        let handled = match &notification.operation {
            Operation::Created => self.handler.on_created(&object).await,
            Operation::Deleted => self.handler.on_deleted(&object).await,
            other => {
                error!(
                    reconciler = R::NAME,
                    object_id,
                    operation = %other,
                    "Unrecognized operation"
                );
                return requeue(RequeueReason::UnrecognizedOperation).await;
            }
        };
        if let Err(e) = handled {
            if e.is_dependency_wait() {
                debug!(reconciler = R::NAME, object_id, reason = %e, "Handler waiting on dependency");
            } else {
                error!(
                    reconciler = R::NAME,
                    object_id,
                    operation = %notification.operation,
                    error = %e,
                    "Reconciliation failed"
                );
            }
            return requeue(RequeueReason::HandlerFailed).await;
        }

        if notification.operation == Operation::Created {
            if let Err(e) = self.handler.mark_reconciled(&object).await {
                warn!(reconciler = R::NAME, object_id, error = %e, "Failed to mark object reconciled");
                return requeue(RequeueReason::MarkReconciledFailed).await;
            }
        }

        self.core.release_lock(object_id).await;
        info!(
            reconciler = R::NAME,
            object_id,
            operation = %notification.operation,
            "Reconciled object"
        );
        CycleOutcome::Reconciled {
            object_id,
            operation: notification.operation,
        }
    }

    fn decode(&self, payload: &[u8]) -> std::result::Result<Decoded<R::Object>, String> {
        let notification =
            Notification::<Value>::from_bytes(payload).map_err(|e| e.to_string())?;
        let object: R::Object = notification.decode_object().map_err(|e| e.to_string())?;
        let object_id = object
            .id()
            .ok_or_else(|| Error::missing_field(<R::Object as ApiObject>::KIND, "ID").to_string())?;

        let delay_secs = set_requeue_delay(
            notification.last_requeue_delay,
            self.settings.initial_delay_secs,
            self.settings.max_delay_secs,
        );
        let requeue_payload = notification
            .requeued(delay_secs, &object)
            .to_bytes()
            .map_err(|e| e.to_string())?;

        Ok(Decoded {
            notification,
            object,
            object_id,
            delay_secs,
            requeue_payload,
        })
    }
}
