//! Notification bus with durable pull subscriptions.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify, RwLock};
use tracing::debug;

use crate::error::{Error, Result};

/// A message pulled from a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    /// Subject the message was published on.
    pub subject: String,
    /// Raw payload.
    pub payload: Vec<u8>,
}

/// Handle on a named, acknowledgement-tracked consumer.
#[async_trait]
pub trait PullSubscription: Send {
    /// Wait up to `wait` for the next message and acknowledge it on receipt.
    ///
    /// Returns `Ok(None)` when nothing arrived within the window.
    async fn fetch(&mut self, wait: Duration) -> Result<Option<BusMessage>>;

    /// Stop consuming. Durable consumer state is kept by the bus.
    async fn unsubscribe(self: Box<Self>) -> Result<()>;
}

/// Durable pub/sub transport for notifications.
#[async_trait]
pub trait NotificationBus: Send + Sync {
    /// Bind to the durable consumer `durable_name` filtered on `filter_subject`.
    ///
    /// Subscriptions that share a durable name compete for the same messages.
    async fn subscribe(
        &self,
        durable_name: &str,
        filter_subject: &str,
    ) -> Result<Box<dyn PullSubscription>>;

    /// Publish a payload on a subject.
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<()>;
}

/// NATS-style subject matching: `*` matches one token, `>` matches the rest.
#[must_use]
pub fn subject_matches(filter: &str, subject: &str) -> bool {
    let mut filter_tokens = filter.split('.');
    let mut subject_tokens = subject.split('.');
    loop {
        match (filter_tokens.next(), subject_tokens.next()) {
            (Some(">"), Some(_)) => return true,
            (Some("*"), Some(_)) => {}
            (Some(f), Some(s)) if f == s => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Queue shared by every subscription bound to one durable name.
struct DurableConsumer {
    filter: String,
    queue: Mutex<VecDeque<BusMessage>>,
    notify: Notify,
}

impl DurableConsumer {
    async fn push(&self, message: BusMessage) {
        self.queue.lock().await.push_back(message);
        self.notify.notify_one();
    }

    async fn pop(&self) -> Option<BusMessage> {
        self.queue.lock().await.pop_front()
    }
}

/// In-memory bus for tests and single-process runs.
///
/// Keeps the full publish history, like a stream with unlimited retention, so
/// a consumer created after a publish still receives it.
#[derive(Default)]
pub struct InMemoryBus {
    consumers: RwLock<HashMap<String, Arc<DurableConsumer>>>,
    history: RwLock<Vec<BusMessage>>,
    unavailable: AtomicBool,
}

impl InMemoryBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty bus wrapped in an Arc.
    #[must_use]
    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Simulate a transport outage: every call fails while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Release);
    }

    /// Every message published so far.
    pub async fn published(&self) -> Vec<BusMessage> {
        self.history.read().await.clone()
    }

    /// Messages published on subjects matching `filter`.
    pub async fn published_matching(&self, filter: &str) -> Vec<BusMessage> {
        self.history
            .read()
            .await
            .iter()
            .filter(|m| subject_matches(filter, &m.subject))
            .cloned()
            .collect()
    }

    /// Messages waiting in a durable consumer's queue.
    pub async fn pending(&self, durable_name: &str) -> usize {
        match self.consumers.read().await.get(durable_name) {
            Some(consumer) => consumer.queue.lock().await.len(),
            None => 0,
        }
    }

    fn check_available(&self, operation: &str) -> Result<()> {
        if self.unavailable.load(Ordering::Acquire) {
            return Err(Error::transport(operation, "bus unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationBus for InMemoryBus {
    async fn subscribe(
        &self,
        durable_name: &str,
        filter_subject: &str,
    ) -> Result<Box<dyn PullSubscription>> {
        self.check_available("subscribe")?;

        let mut consumers = self.consumers.write().await;
        let consumer = match consumers.get(durable_name) {
            Some(existing) => Arc::clone(existing),
            None => {
                let backlog: VecDeque<BusMessage> = self
                    .history
                    .read()
                    .await
                    .iter()
                    .filter(|m| subject_matches(filter_subject, &m.subject))
                    .cloned()
                    .collect();
                let created = Arc::new(DurableConsumer {
                    filter: filter_subject.to_string(),
                    queue: Mutex::new(backlog),
                    notify: Notify::new(),
                });
                consumers.insert(durable_name.to_string(), Arc::clone(&created));
                debug!(durable_name, filter_subject, "Created durable consumer");
                created
            }
        };

        Ok(Box::new(InMemorySubscription {
            durable_name: durable_name.to_string(),
            consumer,
        }))
    }

    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<()> {
        self.check_available("publish")?;

        let message = BusMessage {
            subject: subject.to_string(),
            payload,
        };
        let consumers = self.consumers.read().await;
        self.history.write().await.push(message.clone());
        for consumer in consumers
            .values()
            .filter(|c| subject_matches(&c.filter, subject))
        {
            consumer.push(message.clone()).await;
        }
        Ok(())
    }
}

/// Subscription on an [`InMemoryBus`] durable consumer.
struct InMemorySubscription {
    durable_name: String,
    consumer: Arc<DurableConsumer>,
}

#[async_trait]
impl PullSubscription for InMemorySubscription {
    async fn fetch(&mut self, wait: Duration) -> Result<Option<BusMessage>> {
        let consumer = Arc::clone(&self.consumer);
        let next = tokio::time::timeout(wait, async move {
            loop {
                let notified = consumer.notify.notified();
                if let Some(message) = consumer.pop().await {
                    return message;
                }
                notified.await;
            }
        })
        .await;

        Ok(next.ok())
    }

    async fn unsubscribe(self: Box<Self>) -> Result<()> {
        debug!(durable_name = %self.durable_name, "Unsubscribed");
        Ok(())
    }
}
