//! NATS JetStream implementation of the bus and lock store.
//!
//! Notifications travel on JetStream streams (one per domain) through durable
//! pull consumers with explicit ack. Locks live in a JetStream key-value bucket
//! whose `max_age` is the lock TTL.

use std::time::Duration;

use async_nats::jetstream::{self, consumer, kv};
use async_trait::async_trait;
use futures::StreamExt;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::bus::{BusMessage, NotificationBus, PullSubscription};
use crate::error::{Error, Result};
use crate::store::LockStore;
use crate::types::stream_for_subject;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Connect to a NATS server and open a JetStream context.
///
/// # Errors
///
/// Returns a transport error if the server is unreachable.
pub async fn connect(url: &str) -> Result<jetstream::Context> {
    info!(url, "Connecting to NATS server");

    let client = timeout(CONNECT_TIMEOUT, async_nats::connect(url))
        .await
        .map_err(|_| Error::transport("nats connect", "timed out"))?
        .map_err(|e| Error::transport("nats connect", e.to_string()))?;

    info!("Connected to NATS server");
    Ok(jetstream::new(client))
}

/// Notification bus backed by JetStream.
#[derive(Clone)]
pub struct NatsBus {
    context: jetstream::Context,
}

impl NatsBus {
    /// Wrap a JetStream context.
    #[must_use]
    pub const fn new(context: jetstream::Context) -> Self {
        Self { context }
    }

    /// Verify that each named stream exists.
    ///
    /// # Errors
    ///
    /// Returns a transport error naming the first stream that cannot be opened.
    pub async fn ensure_streams(&self, names: &[&str]) -> Result<()> {
        for name in names {
            self.context
                .get_stream(*name)
                .await
                .map_err(|e| Error::transport(format!("get stream {name}"), e.to_string()))?;
            debug!(stream = name, "Stream available");
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationBus for NatsBus {
    async fn subscribe(
        &self,
        durable_name: &str,
        filter_subject: &str,
    ) -> Result<Box<dyn PullSubscription>> {
        let stream_name =
            stream_for_subject(filter_subject).ok_or_else(|| Error::stream_not_found(filter_subject))?;

        let stream = self
            .context
            .get_stream(stream_name)
            .await
            .map_err(|e| Error::transport(format!("get stream {stream_name}"), e.to_string()))?;

        let consumer: consumer::PullConsumer = stream
            .get_or_create_consumer(
                durable_name,
                consumer::pull::Config {
                    durable_name: Some(durable_name.to_string()),
                    filter_subject: filter_subject.to_string(),
                    ack_policy: consumer::AckPolicy::Explicit,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| Error::transport("create consumer", e.to_string()))?;

        debug!(durable_name, filter_subject, stream = stream_name, "Bound durable consumer");

        Ok(Box::new(NatsSubscription {
            durable_name: durable_name.to_string(),
            consumer,
        }))
    }

    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<()> {
        self.context
            .publish(subject.to_string(), payload.into())
            .await
            .map_err(|e| Error::transport("publish", e.to_string()))?
            .await
            .map_err(|e| Error::transport("publish ack", e.to_string()))?;
        Ok(())
    }
}

/// Durable pull subscription on a JetStream consumer.
struct NatsSubscription {
    durable_name: String,
    consumer: consumer::PullConsumer,
}

#[async_trait]
impl PullSubscription for NatsSubscription {
    async fn fetch(&mut self, wait: Duration) -> Result<Option<BusMessage>> {
        let mut batch = self
            .consumer
            .fetch()
            .max_messages(1)
            .expires(wait)
            .messages()
            .await
            .map_err(|e| Error::transport("fetch", e.to_string()))?;

        match batch.next().await {
            None => Ok(None),
            Some(Err(e)) => Err(Error::transport("fetch", e.to_string())),
            Some(Ok(message)) => {
                message
                    .ack()
                    .await
                    .map_err(|e| Error::transport("ack", e.to_string()))?;
                Ok(Some(BusMessage {
                    subject: message.message.subject.to_string(),
                    payload: message.message.payload.to_vec(),
                }))
            }
        }
    }

    async fn unsubscribe(self: Box<Self>) -> Result<()> {
        debug!(durable_name = %self.durable_name, "Released pull consumer");
        Ok(())
    }
}

/// Lock store backed by a JetStream key-value bucket.
#[derive(Clone)]
pub struct NatsLockStore {
    store: kv::Store,
}

impl NatsLockStore {
    /// Open `bucket`, creating it with `max_age = ttl` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the bucket can be neither opened nor created.
    pub async fn open(context: &jetstream::Context, bucket: &str, ttl: Duration) -> Result<Self> {
        let store = match context.get_key_value(bucket).await {
            Ok(store) => store,
            Err(_) => {
                info!(bucket, ttl_secs = ttl.as_secs(), "Creating lock bucket");
                context
                    .create_key_value(kv::Config {
                        bucket: bucket.to_string(),
                        history: 1,
                        max_age: ttl,
                        ..Default::default()
                    })
                    .await
                    .map_err(|e| Error::transport("create kv bucket", e.to_string()))?
            }
        };
        Ok(Self { store })
    }
}

#[async_trait]
impl LockStore for NatsLockStore {
    async fn create(&self, key: &str, value: &str) -> Result<()> {
        match self.store.create(key, value.to_string().into()).await {
            Ok(_revision) => Ok(()),
            Err(e) if e.kind() == kv::CreateErrorKind::AlreadyExists => Err(Error::key_exists(key)),
            Err(e) => Err(Error::transport("kv create", e.to_string())),
        }
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.store
            .get(key)
            .await
            .map(|entry| entry.map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
            .map_err(|e| Error::transport("kv get", e.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.store
            .delete(key)
            .await
            .map_err(|e| Error::transport("kv delete", e.to_string()))
    }
}
