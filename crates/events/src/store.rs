//! Lock store trait and in-memory implementation.
//!
//! A lock record is created atomically, read, and deleted; it is never updated
//! in place. Records expire after a fixed TTL so a crashed controller cannot
//! block an object forever.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::error::{Error, Result};

/// TTL-bound key-value store used for reconciliation locks.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Create `key` with `value` if absent.
    ///
    /// Fails with [`Error::KeyExists`] if a live record is present.
    async fn create(&self, key: &str, value: &str) -> Result<()>;

    /// Read `key`, returning `None` when absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Delete `key`. Deleting an absent key succeeds.
    async fn delete(&self, key: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
struct LockRecord {
    value: String,
    expires_at: Instant,
}

/// In-memory lock store with TTL expiry on tokio's clock.
pub struct InMemoryLockStore {
    ttl: Duration,
    records: RwLock<HashMap<String, LockRecord>>,
    unavailable: AtomicBool,
}

impl InMemoryLockStore {
    /// Create a store whose records live for `ttl`.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            records: RwLock::new(HashMap::new()),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Create a store wrapped in an Arc.
    #[must_use]
    pub fn new_arc(ttl: Duration) -> Arc<Self> {
        Arc::new(Self::new(ttl))
    }

    /// Simulate an outage: every call fails while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Release);
    }

    /// Number of live records.
    pub async fn live_count(&self) -> usize {
        let now = Instant::now();
        self.records
            .read()
            .await
            .values()
            .filter(|r| r.expires_at > now)
            .count()
    }

    fn check_available(&self, operation: &str) -> Result<()> {
        if self.unavailable.load(Ordering::Acquire) {
            return Err(Error::transport(operation, "lock store unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl LockStore for InMemoryLockStore {
    async fn create(&self, key: &str, value: &str) -> Result<()> {
        self.check_available("kv create")?;

        let now = Instant::now();
        let mut records = self.records.write().await;
        if records.get(key).is_some_and(|r| r.expires_at > now) {
            return Err(Error::key_exists(key));
        }

        let expires_at = now.checked_add(self.ttl).unwrap_or(now);
        records.insert(
            key.to_string(),
            LockRecord {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check_available("kv get")?;

        let now = Instant::now();
        Ok(self
            .records
            .read()
            .await
            .get(key)
            .filter(|r| r.expires_at > now)
            .map(|r| r.value.clone()))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.check_available("kv delete")?;

        self.records.write().await.remove(key);
        Ok(())
    }
}
