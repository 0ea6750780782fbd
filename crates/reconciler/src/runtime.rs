//! Target-cluster access for workload instances.
//!
//! A [`RuntimeConnector`] resolves a [`ClusterInstance`] into a
//! [`RuntimeClient`] that applies and deletes JSON manifests. Applies are
//! upserts and deletes of missing resources succeed, so a requeued attempt can
//! replay the whole resource set safely.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use keel_api::ClusterInstance;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{Error, Result};

/// Identity of a resource inside a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceRef {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub namespace: Option<String>,
}

impl ResourceRef {
    /// Read `apiVersion`, `kind`, `metadata.name` and `metadata.namespace`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Runtime`] naming the first missing field.
    pub fn from_manifest(manifest: &Value) -> Result<Self> {
        let field = |pointer: &str| {
            manifest
                .pointer(pointer)
                .and_then(Value::as_str)
                .map(str::to_string)
        };
        let required = |pointer: &str, label: &str| {
            field(pointer).ok_or_else(|| Error::runtime(format!("manifest has no {label}")))
        };

        Ok(Self {
            api_version: required("/apiVersion", "apiVersion")?,
            kind: required("/kind", "kind")?,
            name: required("/metadata/name", "metadata.name")?,
            namespace: field("/metadata/namespace"),
        })
    }

    /// Stable key for the resource within a cluster.
    #[must_use]
    pub fn key(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            self.api_version,
            self.kind,
            self.namespace.as_deref().unwrap_or(""),
            self.name
        )
    }
}

/// Client scoped to one target cluster.
#[async_trait]
pub trait RuntimeClient: Send + Sync {
    /// Create or update the resource described by `manifest`.
    async fn apply(&self, manifest: &Value) -> Result<()>;

    /// Delete the resource described by `manifest`. A missing resource is success.
    async fn delete(&self, manifest: &Value) -> Result<()>;
}

/// Resolves cluster instances into runtime clients.
#[async_trait]
pub trait RuntimeConnector: Send + Sync {
    /// Build a client for `cluster`.
    async fn connect(&self, cluster: &ClusterInstance) -> Result<Arc<dyn RuntimeClient>>;
}

type ClusterResources = BTreeMap<String, Value>;

#[derive(Default)]
struct RuntimeState {
    clusters: RwLock<HashMap<String, ClusterResources>>,
    failing_kinds: RwLock<HashSet<String>>,
    unavailable: AtomicBool,
}

/// In-memory runtime recording applied resources per cluster.
///
/// Clusters are keyed by the cluster instance name.
#[derive(Default, Clone)]
pub struct InMemoryRuntime {
    state: Arc<RuntimeState>,
}

impl InMemoryRuntime {
    /// Create an empty runtime.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty runtime wrapped in an Arc.
    #[must_use]
    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Make `connect` fail while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.unavailable.store(unavailable, Ordering::Release);
    }

    /// Make every apply or delete of `kind` fail.
    pub async fn fail_kind(&self, kind: &str) {
        self.state.failing_kinds.write().await.insert(kind.to_string());
    }

    /// Stop failing `kind`.
    pub async fn heal_kind(&self, kind: &str) {
        self.state.failing_kinds.write().await.remove(kind);
    }

    /// Manifests currently applied to `cluster`, ordered by resource key.
    pub async fn resources(&self, cluster: &str) -> Vec<Value> {
        self.state
            .clusters
            .read()
            .await
            .get(cluster)
            .map(|resources| resources.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of resources applied to `cluster`.
    pub async fn resource_count(&self, cluster: &str) -> usize {
        self.state
            .clusters
            .read()
            .await
            .get(cluster)
            .map_or(0, BTreeMap::len)
    }
}

#[async_trait]
impl RuntimeConnector for InMemoryRuntime {
    async fn connect(&self, cluster: &ClusterInstance) -> Result<Arc<dyn RuntimeClient>> {
        if self.state.unavailable.load(Ordering::Acquire) {
            return Err(Error::runtime("runtime unavailable"));
        }
        let name = cluster
            .name
            .clone()
            .ok_or_else(|| Error::missing_field("ClusterInstance", "Name"))?;
        Ok(Arc::new(InMemoryRuntimeClient {
            cluster: name,
            state: Arc::clone(&self.state),
        }))
    }
}

struct InMemoryRuntimeClient {
    cluster: String,
    state: Arc<RuntimeState>,
}

impl InMemoryRuntimeClient {
    async fn check_kind(&self, resource: &ResourceRef) -> Result<()> {
        if self.state.failing_kinds.read().await.contains(&resource.kind) {
            return Err(Error::runtime(format!(
                "{} {} rejected by cluster {}",
                resource.kind, resource.name, self.cluster
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl RuntimeClient for InMemoryRuntimeClient {
    async fn apply(&self, manifest: &Value) -> Result<()> {
        let resource = ResourceRef::from_manifest(manifest)?;
        self.check_kind(&resource).await?;
        self.state
            .clusters
            .write()
            .await
            .entry(self.cluster.clone())
            .or_default()
            .insert(resource.key(), manifest.clone());
        debug!(cluster = %self.cluster, key = %resource.key(), "Applied resource");
        Ok(())
    }

    async fn delete(&self, manifest: &Value) -> Result<()> {
        let resource = ResourceRef::from_manifest(manifest)?;
        self.check_kind(&resource).await?;
        if let Some(resources) = self.state.clusters.write().await.get_mut(&self.cluster) {
            resources.remove(&resource.key());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use serde_json::json;

    use super::*;

    fn cluster(name: &str) -> ClusterInstance {
        ClusterInstance {
            id: Some(1),
            name: Some(name.to_string()),
            ..Default::default()
        }
    }

    fn config_map(name: &str) -> Value {
        json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": name, "namespace": "apps"},
            "data": {"key": "value"}
        })
    }

    #[test]
    fn resource_ref_reads_identity_fields() {
        let resource = ResourceRef::from_manifest(&config_map("settings")).unwrap();
        assert_eq!(resource.api_version, "v1");
        assert_eq!(resource.kind, "ConfigMap");
        assert_eq!(resource.name, "settings");
        assert_eq!(resource.namespace.as_deref(), Some("apps"));
        assert_eq!(resource.key(), "v1/ConfigMap/apps/settings");
    }

    #[test]
    fn resource_ref_requires_name() {
        let err = ResourceRef::from_manifest(&json!({"apiVersion": "v1", "kind": "Service"}))
            .unwrap_err();
        assert!(err.to_string().contains("metadata.name"));
    }

    #[tokio::test]
    async fn apply_is_an_upsert() {
        let runtime = InMemoryRuntime::new();
        let client = runtime.connect(&cluster("east")).await.unwrap();

        client.apply(&config_map("a")).await.unwrap();
        client.apply(&config_map("a")).await.unwrap();
        client.apply(&config_map("b")).await.unwrap();

        assert_eq!(runtime.resource_count("east").await, 2);
        assert_eq!(runtime.resource_count("west").await, 0);
    }

    #[tokio::test]
    async fn delete_of_missing_resource_succeeds() {
        let runtime = InMemoryRuntime::new();
        let client = runtime.connect(&cluster("east")).await.unwrap();

        client.apply(&config_map("a")).await.unwrap();
        client.delete(&config_map("a")).await.unwrap();
        client.delete(&config_map("a")).await.unwrap();

        assert!(runtime.resources("east").await.is_empty());
    }

    #[tokio::test]
    async fn failing_kind_rejects_apply() {
        let runtime = InMemoryRuntime::new();
        runtime.fail_kind("ConfigMap").await;
        let client = runtime.connect(&cluster("east")).await.unwrap();

        assert!(matches!(
            client.apply(&config_map("a")).await,
            Err(Error::Runtime { .. })
        ));

        runtime.heal_kind("ConfigMap").await;
        assert!(client.apply(&config_map("a")).await.is_ok());
    }

    #[tokio::test]
    async fn connect_requires_cluster_name() {
        let runtime = InMemoryRuntime::new();
        let result = runtime.connect(&ClusterInstance::default()).await;
        assert!(matches!(result, Err(Error::MissingField { .. })));
    }
}
