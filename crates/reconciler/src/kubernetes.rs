//! Kubernetes runtime.
//!
//! Each cluster instance names a kubeconfig context. Resources are applied with
//! server-side apply and deleted through the dynamic API discovered for their
//! group/version/kind.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use keel_api::ClusterInstance;
use kube::api::{Api, DeleteParams, DynamicObject, Patch, PatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::core::GroupVersion;
use kube::discovery::{self, Scope};
use kube::{Client, Config};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::runtime::{ResourceRef, RuntimeClient, RuntimeConnector};

/// Field manager recorded on applied resources.
const FIELD_MANAGER: &str = "keel-controller";

/// Namespace used for namespaced resources whose manifest names none.
const DEFAULT_NAMESPACE: &str = "default";

/// Connects to clusters through the local kubeconfig.
#[derive(Debug, Clone, Default)]
pub struct KubeConnector {
    kubeconfig: Option<Kubeconfig>,
}

impl KubeConnector {
    /// Use the kubeconfig found in the environment.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use the kubeconfig file at `path` instead of the environment's.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Runtime`] if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
            Error::runtime(format!("failed to read kubeconfig {}: {e}", path.display()))
        })?;
        Ok(Self {
            kubeconfig: Some(kubeconfig),
        })
    }
}

#[async_trait]
impl RuntimeConnector for KubeConnector {
    async fn connect(&self, cluster: &ClusterInstance) -> Result<Arc<dyn RuntimeClient>> {
        let options = KubeConfigOptions {
            context: cluster.kube_context.clone(),
            ..Default::default()
        };

        let config = match &self.kubeconfig {
            Some(kubeconfig) => Config::from_custom_kubeconfig(kubeconfig.clone(), &options).await,
            None => Config::from_kubeconfig(&options).await,
        }
        .map_err(|e| Error::runtime(format!("failed to load kubeconfig: {e}")))?;

        let client = Client::try_from(config)
            .map_err(|e| Error::runtime(format!("failed to build kube client: {e}")))?;

        info!(
            cluster = cluster.name.as_deref().unwrap_or_default(),
            context = cluster.kube_context.as_deref().unwrap_or_default(),
            "Connected to cluster"
        );
        Ok(Arc::new(KubeRuntimeClient { client }))
    }
}

struct KubeRuntimeClient {
    client: Client,
}

impl KubeRuntimeClient {
    async fn api_for(&self, resource: &ResourceRef) -> Result<Api<DynamicObject>> {
        let gvk = resource
            .api_version
            .parse::<GroupVersion>()
            .map_err(|e| Error::runtime(format!("invalid apiVersion {}: {e}", resource.api_version)))?
            .with_kind(&resource.kind);

        let (api_resource, capabilities) = discovery::pinned_kind(&self.client, &gvk)
            .await
            .map_err(|e| Error::runtime(format!("failed to discover {}: {e}", resource.kind)))?;

        Ok(match capabilities.scope {
            Scope::Namespaced => Api::namespaced_with(
                self.client.clone(),
                resource.namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE),
                &api_resource,
            ),
            Scope::Cluster => Api::all_with(self.client.clone(), &api_resource),
        })
    }
}

#[async_trait]
impl RuntimeClient for KubeRuntimeClient {
    async fn apply(&self, manifest: &Value) -> Result<()> {
        let resource = ResourceRef::from_manifest(manifest)?;
        let api = self.api_for(&resource).await?;
        let object: DynamicObject = serde_json::from_value(manifest.clone())
            .map_err(|e| Error::runtime(format!("invalid {} manifest: {e}", resource.kind)))?;

        api.patch(
            &resource.name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(&object),
        )
        .await
        .map_err(|e| Error::runtime(format!("failed to apply {}: {e}", resource.key())))?;

        debug!(key = %resource.key(), "Applied resource");
        Ok(())
    }

    async fn delete(&self, manifest: &Value) -> Result<()> {
        let resource = ResourceRef::from_manifest(manifest)?;
        let api = self.api_for(&resource).await?;

        match api.delete(&resource.name, &DeleteParams::default()).await {
            Ok(_) => {
                debug!(key = %resource.key(), "Deleted resource");
                Ok(())
            }
            Err(kube::Error::Api(response)) if response.code == 404 => {
                debug!(key = %resource.key(), "Resource already absent");
                Ok(())
            }
            Err(e) => Err(Error::runtime(format!(
                "failed to delete {}: {e}",
                resource.key()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_reject_missing_kubeconfig_file() {
        let err = KubeConnector::from_file(Path::new("/nonexistent/keel/kubeconfig"))
            .err()
            .map(|e| e.to_string());

        assert!(err.is_some_and(|reason| reason.contains("/nonexistent/keel/kubeconfig")));
    }
}
