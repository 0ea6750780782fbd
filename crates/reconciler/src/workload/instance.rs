//! Workload instance reconciliation: apply or delete a definition's resources
//! on the instance's target cluster.

use std::sync::Arc;

use async_trait::async_trait;
use itertools::Itertools;
use keel_api::{ControlPlaneApi, WorkloadInstance, WorkloadResourceDefinition};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::r#loop::{require_reconciled, ObjectReconciler};
use crate::runtime::{ResourceRef, RuntimeClient, RuntimeConnector};

/// Reconciler name for workload instances.
pub const WORKLOAD_INSTANCE_RECONCILER: &str = "WorkloadInstanceReconciler";

/// A resource definition whose manifest passed validation.
#[derive(Debug, Clone)]
struct Manifest {
    resource_id: u64,
    resource: ResourceRef,
    body: Value,
}

fn validate_manifests(resources: &[WorkloadResourceDefinition]) -> Result<Vec<Manifest>> {
    resources
        .iter()
        .map(|definition| {
            let resource_id = definition
                .id
                .ok_or_else(|| Error::missing_field("WorkloadResourceDefinition", "ID"))?;
            let body = definition
                .json_definition
                .clone()
                .ok_or_else(|| Error::invalid_resource(resource_id, "no JSONDefinition"))?;
            let resource = ResourceRef::from_manifest(&body)
                .map_err(|e| Error::invalid_resource(resource_id, e.to_string()))?;
            Ok(Manifest {
                resource_id,
                resource,
                body,
            })
        })
        .collect()
}

/// Reconciles workload instances onto target clusters.
pub struct WorkloadInstanceReconciler {
    api: Arc<dyn ControlPlaneApi>,
    runtime: Arc<dyn RuntimeConnector>,
}

impl WorkloadInstanceReconciler {
    #[must_use]
    pub fn new(api: Arc<dyn ControlPlaneApi>, runtime: Arc<dyn RuntimeConnector>) -> Self {
        Self { api, runtime }
    }

    async fn manifests(&self, workload_definition_id: u64) -> Result<Vec<Manifest>> {
        let resources = self
            .api
            .get_workload_resource_definitions_by_workload_definition_id(workload_definition_id)
            .await?;
        validate_manifests(&resources)
    }

    async fn client_for(&self, instance: &WorkloadInstance) -> Result<Arc<dyn RuntimeClient>> {
        let cluster_id = instance
            .cluster_instance_id
            .ok_or_else(|| Error::missing_field("WorkloadInstance", "ClusterInstanceID"))?;
        let cluster = self.api.get_cluster_instance(cluster_id).await?;
        self.runtime.connect(&cluster).await
    }
}

fn workload_definition_id(instance: &WorkloadInstance) -> Result<u64> {
    instance
        .workload_definition_id
        .ok_or_else(|| Error::missing_field("WorkloadInstance", "WorkloadDefinitionID"))
}

#[async_trait]
impl ObjectReconciler for WorkloadInstanceReconciler {
    type Object = WorkloadInstance;
    const NAME: &'static str = WORKLOAD_INSTANCE_RECONCILER;

    async fn refetch(&self, id: u64) -> Result<WorkloadInstance> {
        Ok(self.api.get_workload_instance(id).await?)
    }

    async fn check_dependencies(&self, instance: &WorkloadInstance) -> Result<()> {
        let parent_id = workload_definition_id(instance)?;
        match self.api.get_workload_definition(parent_id).await {
            Ok(parent) => require_reconciled(&parent, parent_id),
            Err(e) if e.is_not_found() => {
                debug!(workload_definition_id = parent_id, "Workload definition not found");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn on_created(&self, instance: &WorkloadInstance) -> Result<()> {
        let parent_id = workload_definition_id(instance)?;
        let manifests = self.manifests(parent_id).await?;
        if manifests.is_empty() {
            return Err(Error::NoResourceDefinitions {
                workload_definition_id: parent_id,
            });
        }

        let client = self.client_for(instance).await?;
        for manifest in &manifests {
            client.apply(&manifest.body).await.map_err(|e| {
                Error::invalid_resource(manifest.resource_id, e.to_string())
            })?;
            debug!(
                workload_instance_id = ?instance.id,
                resource = %manifest.resource.key(),
                "Applied resource"
            );
        }

        info!(
            workload_instance_id = ?instance.id,
            resources = %manifests.iter().map(|m| m.resource.key()).join(", "),
            "Applied workload resources"
        );
        Ok(())
    }

    async fn on_deleted(&self, instance: &WorkloadInstance) -> Result<()> {
        let parent_id = workload_definition_id(instance)?;
        let manifests = self.manifests(parent_id).await?;
        if manifests.is_empty() {
            debug!(workload_instance_id = ?instance.id, "No resources to delete");
            return Ok(());
        }

        let client = self.client_for(instance).await?;
        for manifest in manifests.iter().rev() {
            client.delete(&manifest.body).await.map_err(|e| {
                Error::invalid_resource(manifest.resource_id, e.to_string())
            })?;
        }

        info!(
            workload_instance_id = ?instance.id,
            count = manifests.len(),
            "Deleted workload resources"
        );
        Ok(())
    }
}
