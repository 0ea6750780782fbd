//! Ethereum node instance reconciliation.
//!
//! A node instance is realised as a workload instance of its definition's
//! workload definition. The workload instance reconciler then applies the
//! resources; nothing here talks to a cluster.

use std::sync::Arc;

use async_trait::async_trait;
use keel_api::{ApiError, ControlPlaneApi, EthereumNodeInstance, WorkloadInstance};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::r#loop::{require_reconciled, ObjectReconciler};

/// Reconciler name for ethereum node instances.
pub const ETHEREUM_NODE_INSTANCE_RECONCILER: &str = "EthereumNodeInstanceReconciler";

pub struct EthereumNodeInstanceReconciler {
    api: Arc<dyn ControlPlaneApi>,
}

impl EthereumNodeInstanceReconciler {
    #[must_use]
    pub fn new(api: Arc<dyn ControlPlaneApi>) -> Self {
        Self { api }
    }

    /// The workload instance an earlier attempt created but failed to link.
    ///
    /// Instance names are unique, so a workload instance carrying the node's
    /// name either belongs to this node or blocks it.
    async fn adoptable_workload(
        &self,
        node: &EthereumNodeInstance,
        workload_definition_id: u64,
    ) -> Result<Option<WorkloadInstance>> {
        let Some(name) = node.name.as_deref() else {
            return Ok(None);
        };
        match self.api.get_workload_instance_by_name(name).await? {
            Some(existing) if existing.workload_definition_id == Some(workload_definition_id) => {
                Ok(Some(existing))
            }
            Some(_) => Err(ApiError::conflict(format!(
                "WorkloadInstance named {name} belongs to another workload definition"
            ))
            .into()),
            None => Ok(None),
        }
    }
}

fn definition_id(node: &EthereumNodeInstance) -> Result<u64> {
    node.ethereum_node_definition_id
        .ok_or_else(|| Error::missing_field("EthereumNodeInstance", "EthereumNodeDefinitionID"))
}

#[async_trait]
impl ObjectReconciler for EthereumNodeInstanceReconciler {
    type Object = EthereumNodeInstance;
    const NAME: &'static str = ETHEREUM_NODE_INSTANCE_RECONCILER;

    async fn refetch(&self, id: u64) -> Result<EthereumNodeInstance> {
        Ok(self.api.get_ethereum_node_instance(id).await?)
    }

    async fn check_dependencies(&self, node: &EthereumNodeInstance) -> Result<()> {
        let parent_id = definition_id(node)?;
        match self.api.get_ethereum_node_definition(parent_id).await {
            Ok(parent) => require_reconciled(&parent, parent_id),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn on_created(&self, node: &EthereumNodeInstance) -> Result<()> {
        let node_id = node
            .id
            .ok_or_else(|| Error::missing_field("EthereumNodeInstance", "ID"))?;
        if let Some(workload_instance_id) = node.workload_instance_id {
            debug!(
                ethereum_node_instance_id = node_id,
                workload_instance_id, "Workload instance already linked"
            );
            return Ok(());
        }

        let definition = self
            .api
            .get_ethereum_node_definition(definition_id(node)?)
            .await?;
        let workload_definition_id = definition
            .workload_definition_id
            .ok_or_else(|| Error::missing_field("EthereumNodeDefinition", "WorkloadDefinitionID"))?;

        let workload = match self.adoptable_workload(node, workload_definition_id).await? {
            Some(existing) => {
                debug!(
                    ethereum_node_instance_id = node_id,
                    workload_instance_id = ?existing.id,
                    "Adopting workload instance from an earlier attempt"
                );
                existing
            }
            None => {
                self.api
                    .create_workload_instance(WorkloadInstance {
                        name: node.name.clone(),
                        cluster_instance_id: node.cluster_instance_id,
                        workload_definition_id: Some(workload_definition_id),
                        ..Default::default()
                    })
                    .await?
            }
        };
        let workload_instance_id = workload
            .id
            .ok_or_else(|| Error::missing_field("WorkloadInstance", "ID"))?;

        self.api
            .update_ethereum_node_instance(EthereumNodeInstance {
                id: Some(node_id),
                workload_instance_id: Some(workload_instance_id),
                ..Default::default()
            })
            .await?;

        info!(
            ethereum_node_instance_id = node_id,
            workload_instance_id,
            workload_definition_id,
            "Linked workload instance to ethereum node"
        );
        Ok(())
    }

    async fn on_deleted(&self, node: &EthereumNodeInstance) -> Result<()> {
        let Some(workload_instance_id) = node.workload_instance_id else {
            debug!(ethereum_node_instance_id = ?node.id, "No workload instance linked");
            return Ok(());
        };
        self.api.delete_workload_instance(workload_instance_id).await?;
        info!(
            ethereum_node_instance_id = ?node.id,
            workload_instance_id,
            "Deleted workload instance for ethereum node"
        );
        Ok(())
    }
}
