//! Ethereum node definition reconciliation.
//!
//! Definitions carry no derived objects of their own, so reconciling one only
//! records it as reconciled for the instances waiting on it.

use std::sync::Arc;

use async_trait::async_trait;
use keel_api::{ControlPlaneApi, EthereumNodeDefinition};
use tracing::debug;

use crate::error::{Error, Result};
use crate::r#loop::ObjectReconciler;

/// Reconciler name for ethereum node definitions.
pub const ETHEREUM_NODE_DEFINITION_RECONCILER: &str = "EthereumNodeDefinitionReconciler";

pub struct EthereumNodeDefinitionReconciler {
    api: Arc<dyn ControlPlaneApi>,
}

impl EthereumNodeDefinitionReconciler {
    #[must_use]
    pub fn new(api: Arc<dyn ControlPlaneApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl ObjectReconciler for EthereumNodeDefinitionReconciler {
    type Object = EthereumNodeDefinition;
    const NAME: &'static str = ETHEREUM_NODE_DEFINITION_RECONCILER;

    async fn refetch(&self, id: u64) -> Result<EthereumNodeDefinition> {
        Ok(self.api.get_ethereum_node_definition(id).await?)
    }

    async fn on_created(&self, definition: &EthereumNodeDefinition) -> Result<()> {
        debug!(
            ethereum_node_definition_id = ?definition.id,
            network = ?definition.network,
            "Ethereum node definition created"
        );
        Ok(())
    }

    async fn on_deleted(&self, definition: &EthereumNodeDefinition) -> Result<()> {
        debug!(
            ethereum_node_definition_id = ?definition.id,
            "Ethereum node definition deleted"
        );
        Ok(())
    }

    async fn mark_reconciled(&self, definition: &EthereumNodeDefinition) -> Result<()> {
        let id = definition
            .id
            .ok_or_else(|| Error::missing_field("EthereumNodeDefinition", "ID"))?;
        self.api
            .update_ethereum_node_definition(EthereumNodeDefinition {
                id: Some(id),
                reconciled: Some(true),
                ..Default::default()
            })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use keel_api::InMemoryApi;

    use super::*;

    #[tokio::test]
    async fn should_mark_definition_reconciled() {
        let api = InMemoryApi::new_arc();
        let definition = api
            .create_ethereum_node_definition(EthereumNodeDefinition {
                name: Some("geth-mainnet".to_string()),
                network: Some("mainnet".to_string()),
                workload_definition_id: Some(3),
                ..Default::default()
            })
            .await
            .unwrap();
        let reconciler = EthereumNodeDefinitionReconciler::new(api.clone());

        reconciler.on_created(&definition).await.unwrap();
        reconciler.mark_reconciled(&definition).await.unwrap();

        let stored = api
            .get_ethereum_node_definition(definition.id.unwrap())
            .await
            .unwrap();
        assert_eq!(stored.reconciled, Some(true));
        assert_eq!(stored.network.as_deref(), Some("mainnet"));
    }

    #[tokio::test]
    async fn should_fail_marking_missing_definition() {
        let reconciler = EthereumNodeDefinitionReconciler::new(InMemoryApi::new_arc());
        let ghost = EthereumNodeDefinition {
            id: Some(40),
            ..Default::default()
        };

        let err = reconciler.mark_reconciled(&ghost).await.unwrap_err();

        assert!(err.is_not_found());
    }
}
