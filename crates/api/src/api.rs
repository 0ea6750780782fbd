//! The API server contract consumed by reconcilers.

use async_trait::async_trait;

use crate::error::ApiResult;
use crate::types::{
    ClusterInstance, EthereumNodeDefinition, EthereumNodeInstance, WorkloadDefinition,
    WorkloadInstance, WorkloadResourceDefinition,
};

/// Typed CRUD and query operations on the API server.
///
/// `update_*` calls are partial: only the fields set on the argument are
/// written. `delete_*` calls succeed when the object is already gone. A client
/// update that does not set `reconciled: Some(true)` resets the flag to false.
#[async_trait]
pub trait ControlPlaneApi: Send + Sync {
    async fn get_workload_definition(&self, id: u64) -> ApiResult<WorkloadDefinition>;

    async fn create_workload_definition(
        &self,
        definition: WorkloadDefinition,
    ) -> ApiResult<WorkloadDefinition>;

    async fn update_workload_definition(
        &self,
        definition: WorkloadDefinition,
    ) -> ApiResult<WorkloadDefinition>;

    async fn delete_workload_definition(&self, id: u64) -> ApiResult<()>;

    /// Create every definition in one call; nothing is created if any is rejected.
    async fn create_workload_resource_definitions(
        &self,
        definitions: Vec<WorkloadResourceDefinition>,
    ) -> ApiResult<Vec<WorkloadResourceDefinition>>;

    async fn get_workload_resource_definitions_by_workload_definition_id(
        &self,
        workload_definition_id: u64,
    ) -> ApiResult<Vec<WorkloadResourceDefinition>>;

    async fn delete_workload_resource_definition(&self, id: u64) -> ApiResult<()>;

    async fn get_workload_instance(&self, id: u64) -> ApiResult<WorkloadInstance>;

    /// Look up a workload instance by its unique name.
    async fn get_workload_instance_by_name(
        &self,
        name: &str,
    ) -> ApiResult<Option<WorkloadInstance>>;

    async fn create_workload_instance(
        &self,
        instance: WorkloadInstance,
    ) -> ApiResult<WorkloadInstance>;

    async fn update_workload_instance(
        &self,
        instance: WorkloadInstance,
    ) -> ApiResult<WorkloadInstance>;

    async fn delete_workload_instance(&self, id: u64) -> ApiResult<()>;

    async fn get_cluster_instance(&self, id: u64) -> ApiResult<ClusterInstance>;

    async fn create_cluster_instance(
        &self,
        cluster: ClusterInstance,
    ) -> ApiResult<ClusterInstance>;

    async fn get_ethereum_node_definition(&self, id: u64) -> ApiResult<EthereumNodeDefinition>;

    async fn create_ethereum_node_definition(
        &self,
        definition: EthereumNodeDefinition,
    ) -> ApiResult<EthereumNodeDefinition>;

    async fn update_ethereum_node_definition(
        &self,
        definition: EthereumNodeDefinition,
    ) -> ApiResult<EthereumNodeDefinition>;

    async fn delete_ethereum_node_definition(&self, id: u64) -> ApiResult<()>;

    async fn get_ethereum_node_instance(&self, id: u64) -> ApiResult<EthereumNodeInstance>;

    async fn create_ethereum_node_instance(
        &self,
        instance: EthereumNodeInstance,
    ) -> ApiResult<EthereumNodeInstance>;

    async fn update_ethereum_node_instance(
        &self,
        instance: EthereumNodeInstance,
    ) -> ApiResult<EthereumNodeInstance>;

    async fn delete_ethereum_node_instance(&self, id: u64) -> ApiResult<()>;
}
