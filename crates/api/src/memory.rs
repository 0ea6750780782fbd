//! In-memory API server.
//!
//! Mirrors the API server semantics the reconcilers depend on: IDs are
//! assigned on create, `Reconciled` starts false and is reset by every update
//! that does not ask for `true`, deletes of missing objects succeed, and batch
//! creates are all-or-nothing. With [`InMemoryApi::with_notifications`] it also
//! publishes change notifications the way the server does after a client
//! mutation.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use keel_core::ResultExt;
use keel_events::{Notification, NotificationBus, Operation};
use tokio::sync::RwLock;
use tracing::debug;

use crate::api::ControlPlaneApi;
use crate::error::{ApiError, ApiResult};
use crate::types::{
    ApiObject, ClusterInstance, EthereumNodeDefinition, EthereumNodeInstance, WorkloadDefinition,
    WorkloadInstance, WorkloadResourceDefinition,
};

/// Per-kind checks applied on create.
trait Rules: ApiObject {
    fn name(&self) -> Option<&str> {
        None
    }

    fn validate(&self) -> ApiResult<()> {
        Ok(())
    }
}

impl Rules for WorkloadDefinition {
    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn validate(&self) -> ApiResult<()> {
        match self.yaml_document.as_deref() {
            Some(doc) if !doc.trim().is_empty() => Ok(()),
            _ => Err(ApiError::validation("WorkloadDefinition requires YAMLDocument")),
        }
    }
}

impl Rules for WorkloadResourceDefinition {
    fn validate(&self) -> ApiResult<()> {
        if self.json_definition.is_none() {
            return Err(ApiError::validation(
                "WorkloadResourceDefinition requires JSONDefinition",
            ));
        }
        if self.workload_definition_id.is_none() {
            return Err(ApiError::validation(
                "WorkloadResourceDefinition requires WorkloadDefinitionID",
            ));
        }
        Ok(())
    }
}

impl Rules for WorkloadInstance {
    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

impl Rules for ClusterInstance {
    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

impl Rules for EthereumNodeDefinition {
    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

impl Rules for EthereumNodeInstance {
    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

type Table<T> = RwLock<BTreeMap<u64, T>>;

/// In-memory [`ControlPlaneApi`].
#[derive(Default)]
pub struct InMemoryApi {
    next_id: AtomicU64,
    workload_definitions: Table<WorkloadDefinition>,
    workload_resource_definitions: Table<WorkloadResourceDefinition>,
    workload_instances: Table<WorkloadInstance>,
    cluster_instances: Table<ClusterInstance>,
    ethereum_node_definitions: Table<EthereumNodeDefinition>,
    ethereum_node_instances: Table<EthereumNodeInstance>,
    bus: Option<Arc<dyn NotificationBus>>,
    publish_updates: bool,
    unavailable: AtomicBool,
    update_fault: AtomicBool,
}

impl InMemoryApi {
    /// Create an empty API that publishes nothing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty API wrapped in an Arc.
    #[must_use]
    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Publish Created/Deleted notifications on `bus` after client mutations.
    #[must_use]
    pub fn with_notifications(mut self, bus: Arc<dyn NotificationBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Also publish Updated notifications.
    #[must_use]
    pub const fn with_update_notifications(mut self, enabled: bool) -> Self {
        self.publish_updates = enabled;
        self
    }

    /// Simulate an outage: every call fails while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Release);
    }

    /// Fail the next update call with a transport error, as a dropped connection would.
    pub fn fail_next_update(&self) {
        self.update_fault.store(true, Ordering::Release);
    }

    /// Number of stored workload resource definitions.
    pub async fn workload_resource_definition_count(&self) -> usize {
        self.workload_resource_definitions.read().await.len()
    }

    /// Number of stored workload instances.
    pub async fn workload_instance_count(&self) -> usize {
        self.workload_instances.read().await.len()
    }

    fn check_available(&self) -> ApiResult<()> {
        if self.unavailable.load(Ordering::Acquire) {
            return Err(ApiError::transport("API server unavailable"));
        }
        Ok(())
    }

    fn assign_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::AcqRel).saturating_add(1)
    }

    fn prepare<T: Rules>(
        &self,
        rows: &BTreeMap<u64, T>,
        pending: &[T],
        mut object: T,
    ) -> ApiResult<T> {
        object.validate()?;
        if let Some(name) = object.name() {
            let taken = rows
                .values()
                .chain(pending)
                .any(|existing| existing.name() == Some(name));
            if taken {
                return Err(ApiError::conflict(format!(
                    "{} named {name} already exists",
                    T::KIND
                )));
            }
        }
        object.set_id(self.assign_id());
        object.set_reconciled(Some(false));
        Ok(object)
    }

    async fn notify<T: ApiObject>(&self, operation: Operation, object: &T) {
        let (Some(bus), Some(subject)) = (self.bus.as_ref(), T::SUBJECT) else {
            return;
        };
        let subject_name = subject.for_operation(&operation);
        let Some(bytes) = Notification::new(operation, object)
            .to_bytes()
            .into_option_logged("Failed to encode change notification")
        else {
            return;
        };
        if bus
            .publish(&subject_name, bytes)
            .await
            .into_option_logged("Failed to publish change notification")
            .is_some()
        {
            debug!(subject = %subject_name, kind = T::KIND, "Published change notification");
        }
    }

    async fn create<T: Rules>(&self, table: &Table<T>, object: T) -> ApiResult<T> {
        self.check_available()?;
        let created = {
            let mut rows = table.write().await;
            let created = self.prepare(&rows, &[], object)?;
            if let Some(id) = created.id() {
                rows.insert(id, created.clone());
            }
            created
        };
        self.notify(Operation::Created, &created).await;
        Ok(created)
    }

    async fn get<T: ApiObject>(&self, table: &Table<T>, id: u64) -> ApiResult<T> {
        self.check_available()?;
        table
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| ApiError::not_found(T::KIND, id))
    }

    async fn update<T: ApiObject>(&self, table: &Table<T>, patch: T) -> ApiResult<T> {
        self.check_available()?;
        if self.update_fault.swap(false, Ordering::AcqRel) {
            return Err(ApiError::transport("connection reset"));
        }
        let id = patch
            .id()
            .ok_or_else(|| ApiError::validation(format!("{} update requires an ID", T::KIND)))?;
        let updated = {
            let mut rows = table.write().await;
            let current = rows
                .get_mut(&id)
                .ok_or_else(|| ApiError::not_found(T::KIND, id))?;
            current.merge(&patch);
            current.set_reconciled(Some(patch.reconciled() == Some(true)));
            current.clone()
        };
        if self.publish_updates {
            self.notify(Operation::Updated, &updated).await;
        }
        Ok(updated)
    }

    async fn delete<T: ApiObject>(&self, table: &Table<T>, id: u64) -> ApiResult<()> {
        self.check_available()?;
        let removed = table.write().await.remove(&id);
        match removed {
            Some(object) => self.notify(Operation::Deleted, &object).await,
            None => debug!(kind = T::KIND, id, "Delete of missing object"),
        }
        Ok(())
    }
}

#[async_trait]
impl ControlPlaneApi for InMemoryApi {
    async fn get_workload_definition(&self, id: u64) -> ApiResult<WorkloadDefinition> {
        self.get(&self.workload_definitions, id).await
    }

    async fn create_workload_definition(
        &self,
        definition: WorkloadDefinition,
    ) -> ApiResult<WorkloadDefinition> {
        self.create(&self.workload_definitions, definition).await
    }

    async fn update_workload_definition(
        &self,
        definition: WorkloadDefinition,
    ) -> ApiResult<WorkloadDefinition> {
        self.update(&self.workload_definitions, definition).await
    }

    async fn delete_workload_definition(&self, id: u64) -> ApiResult<()> {
        self.delete(&self.workload_definitions, id).await
    }

    async fn create_workload_resource_definitions(
        &self,
        definitions: Vec<WorkloadResourceDefinition>,
    ) -> ApiResult<Vec<WorkloadResourceDefinition>> {
        self.check_available()?;
        let mut rows = self.workload_resource_definitions.write().await;
        let prepared = definitions
            .into_iter()
            .try_fold(Vec::new(), |mut prepared, definition| {
                let ready = self.prepare(&rows, &prepared, definition)?;
                prepared.push(ready);
                Ok::<_, ApiError>(prepared)
            })?;
        for definition in &prepared {
            if let Some(id) = definition.id {
                rows.insert(id, definition.clone());
            }
        }
        Ok(prepared)
    }

    async fn get_workload_resource_definitions_by_workload_definition_id(
        &self,
        workload_definition_id: u64,
    ) -> ApiResult<Vec<WorkloadResourceDefinition>> {
        self.check_available()?;
        Ok(self
            .workload_resource_definitions
            .read()
            .await
            .values()
            .filter(|d| d.workload_definition_id == Some(workload_definition_id))
            .cloned()
            .collect())
    }

    async fn delete_workload_resource_definition(&self, id: u64) -> ApiResult<()> {
        self.delete(&self.workload_resource_definitions, id).await
    }

    async fn get_workload_instance(&self, id: u64) -> ApiResult<WorkloadInstance> {
        self.get(&self.workload_instances, id).await
    }

    async fn get_workload_instance_by_name(
        &self,
        name: &str,
    ) -> ApiResult<Option<WorkloadInstance>> {
        self.check_available()?;
        Ok(self
            .workload_instances
            .read()
            .await
            .values()
            .find(|instance| instance.name.as_deref() == Some(name))
            .cloned())
    }

    async fn create_workload_instance(
        &self,
        instance: WorkloadInstance,
    ) -> ApiResult<WorkloadInstance> {
        self.create(&self.workload_instances, instance).await
    }

    async fn update_workload_instance(
        &self,
        instance: WorkloadInstance,
    ) -> ApiResult<WorkloadInstance> {
        self.update(&self.workload_instances, instance).await
    }

    async fn delete_workload_instance(&self, id: u64) -> ApiResult<()> {
        self.delete(&self.workload_instances, id).await
    }

    async fn get_cluster_instance(&self, id: u64) -> ApiResult<ClusterInstance> {
        self.get(&self.cluster_instances, id).await
    }

    async fn create_cluster_instance(
        &self,
        cluster: ClusterInstance,
    ) -> ApiResult<ClusterInstance> {
        self.create(&self.cluster_instances, cluster).await
    }

    async fn get_ethereum_node_definition(&self, id: u64) -> ApiResult<EthereumNodeDefinition> {
        self.get(&self.ethereum_node_definitions, id).await
    }

    async fn create_ethereum_node_definition(
        &self,
        definition: EthereumNodeDefinition,
    ) -> ApiResult<EthereumNodeDefinition> {
        self.create(&self.ethereum_node_definitions, definition).await
    }

    async fn update_ethereum_node_definition(
        &self,
        definition: EthereumNodeDefinition,
    ) -> ApiResult<EthereumNodeDefinition> {
        self.update(&self.ethereum_node_definitions, definition).await
    }

    async fn delete_ethereum_node_definition(&self, id: u64) -> ApiResult<()> {
        self.delete(&self.ethereum_node_definitions, id).await
    }

    async fn get_ethereum_node_instance(&self, id: u64) -> ApiResult<EthereumNodeInstance> {
        self.get(&self.ethereum_node_instances, id).await
    }

    async fn create_ethereum_node_instance(
        &self,
        instance: EthereumNodeInstance,
    ) -> ApiResult<EthereumNodeInstance> {
        self.create(&self.ethereum_node_instances, instance).await
    }

    async fn update_ethereum_node_instance(
        &self,
        instance: EthereumNodeInstance,
    ) -> ApiResult<EthereumNodeInstance> {
        self.update(&self.ethereum_node_instances, instance).await
    }

    async fn delete_ethereum_node_instance(&self, id: u64) -> ApiResult<()> {
        self.delete(&self.ethereum_node_instances, id).await
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::time::Duration;

    use keel_events::{InMemoryBus, NotificationBus, WORKLOAD_DEFINITION_SUBJECT};
    use serde_json::json;

    use super::*;

    fn definition(name: &str) -> WorkloadDefinition {
        WorkloadDefinition {
            name: Some(name.to_string()),
            yaml_document: Some("kind: ConfigMap\n".to_string()),
            ..Default::default()
        }
    }

    fn resource(parent: u64, name: &str) -> WorkloadResourceDefinition {
        WorkloadResourceDefinition {
            json_definition: Some(json!({"kind": "ConfigMap", "metadata": {"name": name}})),
            workload_definition_id: Some(parent),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn should_assign_ids_and_default_reconciled_to_false() {
        let api = InMemoryApi::new();
        let first = api.create_workload_definition(definition("a")).await.unwrap();
        let second = api.create_workload_definition(definition("b")).await.unwrap();

        assert!(first.id.is_some());
        assert_ne!(first.id, second.id);
        assert_eq!(first.reconciled, Some(false));
    }

    #[tokio::test]
    async fn should_reject_duplicate_names() {
        let api = InMemoryApi::new();
        api.create_workload_definition(definition("web")).await.unwrap();
        let err = api
            .create_workload_definition(definition("web"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Conflict { .. }));
    }

    #[tokio::test]
    async fn should_force_reconciled_false_on_plain_update() {
        let api = InMemoryApi::new();
        let created = api.create_workload_definition(definition("web")).await.unwrap();
        let id = created.id.unwrap();

        let marked = api
            .update_workload_definition(WorkloadDefinition {
                id: Some(id),
                reconciled: Some(true),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(marked.reconciled, Some(true));

        let edited = api
            .update_workload_definition(WorkloadDefinition {
                id: Some(id),
                yaml_document: Some("kind: Secret\n".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(edited.reconciled, Some(false));
        assert_eq!(edited.name.as_deref(), Some("web"));
        assert_eq!(edited.yaml_document.as_deref(), Some("kind: Secret\n"));
    }

    #[tokio::test]
    async fn should_report_missing_objects_as_not_found() {
        let api = InMemoryApi::new();
        let err = api.get_workload_instance(42).await.unwrap_err();
        assert_eq!(err, ApiError::not_found("WorkloadInstance", 42));

        let update = api
            .update_workload_instance(WorkloadInstance {
                id: Some(42),
                ..Default::default()
            })
            .await;
        assert!(update.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn should_treat_delete_of_missing_object_as_success() {
        let api = InMemoryApi::new();
        assert!(api.delete_workload_resource_definition(99).await.is_ok());
    }

    #[tokio::test]
    async fn should_create_batch_all_or_nothing() {
        let api = InMemoryApi::new();
        let invalid = WorkloadResourceDefinition {
            workload_definition_id: Some(1),
            ..Default::default()
        };

        let err = api
            .create_workload_resource_definitions(vec![resource(1, "a"), invalid])
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Validation { .. }));
        assert_eq!(api.workload_resource_definition_count().await, 0);

        let created = api
            .create_workload_resource_definitions(vec![resource(1, "a"), resource(1, "b")])
            .await
            .unwrap();
        assert_eq!(created.len(), 2);
        let listed = api
            .get_workload_resource_definitions_by_workload_definition_id(1)
            .await
            .unwrap();
        assert_eq!(listed.len(), 2);
        assert!(api
            .get_workload_resource_definitions_by_workload_definition_id(2)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn should_publish_created_and_deleted_notifications() {
        let bus = InMemoryBus::new_arc();
        let api = InMemoryApi::new().with_notifications(bus.clone());

        let created = api.create_workload_definition(definition("web")).await.unwrap();
        api.update_workload_definition(WorkloadDefinition {
            id: created.id,
            name: Some("web-2".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
        api.delete_workload_definition(created.id.unwrap())
            .await
            .unwrap();

        let published = bus
            .published_matching(&WORKLOAD_DEFINITION_SUBJECT.filter())
            .await;
        let subjects: Vec<_> = published.iter().map(|m| m.subject.as_str()).collect();
        assert_eq!(
            subjects,
            vec![
                "workload.workload-definition.created",
                "workload.workload-definition.deleted"
            ]
        );

        let first = published.first().unwrap();
        let notif = Notification::<WorkloadDefinition>::from_bytes(&first.payload).unwrap();
        assert_eq!(notif.operation, Operation::Created);
        assert!(!notif.requeue);
        assert_eq!(notif.object.id, created.id);
    }

    #[tokio::test]
    async fn should_not_publish_for_resource_definitions() {
        let bus = InMemoryBus::new_arc();
        let api = InMemoryApi::new().with_notifications(bus.clone());
        api.create_workload_resource_definitions(vec![resource(1, "a")])
            .await
            .unwrap();
        assert!(bus.published().await.is_empty());
    }

    #[tokio::test]
    async fn should_publish_updates_when_enabled() {
        let bus = InMemoryBus::new_arc();
        let api = InMemoryApi::new()
            .with_notifications(bus.clone())
            .with_update_notifications(true);
        let mut sub = bus
            .subscribe("watcher", &WORKLOAD_DEFINITION_SUBJECT.filter())
            .await
            .unwrap();

        let created = api.create_workload_definition(definition("web")).await.unwrap();
        api.update_workload_definition(WorkloadDefinition {
            id: created.id,
            reconciled: Some(true),
            ..Default::default()
        })
        .await
        .unwrap();

        let wait = Duration::from_millis(50);
        let first = sub.fetch(wait).await.unwrap().unwrap();
        let second = sub.fetch(wait).await.unwrap().unwrap();
        assert!(first.subject.ends_with(".created"));
        assert!(second.subject.ends_with(".updated"));
    }

    #[tokio::test]
    async fn should_fail_every_call_while_unavailable() {
        let api = InMemoryApi::new();
        api.set_unavailable(true);
        let err = api.get_cluster_instance(1).await.unwrap_err();
        assert!(matches!(err, ApiError::Transport { .. }));
        assert!(api.delete_workload_instance(1).await.is_err());
    }

    #[tokio::test]
    async fn should_find_workload_instance_by_name() {
        let api = InMemoryApi::new();
        let created = api
            .create_workload_instance(WorkloadInstance {
                name: Some("geth-east".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        let found = api.get_workload_instance_by_name("geth-east").await.unwrap();
        let missing = api.get_workload_instance_by_name("geth-west").await.unwrap();

        assert_eq!(found.and_then(|i| i.id), created.id);
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn should_fail_only_the_next_update() {
        let api = InMemoryApi::new();
        let created = api.create_workload_definition(definition("web")).await.unwrap();
        let patch = WorkloadDefinition {
            id: created.id,
            reconciled: Some(true),
            ..Default::default()
        };

        api.fail_next_update();

        let err = api.update_workload_definition(patch.clone()).await.unwrap_err();
        assert!(matches!(err, ApiError::Transport { .. }));
        let updated = api.update_workload_definition(patch).await.unwrap();
        assert_eq!(updated.reconciled, Some(true));
    }
}
