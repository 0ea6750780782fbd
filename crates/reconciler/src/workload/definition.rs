//! Workload definition reconciliation.
//!
//! A definition's YAML manifest holds one or more documents; each becomes one
//! workload resource definition. Deleting the definition deletes them again.

use std::sync::Arc;

use async_trait::async_trait;
use keel_api::{ControlPlaneApi, WorkloadDefinition, WorkloadResourceDefinition};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::r#loop::ObjectReconciler;

/// Reconciler name for workload definitions.
pub const WORKLOAD_DEFINITION_RECONCILER: &str = "WorkloadDefinitionReconciler";

/// Split a multi-document YAML manifest into resource definitions for `parent_id`.
///
/// Every document is converted to JSON before anything is returned, so one bad
/// document yields an error and no definitions. Merge keys (`<<`) are resolved
/// first. Empty documents are skipped.
///
/// # Errors
///
/// Returns [`Error::ResourceDefinitionConstruction`] wrapping the parse or
/// conversion failure.
pub fn resource_definitions_from_yaml(
    parent_id: u64,
    yaml_document: &str,
) -> Result<Vec<WorkloadResourceDefinition>> {
    let definitions = serde_yaml::Deserializer::from_str(yaml_document)
        .enumerate()
        .map(|(index, document)| {
            let invalid =
                |e: &dyn std::fmt::Display| Error::construction(format!("document {index}: {e}"));
            let mut yaml = serde_yaml::Value::deserialize(document).map_err(|e| invalid(&e))?;
            yaml.apply_merge().map_err(|e| invalid(&e))?;
            serde_json::to_value(&yaml).map_err(|e| invalid(&e))
        })
        .filter(|parsed| !matches!(parsed, Ok(Value::Null)))
        .map(|parsed| {
            parsed.map(|json_definition| WorkloadResourceDefinition {
                json_definition: Some(json_definition),
                workload_definition_id: Some(parent_id),
                ..Default::default()
            })
        })
        .collect::<Result<Vec<_>>>()?;

    if definitions.is_empty() {
        return Err(Error::construction("manifest contains no YAML documents"));
    }
    Ok(definitions)
}

/// Create one resource definition per YAML document of `definition`.
///
/// Definitions already recorded for this parent (from an earlier attempt that
/// failed later on) are returned instead of being created twice.
///
/// # Errors
///
/// Returns a construction error for a bad manifest, or the API error if the
/// batch create fails.
pub async fn workload_definition_created(
    api: &dyn ControlPlaneApi,
    definition: &WorkloadDefinition,
) -> Result<Vec<WorkloadResourceDefinition>> {
    let parent_id = definition
        .id
        .ok_or_else(|| Error::missing_field("WorkloadDefinition", "ID"))?;
    let yaml_document = definition
        .yaml_document
        .as_deref()
        .ok_or_else(|| Error::missing_field("WorkloadDefinition", "YAMLDocument"))?;

    let resources = resource_definitions_from_yaml(parent_id, yaml_document)?;

    let existing = api
        .get_workload_resource_definitions_by_workload_definition_id(parent_id)
        .await?;
    if !existing.is_empty() {
        debug!(
            workload_definition_id = parent_id,
            count = existing.len(),
            "Resource definitions already exist"
        );
        return Ok(existing);
    }

    let created = api.create_workload_resource_definitions(resources).await?;
    info!(
        workload_definition_id = parent_id,
        count = created.len(),
        "Created workload resource definitions"
    );
    Ok(created)
}

/// Delete every resource definition of `definition`.
///
/// Stops at the first failure; children deleted before it stay deleted, and a
/// retry skips them because deleting a missing object succeeds.
///
/// # Errors
///
/// Returns [`Error::ResourceDeletion`] naming the child that could not be deleted.
pub async fn workload_definition_deleted(
    api: &dyn ControlPlaneApi,
    definition: &WorkloadDefinition,
) -> Result<()> {
    let parent_id = definition
        .id
        .ok_or_else(|| Error::missing_field("WorkloadDefinition", "ID"))?;

    let resources = api
        .get_workload_resource_definitions_by_workload_definition_id(parent_id)
        .await?;

    for resource in &resources {
        let Some(resource_id) = resource.id else {
            continue;
        };
        api.delete_workload_resource_definition(resource_id)
            .await
            .map_err(|e| Error::resource_deletion(resource_id, e.to_string()))?;
    }

    info!(
        workload_definition_id = parent_id,
        count = resources.len(),
        "Deleted workload resource definitions"
    );
    Ok(())
}

/// Reconciles workload definitions into workload resource definitions.
pub struct WorkloadDefinitionReconciler {
    api: Arc<dyn ControlPlaneApi>,
}

impl WorkloadDefinitionReconciler {
    #[must_use]
    pub fn new(api: Arc<dyn ControlPlaneApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl ObjectReconciler for WorkloadDefinitionReconciler {
    type Object = WorkloadDefinition;
    const NAME: &'static str = WORKLOAD_DEFINITION_RECONCILER;

    async fn refetch(&self, id: u64) -> Result<WorkloadDefinition> {
        Ok(self.api.get_workload_definition(id).await?)
    }

    async fn on_created(&self, object: &WorkloadDefinition) -> Result<()> {
        workload_definition_created(self.api.as_ref(), object)
            .await
            .map(|_| ())
    }

    async fn on_deleted(&self, object: &WorkloadDefinition) -> Result<()> {
        workload_definition_deleted(self.api.as_ref(), object).await
    }

    async fn mark_reconciled(&self, object: &WorkloadDefinition) -> Result<()> {
        let id = object
            .id
            .ok_or_else(|| Error::missing_field("WorkloadDefinition", "ID"))?;
        self.api
            .update_workload_definition(WorkloadDefinition {
                id: Some(id),
                reconciled: Some(true),
                ..Default::default()
            })
            .await?;
        Ok(())
    }
}
