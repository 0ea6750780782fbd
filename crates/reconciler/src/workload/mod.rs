//! Reconcilers for the workload object family.

pub mod definition;
pub mod instance;

pub use definition::{
    resource_definitions_from_yaml, workload_definition_created, workload_definition_deleted,
    WorkloadDefinitionReconciler, WORKLOAD_DEFINITION_RECONCILER,
};
pub use instance::{WorkloadInstanceReconciler, WORKLOAD_INSTANCE_RECONCILER};
