//! Error types for the reconciler crate.
//!
//! Handlers return these to the reconcile loop, which is the only place that
//! decides on lock release and requeue.

use keel_api::ApiError;
use thiserror::Error;

/// Result type alias for reconciler operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Reconciler error types.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A workload definition's manifest could not be turned into resource definitions.
    #[error("failed to construct workload resource definitions: {reason}")]
    ResourceDefinitionConstruction { reason: String },

    /// Deleting one workload resource definition failed.
    #[error("failed to delete workload resource definition {resource_id}: {reason}")]
    ResourceDeletion { resource_id: u64, reason: String },

    /// A workload definition has no resource definitions to act on.
    #[error("no workload resource definitions found for workload definition {workload_definition_id}")]
    NoResourceDefinitions { workload_definition_id: u64 },

    /// The parent object has not been reconciled yet.
    #[error("{kind} {id} is not reconciled yet")]
    DependencyNotReady { kind: &'static str, id: u64 },

    /// A stored manifest is unusable.
    #[error("invalid manifest in workload resource definition {resource_id}: {reason}")]
    InvalidResource { resource_id: u64, reason: String },

    /// A required field was not set on an object.
    #[error("{kind} is missing {field}")]
    MissingField {
        kind: &'static str,
        field: &'static str,
    },

    /// Talking to the target runtime failed.
    #[error("runtime error: {reason}")]
    Runtime { reason: String },

    /// The notification carried an operation this reconciler does not handle.
    #[error("unrecognized operation {operation}")]
    UnrecognizedOperation { operation: String },

    /// No subject is routed to this reconciler name.
    #[error("no notification subject for reconciler {name}")]
    UnknownReconciler { name: String },

    /// API server call failed.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// Bus or lock store call failed.
    #[error(transparent)]
    Events(#[from] keel_events::Error),
}

impl Error {
    /// Create a resource definition construction error.
    pub fn construction(reason: impl Into<String>) -> Self {
        Self::ResourceDefinitionConstruction {
            reason: reason.into(),
        }
    }

    /// Create a resource deletion error.
    pub fn resource_deletion(resource_id: u64, reason: impl Into<String>) -> Self {
        Self::ResourceDeletion {
            resource_id,
            reason: reason.into(),
        }
    }

    /// Create an invalid resource error.
    pub fn invalid_resource(resource_id: u64, reason: impl Into<String>) -> Self {
        Self::InvalidResource {
            resource_id,
            reason: reason.into(),
        }
    }

    /// Create a missing field error.
    #[must_use]
    pub const fn missing_field(kind: &'static str, field: &'static str) -> Self {
        Self::MissingField { kind, field }
    }

    /// Create a runtime error.
    pub fn runtime(reason: impl Into<String>) -> Self {
        Self::Runtime {
            reason: reason.into(),
        }
    }

    /// Whether the error is the API reporting a missing object.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::Api(e) if e.is_not_found())
    }

    /// Whether the error is an expected wait on another object.
    #[must_use]
    pub const fn is_dependency_wait(&self) -> bool {
        matches!(
            self,
            Self::DependencyNotReady { .. } | Self::NoResourceDefinitions { .. }
        )
    }
}
