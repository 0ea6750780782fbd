//! Notification envelope and subject routing.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Stream carrying every workload subject.
pub const WORKLOAD_STREAM_NAME: &str = "workloadStream";
/// Stream carrying every ethereum subject.
pub const ETHEREUM_STREAM_NAME: &str = "ethereumStream";

/// Workload definition change subjects.
pub const WORKLOAD_DEFINITION_SUBJECT: NotificationSubject =
    NotificationSubject::new("workload.workload-definition");
/// Workload instance change subjects.
pub const WORKLOAD_INSTANCE_SUBJECT: NotificationSubject =
    NotificationSubject::new("workload.workload-instance");
/// Ethereum node definition change subjects.
pub const ETHEREUM_NODE_DEFINITION_SUBJECT: NotificationSubject =
    NotificationSubject::new("ethereum.ethereum-node-definition");
/// Ethereum node instance change subjects.
pub const ETHEREUM_NODE_INSTANCE_SUBJECT: NotificationSubject =
    NotificationSubject::new("ethereum.ethereum-node-instance");

/// Kind of change a notification describes.
///
/// Unknown wire values decode into [`Operation::Unrecognized`] rather than
/// failing, so a consumer can log and requeue instead of dropping the message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Operation {
    Created,
    Updated,
    Deleted,
    Unrecognized(String),
}

impl Operation {
    /// Wire representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Created => "Created",
            Self::Updated => "Updated",
            Self::Deleted => "Deleted",
            Self::Unrecognized(other) => other,
        }
    }
}

impl From<String> for Operation {
    fn from(value: String) -> Self {
        match value.as_str() {
            "Created" => Self::Created,
            "Updated" => Self::Updated,
            "Deleted" => Self::Deleted,
            _ => Self::Unrecognized(value),
        }
    }
}

impl From<Operation> for String {
    fn from(value: Operation) -> Self {
        match value {
            Operation::Unrecognized(other) => other,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Change notification for one domain object.
///
/// A published notification is never modified; a requeue builds a new one
/// with [`Notification::requeued`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Notification<T> {
    pub operation: Operation,
    #[serde(default)]
    pub requeue: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_requeue_delay: Option<i64>,
    pub object: T,
}

impl<T> Notification<T> {
    /// Notification as published by the API server for a client mutation.
    pub const fn new(operation: Operation, object: T) -> Self {
        Self {
            operation,
            requeue: false,
            last_requeue_delay: None,
            object,
        }
    }

    /// Build the notification to republish after a failed or blocked attempt.
    pub fn requeued<U>(&self, delay_secs: i64, object: U) -> Notification<U> {
        Notification {
            operation: self.operation.clone(),
            requeue: true,
            last_requeue_delay: Some(delay_secs),
            object,
        }
    }
}

impl<T: Serialize> Notification<T> {
    /// Encode as JSON bytes for the bus.
    ///
    /// # Errors
    ///
    /// Returns an error if the embedded object cannot be serialized.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::serialization(e.to_string()))
    }
}

impl<T: DeserializeOwned> Notification<T> {
    /// Decode from bus bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedNotification`] if the bytes are not a
    /// notification carrying a `T`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| Error::malformed(e.to_string()))
    }
}

impl Notification<serde_json::Value> {
    /// Decode the embedded object into its concrete type.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedNotification`] if the object does not match `T`.
    pub fn decode_object<T: DeserializeOwned>(&self) -> Result<T> {
        T::deserialize(&self.object).map_err(|e| Error::malformed(e.to_string()))
    }
}

/// Subject family for one object type.
///
/// Notifications are published on `<root>.<operation>` and each reconciler
/// consumes `<root>.*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NotificationSubject {
    root: &'static str,
}

impl NotificationSubject {
    /// Create a subject family.
    #[must_use]
    pub const fn new(root: &'static str) -> Self {
        Self { root }
    }

    /// Subject root, e.g. `workload.workload-definition`.
    #[must_use]
    pub const fn root(&self) -> &'static str {
        self.root
    }

    /// Subject for created notifications.
    #[must_use]
    pub fn created(&self) -> String {
        self.for_operation(&Operation::Created)
    }

    /// Subject for deleted notifications.
    #[must_use]
    pub fn deleted(&self) -> String {
        self.for_operation(&Operation::Deleted)
    }

    /// Subject for an operation.
    #[must_use]
    pub fn for_operation(&self, operation: &Operation) -> String {
        format!("{}.{}", self.root, operation.as_str().to_lowercase())
    }

    /// Filter matching every operation of this object type.
    #[must_use]
    pub fn filter(&self) -> String {
        format!("{}.*", self.root)
    }

    /// Stream that carries this subject family.
    #[must_use]
    pub fn stream(&self) -> Option<&'static str> {
        stream_for_subject(self.root)
    }
}

/// Map a reconciler name to the subject family it consumes.
#[must_use]
pub fn subject_for_reconciler(reconciler_name: &str) -> Option<NotificationSubject> {
    match reconciler_name {
        "WorkloadDefinitionReconciler" => Some(WORKLOAD_DEFINITION_SUBJECT),
        "WorkloadInstanceReconciler" => Some(WORKLOAD_INSTANCE_SUBJECT),
        "EthereumNodeDefinitionReconciler" => Some(ETHEREUM_NODE_DEFINITION_SUBJECT),
        "EthereumNodeInstanceReconciler" => Some(ETHEREUM_NODE_INSTANCE_SUBJECT),
        _ => None,
    }
}

/// Stream that carries a subject (or subject filter).
#[must_use]
pub fn stream_for_subject(subject: &str) -> Option<&'static str> {
    match subject.split('.').next() {
        Some("workload") => Some(WORKLOAD_STREAM_NAME),
        Some("ethereum") => Some(ETHEREUM_STREAM_NAME),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use serde_json::json;

    use super::*;

    #[test]
    fn notification_uses_pascal_case_wire_names() {
        let notif = Notification::new(Operation::Created, json!({"ID": 1}));
        let value: serde_json::Value = serde_json::from_slice(&notif.to_bytes().unwrap()).unwrap();

        assert_eq!(value["Operation"], "Created");
        assert_eq!(value["Requeue"], false);
        assert!(value.get("LastRequeueDelay").is_none());
        assert_eq!(value["Object"]["ID"], 1);
    }

    #[test]
    fn unknown_operation_decodes_as_unrecognized() {
        let bytes = br#"{"Operation":"Patched","Requeue":false,"Object":{}}"#;
        let notif = Notification::<serde_json::Value>::from_bytes(bytes).unwrap();
        assert_eq!(notif.operation, Operation::Unrecognized("Patched".to_string()));
        assert_eq!(String::from(notif.operation), "Patched");
    }

    #[test]
    fn garbage_is_malformed() {
        let result = Notification::<serde_json::Value>::from_bytes(b"not json");
        assert!(matches!(result, Err(Error::MalformedNotification { .. })));
    }

    #[test]
    fn requeued_builds_a_new_notification() {
        let original = Notification::new(Operation::Deleted, json!({"ID": 3}));
        let next = original.requeued(8, json!({"ID": 3, "Name": "fresh"}));

        assert!(!original.requeue);
        assert_eq!(original.last_requeue_delay, None);
        assert!(next.requeue);
        assert_eq!(next.last_requeue_delay, Some(8));
        assert_eq!(next.operation, Operation::Deleted);
        assert_eq!(next.object["Name"], "fresh");
    }

    #[test]
    fn decode_object_into_concrete_type() {
        #[derive(Deserialize)]
        struct Thing {
            #[serde(rename = "ID")]
            id: u64,
        }

        let notif = Notification::new(Operation::Created, json!({"ID": 9}));
        let thing: Thing = notif.decode_object().unwrap();
        assert_eq!(thing.id, 9);

        let wrong = Notification::new(Operation::Created, json!({"ID": "nine"}));
        assert!(wrong.decode_object::<Thing>().is_err());
    }

    #[test]
    fn subjects_are_derived_from_root() {
        assert_eq!(
            WORKLOAD_DEFINITION_SUBJECT.created(),
            "workload.workload-definition.created"
        );
        assert_eq!(
            WORKLOAD_INSTANCE_SUBJECT.deleted(),
            "workload.workload-instance.deleted"
        );
        assert_eq!(
            ETHEREUM_NODE_INSTANCE_SUBJECT.filter(),
            "ethereum.ethereum-node-instance.*"
        );
        assert_eq!(WORKLOAD_DEFINITION_SUBJECT.stream(), Some(WORKLOAD_STREAM_NAME));
        assert_eq!(
            ETHEREUM_NODE_DEFINITION_SUBJECT.stream(),
            Some(ETHEREUM_STREAM_NAME)
        );
    }

    #[test]
    fn reconciler_names_map_to_subjects() {
        assert_eq!(
            subject_for_reconciler("WorkloadDefinitionReconciler"),
            Some(WORKLOAD_DEFINITION_SUBJECT)
        );
        assert_eq!(
            subject_for_reconciler("EthereumNodeInstanceReconciler"),
            Some(ETHEREUM_NODE_INSTANCE_SUBJECT)
        );
        assert_eq!(subject_for_reconciler("GatewayReconciler"), None);
        assert_eq!(stream_for_subject("gateway.thing.created"), None);
    }
}
