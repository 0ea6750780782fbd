//! Domain objects persisted by the API server.
//!
//! Every field is optional on the wire so the same structs serve as full
//! representations and as partial PATCH bodies. `ID` is assigned by the server
//! and `Reconciled` is written only by controllers.

use keel_events::{
    NotificationSubject, ETHEREUM_NODE_DEFINITION_SUBJECT, ETHEREUM_NODE_INSTANCE_SUBJECT,
    WORKLOAD_DEFINITION_SUBJECT, WORKLOAD_INSTANCE_SUBJECT,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Common behaviour of persisted objects.
pub trait ApiObject: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    /// Human-readable kind, used in errors and logs.
    const KIND: &'static str;

    /// Route segment under `/v0/`.
    const PATH: &'static str;

    /// Change subjects the API server publishes on, if any.
    const SUBJECT: Option<NotificationSubject>;

    fn id(&self) -> Option<u64>;

    fn set_id(&mut self, id: u64);

    fn reconciled(&self) -> Option<bool>;

    fn set_reconciled(&mut self, reconciled: Option<bool>);

    /// Overlay the set fields of `patch` onto `self`.
    fn merge(&mut self, patch: &Self);
}

macro_rules! merge_fields {
    ($target:ident, $patch:ident, $($field:ident),+) => {
        $(
            if $patch.$field.is_some() {
                $target.$field.clone_from(&$patch.$field);
            }
        )+
    };
}

macro_rules! api_object {
    ($ty:ty, $kind:literal, $path:literal, $subject:expr, [$($field:ident),+]) => {
        impl ApiObject for $ty {
            const KIND: &'static str = $kind;
            const PATH: &'static str = $path;
            const SUBJECT: Option<NotificationSubject> = $subject;

            fn id(&self) -> Option<u64> {
                self.id
            }

            fn set_id(&mut self, id: u64) {
                self.id = Some(id);
            }

            fn reconciled(&self) -> Option<bool> {
                self.reconciled
            }

            fn set_reconciled(&mut self, reconciled: Option<bool>) {
                self.reconciled = reconciled;
            }

            fn merge(&mut self, patch: &Self) {
                merge_fields!(self, patch, $($field),+);
            }
        }
    };
}

/// Multi-document YAML manifest describing a workload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadDefinition {
    #[serde(rename = "ID", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(rename = "Name", default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "YAMLDocument", default, skip_serializing_if = "Option::is_none")]
    pub yaml_document: Option<String>,
    #[serde(rename = "Reconciled", default, skip_serializing_if = "Option::is_none")]
    pub reconciled: Option<bool>,
}

/// One runtime resource derived from one YAML document of a definition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadResourceDefinition {
    #[serde(rename = "ID", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(rename = "JSONDefinition", default, skip_serializing_if = "Option::is_none")]
    pub json_definition: Option<serde_json::Value>,
    #[serde(
        rename = "WorkloadDefinitionID",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub workload_definition_id: Option<u64>,
    #[serde(rename = "Reconciled", default, skip_serializing_if = "Option::is_none")]
    pub reconciled: Option<bool>,
}

/// A workload definition deployed to a cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadInstance {
    #[serde(rename = "ID", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(rename = "Name", default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(
        rename = "ClusterInstanceID",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub cluster_instance_id: Option<u64>,
    #[serde(
        rename = "WorkloadDefinitionID",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub workload_definition_id: Option<u64>,
    #[serde(rename = "Reconciled", default, skip_serializing_if = "Option::is_none")]
    pub reconciled: Option<bool>,
}

/// A runtime target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterInstance {
    #[serde(rename = "ID", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(rename = "Name", default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Kubeconfig context used to reach the cluster.
    #[serde(rename = "KubeContext", default, skip_serializing_if = "Option::is_none")]
    pub kube_context: Option<String>,
    #[serde(rename = "Reconciled", default, skip_serializing_if = "Option::is_none")]
    pub reconciled: Option<bool>,
}

/// Template for ethereum nodes, backed by a workload definition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EthereumNodeDefinition {
    #[serde(rename = "ID", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(rename = "Name", default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "Network", default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    #[serde(
        rename = "WorkloadDefinitionID",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub workload_definition_id: Option<u64>,
    #[serde(rename = "Reconciled", default, skip_serializing_if = "Option::is_none")]
    pub reconciled: Option<bool>,
}

/// An ethereum node running on a cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EthereumNodeInstance {
    #[serde(rename = "ID", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(rename = "Name", default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(
        rename = "EthereumNodeDefinitionID",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub ethereum_node_definition_id: Option<u64>,
    #[serde(
        rename = "ClusterInstanceID",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub cluster_instance_id: Option<u64>,
    /// Workload instance created for this node.
    #[serde(
        rename = "WorkloadInstanceID",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub workload_instance_id: Option<u64>,
    #[serde(rename = "Reconciled", default, skip_serializing_if = "Option::is_none")]
    pub reconciled: Option<bool>,
}

api_object!(
    WorkloadDefinition,
    "WorkloadDefinition",
    "workload-definitions",
    Some(WORKLOAD_DEFINITION_SUBJECT),
    [name, yaml_document]
);
api_object!(
    WorkloadResourceDefinition,
    "WorkloadResourceDefinition",
    "workload-resource-definitions",
    None,
    [json_definition, workload_definition_id]
);
api_object!(
    WorkloadInstance,
    "WorkloadInstance",
    "workload-instances",
    Some(WORKLOAD_INSTANCE_SUBJECT),
    [name, cluster_instance_id, workload_definition_id]
);
api_object!(
    ClusterInstance,
    "ClusterInstance",
    "cluster-instances",
    None,
    [name, kube_context]
);
api_object!(
    EthereumNodeDefinition,
    "EthereumNodeDefinition",
    "ethereum-node-definitions",
    Some(ETHEREUM_NODE_DEFINITION_SUBJECT),
    [name, network, workload_definition_id]
);
api_object!(
    EthereumNodeInstance,
    "EthereumNodeInstance",
    "ethereum-node-instances",
    Some(ETHEREUM_NODE_INSTANCE_SUBJECT),
    [
        name,
        ethereum_node_definition_id,
        cluster_instance_id,
        workload_instance_id
    ]
);

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use serde_json::json;

    use super::*;

    #[test]
    fn wire_names_match_api_server() {
        let def = WorkloadDefinition {
            id: Some(1),
            name: Some("web".to_string()),
            yaml_document: Some("kind: A\n".to_string()),
            reconciled: None,
        };
        let value = serde_json::to_value(&def).unwrap();
        assert_eq!(
            value,
            json!({"ID": 1, "Name": "web", "YAMLDocument": "kind: A\n"})
        );
    }

    #[test]
    fn missing_fields_decode_as_none() {
        let inst: WorkloadInstance = serde_json::from_value(json!({"ID": 5})).unwrap();
        assert_eq!(inst.id, Some(5));
        assert_eq!(inst.workload_definition_id, None);
        assert_eq!(inst.reconciled, None);
    }

    #[test]
    fn merge_overlays_only_set_fields() {
        let mut node = EthereumNodeInstance {
            id: Some(2),
            name: Some("geth".to_string()),
            ethereum_node_definition_id: Some(1),
            cluster_instance_id: Some(3),
            workload_instance_id: None,
            reconciled: Some(true),
        };
        let patch = EthereumNodeInstance {
            workload_instance_id: Some(9),
            ..Default::default()
        };

        node.merge(&patch);

        assert_eq!(node.name.as_deref(), Some("geth"));
        assert_eq!(node.workload_instance_id, Some(9));
        // merge leaves Reconciled to the caller
        assert_eq!(node.reconciled, Some(true));
    }

    #[test]
    fn subjects_only_for_notifying_kinds() {
        assert!(WorkloadDefinition::SUBJECT.is_some());
        assert!(WorkloadResourceDefinition::SUBJECT.is_none());
        assert!(ClusterInstance::SUBJECT.is_none());
        assert_eq!(WorkloadInstance::PATH, "workload-instances");
    }
}
