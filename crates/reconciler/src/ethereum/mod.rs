//! Reconcilers for ethereum nodes, layered on the workload reconcilers.
//!
//! A node definition points at a workload definition; a node instance becomes
//! a workload instance of that definition on the node's cluster.

pub mod definition;
pub mod instance;

pub use definition::{EthereumNodeDefinitionReconciler, ETHEREUM_NODE_DEFINITION_RECONCILER};
pub use instance::{EthereumNodeInstanceReconciler, ETHEREUM_NODE_INSTANCE_RECONCILER};
