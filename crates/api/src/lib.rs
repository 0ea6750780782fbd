//! Domain objects and API server access for keel controllers.
//!
//! Reconcilers never touch the relational store behind the API server; every
//! read and write goes through [`ControlPlaneApi`].
//!
//! - [`HttpApiClient`]: the production implementation over HTTP/JSON
//! - [`InMemoryApi`]: the same semantics in process, optionally publishing
//!   change notifications to a bus

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod api;
pub mod client;
pub mod error;
pub mod memory;
pub mod types;

pub use api::ControlPlaneApi;
pub use client::{ApiClientConfig, HttpApiClient};
pub use error::{ApiError, ApiResult};
pub use memory::InMemoryApi;
pub use types::{
    ApiObject, ClusterInstance, EthereumNodeDefinition, EthereumNodeInstance, WorkloadDefinition,
    WorkloadInstance, WorkloadResourceDefinition,
};
