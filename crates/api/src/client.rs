//! HTTP client for the API server.
//!
//! Objects live under `/v0/<plural>`. Responses wrap results in a
//! `{"Data": [...]}` envelope; single-object calls take the first element.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, Response, StatusCode};
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use url::Url;

use crate::api::ControlPlaneApi;
use crate::error::{ApiError, ApiResult};
use crate::types::{
    ApiObject, ClusterInstance, EthereumNodeDefinition, EthereumNodeInstance, WorkloadDefinition,
    WorkloadInstance, WorkloadResourceDefinition,
};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection settings for [`HttpApiClient`].
#[derive(Debug, Clone)]
pub struct ApiClientConfig {
    /// Root URL of the API server, e.g. `http://127.0.0.1:1323`.
    pub base_url: Url,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl ApiClientConfig {
    /// Settings for `base_url` with the default timeout.
    #[must_use]
    pub const fn new(base_url: Url) -> Self {
        Self {
            base_url,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Parse `base_url` into settings.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Config`] if the URL does not parse.
    pub fn parse(base_url: &str) -> ApiResult<Self> {
        Url::parse(base_url)
            .map(Self::new)
            .map_err(|e| ApiError::config(format!("invalid API URL {base_url}: {e}")))
    }

    /// Override the per-request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Deserialize)]
struct Envelope<T> {
    #[serde(rename = "Data", default = "Vec::new")]
    data: Vec<T>,
}

/// [`ControlPlaneApi`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpApiClient {
    config: Arc<ApiClientConfig>,
    http_client: reqwest::Client,
}

impl HttpApiClient {
    /// Create a client with the given settings.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Config`] if the HTTP client cannot be built.
    pub fn with_config(config: ApiClientConfig) -> ApiResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ApiError::config(e.to_string()))?;

        Ok(Self {
            config: Arc::new(config),
            http_client,
        })
    }

    /// Create a client for `base_url` with default settings.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Config`] if the URL is invalid.
    pub fn with_url(base_url: &str) -> ApiResult<Self> {
        Self::with_config(ApiClientConfig::parse(base_url)?)
    }

    /// Resolve `path` below the base URL, keeping any prefix the base carries.
    fn url(&self, path: &str) -> ApiResult<Url> {
        let mut base = self.config.base_url.clone();
        if !base.path().ends_with('/') {
            let prefix = format!("{}/", base.path());
            base.set_path(&prefix);
        }
        base.join(path)
            .map_err(|e| ApiError::config(format!("invalid API path {path}: {e}")))
    }

    fn object_url<T: ApiObject>(&self, id: u64) -> ApiResult<Url> {
        self.url(&format!("v0/{}/{id}", T::PATH))
    }

    fn collection_url<T: ApiObject>(&self) -> ApiResult<Url> {
        self.url(&format!("v0/{}", T::PATH))
    }

    async fn send<B: Serialize + Sync + ?Sized>(
        &self,
        method: Method,
        url: Url,
        body: Option<&B>,
    ) -> ApiResult<Response> {
        debug!(%method, %url, "API request");
        let request = self.http_client.request(method, url);
        let request = match body {
            Some(body) => request.json(body),
            None => request,
        };
        Ok(request.send().await?)
    }

    async fn decode_all<T: ApiObject>(response: Response, id: Option<u64>) -> ApiResult<Vec<T>> {
        let response = check_status::<T>(response, id).await?;
        let envelope: Envelope<T> = response.json().await?;
        Ok(envelope.data)
    }

    async fn decode_one<T: ApiObject>(response: Response, id: Option<u64>) -> ApiResult<T> {
        Self::decode_all::<T>(response, id)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| match id {
                Some(id) => ApiError::not_found(T::KIND, id),
                None => ApiError::decode(format!("empty {} response", T::KIND)),
            })
    }

    async fn get<T: ApiObject>(&self, id: u64) -> ApiResult<T> {
        let response = self
            .send::<()>(Method::GET, self.object_url::<T>(id)?, None)
            .await?;
        Self::decode_one(response, Some(id)).await
    }

    async fn create<T: ApiObject>(&self, object: T) -> ApiResult<T> {
        let response = self
            .send(Method::POST, self.collection_url::<T>()?, Some(&object))
            .await?;
        Self::decode_one(response, None).await
    }

    async fn update<T: ApiObject>(&self, object: T) -> ApiResult<T> {
        let id = object
            .id()
            .ok_or_else(|| ApiError::validation(format!("{} update requires an ID", T::KIND)))?;
        let response = self
            .send(Method::PATCH, self.object_url::<T>(id)?, Some(&object))
            .await?;
        Self::decode_one(response, Some(id)).await
    }

    async fn delete<T: ApiObject>(&self, id: u64) -> ApiResult<()> {
        let response = self
            .send::<()>(Method::DELETE, self.object_url::<T>(id)?, None)
            .await?;
        match check_status::<T>(response, Some(id)).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => {
                debug!(kind = T::KIND, id, "Delete of missing object treated as success");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// Map a non-success status to the matching [`ApiError`].
async fn check_status<T: ApiObject>(response: Response, id: Option<u64>) -> ApiResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::NOT_FOUND => match id {
            Some(id) => ApiError::not_found(T::KIND, id),
            None => ApiError::Server {
                status: status.as_u16(),
                body,
            },
        },
        StatusCode::CONFLICT => ApiError::conflict(body),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => ApiError::validation(body),
        _ => ApiError::Server {
            status: status.as_u16(),
            body,
        },
    })
}

#[async_trait]
impl ControlPlaneApi for HttpApiClient {
    async fn get_workload_definition(&self, id: u64) -> ApiResult<WorkloadDefinition> {
        self.get(id).await
    }

    async fn create_workload_definition(
        &self,
        definition: WorkloadDefinition,
    ) -> ApiResult<WorkloadDefinition> {
        self.create(definition).await
    }

    async fn update_workload_definition(
        &self,
        definition: WorkloadDefinition,
    ) -> ApiResult<WorkloadDefinition> {
        self.update(definition).await
    }

    async fn delete_workload_definition(&self, id: u64) -> ApiResult<()> {
        self.delete::<WorkloadDefinition>(id).await
    }

    async fn create_workload_resource_definitions(
        &self,
        definitions: Vec<WorkloadResourceDefinition>,
    ) -> ApiResult<Vec<WorkloadResourceDefinition>> {
        let response = self
            .send(
                Method::POST,
                self.collection_url::<WorkloadResourceDefinition>()?,
                Some(&definitions),
            )
            .await?;
        Self::decode_all(response, None).await
    }

    async fn get_workload_resource_definitions_by_workload_definition_id(
        &self,
        workload_definition_id: u64,
    ) -> ApiResult<Vec<WorkloadResourceDefinition>> {
        let mut url = self.collection_url::<WorkloadResourceDefinition>()?;
        url.query_pairs_mut().append_pair(
            "workloaddefinitionid",
            &workload_definition_id.to_string(),
        );
        let response = self.send::<()>(Method::GET, url, None).await?;
        Self::decode_all(response, None).await
    }

    async fn delete_workload_resource_definition(&self, id: u64) -> ApiResult<()> {
        self.delete::<WorkloadResourceDefinition>(id).await
    }

    async fn get_workload_instance(&self, id: u64) -> ApiResult<WorkloadInstance> {
        self.get(id).await
    }

    async fn get_workload_instance_by_name(
        &self,
        name: &str,
    ) -> ApiResult<Option<WorkloadInstance>> {
        let mut url = self.collection_url::<WorkloadInstance>()?;
        url.query_pairs_mut().append_pair("name", name);
        let response = self.send::<()>(Method::GET, url, None).await?;
        Ok(Self::decode_all::<WorkloadInstance>(response, None)
            .await?
            .into_iter()
            .find(|instance| instance.name.as_deref() == Some(name)))
    }

    async fn create_workload_instance(
        &self,
        instance: WorkloadInstance,
    ) -> ApiResult<WorkloadInstance> {
        self.create(instance).await
    }

    async fn update_workload_instance(
        &self,
        instance: WorkloadInstance,
    ) -> ApiResult<WorkloadInstance> {
        self.update(instance).await
    }

    async fn delete_workload_instance(&self, id: u64) -> ApiResult<()> {
        self.delete::<WorkloadInstance>(id).await
    }

    async fn get_cluster_instance(&self, id: u64) -> ApiResult<ClusterInstance> {
        self.get(id).await
    }

    async fn create_cluster_instance(
        &self,
        cluster: ClusterInstance,
    ) -> ApiResult<ClusterInstance> {
        self.create(cluster).await
    }

    async fn get_ethereum_node_definition(&self, id: u64) -> ApiResult<EthereumNodeDefinition> {
        self.get(id).await
    }

    async fn create_ethereum_node_definition(
        &self,
        definition: EthereumNodeDefinition,
    ) -> ApiResult<EthereumNodeDefinition> {
        self.create(definition).await
    }

    async fn update_ethereum_node_definition(
        &self,
        definition: EthereumNodeDefinition,
    ) -> ApiResult<EthereumNodeDefinition> {
        self.update(definition).await
    }

    async fn delete_ethereum_node_definition(&self, id: u64) -> ApiResult<()> {
        self.delete::<EthereumNodeDefinition>(id).await
    }

    async fn get_ethereum_node_instance(&self, id: u64) -> ApiResult<EthereumNodeInstance> {
        self.get(id).await
    }

    async fn create_ethereum_node_instance(
        &self,
        instance: EthereumNodeInstance,
    ) -> ApiResult<EthereumNodeInstance> {
        self.create(instance).await
    }

    async fn update_ethereum_node_instance(
        &self,
        instance: EthereumNodeInstance,
    ) -> ApiResult<EthereumNodeInstance> {
        self.update(instance).await
    }

    async fn delete_ethereum_node_instance(&self, id: u64) -> ApiResult<()> {
        self.delete::<EthereumNodeInstance>(id).await
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_invalid_base_url_is_config_error() {
        let err = ApiClientConfig::parse("not a url").unwrap_err();
        assert!(matches!(err, ApiError::Config { .. }));
    }

    #[test]
    fn test_object_urls_use_versioned_routes() {
        let client = HttpApiClient::with_url("http://api.local:1323").unwrap();
        assert_eq!(
            client.object_url::<WorkloadDefinition>(7).unwrap().as_str(),
            "http://api.local:1323/v0/workload-definitions/7"
        );
        assert_eq!(
            client
                .collection_url::<EthereumNodeInstance>()
                .unwrap()
                .as_str(),
            "http://api.local:1323/v0/ethereum-node-instances"
        );
    }

    #[test]
    fn test_base_url_path_prefix_is_kept() {
        let with_slash = HttpApiClient::with_url("http://host/keel/").unwrap();
        let without_slash = HttpApiClient::with_url("http://host/keel").unwrap();

        for client in [with_slash, without_slash] {
            assert_eq!(
                client.object_url::<WorkloadInstance>(4).unwrap().as_str(),
                "http://host/keel/v0/workload-instances/4"
            );
        }
    }

    #[test]
    fn test_timeout_override() {
        let config = ApiClientConfig::parse("http://localhost")
            .unwrap()
            .with_timeout(Duration::from_secs(2));
        assert_eq!(config.timeout, Duration::from_secs(2));
    }
}
