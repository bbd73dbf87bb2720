//! Involved-object metadata lookups over the REST API.
//!
//! Kinds are mapped to resources through API discovery. Each group-version's
//! resource list is fetched once and refreshed when a kind is missing from it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use herald_core::{Labels, ObjectReference};
use herald_ingest::{FetchError, MetadataFetcher, ObjectMetadata};
use reqwest::header::ACCEPT;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::client::{api_status, KubeClient};

/// Ask for metadata only; servers without support fall back to the full object.
const PARTIAL_METADATA: &str =
    "application/json;as=PartialObjectMetadata;g=meta.k8s.io;v=v1,application/json";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PartialObject {
    metadata: PartialMeta,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PartialMeta {
    labels: Option<Labels>,
    annotations: Option<Labels>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ResourceList {
    resources: Vec<ResourceEntry>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ResourceEntry {
    name: String,
    kind: String,
    namespaced: bool,
}

/// A discovered resource: its plural name and scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResource {
    pub name: String,
    pub namespaced: bool,
}

/// Kind to resource, for one group-version.
type Resources = HashMap<String, ApiResource>;

/// Fetches labels and annotations of an event's involved object.
pub struct ApiMetadataFetcher {
    client: KubeClient,
    discovered: Mutex<HashMap<String, Arc<Resources>>>,
}

impl ApiMetadataFetcher {
    pub fn new(client: KubeClient) -> Self {
        Self {
            client,
            discovered: Mutex::new(HashMap::new()),
        }
    }

    /// Resource serving `reference.kind`, if the API server knows one.
    async fn resolve(&self, reference: &ObjectReference) -> Result<Option<ApiResource>, FetchError> {
        let group_version = group_version_path(&reference.api_version);
        let cached = self.lock().get(&group_version).cloned();
        if let Some(resource) = cached.as_ref().and_then(|r| r.get(&reference.kind)) {
            return Ok(Some(resource.clone()));
        }

        let resources = Arc::new(self.discover(&group_version).await?);
        let resource = resources.get(&reference.kind).cloned();
        self.lock().insert(group_version, resources);
        Ok(resource)
    }

    async fn discover(&self, group_version: &str) -> Result<Resources, FetchError> {
        let url = self.client.url(group_version, &[]);
        debug!(%url, "discovering API resources");

        let response = self
            .client
            .request(Method::GET, url)
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Resources::new());
        }
        if !response.status().is_success() {
            let status = api_status(response).await;
            return Err(FetchError::Status {
                status: status.status,
                message: status.message,
            });
        }

        let list: ResourceList = response
            .json()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        Ok(index(list))
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<Resources>>> {
        self.discovered.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Top-level resources by kind. Subresources such as `pods/log` are skipped.
fn index(list: ResourceList) -> Resources {
    list.resources
        .into_iter()
        .filter(|r| !r.name.contains('/') && !r.kind.is_empty())
        .map(|r| {
            (
                r.kind,
                ApiResource {
                    name: r.name,
                    namespaced: r.namespaced,
                },
            )
        })
        .collect()
}

/// Discovery path for an `apiVersion`, e.g. `/api/v1` or `/apis/apps/v1`.
pub fn group_version_path(api_version: &str) -> String {
    match api_version {
        "" | "v1" => "/api/v1".to_string(),
        gv if gv.contains('/') => format!("/apis/{gv}"),
        core => format!("/api/{core}"),
    }
}

/// Path of a single object, e.g. `/apis/apps/v1/namespaces/web/deployments/api`.
pub fn object_path(reference: &ObjectReference, resource: &ApiResource) -> String {
    let group_version = group_version_path(&reference.api_version);
    if resource.namespaced && !reference.namespace.is_empty() {
        format!(
            "{group_version}/namespaces/{}/{}/{}",
            reference.namespace, resource.name, reference.name
        )
    } else {
        format!("{group_version}/{}/{}", resource.name, reference.name)
    }
}

#[async_trait]
impl MetadataFetcher for ApiMetadataFetcher {
    async fn fetch(&self, reference: &ObjectReference) -> Result<ObjectMetadata, FetchError> {
        let Some(resource) = self.resolve(reference).await? else {
            warn!(
                kind = %reference.kind,
                api_version = %reference.api_version,
                "kind is not served by the API server, skipping enrichment"
            );
            return Err(FetchError::not_found(reference));
        };

        let url = self.client.url(&object_path(reference, &resource), &[]);
        debug!(%url, kind = %reference.kind, "fetching object metadata");

        let response = self
            .client
            .request(Method::GET, url)
            .header(ACCEPT, PARTIAL_METADATA)
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(FetchError::not_found(reference));
        }
        if !response.status().is_success() {
            let status = api_status(response).await;
            return Err(FetchError::Status {
                status: status.status,
                message: status.message,
            });
        }

        let object: PartialObject = response
            .json()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        Ok(ObjectMetadata {
            labels: object.metadata.labels.unwrap_or_default(),
            annotations: object.metadata.annotations.unwrap_or_default(),
        })
    }
}
