//! `coordination.k8s.io/v1` Lease as a leader-election lock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use herald_leader::{LeaseError, LeaseLock, LeaseRecord};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::client::{api_status, KubeClient};

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct LeaseMeta {
    resource_version: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct LeaseSpec {
    holder_identity: Option<String>,
    lease_duration_seconds: Option<i32>,
    acquire_time: Option<DateTime<Utc>>,
    renew_time: Option<DateTime<Utc>>,
    lease_transitions: Option<i32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Lease {
    metadata: LeaseMeta,
    spec: LeaseSpec,
}

impl From<Lease> for LeaseRecord {
    fn from(lease: Lease) -> Self {
        Self {
            holder: lease.spec.holder_identity.filter(|h| !h.is_empty()),
            lease_duration_seconds: lease.spec.lease_duration_seconds.unwrap_or_default(),
            acquire_time: lease.spec.acquire_time,
            renew_time: lease.spec.renew_time,
            transitions: lease.spec.lease_transitions.unwrap_or_default(),
            version: lease.metadata.resource_version,
        }
    }
}

/// `MicroTime` wire format.
fn micro_time(time: Option<DateTime<Utc>>) -> Value {
    match time {
        Some(t) => Value::String(t.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()),
        None => Value::Null,
    }
}

pub struct KubeLeaseLock {
    client: KubeClient,
    namespace: String,
    name: String,
}

impl KubeLeaseLock {
    pub fn new(client: KubeClient, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    fn collection(&self) -> String {
        format!(
            "/apis/coordination.k8s.io/v1/namespaces/{}/leases",
            self.namespace
        )
    }

    fn item(&self) -> String {
        format!("{}/{}", self.collection(), self.name)
    }

    fn body(&self, record: &LeaseRecord) -> Value {
        let mut metadata = json!({
            "name": self.name,
            "namespace": self.namespace,
        });
        if !record.version.is_empty() {
            metadata["resourceVersion"] = Value::String(record.version.clone());
        }
        json!({
            "apiVersion": "coordination.k8s.io/v1",
            "kind": "Lease",
            "metadata": metadata,
            "spec": {
                "holderIdentity": record.holder,
                "leaseDurationSeconds": record.lease_duration_seconds,
                "acquireTime": micro_time(record.acquire_time),
                "renewTime": micro_time(record.renew_time),
                "leaseTransitions": record.transitions,
            },
        })
    }

    async fn write(&self, method: Method, path: String, record: &LeaseRecord) -> Result<LeaseRecord, LeaseError> {
        let response = self
            .client
            .request(method, self.client.url(&path, &[]))
            .json(&self.body(record))
            .send()
            .await
            .map_err(|e| LeaseError::Transport(e.to_string()))?;
        read_lease(response).await
    }
}

async fn read_lease(response: reqwest::Response) -> Result<LeaseRecord, LeaseError> {
    if response.status() == StatusCode::CONFLICT {
        return Err(LeaseError::Conflict);
    }
    if !response.status().is_success() {
        let status = api_status(response).await;
        return Err(LeaseError::Status {
            status: status.status,
            message: status.message,
        });
    }
    let lease: Lease = response
        .json()
        .await
        .map_err(|e| LeaseError::Transport(e.to_string()))?;
    Ok(lease.into())
}

#[async_trait]
impl LeaseLock for KubeLeaseLock {
    async fn get(&self) -> Result<Option<LeaseRecord>, LeaseError> {
        let response = self
            .client
            .request(Method::GET, self.client.url(&self.item(), &[]))
            .send()
            .await
            .map_err(|e| LeaseError::Transport(e.to_string()))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        read_lease(response).await.map(Some)
    }

    async fn create(&self, record: &LeaseRecord) -> Result<LeaseRecord, LeaseError> {
        let mut fresh = record.clone();
        fresh.version.clear();
        self.write(Method::POST, self.collection(), &fresh).await
    }

    async fn update(&self, record: &LeaseRecord) -> Result<LeaseRecord, LeaseError> {
        self.write(Method::PUT, self.item(), record).await
    }

    fn describe(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}
