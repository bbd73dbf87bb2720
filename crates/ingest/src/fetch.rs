use async_trait::async_trait;
use herald_core::{Labels, ObjectReference};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    /// The involved object no longer exists. Expected steady state for
    /// events whose object was garbage-collected.
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: String,
        namespace: String,
        name: String,
    },

    #[error("API returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("metadata fetch failed: {0}")]
    Transport(String),
}

impl FetchError {
    pub fn not_found(reference: &ObjectReference) -> Self {
        Self::NotFound {
            kind: reference.kind.clone(),
            namespace: reference.namespace.clone(),
            name: reference.name.clone(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Labels and annotations of an involved object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectMetadata {
    pub labels: Labels,
    pub annotations: Labels,
}

/// Reads an involved object's current metadata from the control plane.
#[async_trait]
pub trait MetadataFetcher: Send + Sync {
    async fn fetch(&self, reference: &ObjectReference) -> Result<ObjectMetadata, FetchError>;
}
