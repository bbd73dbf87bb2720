//! Shared lease record and the lock seam over it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LeaseError {
    /// The record changed since it was read, or already exists on create.
    #[error("lease was modified concurrently")]
    Conflict,

    #[error("lease API returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("lease transport error: {0}")]
    Transport(String),
}

/// Contents of the lease as stored by the lock backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeaseRecord {
    /// Current holder identity. `None` once released.
    pub holder: Option<String>,
    pub lease_duration_seconds: i32,
    pub acquire_time: Option<DateTime<Utc>>,
    pub renew_time: Option<DateTime<Utc>>,
    pub transitions: i32,
    /// Backend version used for optimistic concurrency. Assigned by the lock.
    pub version: String,
}

impl LeaseRecord {
    pub fn is_held_by(&self, identity: &str) -> bool {
        self.holder.as_deref() == Some(identity)
    }
}

/// Read-modify-write access to one named lease.
#[async_trait]
pub trait LeaseLock: Send + Sync {
    /// Current record, or `None` if the lease does not exist yet.
    async fn get(&self) -> Result<Option<LeaseRecord>, LeaseError>;

    /// Create the lease. Fails with [`LeaseError::Conflict`] if it exists.
    async fn create(&self, record: &LeaseRecord) -> Result<LeaseRecord, LeaseError>;

    /// Replace the lease if `record.version` is still current.
    async fn update(&self, record: &LeaseRecord) -> Result<LeaseRecord, LeaseError>;

    /// Human-readable lease location for logs.
    fn describe(&self) -> String;
}
