//! In-memory lease lock.
//!
//! Single-process only: useful for tests and for running several electors
//! against one shared lease inside one process.

use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use crate::lease::{LeaseError, LeaseLock, LeaseRecord};

#[derive(Debug, Default)]
struct Stored {
    record: Option<LeaseRecord>,
    next_version: u64,
}

#[derive(Debug)]
pub struct InMemoryLease {
    name: String,
    stored: RwLock<Stored>,
}

impl InMemoryLease {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stored: RwLock::new(Stored::default()),
        }
    }

    /// Current holder, bypassing the async seam.
    pub fn holder(&self) -> Option<String> {
        let stored = self.stored.read().unwrap_or_else(PoisonError::into_inner);
        stored.record.as_ref().and_then(|r| r.holder.clone())
    }

    fn write(&self, record: &LeaseRecord, stored: &mut Stored) -> LeaseRecord {
        stored.next_version += 1;
        let mut saved = record.clone();
        saved.version = stored.next_version.to_string();
        stored.record = Some(saved.clone());
        saved
    }
}

#[async_trait]
impl LeaseLock for InMemoryLease {
    async fn get(&self) -> Result<Option<LeaseRecord>, LeaseError> {
        let stored = self.stored.read().unwrap_or_else(PoisonError::into_inner);
        Ok(stored.record.clone())
    }

    async fn create(&self, record: &LeaseRecord) -> Result<LeaseRecord, LeaseError> {
        let mut stored = self.stored.write().unwrap_or_else(PoisonError::into_inner);
        if stored.record.is_some() {
            return Err(LeaseError::Conflict);
        }
        Ok(self.write(record, &mut stored))
    }

    async fn update(&self, record: &LeaseRecord) -> Result<LeaseRecord, LeaseError> {
        let mut stored = self.stored.write().unwrap_or_else(PoisonError::into_inner);
        match &stored.record {
            Some(current) if current.version == record.version => {}
            _ => return Err(LeaseError::Conflict),
        }
        Ok(self.write(record, &mut stored))
    }

    fn describe(&self) -> String {
        format!("memory/{}", self.name)
    }
}
