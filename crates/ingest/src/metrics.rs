//! Ingestion counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Per-cache lookup counters.
#[derive(Debug, Default)]
pub struct CacheStats {
    checks: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    tombstones: AtomicU64,
    errors: AtomicU64,
}

impl CacheStats {
    pub(crate) fn check(&self) {
        self.checks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn tombstone(&self) {
        self.tombstones.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            checks: self.checks.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            tombstones: self.tombstones.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStatsSnapshot {
    pub checks: u64,
    pub hits: u64,
    pub misses: u64,
    pub tombstones: u64,
    pub errors: u64,
}

/// Watcher-level counters.
#[derive(Debug, Default)]
pub struct IngestMetrics {
    events_processed: AtomicU64,
    watch_errors: AtomicU64,
}

impl IngestMetrics {
    pub(crate) fn processed(&self) {
        self.events_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn watch_error(&self) {
        self.watch_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn events_processed(&self) -> u64 {
        self.events_processed.load(Ordering::Relaxed)
    }

    pub fn watch_errors(&self) -> u64 {
        self.watch_errors.load(Ordering::Relaxed)
    }
}

/// Point-in-time view of everything the ingestion side counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestSnapshot {
    pub events_processed: u64,
    pub watch_errors: u64,
    pub label_cache: CacheStatsSnapshot,
    pub annotation_cache: CacheStatsSnapshot,
}
