//! Memoized label / annotation lookups with negative caching.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use herald_core::{Labels, ObjectReference};
use tracing::debug;

use crate::arc::ArcCache;
use crate::fetch::{FetchError, MetadataFetcher, ObjectMetadata};
use crate::metrics::{CacheStats, CacheStatsSnapshot};

/// Annotation key fragments owned by the control plane itself.
const RESERVED_ANNOTATION_PREFIXES: [&str; 2] = ["kubernetes.io/", "k8s.io/"];

// ── Keys ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Uid(String),
    UidVersion(String, String),
}

/// How a [`CacheKey`] is derived from the involved object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CacheKeyStrategy {
    /// Object UID alone. Assumes metadata is stable for the object's lifetime.
    #[default]
    Uid,
    /// UID plus resource version. Every revision is a separate entry.
    UidAndVersion,
}

impl CacheKeyStrategy {
    pub fn key_for(&self, reference: &ObjectReference) -> CacheKey {
        match self {
            Self::Uid => CacheKey::Uid(reference.uid.clone()),
            Self::UidAndVersion => {
                CacheKey::UidVersion(reference.uid.clone(), reference.resource_version.clone())
            }
        }
    }
}

// ── Values ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetaValue {
    Present(Labels),
    /// Object confirmed not found.
    Tombstone,
    /// Never looked up.
    Absent,
}

impl MetaValue {
    /// Map to use for enrichment, if any.
    pub fn into_labels(self) -> Option<Labels> {
        match self {
            Self::Present(map) => Some(map),
            Self::Tombstone | Self::Absent => None,
        }
    }
}

/// Which half of the object metadata a cache instance serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataKind {
    Labels,
    Annotations,
}

impl MetadataKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Labels => "labels",
            Self::Annotations => "annotations",
        }
    }

    fn select(&self, meta: ObjectMetadata) -> Labels {
        match self {
            Self::Labels => meta.labels,
            Self::Annotations => strip_reserved(meta.annotations),
        }
    }
}

fn strip_reserved(mut annotations: Labels) -> Labels {
    annotations.retain(|key, _| {
        !RESERVED_ANNOTATION_PREFIXES
            .iter()
            .any(|prefix| key.contains(prefix))
    });
    annotations
}

// ── MetadataCache ───────────────────────────────────────────────────

/// Capacity-bounded ARC cache in front of a [`MetadataFetcher`].
///
/// One mutex guards the whole structure. It is never held across the
/// fetch, so concurrent misses for the same key may both fetch; the
/// later insert wins.
pub struct MetadataCache {
    kind: MetadataKind,
    fetcher: Arc<dyn MetadataFetcher>,
    entries: Mutex<ArcCache<CacheKey, MetaValue>>,
    stats: CacheStats,
}

impl MetadataCache {
    pub fn new(kind: MetadataKind, capacity: NonZeroUsize, fetcher: Arc<dyn MetadataFetcher>) -> Self {
        Self {
            kind,
            fetcher,
            entries: Mutex::new(ArcCache::new(capacity)),
            stats: CacheStats::default(),
        }
    }

    pub fn kind(&self) -> MetadataKind {
        self.kind
    }

    /// Resolve metadata for `reference`, fetching on miss.
    ///
    /// Not-found resolves to [`MetaValue::Tombstone`] and is cached. Any other
    /// fetch failure is returned and not cached.
    pub async fn lookup(&self, key: &CacheKey, reference: &ObjectReference) -> Result<MetaValue, FetchError> {
        self.stats.check();

        let cached = {
            let mut entries = self.lock();
            entries.get(key).cloned()
        };
        if let Some(value) = cached {
            self.stats.hit();
            return Ok(value);
        }
        self.stats.miss();

        match self.fetcher.fetch(reference).await {
            Ok(meta) => {
                let map = self.kind.select(meta);
                self.lock().put(key.clone(), MetaValue::Present(map.clone()));
                Ok(MetaValue::Present(map))
            }
            Err(e) if e.is_not_found() => {
                debug!(
                    cache = self.kind.as_str(),
                    kind = %reference.kind,
                    name = %reference.name,
                    "involved object not found, caching tombstone"
                );
                self.stats.tombstone();
                self.lock().put(key.clone(), MetaValue::Tombstone);
                Ok(MetaValue::Tombstone)
            }
            Err(e) => {
                self.stats.error();
                Err(e)
            }
        }
    }

    /// Current entry for `key` without affecting eviction order.
    pub fn peek(&self, key: &CacheKey) -> MetaValue {
        self.lock().peek(key).cloned().unwrap_or(MetaValue::Absent)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }

    fn lock(&self) -> MutexGuard<'_, ArcCache<CacheKey, MetaValue>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
