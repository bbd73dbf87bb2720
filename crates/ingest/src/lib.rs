//! Event ingestion: admission, metadata enrichment and pipeline lifecycle.
//!
//! Flow for every add/update notification from an [`EventSource`]:
//! raw event → [`Admission`] → [`MetadataCache`] (labels, then annotations)
//! → [`EventHandler`] callback with the finished `EnrichedEvent`.

pub mod admission;
pub mod arc;
pub mod cache;
pub mod fetch;
pub mod metrics;
pub mod source;
pub mod watcher;

pub use admission::{resolve_max_age, Admission, AdmissionError, DEFAULT_MAX_EVENT_AGE_SECONDS};
pub use cache::{CacheKey, CacheKeyStrategy, MetaValue, MetadataCache, MetadataKind};
pub use fetch::{FetchError, MetadataFetcher, ObjectMetadata};
pub use metrics::{CacheStatsSnapshot, IngestSnapshot};
pub use source::{ChannelSource, EventSource, Pipeline, SourceError, WatchEvent};
pub use watcher::{EventHandler, EventWatcher, WatcherConfig};
