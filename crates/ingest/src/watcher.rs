//! Per-event handler: admit, enrich, hand off.

use std::num::NonZeroUsize;
use std::sync::Arc;

use chrono::Duration;
use herald_core::{EnrichedEvent, ObjectReference, RawEvent};
use tracing::{debug, error, trace, warn};

use crate::admission::{Admission, DEFAULT_MAX_EVENT_AGE_SECONDS};
use crate::cache::{CacheKey, CacheKeyStrategy, MetadataCache, MetadataKind};
use crate::fetch::MetadataFetcher;
use crate::metrics::{IngestMetrics, IngestSnapshot};

/// Involved-object kind whose metadata lookups routinely fail.
const NOISY_KIND: &str = "CustomResourceDefinition";

/// Receives every enriched event. Runs on the ingestion task, so it must
/// return promptly.
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: EnrichedEvent);
}

impl<F> EventHandler for F
where
    F: Fn(EnrichedEvent) + Send + Sync,
{
    fn on_event(&self, event: EnrichedEvent) {
        self(event)
    }
}

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub max_age: Duration,
    pub key_strategy: CacheKeyStrategy,
    pub cache_capacity: NonZeroUsize,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            max_age: Duration::seconds(DEFAULT_MAX_EVENT_AGE_SECONDS),
            key_strategy: CacheKeyStrategy::Uid,
            cache_capacity: NonZeroUsize::new(1024).unwrap_or(NonZeroUsize::MIN),
        }
    }
}

pub struct EventWatcher {
    admission: Admission,
    key_strategy: CacheKeyStrategy,
    labels: MetadataCache,
    annotations: MetadataCache,
    handler: Arc<dyn EventHandler>,
    metrics: IngestMetrics,
}

impl EventWatcher {
    pub fn new(config: WatcherConfig, fetcher: Arc<dyn MetadataFetcher>, handler: Arc<dyn EventHandler>) -> Self {
        Self {
            admission: Admission::new(config.max_age),
            key_strategy: config.key_strategy,
            labels: MetadataCache::new(MetadataKind::Labels, config.cache_capacity, Arc::clone(&fetcher)),
            annotations: MetadataCache::new(MetadataKind::Annotations, config.cache_capacity, fetcher),
            handler,
            metrics: IngestMetrics::default(),
        }
    }

    pub fn admission(&self) -> &Admission {
        &self.admission
    }

    pub async fn on_add(&self, event: &RawEvent) -> bool {
        self.on_event(event, false).await
    }

    pub async fn on_update(&self, event: &RawEvent) -> bool {
        self.on_event(event, true).await
    }

    /// Deletions carry no new information and are ignored.
    pub fn on_delete(&self, event: &RawEvent) {
        trace!(event = %event.metadata.name, "ignoring deleted event");
    }

    /// Transport errors are counted; the source handles reconnection.
    pub fn on_watch_error(&self, message: &str) {
        self.metrics.watch_error();
        warn!(error = %message, "event watch error");
    }

    /// Returns whether the event was admitted and handed off.
    async fn on_event(&self, event: &RawEvent, is_update: bool) -> bool {
        let mut raw = event.clone();
        raw.metadata.managed_fields = None;

        if self.admission.should_discard(&raw) {
            return false;
        }

        self.metrics.processed();
        debug!(
            message = %raw.message,
            namespace = %raw.metadata.namespace,
            reason = %raw.reason,
            involved_object = %raw.involved_object.name,
            "Received event"
        );

        let key = self.key_strategy.key_for(&raw.involved_object);
        let mut enriched = EnrichedEvent::new(raw, is_update);
        let reference = enriched.involved_object().clone();
        enriched.labels = self.enrich(&self.labels, &key, &reference).await;
        enriched.annotations = self.enrich(&self.annotations, &key, &reference).await;

        self.handler.on_event(enriched);
        true
    }

    async fn enrich(
        &self,
        cache: &MetadataCache,
        key: &CacheKey,
        reference: &ObjectReference,
    ) -> Option<herald_core::Labels> {
        match cache.lookup(key, reference).await {
            Ok(value) => value.into_labels(),
            Err(e) if reference.kind == NOISY_KIND => {
                debug!(error = %e, cache = cache.kind().as_str(), "cannot get metadata of the object (CRD)");
                None
            }
            Err(e) => {
                error!(
                    error = %e,
                    cache = cache.kind().as_str(),
                    kind = %reference.kind,
                    name = %reference.name,
                    "cannot get metadata of the object"
                );
                None
            }
        }
    }

    pub fn snapshot(&self) -> IngestSnapshot {
        IngestSnapshot {
            events_processed: self.metrics.events_processed(),
            watch_errors: self.metrics.watch_errors(),
            label_cache: self.labels.stats(),
            annotation_cache: self.annotations.stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{FetchError, ObjectMetadata};
    use async_trait::async_trait;
    use chrono::Utc;
    use herald_core::Labels;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct LabelsOnly {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl MetadataFetcher for LabelsOnly {
        async fn fetch(&self, reference: &ObjectReference) -> Result<ObjectMetadata, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if reference.name == "missing" {
                return Err(FetchError::not_found(reference));
            }
            if reference.name == "flaky" {
                return Err(FetchError::Status {
                    status: 500,
                    message: "etcd timeout".into(),
                });
            }
            Ok(ObjectMetadata {
                labels: Labels::from([("app".to_string(), reference.name.clone())]),
                annotations: Labels::new(),
            })
        }
    }

    #[derive(Default)]
    struct Collect(Mutex<Vec<EnrichedEvent>>);

    impl EventHandler for Collect {
        fn on_event(&self, event: EnrichedEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    fn watcher() -> (EventWatcher, Arc<Collect>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let sink = Arc::new(Collect::default());
        let w = EventWatcher::new(
            WatcherConfig::default(),
            Arc::new(LabelsOnly {
                calls: Arc::clone(&calls),
            }),
            Arc::clone(&sink) as Arc<dyn EventHandler>,
        );
        w.admission().mark_startup(Utc::now() - Duration::seconds(1));
        (w, sink, calls)
    }

    fn fresh(name: &str) -> RawEvent {
        let mut ev = RawEvent::default();
        ev.metadata.name = format!("{name}.1");
        ev.metadata.managed_fields = Some(serde_json::json!([{"manager": "kubelet"}]));
        ev.involved_object.kind = "Pod".into();
        ev.involved_object.name = name.into();
        ev.involved_object.uid = format!("uid-{name}");
        ev.last_timestamp = Some(Utc::now());
        ev.count = 1;
        ev
    }

    #[tokio::test]
    async fn admitted_event_is_enriched_and_handed_off() {
        let (w, sink, _) = watcher();
        let raw = fresh("web-0");

        assert!(w.on_add(&raw).await);

        let got = sink.0.lock().unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].labels.as_ref().unwrap()["app"], "web-0");
        assert_eq!(got[0].annotations, Some(Labels::new()));
        assert!(got[0].event.metadata.managed_fields.is_none());
        assert!(!got[0].is_update);
        // the caller's copy is untouched
        assert!(raw.metadata.managed_fields.is_some());
        assert_eq!(w.snapshot().events_processed, 1);
    }

    #[tokio::test]
    async fn update_flag_is_carried() {
        let (w, sink, _) = watcher();
        assert!(w.on_update(&fresh("web-0")).await);
        assert!(sink.0.lock().unwrap()[0].is_update);
    }

    #[tokio::test]
    async fn stale_event_is_not_counted() {
        let (w, sink, calls) = watcher();
        let mut raw = fresh("web-0");
        raw.last_timestamp = Some(Utc::now() - Duration::hours(1));

        assert!(!w.on_add(&raw).await);
        assert!(sink.0.lock().unwrap().is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(w.snapshot().events_processed, 0);
    }

    #[tokio::test]
    async fn fetch_failures_degrade_to_unenriched() {
        let (w, sink, _) = watcher();
        assert!(w.on_add(&fresh("missing")).await);
        assert!(w.on_add(&fresh("flaky")).await);

        let got = sink.0.lock().unwrap();
        assert_eq!(got.len(), 2);
        assert!(got.iter().all(|e| e.labels.is_none() && e.annotations.is_none()));

        let snap = w.snapshot();
        assert_eq!(snap.label_cache.tombstones, 1);
        assert_eq!(snap.label_cache.errors, 1);
        assert_eq!(snap.annotation_cache.errors, 1);
    }

    #[tokio::test]
    async fn caches_fetch_independently() {
        let (w, _, calls) = watcher();
        w.on_add(&fresh("web-0")).await;
        w.on_add(&fresh("web-0")).await;
        // one fetch per cache on the first event, none on the second
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(w.snapshot().label_cache.hits, 1);
    }

    #[tokio::test]
    async fn deletes_are_ignored_and_watch_errors_counted() {
        let (w, sink, _) = watcher();
        w.on_delete(&fresh("web-0"));
        w.on_watch_error("stream closed");
        assert!(sink.0.lock().unwrap().is_empty());
        assert_eq!(w.snapshot().watch_errors, 1);
    }
}
