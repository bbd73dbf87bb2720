//! Assembly of receivers, routing and the ingestion watcher from config.

use std::num::NonZeroUsize;
use std::sync::Arc;

use anyhow::Context;
use herald_ingest::{CacheKeyStrategy, EventWatcher, MetadataFetcher, WatcherConfig};
use herald_notify::{ChannelRegistry, DEFAULT_QUEUE_CAPACITY};
use tracing::info;

use crate::app_config::AppConfig;
use crate::engine::Engine;

/// Build every receiver's sink and register it. Must run inside the runtime.
pub fn build_registry(config: &AppConfig) -> anyhow::Result<Arc<ChannelRegistry>> {
    let mut registry = ChannelRegistry::new(DEFAULT_QUEUE_CAPACITY, config.route.match_names());
    for receiver in &config.receivers {
        let sink = receiver
            .sink
            .build()
            .with_context(|| format!("cannot initialize receiver {}", receiver.name))?;
        registry.register(receiver.name.clone(), sink);
    }
    info!(receivers = config.receivers.len(), "receivers initialized");
    Ok(Arc::new(registry))
}

pub fn watcher_config(config: &AppConfig, max_age_seconds: i64, strict_caching: bool) -> WatcherConfig {
    if strict_caching {
        info!("Using strict cache keys");
    }
    WatcherConfig {
        max_age: chrono::Duration::seconds(max_age_seconds),
        key_strategy: if strict_caching {
            CacheKeyStrategy::UidAndVersion
        } else {
            CacheKeyStrategy::Uid
        },
        cache_capacity: NonZeroUsize::new(config.cache_capacity).unwrap_or(NonZeroUsize::MIN),
    }
}

/// Watcher whose enriched events flow through the route tree into `registry`.
pub fn build_watcher(
    config: &AppConfig,
    watcher_config: WatcherConfig,
    fetcher: Arc<dyn MetadataFetcher>,
    registry: Arc<ChannelRegistry>,
) -> Arc<EventWatcher> {
    let engine = Engine::new(
        config.route.clone(),
        registry,
        config.cluster_name().map(str::to_string),
    );
    Arc::new(EventWatcher::new(watcher_config, fetcher, Arc::new(engine)))
}
