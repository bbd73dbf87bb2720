//! Glue between ingestion and routing.

use std::sync::Arc;

use herald_core::EnrichedEvent;
use herald_ingest::EventHandler;
use herald_notify::ChannelRegistry;
use herald_rules::Route;

/// Stamps the cluster name and evaluates the route tree for every event.
pub struct Engine {
    route: Route,
    registry: Arc<ChannelRegistry>,
    cluster_name: Option<String>,
}

impl Engine {
    pub fn new(route: Route, registry: Arc<ChannelRegistry>, cluster_name: Option<String>) -> Self {
        Self {
            route,
            registry,
            cluster_name,
        }
    }
}

impl EventHandler for Engine {
    fn on_event(&self, mut event: EnrichedEvent) {
        if let Some(cluster) = &self.cluster_name {
            event.cluster_name = Some(cluster.clone());
        }
        let event = Arc::new(event);
        self.route.evaluate(&event, self.registry.as_ref());
    }
}
