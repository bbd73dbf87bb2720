//! `/metrics` and `/healthz`.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use herald_ingest::{EventWatcher, IngestSnapshot};
use herald_notify::{ChannelRegistry, RegistrySnapshot};
use serde::Serialize;

#[derive(Clone)]
pub struct MetricsState {
    pub watcher: Arc<EventWatcher>,
    pub registry: Arc<ChannelRegistry>,
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    #[serde(flatten)]
    pub ingest: IngestSnapshot,
    #[serde(flatten)]
    pub dispatch: RegistrySnapshot,
}

async fn metrics(State(state): State<MetricsState>) -> Json<MetricsSnapshot> {
    Json(MetricsSnapshot {
        ingest: state.watcher.snapshot(),
        dispatch: state.registry.snapshot(),
    })
}

async fn healthz() -> &'static str {
    "ok"
}

pub fn router(state: MetricsState) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .route("/healthz", get(healthz))
        .with_state(state)
}
