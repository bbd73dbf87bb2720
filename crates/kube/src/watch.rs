//! List-then-watch event source over `v1/Event`.
//!
//! Keeps a local store of known events so relists and watch notifications
//! are classified the way an informer would: unknown objects are adds,
//! known objects with a new resource version are updates, and repeats of
//! the stored version are skipped.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use herald_core::RawEvent;
use herald_ingest::{EventSource, EventWatcher, SourceError, WatchEvent};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::client::{api_status, ApiStatus, KubeClient};

const GONE: u16 = 410;

#[derive(Debug, Error)]
enum WatchError {
    /// Resource version too old; relist without counting an error.
    #[error("resource version expired")]
    Expired,

    #[error("API returned {}: {}", .0.status, .0.message)]
    Status(ApiStatus),

    #[error("transport: {0}")]
    Transport(#[from] reqwest::Error),
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ListMeta {
    resource_version: String,
    #[serde(rename = "continue")]
    continue_token: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct EventList {
    metadata: ListMeta,
    /// Decoded one at a time so a single bad item cannot fail the page.
    items: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct Notice {
    #[serde(rename = "type")]
    kind: String,
    object: serde_json::Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WatchStatus {
    code: u16,
    message: String,
}

/// Decode one object, logging and skipping it when malformed.
fn decode<T: DeserializeOwned>(value: serde_json::Value, what: &'static str) -> Option<T> {
    match serde_json::from_value(value) {
        Ok(decoded) => Some(decoded),
        Err(e) => {
            warn!(error = %e, object = what, "skipping undecodable object");
            None
        }
    }
}

// ── Store ───────────────────────────────────────────────────────────

/// Last seen version of every live event, keyed by UID.
#[derive(Debug, Default)]
pub(crate) struct Store {
    events: HashMap<String, RawEvent>,
}

impl Store {
    pub(crate) fn upsert(&mut self, event: RawEvent) -> Option<WatchEvent> {
        let notice = match self.events.get(&event.metadata.uid) {
            Some(prev) if prev.metadata.resource_version == event.metadata.resource_version => {
                return None;
            }
            Some(_) => WatchEvent::Modified(event.clone()),
            None => WatchEvent::Added(event.clone()),
        };
        self.events.insert(event.metadata.uid.clone(), event);
        Some(notice)
    }

    pub(crate) fn remove(&mut self, event: RawEvent) -> WatchEvent {
        self.events.remove(&event.metadata.uid);
        WatchEvent::Deleted(event)
    }

    /// Reconcile against a full list: vanished events are deletions.
    pub(crate) fn replace(&mut self, items: Vec<RawEvent>) -> Vec<WatchEvent> {
        let gone: Vec<String> = {
            let listed: HashSet<&str> = items.iter().map(|e| e.metadata.uid.as_str()).collect();
            self.events
                .keys()
                .filter(|uid| !listed.contains(uid.as_str()))
                .cloned()
                .collect()
        };

        let mut notices: Vec<WatchEvent> = gone
            .into_iter()
            .filter_map(|uid| self.events.remove(&uid))
            .map(WatchEvent::Deleted)
            .collect();
        notices.extend(items.into_iter().filter_map(|e| self.upsert(e)));
        notices
    }

    pub(crate) fn len(&self) -> usize {
        self.events.len()
    }
}

// ── Lines ───────────────────────────────────────────────────────────

/// Newline-delimited JSON frames from a streaming response body.
struct Lines {
    stream: BoxStream<'static, reqwest::Result<Bytes>>,
    buf: Vec<u8>,
}

impl Lines {
    fn new(response: reqwest::Response) -> Self {
        Self {
            stream: response.bytes_stream().boxed(),
            buf: Vec::new(),
        }
    }

    async fn next_line(&mut self) -> reqwest::Result<Option<Vec<u8>>> {
        loop {
            if let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
                let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
                line.pop();
                return Ok(Some(line));
            }
            match self.stream.next().await {
                Some(chunk) => self.buf.extend_from_slice(&chunk?),
                None if self.buf.is_empty() => return Ok(None),
                None => return Ok(Some(std::mem::take(&mut self.buf))),
            }
        }
    }
}

// ── KubeEventSource ─────────────────────────────────────────────────

/// Watches `v1/Event` in one namespace or cluster-wide.
pub struct KubeEventSource {
    client: KubeClient,
    namespace: Option<String>,
    backoff: Duration,
    page_size: u32,
}

impl KubeEventSource {
    pub fn new(client: KubeClient, namespace: Option<String>) -> Self {
        Self {
            client,
            namespace: namespace.filter(|ns| !ns.is_empty()),
            backoff: Duration::from_secs(1),
            page_size: 500,
        }
    }

    /// Delay before relisting after a failed watch.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    fn path(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("/api/v1/namespaces/{ns}/events"),
            None => "/api/v1/events".to_string(),
        }
    }

    async fn list(&self) -> Result<(Vec<RawEvent>, String), WatchError> {
        let mut items = Vec::new();
        let mut continue_token = String::new();
        loop {
            let url = {
                let limit = self.page_size.to_string();
                let mut query = vec![("limit", limit.as_str())];
                if !continue_token.is_empty() {
                    query.push(("continue", continue_token.as_str()));
                }
                self.client.url(&self.path(), &query)
            };

            let response = self.client.request(Method::GET, url).send().await?;
            if !response.status().is_success() {
                let status = api_status(response).await;
                return Err(if status.status == GONE {
                    WatchError::Expired
                } else {
                    WatchError::Status(status)
                });
            }

            let page: EventList = response.json().await?;
            items.extend(page.items.into_iter().filter_map(|item| decode::<RawEvent>(item, "event")));
            if page.metadata.continue_token.is_empty() {
                return Ok((items, page.metadata.resource_version));
            }
            continue_token = page.metadata.continue_token;
        }
    }

    async fn open_watch(&self, version: &str) -> Result<Lines, WatchError> {
        let url = self.client.url(
            &self.path(),
            &[
                ("watch", "1"),
                ("resourceVersion", version),
                ("allowWatchBookmarks", "true"),
            ],
        );
        let response = self.client.streaming(Method::GET, url).send().await?;
        if !response.status().is_success() {
            let status = api_status(response).await;
            return Err(if status.status == GONE {
                WatchError::Expired
            } else {
                WatchError::Status(status)
            });
        }
        Ok(Lines::new(response))
    }

    /// One list followed by watches until stopped or failed.
    /// `Ok` means a stop was requested.
    async fn sync(
        &self,
        watcher: &EventWatcher,
        store: &mut Store,
        stop: &mut watch::Receiver<bool>,
    ) -> Result<(), WatchError> {
        let (items, mut version) = tokio::select! {
            biased;
            _ = stop.changed() => return Ok(()),
            listed = self.list() => listed?,
        };
        debug!(events = items.len(), resource_version = %version, "listed events");
        for notice in store.replace(items) {
            notice.deliver(watcher).await;
        }

        loop {
            let mut lines = tokio::select! {
                biased;
                _ = stop.changed() => return Ok(()),
                opened = self.open_watch(&version) => opened?,
            };

            loop {
                let line = tokio::select! {
                    biased;
                    _ = stop.changed() => return Ok(()),
                    line = lines.next_line() => line?,
                };
                let Some(line) = line else {
                    debug!(resource_version = %version, "watch closed by server, resuming");
                    break;
                };
                if line.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }

                let notice: Notice = match serde_json::from_slice(&line) {
                    Ok(notice) => notice,
                    Err(e) => {
                        warn!(error = %e, "skipping undecodable watch notification");
                        continue;
                    }
                };
                match notice.kind.as_str() {
                    "ADDED" | "MODIFIED" => {
                        let Some(event) = decode::<RawEvent>(notice.object, "event") else {
                            continue;
                        };
                        version = event.metadata.resource_version.clone();
                        if let Some(notice) = store.upsert(event) {
                            notice.deliver(watcher).await;
                        }
                    }
                    "DELETED" => {
                        let Some(event) = decode::<RawEvent>(notice.object, "event") else {
                            continue;
                        };
                        version = event.metadata.resource_version.clone();
                        store.remove(event).deliver(watcher).await;
                    }
                    "BOOKMARK" => {
                        if let Some(marker) = decode::<EventList>(notice.object, "bookmark") {
                            version = marker.metadata.resource_version;
                        }
                    }
                    "ERROR" => {
                        let status: WatchStatus = decode(notice.object, "status").unwrap_or_default();
                        return Err(if status.code == GONE {
                            WatchError::Expired
                        } else {
                            WatchError::Status(ApiStatus {
                                status: status.code,
                                message: status.message,
                            })
                        });
                    }
                    other => debug!(kind = other, "ignoring unknown watch notification"),
                }
            }
        }
    }
}

#[async_trait]
impl EventSource for KubeEventSource {
    async fn run(&self, watcher: &EventWatcher, mut stop: watch::Receiver<bool>) -> Result<(), SourceError> {
        info!(
            namespace = self.namespace.as_deref().unwrap_or("<all>"),
            "watching events"
        );
        let mut store = Store::default();
        loop {
            if *stop.borrow() {
                return Ok(());
            }
            match self.sync(watcher, &mut store, &mut stop).await {
                Ok(()) => return Ok(()),
                Err(WatchError::Expired) => {
                    debug!(known = store.len(), "resource version expired, relisting");
                    continue;
                }
                Err(e) => watcher.on_watch_error(&e.to_string()),
            }

            tokio::select! {
                biased;
                _ = stop.changed() => return Ok(()),
                _ = tokio::time::sleep(self.backoff) => {}
            }
        }
    }
}
