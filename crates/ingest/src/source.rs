//! Watch sources and the start/stop lifecycle around them.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use herald_core::RawEvent;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::watcher::EventWatcher;

/// One notification from a watch subscription.
#[derive(Debug, Clone)]
pub enum WatchEvent {
    Added(RawEvent),
    Modified(RawEvent),
    Deleted(RawEvent),
    Error(String),
}

impl WatchEvent {
    /// Route the notification to the matching watcher entry point.
    pub async fn deliver(&self, watcher: &EventWatcher) {
        match self {
            Self::Added(ev) => {
                watcher.on_add(ev).await;
            }
            Self::Modified(ev) => {
                watcher.on_update(ev).await;
            }
            Self::Deleted(ev) => watcher.on_delete(ev),
            Self::Error(message) => watcher.on_watch_error(message),
        }
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("watch source already consumed")]
    Consumed,

    #[error("watch source failed: {0}")]
    Failed(String),
}

/// Delivers raw events to a watcher until `stop` flips to `true`.
///
/// Implementations deliver one event at a time and await the watcher
/// before reading the next, so per-object order is preserved.
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn run(&self, watcher: &EventWatcher, stop: watch::Receiver<bool>) -> Result<(), SourceError>;
}

// ── ChannelSource ───────────────────────────────────────────────────

/// Source fed from an in-process channel. Used for tests and replay.
pub struct ChannelSource {
    rx: tokio::sync::Mutex<mpsc::Receiver<WatchEvent>>,
}

impl ChannelSource {
    pub fn new(buffer: usize) -> (mpsc::Sender<WatchEvent>, Self) {
        let (tx, rx) = mpsc::channel(buffer);
        (
            tx,
            Self {
                rx: tokio::sync::Mutex::new(rx),
            },
        )
    }
}

#[async_trait]
impl EventSource for ChannelSource {
    async fn run(&self, watcher: &EventWatcher, mut stop: watch::Receiver<bool>) -> Result<(), SourceError> {
        let mut rx = self.rx.try_lock().map_err(|_| SourceError::Consumed)?;
        loop {
            if *stop.borrow() {
                return Ok(());
            }
            tokio::select! {
                biased;
                changed = stop.changed() => {
                    if changed.is_err() {
                        return Ok(());
                    }
                }
                next = rx.recv() => match next {
                    Some(event) => event.deliver(watcher).await,
                    None => return Ok(()),
                },
            }
        }
    }
}

// ── Pipeline ────────────────────────────────────────────────────────

struct Running {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Runs an [`EventSource`] into an [`EventWatcher`] on a background task.
///
/// Starting resets the admission startup instant. Stopping stops intake and
/// waits for the event currently being handled to finish.
pub struct Pipeline {
    watcher: Arc<EventWatcher>,
    source: Arc<dyn EventSource>,
    running: Mutex<Option<Running>>,
}

impl Pipeline {
    pub fn new(watcher: Arc<EventWatcher>, source: Arc<dyn EventSource>) -> Self {
        Self {
            watcher,
            source,
            running: Mutex::new(None),
        }
    }

    pub fn watcher(&self) -> &Arc<EventWatcher> {
        &self.watcher
    }

    /// Returns `false` if a previous start is still running.
    pub fn start(&self) -> bool {
        let mut running = self.lock();
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            return false;
        }

        self.watcher.admission().mark_startup(Utc::now());
        let (stop_tx, stop_rx) = watch::channel(false);
        let watcher = Arc::clone(&self.watcher);
        let source = Arc::clone(&self.source);
        let handle = tokio::spawn(async move {
            if let Err(e) = source.run(&watcher, stop_rx).await {
                error!(error = %e, "event source terminated");
            }
        });

        *running = Some(Running { stop_tx, handle });
        info!("event pipeline started");
        true
    }

    pub async fn stop(&self) {
        let running = self.lock().take();
        let Some(running) = running else {
            return;
        };
        let _ = running.stop_tx.send(true);
        if let Err(e) = running.handle.await {
            error!(error = %e, "event pipeline task failed");
        }
        info!("event pipeline stopped");
    }

    pub fn is_running(&self) -> bool {
        self.lock()
            .as_ref()
            .is_some_and(|running| !running.handle.is_finished())
    }

    fn lock(&self) -> MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
