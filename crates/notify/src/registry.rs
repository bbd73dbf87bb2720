//! Per-receiver delivery queues behind the routing `Dispatch` seam.
//!
//! Every registered receiver owns a bounded queue drained by one task that
//! calls its [`Sink`]. `send` never waits: a full queue drops the event and
//! counts it. Individual sink failures don't block other receivers.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use herald_core::EnrichedEvent;
use herald_rules::route::DEFAULT_RULE_BUCKET;
use herald_rules::Dispatch;
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::traits::Sink;

/// Default per-receiver queue depth.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

#[derive(Debug, Default)]
struct ReceiverStats {
    sent: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReceiverSnapshot {
    pub sent: u64,
    pub failed: u64,
    pub dropped: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistrySnapshot {
    /// Dispatch count per rule name, plus the catch-all bucket.
    pub rules: BTreeMap<String, u64>,
    pub receivers: BTreeMap<String, ReceiverSnapshot>,
}

pub struct ChannelRegistry {
    queue_capacity: usize,
    senders: RwLock<HashMap<String, mpsc::Sender<Arc<EnrichedEvent>>>>,
    stats: BTreeMap<String, Arc<ReceiverStats>>,
    rules: BTreeMap<String, AtomicU64>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ChannelRegistry {
    /// `rule_names` pre-registers accounting buckets; see `Route::match_names`.
    pub fn new(queue_capacity: usize, rule_names: impl IntoIterator<Item = String>) -> Self {
        let mut rules: BTreeMap<String, AtomicU64> = rule_names
            .into_iter()
            .map(|name| (name, AtomicU64::new(0)))
            .collect();
        rules.insert(DEFAULT_RULE_BUCKET.to_string(), AtomicU64::new(0));

        Self {
            queue_capacity: queue_capacity.max(1),
            senders: RwLock::new(HashMap::new()),
            stats: BTreeMap::new(),
            rules,
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Register a receiver and spawn its delivery task.
    pub fn register(&mut self, name: impl Into<String>, sink: Arc<dyn Sink>) {
        let name = name.into();
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let stats = Arc::new(ReceiverStats::default());

        info!(receiver = %name, kind = sink.kind(), "registering receiver");
        let handle = tokio::spawn(deliver(name.clone(), sink, rx, Arc::clone(&stats)));

        self.senders
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.clone(), tx);
        self.stats.insert(name, stats);
        self.workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
    }

    pub fn receiver_names(&self) -> impl Iterator<Item = &str> {
        self.stats.keys().map(String::as_str)
    }

    /// Stop intake, deliver everything already queued, then close every sink.
    pub async fn close(&self) {
        self.senders
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();

        let workers = std::mem::take(&mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner));
        for handle in workers {
            if let Err(e) = handle.await {
                warn!(error = %e, "receiver task failed");
            }
        }
        info!("all receivers closed");
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            rules: self
                .rules
                .iter()
                .map(|(name, count)| (name.clone(), count.load(Ordering::Relaxed)))
                .collect(),
            receivers: self
                .stats
                .iter()
                .map(|(name, s)| {
                    (
                        name.clone(),
                        ReceiverSnapshot {
                            sent: s.sent.load(Ordering::Relaxed),
                            failed: s.failed.load(Ordering::Relaxed),
                            dropped: s.dropped.load(Ordering::Relaxed),
                        },
                    )
                })
                .collect(),
        }
    }

    fn count_rule(&self, rule_name: &str) {
        let bucket = self
            .rules
            .get(rule_name)
            .or_else(|| self.rules.get(DEFAULT_RULE_BUCKET));
        if let Some(bucket) = bucket {
            bucket.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl Dispatch for ChannelRegistry {
    fn send(&self, receiver: &str, event: Arc<EnrichedEvent>, rule_name: &str) {
        self.count_rule(rule_name);

        let senders = self.senders.read().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = senders.get(receiver) else {
            warn!(receiver, "dispatch to unregistered or closed receiver");
            return;
        };

        match tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                if let Some(stats) = self.stats.get(receiver) {
                    stats.dropped.fetch_add(1, Ordering::Relaxed);
                }
                warn!(receiver, "receiver queue full, dropping event");
            }
            Err(TrySendError::Closed(_)) => {
                if let Some(stats) = self.stats.get(receiver) {
                    stats.dropped.fetch_add(1, Ordering::Relaxed);
                }
                debug!(receiver, "receiver closed, dropping event");
            }
        }
    }
}

async fn deliver(
    name: String,
    sink: Arc<dyn Sink>,
    mut rx: mpsc::Receiver<Arc<EnrichedEvent>>,
    stats: Arc<ReceiverStats>,
) {
    while let Some(event) = rx.recv().await {
        match sink.send(&event).await {
            Ok(()) => {
                stats.sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    receiver = %name,
                    kind = sink.kind(),
                    error = %e,
                    "Cannot send event"
                );
            }
        }
    }

    if let Err(e) = sink.close().await {
        warn!(receiver = %name, error = %e, "failed to close receiver");
    }
}
