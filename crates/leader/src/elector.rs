//! Lease campaign: acquire, renew, release.
//!
//! Expiry is judged against the local monotonic clock: a lease held by
//! someone else is only taken over once its record has stayed unchanged
//! for a full lease duration since this instance last saw it change.
//! Wall-clock timestamps in the record are informational.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::lease::{LeaseError, LeaseLock, LeaseRecord};

/// Leadership callbacks, delivered in order over a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseEvent {
    StartedLeading,
    StoppedLeading,
    NewLeader(String),
}

#[derive(Debug, Clone)]
pub struct ElectorConfig {
    pub identity: String,
    pub lease_duration: Duration,
    pub renew_deadline: Duration,
    pub retry_period: Duration,
}

/// `<election id>-<hostname>-<random suffix>`, unique per process.
pub fn identity(election_id: &str) -> String {
    let host = std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
        })
        .unwrap_or_else(|| "unknown".to_string());
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{election_id}-{host}-{}", &suffix[..8])
}

struct Observed {
    record: LeaseRecord,
    at: Instant,
}

pub struct LeaderElector {
    config: ElectorConfig,
    lock: Arc<dyn LeaseLock>,
}

impl LeaderElector {
    pub fn new(config: ElectorConfig, lock: Arc<dyn LeaseLock>) -> Self {
        Self { config, lock }
    }

    pub fn identity(&self) -> &str {
        &self.config.identity
    }

    /// Campaign until `stop` flips, then release the lease if held.
    pub async fn run(&self, events: mpsc::UnboundedSender<LeaseEvent>, mut stop: watch::Receiver<bool>) {
        info!(
            identity = %self.config.identity,
            lease = %self.lock.describe(),
            "starting leader election"
        );

        let mut observed: Option<Observed> = None;
        let mut leading = false;
        let mut last_renew = Instant::now();
        let mut reported_leader: Option<String> = None;

        loop {
            if *stop.borrow() {
                break;
            }

            match self.try_acquire_or_renew(&mut observed).await {
                Ok(true) => {
                    last_renew = Instant::now();
                    if !leading {
                        leading = true;
                        info!(identity = %self.config.identity, "acquired lease");
                        let _ = events.send(LeaseEvent::StartedLeading);
                    }
                }
                Ok(false) => {
                    if leading {
                        leading = false;
                        warn!("lease taken over by another instance");
                        let _ = events.send(LeaseEvent::StoppedLeading);
                    }
                }
                Err(e) => {
                    warn!(error = %e, "failed to acquire or renew lease");
                    if leading && last_renew.elapsed() >= self.config.renew_deadline {
                        leading = false;
                        warn!("renew deadline exceeded, giving up leadership");
                        let _ = events.send(LeaseEvent::StoppedLeading);
                    }
                }
            }

            let holder = observed.as_ref().and_then(|o| o.record.holder.clone());
            if let Some(holder) = holder {
                if reported_leader.as_deref() != Some(holder.as_str()) {
                    info!(leader = %holder, "new leader observed");
                    reported_leader = Some(holder.clone());
                    let _ = events.send(LeaseEvent::NewLeader(holder));
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.retry_period) => {}
                _ = stop.changed() => {}
            }
        }

        if leading {
            self.release(observed.as_ref()).await;
            let _ = events.send(LeaseEvent::StoppedLeading);
        }
        info!("leader election stopped");
    }

    /// `Ok(true)` when this instance holds the lease afterwards.
    async fn try_acquire_or_renew(&self, observed: &mut Option<Observed>) -> Result<bool, LeaseError> {
        let now = Utc::now();
        let duration_secs = i32::try_from(self.config.lease_duration.as_secs()).unwrap_or(i32::MAX);

        let Some(current) = self.lock.get().await? else {
            let record = LeaseRecord {
                holder: Some(self.config.identity.clone()),
                lease_duration_seconds: duration_secs,
                acquire_time: Some(now),
                renew_time: Some(now),
                transitions: 0,
                version: String::new(),
            };
            let created = self.lock.create(&record).await?;
            *observed = Some(Observed {
                record: created,
                at: Instant::now(),
            });
            return Ok(true);
        };

        let changed = observed
            .as_ref()
            .map_or(true, |o| o.record.version != current.version);
        if changed {
            *observed = Some(Observed {
                record: current.clone(),
                at: Instant::now(),
            });
        }

        let ours = current.is_held_by(&self.config.identity);
        let held_by_other = current.holder.is_some() && !ours;
        if held_by_other {
            let seen_at = observed.as_ref().map_or_else(Instant::now, |o| o.at);
            if seen_at + self.config.lease_duration > Instant::now() {
                return Ok(false);
            }
            debug!(holder = ?current.holder, "lease expired, taking over");
        }

        let mut next = current.clone();
        if !ours {
            next.acquire_time = Some(now);
            next.transitions += 1;
        }
        next.holder = Some(self.config.identity.clone());
        next.lease_duration_seconds = duration_secs;
        next.renew_time = Some(now);

        let updated = self.lock.update(&next).await?;
        *observed = Some(Observed {
            record: updated,
            at: Instant::now(),
        });
        Ok(true)
    }

    async fn release(&self, observed: Option<&Observed>) {
        let Some(observed) = observed else {
            return;
        };
        if !observed.record.is_held_by(&self.config.identity) {
            return;
        }

        let mut released = observed.record.clone();
        released.holder = None;
        released.lease_duration_seconds = 1;
        released.renew_time = Some(Utc::now());
        match self.lock.update(&released).await {
            Ok(_) => info!("released lease"),
            Err(e) => warn!(error = %e, "failed to release lease"),
        }
    }
}
