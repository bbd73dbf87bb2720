//! Freshness gate applied to every event before enrichment.

use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Duration, Utc};
use herald_core::RawEvent;
use thiserror::Error;
use tracing::warn;

/// Admission window used when neither age setting is configured.
pub const DEFAULT_MAX_EVENT_AGE_SECONDS: i64 = 5;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("cannot set both throttlePeriod (deprecated) and maxEventAgeSeconds")]
    ConflictingMaxAge,

    #[error("maxEventAgeSeconds must not be negative, got {0}")]
    Negative(i64),
}

/// Resolve the admission window from `maxEventAgeSeconds` and its deprecated
/// alias `throttlePeriod`. Zero means unset.
pub fn resolve_max_age(max_event_age_seconds: i64, throttle_period: i64) -> Result<i64, AdmissionError> {
    let resolved = match (max_event_age_seconds, throttle_period) {
        (0, 0) => DEFAULT_MAX_EVENT_AGE_SECONDS,
        (age, 0) => age,
        (0, throttle) => {
            warn!("config.throttlePeriod is deprecated, consider using config.maxEventAgeSeconds instead");
            throttle
        }
        _ => return Err(AdmissionError::ConflictingMaxAge),
    };
    if resolved < 0 {
        return Err(AdmissionError::Negative(resolved));
    }
    Ok(resolved)
}

/// Decides whether an event is fresh enough to enter the pipeline.
///
/// The startup instant is reset every time the pipeline starts, so a
/// replica that takes over leadership ignores the backlog replayed by
/// its initial list.
#[derive(Debug)]
pub struct Admission {
    max_age: Duration,
    startup: RwLock<DateTime<Utc>>,
}

impl Admission {
    pub fn new(max_age: Duration) -> Self {
        Self {
            max_age,
            startup: RwLock::new(Utc::now()),
        }
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    pub fn startup(&self) -> DateTime<Utc> {
        *self.startup.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn mark_startup(&self, at: DateTime<Utc>) {
        *self.startup.write().unwrap_or_else(PoisonError::into_inner) = at;
    }

    pub fn should_discard(&self, event: &RawEvent) -> bool {
        self.should_discard_at(event, Utc::now())
    }

    /// Order matters: the pre-startup check runs first and stays silent.
    pub fn should_discard_at(&self, event: &RawEvent, now: DateTime<Utc>) -> bool {
        // No timestamp at all counts as older than startup.
        let Some(timestamp) = event.effective_timestamp() else {
            return true;
        };

        if timestamp < self.startup() {
            return true;
        }

        if now - timestamp > self.max_age {
            warn!(
                event = %event.metadata.name,
                namespace = %event.metadata.namespace,
                kind = %event.involved_object.kind,
                object = %event.involved_object.name,
                reason = %event.reason,
                timestamp = %timestamp,
                "Event discarded as being older then maxEventAgeSeconds"
            );
            return true;
        }

        false
    }
}
