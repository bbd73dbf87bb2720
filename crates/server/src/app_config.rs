//! The configuration document.
//!
//! ```yaml
//! logLevel: info
//! logFormat: json
//! maxEventAgeSeconds: 10
//! clusterName: prod-eu
//! leaderElection:
//!   enabled: true
//!   leaderElectionID: herald
//! route:
//!   routes:
//!     - match:
//!         - receiver: dump
//! receivers:
//!   - name: dump
//!     stdout: {}
//! ```

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context};
use herald_core::config::{env_opt, expand_env};
use herald_ingest::resolve_max_age;
use herald_notify::ReceiverConfig;
use herald_rules::Route;
use serde::Deserialize;

pub const DEFAULT_CACHE_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AppConfig {
    pub log_level: String,
    pub log_format: String,
    /// Deprecated spelling of `max_event_age_seconds`.
    pub throttle_period: i64,
    pub max_event_age_seconds: i64,
    pub cluster_name: String,
    /// Watch only this namespace. Empty watches the whole cluster.
    pub namespace: String,
    pub cache_capacity: usize,
    pub leader_election: LeaderElectionConfig,
    pub route: Route,
    pub receivers: Vec<ReceiverConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: String::new(),
            log_format: String::new(),
            throttle_period: 0,
            max_event_age_seconds: 0,
            cluster_name: String::new(),
            namespace: String::new(),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            leader_election: LeaderElectionConfig::default(),
            route: Route::default(),
            receivers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LeaderElectionConfig {
    pub enabled: bool,
    #[serde(rename = "leaderElectionID")]
    pub leader_election_id: String,
    /// Namespace of the Lease. Falls back to `POD_NAMESPACE`, then `default`.
    pub namespace: String,
    pub lease_duration_seconds: u64,
    pub renew_deadline_seconds: u64,
    pub retry_period_seconds: u64,
}

impl Default for LeaderElectionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            leader_election_id: "herald".to_string(),
            namespace: String::new(),
            lease_duration_seconds: 15,
            renew_deadline_seconds: 10,
            retry_period_seconds: 2,
        }
    }
}

impl LeaderElectionConfig {
    pub fn lease_duration(&self) -> Duration {
        Duration::from_secs(self.lease_duration_seconds)
    }

    pub fn renew_deadline(&self) -> Duration {
        Duration::from_secs(self.renew_deadline_seconds)
    }

    pub fn retry_period(&self) -> Duration {
        Duration::from_secs(self.retry_period_seconds)
    }

    pub fn lease_namespace(&self) -> String {
        if !self.namespace.is_empty() {
            return self.namespace.clone();
        }
        env_opt("POD_NAMESPACE").unwrap_or_else(|| "default".to_string())
    }
}

impl AppConfig {
    /// Read, expand `${VAR}` references, and parse.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config file {}", path.display()))?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> anyhow::Result<Self> {
        let expanded = expand_env(raw).context("cannot expand environment references")?;
        serde_yaml::from_str(&expanded).context("cannot parse config to YAML")
    }

    pub fn cluster_name(&self) -> Option<&str> {
        Some(self.cluster_name.as_str()).filter(|c| !c.is_empty())
    }

    /// Check the whole document. Returns the admission window in seconds.
    pub fn validate(&self) -> anyhow::Result<i64> {
        let max_age = resolve_max_age(self.max_event_age_seconds, self.throttle_period)?;

        if self.cache_capacity == 0 {
            bail!("cacheCapacity must be greater than zero");
        }

        let mut names = HashSet::new();
        for receiver in &self.receivers {
            if !names.insert(receiver.name.as_str()) {
                bail!("duplicate receiver name: {}", receiver.name);
            }
        }
        self.route.validate(&names)?;

        let election = &self.leader_election;
        if election.enabled {
            if election.leader_election_id.is_empty() {
                bail!("leaderElection.leaderElectionID must not be empty");
            }
            if election.retry_period_seconds == 0
                || election.renew_deadline_seconds <= election.retry_period_seconds
                || election.lease_duration_seconds <= election.renew_deadline_seconds
            {
                bail!(
                    "leaderElection requires leaseDurationSeconds > renewDeadlineSeconds > retryPeriodSeconds > 0"
                );
            }
        }

        Ok(max_age)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = AppConfig::from_yaml("{}").unwrap();
        assert_eq!(config.cache_capacity, DEFAULT_CACHE_CAPACITY);
        assert!(!config.leader_election.enabled);
        assert_eq!(config.leader_election.lease_duration(), Duration::from_secs(15));
        assert_eq!(config.validate().unwrap(), 5);
        assert_eq!(config.cluster_name(), None);
    }

    #[test]
    fn full_document() {
        let config = AppConfig::from_yaml(
            r#"
logLevel: debug
logFormat: json
maxEventAgeSeconds: 30
clusterName: prod-eu
namespace: web
cacheCapacity: 64
leaderElection:
  enabled: true
  leaderElectionID: exporter
  namespace: ops
  leaseDurationSeconds: 20
route:
  drop:
    - namespace: kube-system
  routes:
    - match:
        - receiver: dump
receivers:
  - name: dump
    stdout:
      deDot: true
"#,
        )
        .unwrap();

        assert_eq!(config.validate().unwrap(), 30);
        assert_eq!(config.cluster_name(), Some("prod-eu"));
        assert_eq!(config.cache_capacity, 64);
        assert_eq!(config.leader_election.leader_election_id, "exporter");
        assert_eq!(config.leader_election.lease_namespace(), "ops");
        assert_eq!(config.leader_election.renew_deadline_seconds, 10);
        assert_eq!(config.receivers[0].name, "dump");
    }

    #[test]
    fn expands_environment_references() {
        std::env::set_var("HERALD_TEST_CLUSTER", "staging");
        let config = AppConfig::from_yaml("clusterName: ${HERALD_TEST_CLUSTER}").unwrap();
        assert_eq!(config.cluster_name(), Some("staging"));
        std::env::remove_var("HERALD_TEST_CLUSTER");
    }

    #[test]
    fn throttle_period_is_accepted_alone() {
        let config = AppConfig::from_yaml("throttlePeriod: 12").unwrap();
        assert_eq!(config.validate().unwrap(), 12);
    }

    #[test]
    fn both_windows_set_is_rejected() {
        let config = AppConfig::from_yaml("throttlePeriod: 12\nmaxEventAgeSeconds: 5").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn duplicate_receivers_are_rejected() {
        let config = AppConfig::from_yaml(
            "receivers:\n  - name: a\n    stdout: {}\n  - name: a\n    stdout: {}\n",
        )
        .unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate receiver"));
    }

    #[test]
    fn unknown_route_receiver_is_rejected() {
        let config = AppConfig::from_yaml(
            "route:\n  routes:\n    - match:\n        - receiver: missing\nreceivers:\n  - name: a\n    stdout: {}\n",
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn inconsistent_election_timing_is_rejected() {
        let config = AppConfig::from_yaml(
            "leaderElection:\n  enabled: true\n  leaseDurationSeconds: 5\n  renewDeadlineSeconds: 10\n",
        )
        .unwrap();
        assert!(config.validate().is_err());
    }
}
