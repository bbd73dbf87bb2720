//! Single routing rule: field patterns compared against an enriched event.

use std::collections::BTreeMap;
use std::fmt;

use herald_core::{EnrichedEvent, Labels};
use regex::Regex;
use serde::Deserialize;

// ── Pattern ─────────────────────────────────────────────────────────

/// A compiled, unanchored regular expression.
///
/// Compiled once when the route tree is deserialized, so an invalid pattern
/// is a load-time error and matching is infallible.
#[derive(Clone, Deserialize)]
#[serde(try_from = "String")]
pub struct Pattern(Regex);

impl Pattern {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Regex::new(pattern).map(Self)
    }

    pub fn is_match(&self, value: &str) -> bool {
        self.0.is_match(value)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl TryFrom<String> for Pattern {
    type Error = regex::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pattern({:?})", self.0.as_str())
    }
}

// ── Rule ────────────────────────────────────────────────────────────

/// A named predicate over event fields plus an optional destination.
///
/// Every populated field must match for the rule to match. Unset fields
/// place no constraint on the event.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct Rule {
    /// Accounting name reported with each dispatch.
    pub name: String,
    /// Destination to send to when this rule matches. Empty = gate only.
    pub receiver: String,
    pub labels: BTreeMap<String, Pattern>,
    pub annotations: BTreeMap<String, Pattern>,
    pub message: Option<Pattern>,
    pub api_version: Option<Pattern>,
    pub kind: Option<Pattern>,
    /// Matched against the event's own namespace.
    pub namespace: Option<Pattern>,
    pub reason: Option<Pattern>,
    #[serde(rename = "type")]
    pub event_type: Option<Pattern>,
    pub component: Option<Pattern>,
    pub host: Option<Pattern>,
    pub min_count: i32,
}

impl Rule {
    /// Destination name, if this rule dispatches.
    pub fn receiver(&self) -> Option<&str> {
        if self.receiver.is_empty() {
            None
        } else {
            Some(&self.receiver)
        }
    }

    pub fn matches(&self, ev: &EnrichedEvent) -> bool {
        let raw = &ev.event;
        let fields = [
            (&self.message, raw.message.as_str()),
            (&self.api_version, raw.involved_object.api_version.as_str()),
            (&self.kind, raw.involved_object.kind.as_str()),
            (&self.namespace, raw.metadata.namespace.as_str()),
            (&self.reason, raw.reason.as_str()),
            (&self.event_type, raw.event_type.as_str()),
            (&self.component, raw.source.component.as_str()),
            (&self.host, raw.source.host.as_str()),
        ];

        for (pattern, value) in fields {
            if let Some(p) = pattern {
                if !p.is_match(value) {
                    return false;
                }
            }
        }

        if !map_matches(&self.labels, ev.labels.as_ref())
            || !map_matches(&self.annotations, ev.annotations.as_ref())
        {
            return false;
        }

        // Unset minCount is 0, so any real event (count >= 1) passes.
        raw.count >= self.min_count
    }
}

/// Every required key must be present and its value must match.
fn map_matches(required: &BTreeMap<String, Pattern>, actual: Option<&Labels>) -> bool {
    if required.is_empty() {
        return true;
    }
    let Some(actual) = actual else {
        return false;
    };
    required.iter().all(|(key, pattern)| {
        actual
            .get(key)
            .map(|value| pattern.is_match(value))
            .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use herald_core::RawEvent;

    fn rule(yaml: &str) -> Rule {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn pod_event() -> EnrichedEvent {
        let mut raw = RawEvent::default();
        raw.metadata.namespace = "default".to_string();
        raw.involved_object.kind = "Pod".to_string();
        raw.involved_object.api_version = "v1".to_string();
        raw.involved_object.name = "nginx-7c9f".to_string();
        raw.reason = "BackOff".to_string();
        raw.message = "Back-off restarting failed container".to_string();
        raw.event_type = "Warning".to_string();
        raw.source.component = "kubelet".to_string();
        raw.source.host = "node-1".to_string();
        raw.count = 4;
        let mut ev = EnrichedEvent::new(raw, false);
        ev.labels = Some(Labels::from([
            ("app".to_string(), "nginx".to_string()),
            ("tier".to_string(), "frontend".to_string()),
        ]));
        ev
    }

    #[test]
    fn empty_rule_matches_everything() {
        assert!(Rule::default().matches(&pod_event()));
    }

    #[test]
    fn all_fields_must_match() {
        let r = rule("kind: Pod\nreason: Back.*\ntype: Warning\ncomponent: kubelet\nhost: node-\\d+");
        assert!(r.matches(&pod_event()));

        let r = rule("kind: Pod\nreason: Killing");
        assert!(!r.matches(&pod_event()));
    }

    #[test]
    fn patterns_are_unanchored() {
        assert!(rule("message: failed container").matches(&pod_event()));
        assert!(!rule("message: ^failed").matches(&pod_event()));
    }

    #[test]
    fn namespace_matches_event_namespace() {
        assert!(rule("namespace: default").matches(&pod_event()));
        assert!(!rule("namespace: kube-system").matches(&pod_event()));
    }

    #[test]
    fn labels_require_presence_and_match() {
        assert!(rule("labels:\n  app: ngin.\n").matches(&pod_event()));
        assert!(!rule("labels:\n  app: redis\n").matches(&pod_event()));
        assert!(!rule("labels:\n  missing: .*\n").matches(&pod_event()));
    }

    #[test]
    fn annotations_absent_fail_required_keys() {
        let ev = pod_event();
        assert!(ev.annotations.is_none());
        assert!(!rule("annotations:\n  team: .*\n").matches(&ev));
    }

    #[test]
    fn min_count_threshold() {
        assert!(rule("minCount: 4").matches(&pod_event()));
        assert!(!rule("minCount: 5").matches(&pod_event()));
    }

    #[test]
    fn receiver_is_optional() {
        assert_eq!(rule("kind: Pod").receiver(), None);
        assert_eq!(rule("receiver: alerts").receiver(), Some("alerts"));
    }

    #[test]
    fn invalid_pattern_fails_to_load() {
        let result: Result<Rule, _> = serde_yaml::from_str("reason: \"(unclosed\"");
        assert!(result.is_err());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let result: Result<Rule, _> = serde_yaml::from_str("reasn: Failed");
        assert!(result.is_err());
    }
}
