//! Recursive route tree evaluation.
//!
//! Each node runs three phases against an event:
//! - **Drop**: any matching drop rule suppresses the node and its whole subtree
//! - **Match**: every matching rule with a receiver dispatches immediately;
//!   any non-matching rule clears the `all_matched` gate
//! - **Descend**: children are visited in order only if every match rule matched
//!
//! The tree is immutable after load and shared read-only across events.

use std::collections::HashSet;
use std::sync::Arc;

use herald_core::EnrichedEvent;
use serde::Deserialize;

use crate::error::{Result, RuleError};
use crate::rule::Rule;

/// Bucket name for dispatches whose rule name was not pre-registered.
pub const DEFAULT_RULE_BUCKET: &str = "default";

// ── Dispatch seam ───────────────────────────────────────────────────

/// Fire-and-forget delivery of an event to a named destination.
///
/// Implementations must not block the caller for unbounded time; buffering
/// and retries belong to the implementation.
pub trait Dispatch {
    fn send(&self, receiver: &str, event: Arc<EnrichedEvent>, rule_name: &str);
}

// ── Route ───────────────────────────────────────────────────────────

/// A node of the route tree.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Route {
    pub drop: Vec<Rule>,
    #[serde(rename = "match")]
    pub matchers: Vec<Rule>,
    pub routes: Vec<Route>,
}

impl Route {
    /// Parse a route tree from YAML, compiling every pattern.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Evaluate this node (and, if gated open, its children) against `event`.
    pub fn evaluate(&self, event: &Arc<EnrichedEvent>, dispatch: &dyn Dispatch) {
        if self.drop.iter().any(|rule| rule.matches(event)) {
            return;
        }

        let mut all_matched = true;
        for rule in &self.matchers {
            if rule.matches(event) {
                if let Some(receiver) = rule.receiver() {
                    dispatch.send(receiver, Arc::clone(event), &rule.name);
                }
            } else {
                all_matched = false;
            }
        }

        if all_matched {
            for child in &self.routes {
                child.evaluate(event, dispatch);
            }
        }
    }

    /// Distinct non-empty match rule names of this node's direct children.
    ///
    /// Used to pre-register per-rule accounting buckets.
    pub fn match_names(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.routes
            .iter()
            .flat_map(|child| child.matchers.iter())
            .filter(|rule| !rule.name.is_empty())
            .filter(|rule| seen.insert(rule.name.as_str()))
            .map(|rule| rule.name.clone())
            .collect()
    }

    /// Every receiver named by a match rule anywhere in the tree.
    pub fn receivers(&self) -> HashSet<&str> {
        let mut out = HashSet::new();
        self.collect_receivers(&mut out);
        out
    }

    fn collect_receivers<'a>(&'a self, out: &mut HashSet<&'a str>) {
        out.extend(self.matchers.iter().filter_map(Rule::receiver));
        for child in &self.routes {
            child.collect_receivers(out);
        }
    }

    /// Reject match rules that route to an undeclared receiver.
    pub fn validate(&self, known: &HashSet<&str>) -> Result<()> {
        for rule in &self.matchers {
            if let Some(receiver) = rule.receiver() {
                if !known.contains(receiver) {
                    return Err(RuleError::UnknownReceiver {
                        rule: rule.name.clone(),
                        receiver: receiver.to_string(),
                    });
                }
            }
        }
        for child in &self.routes {
            child.validate(known)?;
        }
        Ok(())
    }
}
