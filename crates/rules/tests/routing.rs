//! Integration tests for route tree evaluation over realistic configurations.

use std::sync::{Arc, Mutex};

use chrono::{TimeZone, Utc};
use herald_core::{EnrichedEvent, Labels, RawEvent};
use herald_rules::{Dispatch, Route};

#[derive(Default)]
struct Recorder {
    sent: Mutex<Vec<(String, String)>>,
}

impl Recorder {
    fn receivers(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(receiver, _)| receiver.clone())
            .collect()
    }
}

impl Dispatch for Recorder {
    fn send(&self, receiver: &str, _event: Arc<EnrichedEvent>, rule_name: &str) {
        self.sent
            .lock()
            .unwrap()
            .push((receiver.to_string(), rule_name.to_string()));
    }
}

fn pod_failed() -> Arc<EnrichedEvent> {
    let raw: RawEvent = serde_json::from_value(serde_json::json!({
        "metadata": {"name": "web-0.17b", "namespace": "shop", "uid": "ev-1"},
        "involvedObject": {"kind": "Pod", "namespace": "shop", "name": "web-0",
                           "uid": "pod-1", "apiVersion": "v1"},
        "reason": "Failed",
        "message": "Error: ImagePullBackOff",
        "source": {"component": "kubelet", "host": "node-3"},
        "count": 2,
        "type": "Warning"
    }))
    .unwrap();
    let mut ev = EnrichedEvent::new(raw, false);
    ev.event.last_timestamp = Some(Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap());
    ev.labels = Some(Labels::from([("team".to_string(), "payments".to_string())]));
    Arc::new(ev)
}

// ── end-to-end ──────────────────────────────────────────────

#[test]
fn parent_then_child_dispatch_order() {
    let route = Route::from_yaml(
        r#"
match:
  - reason: Failed
    receiver: alerts
routes:
  - match:
      - kind: Pod
        receiver: pod-archive
"#,
    )
    .unwrap();

    let rec = Recorder::default();
    route.evaluate(&pod_failed(), &rec);
    assert_eq!(rec.receivers(), vec!["alerts", "pod-archive"]);
}

#[test]
fn typical_exporter_config() {
    let route = Route::from_yaml(
        r#"
routes:
  - match:
      - receiver: dump
  - drop:
      - namespace: "^kube-"
      - type: Normal
    match:
      - receiver: critical
        name: warnings
        labels:
          team: pay.*
  - match:
      - kind: Deployment|StatefulSet
        receiver: workloads
"#,
    )
    .unwrap();

    let rec = Recorder::default();
    route.evaluate(&pod_failed(), &rec);
    assert_eq!(rec.receivers(), vec!["dump", "critical"]);
    assert_eq!(
        rec.sent.lock().unwrap()[1],
        ("critical".to_string(), "warnings".to_string())
    );
    assert_eq!(route.match_names(), vec!["warnings"]);
}

#[test]
fn deep_drop_only_prunes_its_branch() {
    let route = Route::from_yaml(
        r#"
routes:
  - match:
      - kind: Pod
    routes:
      - drop:
          - message: ImagePull
        match:
          - receiver: images
      - match:
          - receiver: pods
"#,
    )
    .unwrap();

    let rec = Recorder::default();
    route.evaluate(&pod_failed(), &rec);
    assert_eq!(rec.receivers(), vec!["pods"]);
}

#[test]
fn evaluation_does_not_mutate_event() {
    let route = Route::from_yaml("match:\n  - receiver: a\n  - receiver: b\n").unwrap();
    let ev = pod_failed();
    let before = (*ev).clone();

    let rec = Recorder::default();
    route.evaluate(&ev, &rec);
    assert_eq!(*ev, before);
    assert_eq!(rec.receivers().len(), 2);
}

#[test]
fn unknown_rule_field_fails_to_load() {
    let err = Route::from_yaml("match:\n  - kindd: Pod\n").unwrap_err();
    assert!(err.to_string().contains("kindd"));
}
