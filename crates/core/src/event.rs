//! Control-plane event model.
//!
//! [`RawEvent`] mirrors the `v1/Event` wire shape as delivered by the watch
//! subscription. [`EnrichedEvent`] is the unit handed from ingestion to
//! routing: a private copy of the raw event plus the involved object's
//! labels and annotations.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};

/// Label or annotation map of an involved object.
pub type Labels = BTreeMap<String, String>;

/// Metadata of the event object itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EventMeta {
    pub name: String,
    pub namespace: String,
    pub uid: String,
    pub resource_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
    /// Server-side apply bookkeeping. Stripped before the event leaves ingestion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub managed_fields: Option<serde_json::Value>,
}

/// Reference to the resource an event is about.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ObjectReference {
    pub kind: String,
    pub namespace: String,
    pub name: String,
    pub uid: String,
    pub api_version: String,
    pub resource_version: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub field_path: String,
}

/// Component and host that reported the event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceInfo {
    pub component: String,
    pub host: String,
}

/// An immutable record from the control plane.
///
/// Exactly one of `last_timestamp` / `event_time` is normally populated;
/// a zero-valued timestamp arrives as `null` and is kept as `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RawEvent {
    pub metadata: EventMeta,
    pub involved_object: ObjectReference,
    pub reason: String,
    pub message: String,
    pub source: SourceInfo,
    pub first_timestamp: Option<DateTime<Utc>>,
    pub last_timestamp: Option<DateTime<Utc>>,
    pub event_time: Option<DateTime<Utc>>,
    pub count: i32,
    #[serde(rename = "type")]
    pub event_type: String,
    pub action: String,
    pub reporting_component: String,
    pub reporting_instance: String,
}

impl RawEvent {
    /// The coarse `lastTimestamp` if set, else the fine-grained `eventTime`.
    pub fn effective_timestamp(&self) -> Option<DateTime<Utc>> {
        self.last_timestamp.or(self.event_time)
    }
}

/// A raw event enriched with its involved object's metadata.
///
/// Read-only once enrichment completes. Serializes in the original event
/// shape with `labels` / `annotations` nested under `involvedObject`.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedEvent {
    pub event: RawEvent,
    pub labels: Option<Labels>,
    pub annotations: Option<Labels>,
    pub cluster_name: Option<String>,
    /// Repeat delivery of an already-seen event rather than a first sighting.
    pub is_update: bool,
}

impl EnrichedEvent {
    pub fn new(event: RawEvent, is_update: bool) -> Self {
        Self {
            event,
            labels: None,
            annotations: None,
            cluster_name: None,
            is_update,
        }
    }

    pub fn involved_object(&self) -> &ObjectReference {
        &self.event.involved_object
    }

    /// Copy with `.` in label and annotation keys replaced by `_`.
    pub fn de_dot(&self) -> Self {
        let mut copy = self.clone();
        copy.labels = self.labels.as_ref().map(de_dot_map);
        copy.annotations = self.annotations.as_ref().map(de_dot_map);
        copy
    }

    pub fn to_value(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }
}

fn de_dot_map(map: &Labels) -> Labels {
    map.iter()
        .map(|(k, v)| (k.replace('.', "_"), v.clone()))
        .collect()
}

fn is_blank(s: &&str) -> bool {
    s.is_empty()
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireEvent<'a> {
    metadata: &'a EventMeta,
    reason: &'a str,
    message: &'a str,
    source: &'a SourceInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    first_timestamp: Option<&'a DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_timestamp: Option<&'a DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    event_time: Option<&'a DateTime<Utc>>,
    count: i32,
    #[serde(rename = "type")]
    event_type: &'a str,
    #[serde(skip_serializing_if = "is_blank")]
    action: &'a str,
    #[serde(skip_serializing_if = "is_blank")]
    reporting_component: &'a str,
    #[serde(skip_serializing_if = "is_blank")]
    reporting_instance: &'a str,
    involved_object: WireObject<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cluster_name: Option<&'a str>,
}

#[derive(Serialize)]
struct WireObject<'a> {
    #[serde(flatten)]
    reference: &'a ObjectReference,
    #[serde(skip_serializing_if = "Option::is_none")]
    labels: Option<&'a Labels>,
    #[serde(skip_serializing_if = "Option::is_none")]
    annotations: Option<&'a Labels>,
}

impl Serialize for EnrichedEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let ev = &self.event;
        WireEvent {
            metadata: &ev.metadata,
            reason: &ev.reason,
            message: &ev.message,
            source: &ev.source,
            first_timestamp: ev.first_timestamp.as_ref(),
            last_timestamp: ev.last_timestamp.as_ref(),
            event_time: ev.event_time.as_ref(),
            count: ev.count,
            event_type: &ev.event_type,
            action: &ev.action,
            reporting_component: &ev.reporting_component,
            reporting_instance: &ev.reporting_instance,
            involved_object: WireObject {
                reference: &ev.involved_object,
                labels: self.labels.as_ref(),
                annotations: self.annotations.as_ref(),
            },
            cluster_name: self.cluster_name.as_deref(),
        }
        .serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POD_EVENT: &str = r#"{
        "metadata": {"name": "nginx.17a", "namespace": "default", "uid": "e-1", "resourceVersion": "42",
                     "managedFields": [{"manager": "kubelet"}]},
        "involvedObject": {"kind": "Pod", "namespace": "default", "name": "nginx", "uid": "p-1",
                           "apiVersion": "v1", "resourceVersion": "7"},
        "reason": "Failed",
        "message": "Back-off pulling image",
        "source": {"component": "kubelet", "host": "node-1"},
        "lastTimestamp": "2024-03-01T10:00:00Z",
        "eventTime": null,
        "count": 3,
        "type": "Warning"
    }"#;

    #[test]
    fn raw_event_parses_wire_shape() {
        let ev: RawEvent = serde_json::from_str(POD_EVENT).unwrap();
        assert_eq!(ev.involved_object.kind, "Pod");
        assert_eq!(ev.event_type, "Warning");
        assert_eq!(ev.count, 3);
        assert!(ev.event_time.is_none());
        assert!(ev.metadata.managed_fields.is_some());
    }

    #[test]
    fn effective_timestamp_prefers_last_timestamp() {
        let mut ev: RawEvent = serde_json::from_str(POD_EVENT).unwrap();
        let last = ev.last_timestamp.unwrap();
        ev.event_time = Some(last - chrono::Duration::seconds(30));
        assert_eq!(ev.effective_timestamp(), Some(last));

        ev.last_timestamp = None;
        assert_eq!(ev.effective_timestamp(), Some(last - chrono::Duration::seconds(30)));
    }

    #[test]
    fn enriched_event_nests_labels_under_involved_object() {
        let raw: RawEvent = serde_json::from_str(POD_EVENT).unwrap();
        let mut ev = EnrichedEvent::new(raw, false);
        ev.labels = Some(Labels::from([("app".to_string(), "nginx".to_string())]));
        ev.cluster_name = Some("prod-eu".to_string());

        let value = ev.to_value().unwrap();
        assert_eq!(value["involvedObject"]["labels"]["app"], "nginx");
        assert_eq!(value["involvedObject"]["kind"], "Pod");
        assert!(value["involvedObject"].get("annotations").is_none());
        assert_eq!(value["clusterName"], "prod-eu");
        assert!(value.get("isUpdate").is_none());
    }

    #[test]
    fn de_dot_rewrites_keys_only() {
        let raw: RawEvent = serde_json::from_str(POD_EVENT).unwrap();
        let mut ev = EnrichedEvent::new(raw, false);
        ev.labels = Some(Labels::from([(
            "app.kubernetes.io/name".to_string(),
            "web.frontend".to_string(),
        )]));

        let dotless = ev.de_dot();
        let labels = dotless.labels.unwrap();
        assert_eq!(labels["app_kubernetes_io/name"], "web.frontend");
        assert!(dotless.annotations.is_none());
    }
}
