use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Reference to the object an event was recorded against.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectRef {
    /// Object kind, e.g. `Pod` or `Deployment`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Cluster-assigned identifier. Equality on `kind` + `uid` identifies one object.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uid: String,
    /// `apiVersion`, `fieldPath`, `resourceVersion` and the like.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ObjectRef {
    pub fn new(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
        uid: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
            uid: uid.into(),
            extra: Map::new(),
        }
    }
}

/// Identity of the event record itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMeta {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uid: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Component that emitted the event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSource {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub component: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub host: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// # Event
///
/// One observed occurrence against a tracked object, in the cluster API's
/// camelCase JSON shape. This is also the payload forwarded to clients, so
/// fields the producer sent that are not modelled here are kept in `extra`
/// (at every level) and written back out unchanged. Modelled fields the
/// producer left out stay out of the output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[serde(default)]
    pub metadata: EventMeta,
    #[serde(default)]
    pub involved_object: ObjectRef,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    /// Free text. Group sessions use it as the dedup key.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    /// `Normal` or `Warning`.
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<EventSource>,
    /// Explicit event time, preferred for ordering.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_time: Option<DateTime<Utc>>,
    /// When the event was last observed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_timestamp: Option<DateTime<Utc>>,
    /// When the event was first observed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_timestamp: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Event {
    /// Builds an event with the given record name, involved object and message.
    pub fn new(name: impl Into<String>, involved_object: ObjectRef, message: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            metadata: EventMeta {
                uid: format!("event-{}", name),
                namespace: involved_object.namespace.clone(),
                name,
                extra: Map::new(),
            },
            involved_object,
            message: message.into(),
            event_type: "Normal".to_string(),
            count: Some(1),
            ..Default::default()
        }
    }

    pub fn with_event_time(mut self, ts: DateTime<Utc>) -> Self {
        self.event_time = Some(ts);
        self
    }

    pub fn with_last_timestamp(mut self, ts: DateTime<Utc>) -> Self {
        self.last_timestamp = Some(ts);
        self
    }

    pub fn with_first_timestamp(mut self, ts: DateTime<Utc>) -> Self {
        self.first_timestamp = Some(ts);
        self
    }

    /// Key the informer stores this record under.
    pub fn key(&self) -> &str {
        &self.metadata.name
    }
}
