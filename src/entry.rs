use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single logbook event.
///
/// `when` is seconds since the Unix epoch and is the only field the engine
/// looks at; it drives both ordering and expiry. Everything else travels as
/// an opaque JSON payload for the renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub when: f64,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl LogEntry {
    pub fn new(when: f64) -> Self {
        Self {
            when,
            payload: Map::new(),
        }
    }

    /// Builder-style helper for attaching a payload field.
    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.payload.insert(key.to_string(), value.into());
        self
    }

    pub fn field_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    pub fn entity_id(&self) -> Option<&str> {
        self.field_str("entity_id")
    }

    pub fn device_id(&self) -> Option<&str> {
        self.field_str("device_id")
    }
}
