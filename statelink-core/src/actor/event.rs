use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Type of the event recorded on a freshly created snapshot.
pub const INIT_EVENT: &str = "xstate.init";

/// An event sent to an actor: a `type` plus arbitrary payload fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Event {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            payload: Map::new(),
        }
    }

    /// The event a snapshot carries before anything was sent.
    pub fn init() -> Self {
        Self::new(INIT_EVENT)
    }

    /// Add a payload field.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    /// JSON form, `{"type": ..., ...payload}`.
    pub fn to_value(&self) -> Value {
        let mut object = Map::with_capacity(self.payload.len() + 1);
        object.insert("type".to_owned(), Value::String(self.kind.clone()));
        for (key, value) in &self.payload {
            object.insert(key.clone(), value.clone());
        }
        Value::Object(object)
    }
}

impl From<&str> for Event {
    fn from(kind: &str) -> Self {
        Event::new(kind)
    }
}

impl From<String> for Event {
    fn from(kind: String) -> Self {
        Event::new(kind)
    }
}
