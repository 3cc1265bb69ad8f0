//! Snapshots
//!
//! A snapshot is one immutable emission of a machine-backed actor. Besides
//! its data fields it may carry a transition probe; a snapshot with a probe
//! has the full predicate contract (`matches`, `has_tag`, `can`), which is
//! what the bridges look for when deciding how to present an actor.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{ActorRef, Event, StateValue};
use crate::error::{BridgeError, Result};

/// Answers whether an event would cause a transition from a snapshot.
pub trait Transitions: Send + Sync {
    fn can(&self, snapshot: &Snapshot, event: &Event) -> bool;
}

#[derive(Clone)]
pub struct Snapshot {
    pub value: StateValue,
    pub context: Value,
    pub tags: BTreeSet<String>,
    pub event: Event,
    pub children: IndexMap<String, ActorRef>,
    pub done: bool,
    machine: Option<Arc<dyn Transitions>>,
}

impl Snapshot {
    pub fn new(value: impl Into<StateValue>, context: Value) -> Self {
        Self {
            value: value.into(),
            context,
            tags: BTreeSet::new(),
            event: Event::init(),
            children: IndexMap::new(),
            done: false,
            machine: None,
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_event(mut self, event: impl Into<Event>) -> Self {
        self.event = event.into();
        self
    }

    pub fn with_child(mut self, id: impl Into<String>, child: ActorRef) -> Self {
        self.children.insert(id.into(), child);
        self
    }

    pub fn with_done(mut self, done: bool) -> Self {
        self.done = done;
        self
    }

    /// Attach the probe that answers `can`.
    pub fn with_transitions(mut self, machine: Arc<dyn Transitions>) -> Self {
        self.machine = Some(machine);
        self
    }

    pub fn transitions(&self) -> Option<Arc<dyn Transitions>> {
        self.machine.clone()
    }

    /// Whether the snapshot carries the predicate contract.
    pub fn has_predicates(&self) -> bool {
        self.machine.is_some()
    }

    pub fn matches(&self, query: impl Into<StateValue>) -> bool {
        self.value.matches(&query.into())
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// Whether `event` would cause a transition. `false` without a probe.
    pub fn can(&self, event: impl Into<Event>) -> bool {
        let event = event.into();
        self.machine
            .as_ref()
            .is_some_and(|machine| machine.can(self, &event))
    }

    pub fn to_strings(&self) -> Vec<String> {
        self.value.to_strings()
    }

    /// Data fields as JSON. Children appear by id.
    pub fn to_json(&self) -> Value {
        let mut fields = Map::with_capacity(6);
        fields.insert("value".to_owned(), self.value.to_value());
        fields.insert("context".to_owned(), self.context.clone());
        fields.insert(
            "tags".to_owned(),
            Value::Array(self.tags.iter().cloned().map(Value::String).collect()),
        );
        fields.insert("event".to_owned(), self.event.to_value());
        fields.insert("done".to_owned(), Value::Bool(self.done));
        fields.insert(
            "children".to_owned(),
            Value::Array(self.children.keys().cloned().map(Value::String).collect()),
        );
        Value::Object(fields)
    }

    pub fn persist(&self) -> PersistedSnapshot {
        PersistedSnapshot {
            value: self.value.clone(),
            context: self.context.clone(),
            tags: self.tags.clone(),
            event: self.event.clone(),
            done: self.done,
            children: self.children.keys().cloned().collect(),
        }
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("value", &self.value)
            .field("context", &self.context)
            .field("tags", &self.tags)
            .field("event", &self.event.kind)
            .field("children", &self.children.keys().collect::<Vec<_>>())
            .field("done", &self.done)
            .field("has_predicates", &self.has_predicates())
            .finish()
    }
}

/// Serializable form of a [`Snapshot`], used to resume an actor.
///
/// Child actors cannot be revived from bytes; only their ids are kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedSnapshot {
    pub value: StateValue,
    #[serde(default)]
    pub context: Value,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default = "Event::init")]
    pub event: Event,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub children: Vec<String>,
}

impl PersistedSnapshot {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|err| BridgeError::Decode(err.to_string()))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_msgpack(bytes: &[u8]) -> Result<Self> {
        rmp_serde::from_slice(bytes).map_err(|err| BridgeError::Decode(err.to_string()))
    }

    pub fn to_msgpack(&self) -> Result<Vec<u8>> {
        rmp_serde::to_vec_named(self).map_err(|err| BridgeError::Encode(err.to_string()))
    }

    /// Revive as a snapshot without a probe and without children.
    pub fn into_snapshot(self) -> Snapshot {
        Snapshot {
            value: self.value,
            context: self.context,
            tags: self.tags,
            event: self.event,
            children: IndexMap::new(),
            done: self.done,
            machine: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Always;

    impl Transitions for Always {
        fn can(&self, _: &Snapshot, event: &Event) -> bool {
            event.kind == "GO"
        }
    }

    #[test]
    fn predicates() {
        let snapshot = Snapshot::new("active.loading", json!({}))
            .with_tags(["busy"])
            .with_transitions(Arc::new(Always));

        assert!(snapshot.has_predicates());
        assert!(snapshot.matches("active"));
        assert!(snapshot.has_tag("busy"));
        assert!(!snapshot.has_tag("idle"));
        assert!(snapshot.can("GO"));
        assert!(!snapshot.can("STOP"));
    }

    #[test]
    fn can_is_false_without_probe() {
        let snapshot = Snapshot::new("idle", json!({}));
        assert!(!snapshot.can("GO"));
    }

    #[test]
    fn json_fields() {
        let snapshot = Snapshot::new("idle", json!({"count": 0})).with_tags(["a"]);
        assert_eq!(
            snapshot.to_json(),
            json!({
                "value": "idle",
                "context": {"count": 0},
                "tags": ["a"],
                "event": {"type": "xstate.init"},
                "done": false,
                "children": []
            })
        );
    }

    #[test]
    fn persisted_round_trip_through_msgpack() {
        let persisted = Snapshot::new("active.loading", json!({"n": 1}))
            .with_event(Event::new("LOAD").with("page", 2))
            .persist();
        let bytes = persisted.to_msgpack().unwrap();
        assert_eq!(PersistedSnapshot::from_msgpack(&bytes).unwrap(), persisted);
    }

    #[test]
    fn persisted_json_defaults() {
        let persisted = PersistedSnapshot::from_json(r#"{"value":"idle"}"#).unwrap();
        assert_eq!(persisted.event, Event::init());
        assert!(persisted.context.is_null());
    }

    #[test]
    fn bad_json_is_a_decode_error() {
        assert!(matches!(
            PersistedSnapshot::from_json("{"),
            Err(BridgeError::Decode(_))
        ));
    }
}
