//! Bridge options.
//!
//! Options only matter at bridge creation: they decide which snapshot the
//! bridge is seeded from when its actor has not started yet, and which
//! context a thin default machine starts with.
//!
//! # Example
//!
//! ```rust,ignore
//! let options = BridgeOptions::new()
//!     .with_initial_context(json!({"count": 10}).as_object().cloned().unwrap_or_default())
//!     .rehydrate_from_json(&saved)?;
//! let bridge = fsm::create_service(&scope, counter_machine, options)?;
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::actor::{PersistedSnapshot, Snapshot};
use crate::error::Result;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeOptions {
    /// Fields merged over the actor's default context.
    pub initial_context: Option<Map<String, Value>>,

    /// A snapshot to resume from instead of the actor's initial one.
    pub rehydrate_from: Option<PersistedSnapshot>,
}

impl BridgeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_initial_context(mut self, context: Map<String, Value>) -> Self {
        self.initial_context = Some(context);
        self
    }

    pub fn rehydrate_from(mut self, snapshot: PersistedSnapshot) -> Self {
        self.rehydrate_from = Some(snapshot);
        self
    }

    pub fn rehydrate_from_json(self, json: &str) -> Result<Self> {
        Ok(self.rehydrate_from(PersistedSnapshot::from_json(json)?))
    }

    pub fn rehydrate_from_msgpack(self, bytes: &[u8]) -> Result<Self> {
        Ok(self.rehydrate_from(PersistedSnapshot::from_msgpack(bytes)?))
    }

    /// Apply `initial_context` to a snapshot's context.
    pub(crate) fn apply_context(&self, mut snapshot: Snapshot) -> Snapshot {
        if let Some(partial) = &self.initial_context {
            merge_context(&mut snapshot.context, partial);
        }
        snapshot
    }
}

/// Shallow merge: fields of `partial` overwrite fields of `context`. A
/// non-object context is replaced.
pub(crate) fn merge_context(context: &mut Value, partial: &Map<String, Value>) {
    match context {
        Value::Object(fields) => {
            for (key, value) in partial {
                fields.insert(key.clone(), value.clone());
            }
        }
        other => *other = Value::Object(partial.clone()),
    }
}
