//! Primitive wrapping.
//!
//! Per-field tracking needs a container-shaped value. A primitive is stored
//! as a single-field record under [`SNAPSHOT_FIELD`]; whether a stored value
//! is such a record is remembered beside it, never inferred from its shape,
//! so a projection that is legitimately `{"_snapshot": ...}` round-trips
//! untouched.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::Result;

/// Field holding a wrapped primitive.
pub const SNAPSHOT_FIELD: &str = "_snapshot";

/// A value in the store's storage form, plus its wrap marker.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredValue {
    value: Value,
    wrapped: bool,
}

impl StoredValue {
    /// Store objects and arrays directly; wrap everything else.
    pub fn new(value: Value) -> Self {
        match value {
            Value::Object(_) | Value::Array(_) => Self {
                value,
                wrapped: false,
            },
            primitive => {
                let mut record = Map::with_capacity(1);
                record.insert(SNAPSHOT_FIELD.to_owned(), primitive);
                Self {
                    value: Value::Object(record),
                    wrapped: true,
                }
            }
        }
    }

    /// Convert any serializable value.
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        Ok(Self::new(serde_json::to_value(value)?))
    }

    pub fn is_wrapped(&self) -> bool {
        self.wrapped
    }

    /// The container-shaped form kept in the store.
    pub fn stored(&self) -> &Value {
        &self.value
    }

    /// The value as the caller handed it in.
    pub fn logical(&self) -> &Value {
        unwrap_ref(&self.value, self.wrapped)
    }

    pub fn into_logical(self) -> Value {
        unwrap_owned(self.value, self.wrapped)
    }

    pub(crate) fn into_parts(self) -> (Value, bool) {
        (self.value, self.wrapped)
    }
}

impl From<Value> for StoredValue {
    fn from(value: Value) -> Self {
        Self::new(value)
    }
}

impl From<Map<String, Value>> for StoredValue {
    fn from(map: Map<String, Value>) -> Self {
        Self::new(Value::Object(map))
    }
}

pub(crate) fn unwrap_ref(stored: &Value, wrapped: bool) -> &Value {
    if !wrapped {
        return stored;
    }
    stored.get(SNAPSHOT_FIELD).unwrap_or(&Value::Null)
}

pub(crate) fn unwrap_owned(stored: Value, wrapped: bool) -> Value {
    match stored {
        Value::Object(mut record) if wrapped => {
            record.remove(SNAPSHOT_FIELD).unwrap_or(Value::Null)
        }
        other => other,
    }
}
