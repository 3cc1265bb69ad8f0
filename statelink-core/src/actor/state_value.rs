//! State values.
//!
//! The active configuration of a machine: an atomic state name, or for
//! nested machines a map from parent state to the active child value.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StateValue {
    Atomic(String),
    Compound(IndexMap<String, StateValue>),
}

impl StateValue {
    pub fn atomic(name: impl Into<String>) -> Self {
        StateValue::Atomic(name.into())
    }

    /// Build a value from a dotted path: `"a.b.c"` is `{a: {b: "c"}}`.
    pub fn from_path(path: &str) -> Self {
        let mut segments = path.rsplit('.');
        let leaf = StateValue::Atomic(segments.next().unwrap_or_default().to_owned());
        segments.fold(leaf, |child, parent| {
            let mut map = IndexMap::with_capacity(1);
            map.insert(parent.to_owned(), child);
            StateValue::Compound(map)
        })
    }

    /// Whether `self` lies inside the configuration described by `parent`.
    ///
    /// An atomic parent matches a compound value when it names one of the
    /// value's top-level states.
    pub fn matches(&self, parent: &StateValue) -> bool {
        match (parent, self) {
            (StateValue::Atomic(parent), StateValue::Atomic(child)) => parent == child,
            (StateValue::Compound(_), StateValue::Atomic(_)) => false,
            (StateValue::Atomic(parent), StateValue::Compound(child)) => child.contains_key(parent),
            (StateValue::Compound(parent), StateValue::Compound(child)) => {
                parent.iter().all(|(key, parent_value)| {
                    child
                        .get(key)
                        .is_some_and(|child_value| child_value.matches(parent_value))
                })
            }
        }
    }

    /// Every state path the value is in, parents before children.
    ///
    /// `{a: {b: "c"}}` yields `["a", "a.b", "a.b.c"]`.
    pub fn to_strings(&self) -> Vec<String> {
        match self {
            StateValue::Atomic(name) => vec![name.clone()],
            StateValue::Compound(map) => {
                let mut out: Vec<String> = map.keys().cloned().collect();
                for (key, child) in map {
                    out.extend(
                        child
                            .to_strings()
                            .into_iter()
                            .map(|path| format!("{key}.{path}")),
                    );
                }
                out
            }
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            StateValue::Atomic(name) => Value::String(name.clone()),
            StateValue::Compound(map) => Value::Object(
                map.iter()
                    .map(|(key, child)| (key.clone(), child.to_value()))
                    .collect::<Map<String, Value>>(),
            ),
        }
    }
}

impl From<&str> for StateValue {
    fn from(path: &str) -> Self {
        StateValue::from_path(path)
    }
}

impl From<String> for StateValue {
    fn from(path: String) -> Self {
        StateValue::from_path(&path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compound() -> StateValue {
        StateValue::from_path("active.loading")
    }

    #[test]
    fn path_builds_nested_value() {
        let value: StateValue = serde_json::from_str(r#"{"active":"loading"}"#).unwrap();
        assert_eq!(compound(), value);
        assert_eq!(StateValue::from_path("idle"), StateValue::atomic("idle"));
    }

    #[test]
    fn matches_parents_and_exact_paths() {
        let value = compound();
        assert!(value.matches(&"active".into()));
        assert!(value.matches(&"active.loading".into()));
        assert!(!value.matches(&"active.done".into()));
        assert!(!value.matches(&"idle".into()));

        let atomic = StateValue::atomic("idle");
        assert!(atomic.matches(&"idle".into()));
        assert!(!atomic.matches(&"idle.deeper".into()));
    }

    #[test]
    fn to_strings_lists_every_level() {
        let value = StateValue::from_path("a.b.c");
        assert_eq!(value.to_strings(), vec!["a", "a.b", "a.b.c"]);
    }
}
