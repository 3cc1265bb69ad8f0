//! Structural diff between two stored values.
//!
//! The walk reports which paths changed. A path is changed iff something in
//! its subtree differs; every ancestor of a change is therefore changed too.
//! Where a subtree was added, removed, changed type or (in keyed mode) was
//! swapped for a different element, the walk stops and records the subtree
//! as replaced: every tracked path at or below it must fire.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::path::{Path, Segment};

/// How [`StoreWriter::reconcile`](super::StoreWriter::reconcile) matches old
/// and new values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileOptions {
    /// Diff array elements by position, even when their keys differ.
    pub merge: bool,
    /// Identity field for array elements when `merge` is off.
    pub key: String,
}

impl ReconcileOptions {
    /// Positional diff everywhere. Every bridge reconciles this way.
    pub fn merge() -> Self {
        Self {
            merge: true,
            ..Self::default()
        }
    }

    /// Keyed array diff on `key`.
    pub fn keyed(key: impl Into<String>) -> Self {
        Self {
            merge: false,
            key: key.into(),
        }
    }
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            merge: false,
            key: "id".to_owned(),
        }
    }
}

/// Result of a diff.
#[derive(Debug, Default)]
pub(crate) struct Changes {
    changed: HashSet<Path>,
    replaced: Vec<Path>,
}

impl Changes {
    pub(crate) fn is_empty(&self) -> bool {
        self.changed.is_empty()
    }

    /// Whether a reader of `path` must be notified.
    pub(crate) fn affects(&self, path: &Path) -> bool {
        self.changed.contains(path) || self.replaced.iter().any(|root| path.starts_with(root))
    }

    fn replace(&mut self, path: &Path) {
        self.replaced.push(path.clone());
    }
}

pub(crate) fn diff(old: &Value, new: &Value, options: &ReconcileOptions) -> Changes {
    let mut changes = Changes::default();
    let mut path = Path::root();
    walk(old, new, &mut path, options, &mut changes);
    changes
}

fn walk(
    old: &Value,
    new: &Value,
    path: &mut Path,
    options: &ReconcileOptions,
    changes: &mut Changes,
) -> bool {
    let changed = match (old, new) {
        (Value::Object(prev), Value::Object(next)) => {
            let mut changed = false;
            for (key, next_field) in next {
                path.push(Segment::key(key));
                changed |= match prev.get(key) {
                    Some(prev_field) => walk(prev_field, next_field, path, options, changes),
                    None => {
                        changes.replace(path);
                        true
                    }
                };
                path.pop();
            }
            for key in prev.keys().filter(|key| !next.contains_key(*key)) {
                path.push(Segment::key(key));
                changes.replace(path);
                path.pop();
                changed = true;
            }
            changed
        }
        (Value::Array(prev), Value::Array(next)) => {
            let mut changed = prev.len() != next.len();
            for (index, next_item) in next.iter().enumerate() {
                path.push(Segment::Index(index));
                changed |= match prev.get(index) {
                    Some(prev_item) if options.merge || same_identity(prev_item, next_item, &options.key) => {
                        walk(prev_item, next_item, path, options, changes)
                    }
                    _ => {
                        changes.replace(path);
                        true
                    }
                };
                path.pop();
            }
            for index in next.len()..prev.len() {
                path.push(Segment::Index(index));
                changes.replace(path);
                path.pop();
            }
            changed
        }
        (prev, next) if prev == next => false,
        _ => {
            changes.replace(path);
            true
        }
    };

    if changed {
        changes.changed.insert(path.clone());
    }
    changed
}

/// Elements without a key on both sides are matched by position.
fn same_identity(prev: &Value, next: &Value, key: &str) -> bool {
    match (prev.get(key), next.get(key)) {
        (Some(a), Some(b)) => a == b,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn p(path: &str) -> Path {
        Path::parse(path)
    }

    #[test]
    fn equal_values_report_nothing() {
        let value = json!({"value": "idle", "context": {"count": 0}});
        assert!(diff(&value, &value.clone(), &ReconcileOptions::merge()).is_empty());
    }

    #[test]
    fn leaf_change_marks_ancestors_only() {
        let old = json!({"value": "idle", "context": {"count": 0, "name": "a"}});
        let new = json!({"value": "idle", "context": {"count": 1, "name": "a"}});
        let changes = diff(&old, &new, &ReconcileOptions::merge());

        assert!(changes.affects(&p("context.count")));
        assert!(changes.affects(&p("context")));
        assert!(changes.affects(&Path::root()));
        assert!(!changes.affects(&p("value")));
        assert!(!changes.affects(&p("context.name")));
    }

    #[test]
    fn removed_subtree_fires_descendants() {
        let old = json!({"context": {"user": {"name": "a"}}});
        let new = json!({"context": {}});
        let changes = diff(&old, &new, &ReconcileOptions::merge());
        assert!(changes.affects(&p("context.user.name")));
    }

    #[test]
    fn type_change_fires_descendants() {
        let old = json!({"context": {"user": "anonymous"}});
        let new = json!({"context": {"user": {"name": "a"}}});
        let changes = diff(&old, &new, &ReconcileOptions::merge());
        assert!(changes.affects(&p("context.user.name")));
    }

    #[test]
    fn arrays_diff_by_position_in_merge_mode() {
        let old = json!({"items": [{"id": 1, "done": false}, {"id": 2, "done": false}]});
        let new = json!({"items": [{"id": 3, "done": false}, {"id": 2, "done": true}]});
        let changes = diff(&old, &new, &ReconcileOptions::merge());

        assert!(changes.affects(&p("items.0.id")));
        assert!(!changes.affects(&p("items.0.done")));
        assert!(changes.affects(&p("items.1.done")));
    }

    #[test]
    fn keyed_mode_replaces_swapped_elements() {
        let old = json!({"items": [{"id": 1, "done": false}]});
        let new = json!({"items": [{"id": 3, "done": false}]});
        let changes = diff(&old, &new, &ReconcileOptions::default());
        assert!(changes.affects(&p("items.0.done")));
    }

    #[test]
    fn shrinking_array_fires_dropped_indexes() {
        let old = json!({"items": [1, 2, 3]});
        let new = json!({"items": [1]});
        let changes = diff(&old, &new, &ReconcileOptions::merge());

        assert!(changes.affects(&p("items")));
        assert!(changes.affects(&p("items.2")));
        assert!(!changes.affects(&p("items.0")));
    }
}
