//! Reconciliation policy.
//!
//! Bridges serve two kinds of actor through one code path. A machine-backed
//! actor emits snapshots with the predicate contract; those become the
//! snapshot's data fields in the store, with predicates answered by the
//! newest snapshot. Anything else is reconciled as plain data and its
//! predicates answer `false`.
//!
//! The kind is probed once per binding, from the emission the binding was
//! seeded with, and not re-checked on every update.

use std::sync::Arc;

use serde_json::Value;

use crate::actor::{Emitted, Snapshot};

/// How a binding presents its actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewKind {
    /// Snapshots with predicates.
    Machine,
    /// Bare data, no predicates.
    Plain,
}

impl ViewKind {
    pub fn probe(emitted: &Emitted) -> Self {
        if emitted.has_predicates() {
            ViewKind::Machine
        } else {
            ViewKind::Plain
        }
    }
}

/// What one emission contributes to a view.
#[derive(Debug, Clone)]
pub struct DerivedState {
    /// Data to reconcile into the store.
    pub data: Value,
    /// The snapshot predicates delegate to, if any.
    pub predicates: Option<Arc<Snapshot>>,
}

pub fn derive_service_state(kind: ViewKind, next: &Emitted) -> DerivedState {
    match (kind, next) {
        (ViewKind::Machine, Emitted::State(snapshot)) => DerivedState {
            data: snapshot.to_json(),
            predicates: Some(snapshot.clone()),
        },
        (_, other) => DerivedState {
            data: other.to_value(),
            predicates: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::{Event, Transitions};
    use serde_json::json;

    struct Never;

    impl Transitions for Never {
        fn can(&self, _: &Snapshot, _: &Event) -> bool {
            false
        }
    }

    fn machine_snapshot() -> Emitted {
        Snapshot::new("idle", json!({"count": 0}))
            .with_transitions(Arc::new(Never))
            .into()
    }

    #[test]
    fn probe_looks_for_predicates() {
        assert_eq!(ViewKind::probe(&machine_snapshot()), ViewKind::Machine);
        assert_eq!(
            ViewKind::probe(&Snapshot::new("idle", json!({})).into()),
            ViewKind::Plain
        );
        assert_eq!(ViewKind::probe(&json!(3).into()), ViewKind::Plain);
    }

    #[test]
    fn machine_snapshots_bind_predicates() {
        let derived = derive_service_state(ViewKind::Machine, &machine_snapshot());
        assert_eq!(derived.data["context"], json!({"count": 0}));
        assert!(derived.predicates.is_some());
    }

    #[test]
    fn plain_values_pass_through() {
        let derived = derive_service_state(ViewKind::Machine, &json!({"n": 1}).into());
        assert_eq!(derived.data, json!({"n": 1}));
        assert!(derived.predicates.is_none());

        let derived = derive_service_state(ViewKind::Plain, &machine_snapshot());
        assert_eq!(derived.data["value"], json!("idle"));
        assert!(derived.predicates.is_none());
    }
}
