//! Snapshot Views
//!
//! A view is the long-lived face of an actor. Its data fields are tracked
//! reads into the bridge's store, so a computation that reads `context.count`
//! re-runs only when the count changes. Its predicates (`matches`, `can`,
//! `has_tag`) first track the field they depend on and then ask the newest
//! snapshot; they never compute at reconcile time and never consult a
//! snapshot captured earlier.
//!
//! The view object itself is created once per bridge and updated in place.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::actor::{ActorRef, Emitted, Event, Snapshot, StateValue};
use crate::derive::{derive_service_state, ViewKind};
use crate::error::{BridgeError, Result};
use crate::store::{create_store, Path, ReconcileOptions, Store, StoreWriter};

struct ViewInner {
    store: Store,
    writer: StoreWriter,
    kind: RwLock<ViewKind>,
    live: RwLock<Emitted>,
    predicates: RwLock<Option<Arc<Snapshot>>>,
}

#[derive(Clone)]
pub struct SnapshotView {
    inner: Arc<ViewInner>,
}

impl SnapshotView {
    pub(crate) fn new(kind: ViewKind, seed: &Emitted) -> Self {
        let derived = derive_service_state(kind, seed);
        let (store, writer) = create_store(derived.data);
        Self {
            inner: Arc::new(ViewInner {
                store,
                writer,
                kind: RwLock::new(kind),
                live: RwLock::new(seed.clone()),
                predicates: RwLock::new(derived.predicates),
            }),
        }
    }

    /// Reconcile an emission. The live snapshot is swapped in before any
    /// reader is notified. Returns the number of notified paths.
    pub(crate) fn apply(&self, next: &Emitted) -> usize {
        let kind = *self.inner.kind.read();
        let derived = derive_service_state(kind, next);
        *self.inner.live.write() = next.clone();
        *self.inner.predicates.write() = derived.predicates;
        self.inner
            .writer
            .reconcile(derived.data, &ReconcileOptions::merge())
    }

    /// Re-probe for a new binding and reseed from `seed`.
    pub(crate) fn rebind(&self, kind: ViewKind, seed: &Emitted) -> usize {
        *self.inner.kind.write() = kind;
        self.apply(seed)
    }

    pub fn kind(&self) -> ViewKind {
        *self.inner.kind.read()
    }

    pub fn store(&self) -> &Store {
        &self.inner.store
    }

    /// Snapshot the predicates currently delegate to. Untracked.
    pub fn snapshot(&self) -> Option<Arc<Snapshot>> {
        self.inner.predicates.read().clone()
    }

    /// The most recent emission. Untracked.
    pub fn emitted(&self) -> Emitted {
        self.inner.live.read().clone()
    }

    // ------------------------------------------------------------------
    // Data fields
    // ------------------------------------------------------------------

    pub fn read(&self, path: impl Into<Path>) -> Option<Value> {
        self.inner.store.read(path)
    }

    pub fn get(&self) -> Value {
        self.inner.store.get()
    }

    /// The whole view decoded into `T`.
    pub fn get_as<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.get()).map_err(|err| BridgeError::Decode(err.to_string()))
    }

    pub fn value(&self) -> Option<StateValue> {
        self.read("value")
            .and_then(|value| serde_json::from_value(value).ok())
    }

    pub fn context(&self) -> Value {
        self.read("context").unwrap_or(Value::Null)
    }

    /// A field below `context`, e.g. `context_at("user.name")`.
    pub fn context_at(&self, path: impl Into<Path>) -> Option<Value> {
        self.read(Path::parse("context").join(&path.into()))
    }

    pub fn tags(&self) -> BTreeSet<String> {
        self.inner.store.with("tags", |tags| {
            tags.and_then(Value::as_array)
                .map(|tags| {
                    tags.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_owned)
                        .collect()
                })
                .unwrap_or_default()
        })
    }

    pub fn event(&self) -> Option<Event> {
        self.read("event")
            .and_then(|event| serde_json::from_value(event).ok())
    }

    pub fn done(&self) -> bool {
        self.inner
            .store
            .with("done", |done| done.and_then(Value::as_bool).unwrap_or(false))
    }

    /// Child actors of the newest snapshot. Tracks `children`.
    pub fn children(&self) -> IndexMap<String, ActorRef> {
        self.inner.store.track("children");
        self.inner
            .live
            .read()
            .as_snapshot()
            .map(|snapshot| snapshot.children.clone())
            .unwrap_or_default()
    }

    pub fn child(&self, id: &str) -> Option<ActorRef> {
        self.inner.store.track("children");
        self.inner
            .live
            .read()
            .as_snapshot()
            .and_then(|snapshot| snapshot.children.get(id).cloned())
    }

    pub fn to_json(&self) -> Value {
        self.get()
    }

    // ------------------------------------------------------------------
    // Predicates
    // ------------------------------------------------------------------

    pub fn matches(&self, query: impl Into<StateValue>) -> bool {
        self.inner.store.track("value");
        self.with_predicates(|snapshot| snapshot.matches(query))
    }

    pub fn can(&self, event: impl Into<Event>) -> bool {
        self.inner.store.track("value");
        self.with_predicates(|snapshot| snapshot.can(event))
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.inner.store.track("tags");
        self.with_predicates(|snapshot| snapshot.has_tag(tag))
    }

    pub fn to_strings(&self) -> Vec<String> {
        self.inner.store.track("value");
        self.inner
            .predicates
            .read()
            .as_ref()
            .map(|snapshot| snapshot.to_strings())
            .unwrap_or_default()
    }

    fn with_predicates(&self, f: impl FnOnce(&Snapshot) -> bool) -> bool {
        let snapshot = self.inner.predicates.read().clone();
        snapshot.is_some_and(|snapshot| f(&snapshot))
    }
}

impl fmt::Debug for SnapshotView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnapshotView")
            .field("kind", &self.kind())
            .field("data", &self.inner.store.get_untracked())
            .finish()
    }
}
