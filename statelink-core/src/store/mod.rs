//! Reactive Store
//!
//! A store holds one structured value and tracks reads per field. Each path
//! read inside a tracking context gets its own version signal; reconciling a
//! new value bumps the version of exactly the tracked paths whose subtree
//! changed, so a reader of `context.count` is woken by a new count and a
//! reader of `value` is not.
//!
//! # Storage Model
//!
//! The store is container-shaped. Primitives are wrapped (see [`wrap`]) and
//! the wrap marker lives beside the value. A separate shape signal fires
//! whenever a reconcile flips the value between wrapped and direct.
//!
//! # Writes
//!
//! All writes go through [`StoreWriter::reconcile`]. Version bumps happen
//! inside one runtime batch after the new value is in place, so an effect
//! woken by one field already sees every other field of the same update.

mod path;
mod reconcile;
mod wrap;

pub use path::{Path, Segment};
pub use reconcile::ReconcileOptions;
pub use wrap::{StoredValue, SNAPSHOT_FIELD};

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;

use crate::reactive::{Runtime, Signal};

struct StoreInner {
    value: RwLock<Value>,
    wrapped: AtomicBool,
    versions: DashMap<Path, Signal<u64>>,
    shape: Signal<u64>,
}

impl StoreInner {
    fn track(&self, path: &Path) {
        if !Runtime::is_tracking() {
            return;
        }
        let version = self
            .versions
            .entry(path.clone())
            .or_insert_with(|| Signal::new(0))
            .clone();
        version.track();
    }
}

/// Create a store seeded with `initial`.
pub fn create_store(initial: impl Into<StoredValue>) -> (Store, StoreWriter) {
    let (value, wrapped) = initial.into().into_parts();
    let inner = Arc::new(StoreInner {
        value: RwLock::new(value),
        wrapped: AtomicBool::new(wrapped),
        versions: DashMap::new(),
        shape: Signal::new(0),
    });

    (
        Store {
            inner: inner.clone(),
        },
        StoreWriter { inner },
    )
}

/// Tracked read handle.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Store {
    /// The whole value, unwrapped. Tracks the root.
    pub fn get(&self) -> Value {
        self.with(Path::root(), |value| value.cloned().unwrap_or(Value::Null))
    }

    /// The field at `path`, if present. Tracks that path only.
    ///
    /// On a wrapped primitive only the root resolves.
    pub fn read(&self, path: impl Into<Path>) -> Option<Value> {
        self.with(path, |value| value.cloned())
    }

    /// Borrow the field at `path`.
    pub fn with<R>(&self, path: impl Into<Path>, f: impl FnOnce(Option<&Value>) -> R) -> R {
        let path = path.into();
        self.inner.shape.track();
        self.inner.track(&path);

        let stored = self.inner.value.read();
        if self.inner.wrapped.load(Ordering::SeqCst) {
            let value = path
                .is_root()
                .then(|| wrap::unwrap_ref(&stored, true));
            f(value)
        } else {
            f(path.resolve(&stored))
        }
    }

    /// Register a dependency on `path` without reading it.
    pub fn track(&self, path: impl Into<Path>) {
        self.inner.track(&path.into());
    }

    /// Whether the stored value is a wrapped primitive. Tracked.
    pub fn is_wrapped(&self) -> bool {
        self.inner.shape.track();
        self.inner.wrapped.load(Ordering::SeqCst)
    }

    /// The whole value without tracking.
    pub fn get_untracked(&self) -> Value {
        let stored = self.inner.value.read();
        wrap::unwrap_ref(&stored, self.inner.wrapped.load(Ordering::SeqCst)).clone()
    }

    /// Number of paths that currently have a version signal.
    pub fn tracked_paths(&self) -> usize {
        self.inner.versions.len()
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("value", &self.get_untracked())
            .field("wrapped", &self.inner.wrapped.load(Ordering::SeqCst))
            .field("tracked_paths", &self.tracked_paths())
            .finish()
    }
}

/// Write handle. Owned by the bridge that created the store.
#[derive(Clone)]
pub struct StoreWriter {
    inner: Arc<StoreInner>,
}

impl StoreWriter {
    /// A read handle onto the same store.
    pub fn store(&self) -> Store {
        Store {
            inner: self.inner.clone(),
        }
    }

    /// Apply `next` with a minimal structural diff.
    ///
    /// Returns the number of tracked paths that were notified.
    pub fn reconcile(&self, next: impl Into<StoredValue>, options: &ReconcileOptions) -> usize {
        let (next, wrapped) = next.into().into_parts();

        let (changes, reshaped) = {
            let mut stored = self.inner.value.write();
            let changes = reconcile::diff(&stored, &next, options);
            let reshaped = self.inner.wrapped.swap(wrapped, Ordering::SeqCst) != wrapped;
            if !changes.is_empty() {
                *stored = next;
            }
            (changes, reshaped)
        };

        if changes.is_empty() && !reshaped {
            return 0;
        }

        // Paths nobody reads any more are dropped instead of carried forever.
        self.inner
            .versions
            .retain(|_, version| version.subscriber_count() > 0);

        let fired: Vec<Signal<u64>> = self
            .inner
            .versions
            .iter()
            .filter(|entry| changes.affects(entry.key()))
            .map(|entry| entry.value().clone())
            .collect();

        tracing::trace!(notified = fired.len(), reshaped, "reconciled store");

        Runtime::batch(|| {
            if reshaped {
                self.inner.shape.update(|version| version + 1);
            }
            for version in &fired {
                version.update(|version| version + 1);
            }
        });

        fired.len()
    }
}

impl fmt::Debug for StoreWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreWriter").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Effect;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn reader(store: &Store, path: &'static str) -> (Effect, Arc<AtomicUsize>) {
        let runs = Arc::new(AtomicUsize::new(0));
        let effect = {
            let store = store.clone();
            let runs = runs.clone();
            Effect::new(move || {
                store.read(path);
                runs.fetch_add(1, Ordering::SeqCst);
            })
        };
        (effect, runs)
    }

    #[test]
    fn read_resolves_paths() {
        let (store, _writer) = create_store(json!({"context": {"count": 2}}));
        assert_eq!(store.read("context.count"), Some(json!(2)));
        assert_eq!(store.read("context.missing"), None);
        assert_eq!(store.get(), json!({"context": {"count": 2}}));
    }

    #[test]
    fn untracked_reads_allocate_no_versions() {
        let (store, _writer) = create_store(json!({"value": "idle"}));
        store.read("value");
        assert_eq!(store.tracked_paths(), 0);
    }

    #[test]
    fn only_changed_readers_rerun() {
        let (store, writer) = create_store(json!({"value": "idle", "context": {"count": 0}}));
        let (_count, count_runs) = reader(&store, "context.count");
        let (_value, value_runs) = reader(&store, "value");

        let notified = writer.reconcile(
            json!({"value": "idle", "context": {"count": 1}}),
            &ReconcileOptions::merge(),
        );

        assert_eq!(notified, 1);
        assert_eq!(count_runs.load(Ordering::SeqCst), 2);
        assert_eq!(value_runs.load(Ordering::SeqCst), 1);
        assert_eq!(store.read("context.count"), Some(json!(1)));
    }

    #[test]
    fn equal_value_notifies_nobody() {
        let value = json!({"value": "idle"});
        let (store, writer) = create_store(value.clone());
        let (_root, runs) = reader(&store, "");

        assert_eq!(writer.reconcile(value, &ReconcileOptions::merge()), 0);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn effect_sees_whole_update() {
        let (store, writer) = create_store(json!({"a": 0, "b": 0}));
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let _effect = {
            let store = store.clone();
            let seen = seen.clone();
            Effect::new(move || {
                let a = store.read("a");
                let b = store.read("b");
                seen.lock().push((a, b));
            })
        };

        writer.reconcile(json!({"a": 1, "b": 1}), &ReconcileOptions::merge());
        assert_eq!(
            *seen.lock(),
            vec![
                (Some(json!(0)), Some(json!(0))),
                (Some(json!(1)), Some(json!(1))),
            ]
        );
    }

    #[test]
    fn wrapped_primitives_read_at_root() {
        let (store, writer) = create_store(json!(3));
        assert!(store.is_wrapped());
        assert_eq!(store.get(), json!(3));
        assert_eq!(store.read(SNAPSHOT_FIELD), None);

        let (_root, runs) = reader(&store, "");
        writer.reconcile(json!(4), &ReconcileOptions::merge());
        assert_eq!(store.get(), json!(4));
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn shape_flip_wakes_readers() {
        let (store, writer) = create_store(json!(1));
        let flips = Arc::new(AtomicUsize::new(0));
        let _effect = {
            let store = store.clone();
            let flips = flips.clone();
            Effect::new(move || {
                store.is_wrapped();
                flips.fetch_add(1, Ordering::SeqCst);
            })
        };

        writer.reconcile(json!({"n": 1}), &ReconcileOptions::merge());
        assert!(!store.is_wrapped());
        assert_eq!(flips.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn dropped_readers_release_versions() {
        let (store, writer) = create_store(json!({"a": 0, "b": 0}));
        let (reader_a, _) = reader(&store, "a");
        let (_reader_b, _) = reader(&store, "b");
        assert_eq!(store.tracked_paths(), 2);

        drop(reader_a);
        writer.reconcile(json!({"a": 1, "b": 0}), &ReconcileOptions::merge());
        assert_eq!(store.tracked_paths(), 1);
    }
}
