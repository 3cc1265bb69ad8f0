//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects signals, memos, and
//! effects. It manages the dependency graph and schedules updates when
//! signals change.
//!
//! # How It Works
//!
//! 1. When a memo or effect is created, it registers with the runtime.
//!
//! 2. When a memo or effect reads a signal (or another memo), the runtime
//!    records the dependency.
//!
//! 3. When a source changes, the runtime:
//!    a. Finds all dependent memos/effects
//!    b. Marks them as "maybe dirty"
//!    c. Queues them, memos ahead of effects
//!    d. Flushes the queue unless a batch is open
//!
//! Memos run first so that an effect reading both a signal and a memo over
//! that signal sees a settled memo, and runs once.
//!
//! # Batching
//!
//! `Runtime::batch` holds the flush until the outermost batch closes. A
//! reconciliation touches many fields; inside a batch every field is written
//! before any effect observes the store.
//!
//! # Thread Safety
//!
//! The registry and the dependency edges are global, behind locks, so
//! reactive values can be shared across threads. The tracking context and
//! the pending queue are thread-local: updates are driven from the thread
//! that performs the write.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use indexmap::{IndexMap, IndexSet};
use parking_lot::RwLock;

use super::context::ReactiveContext;
use super::subscriber::SubscriberId;

/// A trait for types that can be notified when dependencies change.
pub trait Reactive: Send + Sync {
    /// Get the subscriber ID for this reactive value.
    fn subscriber_id(&self) -> SubscriberId;

    /// Mark this reactive value as potentially needing update.
    fn mark_maybe_dirty(&self);

    /// Bring this reactive value up to date. Called by the flush.
    fn schedule(&self);

    /// Check if this reactive value is an effect (eager) or memo (lazy).
    fn is_eager(&self) -> bool;
}

/// Handle to a registered reactive value.
///
/// Dropping this handle unregisters the reactive value from the runtime.
pub struct ReactiveHandle {
    subscriber_id: SubscriberId,
}

impl ReactiveHandle {
    /// The subscriber this handle keeps registered.
    pub fn subscriber_id(&self) -> SubscriberId {
        self.subscriber_id
    }
}

impl Drop for ReactiveHandle {
    fn drop(&mut self) {
        Runtime::unregister(self.subscriber_id);
    }
}

/// The global reactive runtime.
///
/// This is a singleton that manages all reactive values in the application.
pub struct Runtime;

// Maps subscriber IDs to weak references to avoid preventing cleanup.
static REGISTRY: OnceLock<RwLock<HashMap<SubscriberId, Weak<dyn Reactive>>>> = OnceLock::new();
// Source ID -> subscribers, in the order they first read the source.
static SOURCE_SUBSCRIBERS: OnceLock<RwLock<HashMap<u64, IndexSet<SubscriberId>>>> = OnceLock::new();
// Subscriber ID -> sources, so clearing a subscriber does not scan every source.
static SUBSCRIBER_SOURCES: OnceLock<RwLock<HashMap<SubscriberId, HashSet<u64>>>> = OnceLock::new();

/// Counter for source IDs. Signals and memos share one ID space.
static SOURCE_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a new unique source ID.
pub(crate) fn next_source_id() -> u64 {
    SOURCE_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

fn get_registry() -> &'static RwLock<HashMap<SubscriberId, Weak<dyn Reactive>>> {
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

fn get_source_subscribers() -> &'static RwLock<HashMap<u64, IndexSet<SubscriberId>>> {
    SOURCE_SUBSCRIBERS.get_or_init(|| RwLock::new(HashMap::new()))
}

fn get_subscriber_sources() -> &'static RwLock<HashMap<SubscriberId, HashSet<u64>>> {
    SUBSCRIBER_SOURCES.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Work queued on this thread, waiting for the outermost batch to close.
#[derive(Default)]
struct Pending {
    depth: usize,
    memos: IndexMap<SubscriberId, Arc<dyn Reactive>>,
    effects: IndexMap<SubscriberId, Arc<dyn Reactive>>,
}

thread_local! {
    static PENDING: RefCell<Pending> = RefCell::new(Pending::default());
}

/// Closes one batch level on drop; the outermost close flushes.
struct BatchGuard;

impl BatchGuard {
    fn open() -> Self {
        PENDING.with(|pending| pending.borrow_mut().depth += 1);
        BatchGuard
    }
}

impl Drop for BatchGuard {
    fn drop(&mut self) {
        let outermost = PENDING.with(|pending| {
            let mut pending = pending.borrow_mut();
            pending.depth = pending.depth.saturating_sub(1);
            pending.depth == 0
        });

        if !outermost {
            return;
        }
        if std::thread::panicking() {
            PENDING.with(|pending| {
                let mut pending = pending.borrow_mut();
                pending.memos.clear();
                pending.effects.clear();
            });
            return;
        }
        Runtime::flush();
    }
}

/// Holds the depth open during a flush without flushing again on close.
struct FlushGuard;

impl Drop for FlushGuard {
    fn drop(&mut self) {
        PENDING.with(|pending| {
            let mut pending = pending.borrow_mut();
            pending.depth = pending.depth.saturating_sub(1);
        });
    }
}

impl Runtime {
    /// Register a reactive value with the runtime.
    ///
    /// Returns a handle that unregisters the value when dropped.
    pub fn register(reactive: Arc<dyn Reactive>) -> ReactiveHandle {
        let id = reactive.subscriber_id();

        get_registry().write().insert(id, Arc::downgrade(&reactive));

        ReactiveHandle { subscriber_id: id }
    }

    /// Unregister a reactive value.
    fn unregister(id: SubscriberId) {
        get_registry().write().remove(&id);
        Self::clear_dependencies(id);

        PENDING.with(|pending| {
            let mut pending = pending.borrow_mut();
            pending.memos.shift_remove(&id);
            pending.effects.shift_remove(&id);
        });
    }

    /// Record that a subscriber depends on a source.
    ///
    /// Called automatically when a signal or memo is read within a reactive context.
    pub fn add_dependency(source_id: u64, subscriber_id: SubscriberId) {
        get_source_subscribers()
            .write()
            .entry(source_id)
            .or_default()
            .insert(subscriber_id);

        get_subscriber_sources()
            .write()
            .entry(subscriber_id)
            .or_default()
            .insert(source_id);
    }

    /// Remove all dependencies for a subscriber.
    ///
    /// Called before re-running a computation to clear stale dependencies.
    pub fn clear_dependencies(subscriber_id: SubscriberId) {
        let sources = get_subscriber_sources().write().remove(&subscriber_id);

        let Some(sources) = sources else {
            return;
        };

        let mut subscribers = get_source_subscribers().write();
        for source_id in sources {
            if let Some(subs) = subscribers.get_mut(&source_id) {
                subs.shift_remove(&subscriber_id);
                if subs.is_empty() {
                    subscribers.remove(&source_id);
                }
            }
        }
    }

    /// Number of computations currently depending on a source.
    pub fn subscriber_count(source_id: u64) -> usize {
        get_source_subscribers()
            .read()
            .get(&source_id)
            .map(IndexSet::len)
            .unwrap_or(0)
    }

    /// Notify all subscribers that a source changed.
    ///
    /// This is the core update propagation mechanism.
    pub fn notify_signal_change(source_id: u64) {
        let subscriber_ids: Vec<SubscriberId> = {
            let subscribers = get_source_subscribers().read();
            match subscribers.get(&source_id) {
                Some(subs) => subs.iter().copied().collect(),
                None => return,
            }
        };

        let reactives: Vec<Arc<dyn Reactive>> = {
            let registry = get_registry().read();
            subscriber_ids
                .iter()
                .filter_map(|id| registry.get(id).and_then(Weak::upgrade))
                .collect()
        };

        if reactives.is_empty() {
            return;
        }

        let _batch = BatchGuard::open();
        for reactive in reactives {
            reactive.mark_maybe_dirty();
            let id = reactive.subscriber_id();
            PENDING.with(|pending| {
                let mut pending = pending.borrow_mut();
                if reactive.is_eager() {
                    pending.effects.entry(id).or_insert(reactive);
                } else {
                    pending.memos.entry(id).or_insert(reactive);
                }
            });
        }
    }

    /// Run `f` with effect scheduling deferred until the outermost batch closes.
    pub fn batch<T>(f: impl FnOnce() -> T) -> T {
        let _batch = BatchGuard::open();
        f()
    }

    /// Whether a batch (or a flush) is open on this thread.
    pub fn is_batching() -> bool {
        PENDING.with(|pending| pending.borrow().depth > 0)
    }

    /// Drain the pending queue: memos first, then effects, until both are empty.
    fn flush() {
        PENDING.with(|pending| pending.borrow_mut().depth += 1);
        let _flush = FlushGuard;

        loop {
            let next = PENDING.with(|pending| {
                let mut pending = pending.borrow_mut();
                pending
                    .memos
                    .shift_remove_index(0)
                    .or_else(|| pending.effects.shift_remove_index(0))
            });

            match next {
                Some((_, reactive)) => reactive.schedule(),
                None => break,
            }
        }
    }

    /// Get the current subscriber being tracked, if any.
    pub fn current_subscriber() -> Option<SubscriberId> {
        ReactiveContext::current_subscriber()
    }

    /// Check if we're inside a reactive context.
    pub fn is_tracking() -> bool {
        ReactiveContext::is_active()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

    struct MockReactive {
        id: SubscriberId,
        dirty: AtomicBool,
        scheduled: AtomicI32,
        eager: bool,
    }

    impl MockReactive {
        fn new(eager: bool) -> Arc<Self> {
            Arc::new(Self {
                id: SubscriberId::new(),
                dirty: AtomicBool::new(false),
                scheduled: AtomicI32::new(0),
                eager,
            })
        }
    }

    impl Reactive for MockReactive {
        fn subscriber_id(&self) -> SubscriberId {
            self.id
        }

        fn mark_maybe_dirty(&self) {
            self.dirty.store(true, Ordering::SeqCst);
        }

        fn schedule(&self) {
            self.scheduled.fetch_add(1, Ordering::SeqCst);
        }

        fn is_eager(&self) -> bool {
            self.eager
        }
    }

    #[test]
    fn runtime_registers_and_unregisters() {
        let reactive = MockReactive::new(false);
        let id = reactive.id;

        let handle = Runtime::register(reactive);
        assert!(get_registry().read().contains_key(&id));

        drop(handle);
        assert!(!get_registry().read().contains_key(&id));
    }

    #[test]
    fn runtime_notifies_subscribers() {
        let memo = MockReactive::new(false);
        let effect = MockReactive::new(true);

        let _memo_handle = Runtime::register(memo.clone());
        let _effect_handle = Runtime::register(effect.clone());

        let source = next_source_id();
        Runtime::add_dependency(source, memo.id);
        Runtime::add_dependency(source, effect.id);

        Runtime::notify_signal_change(source);

        assert!(memo.dirty.load(Ordering::SeqCst));
        assert!(effect.dirty.load(Ordering::SeqCst));
        assert_eq!(memo.scheduled.load(Ordering::SeqCst), 1);
        assert_eq!(effect.scheduled.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn runtime_clears_dependencies() {
        let reactive = MockReactive::new(false);
        let id = reactive.id;
        let _handle = Runtime::register(reactive.clone());

        let source = next_source_id();
        Runtime::add_dependency(source, id);
        assert_eq!(Runtime::subscriber_count(source), 1);

        Runtime::clear_dependencies(id);
        assert_eq!(Runtime::subscriber_count(source), 0);
    }

    #[test]
    fn batch_defers_and_deduplicates_effects() {
        let effect = MockReactive::new(true);
        let _handle = Runtime::register(effect.clone());

        let a = next_source_id();
        let b = next_source_id();
        Runtime::add_dependency(a, effect.id);
        Runtime::add_dependency(b, effect.id);

        Runtime::batch(|| {
            Runtime::notify_signal_change(a);
            Runtime::notify_signal_change(b);
            assert!(Runtime::is_batching());
            assert_eq!(effect.scheduled.load(Ordering::SeqCst), 0);
        });

        assert!(!Runtime::is_batching());
        assert_eq!(effect.scheduled.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropped_reactive_is_not_scheduled() {
        let effect = MockReactive::new(true);
        let handle = Runtime::register(effect.clone());

        let source = next_source_id();
        Runtime::add_dependency(source, effect.id);

        Runtime::batch(|| {
            Runtime::notify_signal_change(source);
            drop(handle);
        });

        assert_eq!(effect.scheduled.load(Ordering::SeqCst), 0);
    }
}
