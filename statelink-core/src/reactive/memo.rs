//! Memo Implementation
//!
//! A Memo is a cached derived value that re-evaluates only when its
//! dependencies change.
//!
//! # How Memos Work
//!
//! 1. On first access, the memo runs its computation and caches the result.
//!
//! 2. When accessed again, if no dependencies have changed, returns cached value.
//!
//! 3. When a dependency changes, the memo is marked "maybe dirty" and queued.
//!
//! 4. The flush recomputes it. Only if the comparator reports a different
//!    value are the memo's own dependents notified; otherwise they never hear
//!    about the change and the cached value keeps its identity.
//!
//! A memo that is read during a flush before its turn recomputes on the spot
//! and delivers its notification when its turn comes.
//!
//! # Thread Safety
//!
//! Memos are thread-safe. The cached value and dirty state are protected
//! by locks, none of which are held while the computation runs.

use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use super::context::{Cleanup, ReactiveContext};
use super::runtime::{next_source_id, Reactive, ReactiveHandle, Runtime};
use super::subscriber::SubscriberId;

/// Dirty state for a memo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoState {
    /// The cached value is up-to-date.
    Clean,

    /// A dependency might have changed. Need to check.
    MaybeDirty,

    /// The memo definitely needs to recompute.
    Dirty,
}

type Compute<T> = Arc<dyn Fn() -> T + Send + Sync>;
type Equals<T> = Arc<dyn Fn(&T, &T) -> bool + Send + Sync>;

struct MemoInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    id: u64,
    subscriber_id: SubscriberId,
    compute: Compute<T>,
    equals: Equals<T>,
    value: RwLock<Option<T>>,
    state: RwLock<MemoState>,
    /// Set when a recompute during a flush changed the value ahead of `schedule`.
    pending_notify: AtomicBool,
    compute_count: AtomicUsize,
    cleanups: Mutex<Vec<Cleanup>>,
}

impl<T> MemoInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Recompute the value. Returns whether it differs from the cached one.
    fn recompute(&self) -> bool {
        let previous_cleanups = std::mem::take(&mut *self.cleanups.lock());
        for cleanup in previous_cleanups {
            cleanup();
        }

        Runtime::clear_dependencies(self.subscriber_id);

        let new_value = {
            let _ctx = ReactiveContext::enter(self.subscriber_id);
            let value = (self.compute)();
            *self.cleanups.lock() = ReactiveContext::take_cleanups();
            value
        };
        self.compute_count.fetch_add(1, Ordering::Relaxed);

        let changed = {
            let mut current = self.value.write();
            let changed = match current.as_ref() {
                Some(old) => !(self.equals)(old, &new_value),
                None => false,
            };
            if changed || current.is_none() {
                *current = Some(new_value);
            }
            changed
        };

        *self.state.write() = MemoState::Clean;
        changed
    }

    fn get(&self) -> T {
        if let Some(subscriber_id) = ReactiveContext::current_subscriber() {
            ReactiveContext::track_dependency(self.id);
            Runtime::add_dependency(self.id, subscriber_id);
        }

        let state = *self.state.read();
        if state != MemoState::Clean && self.recompute() && Runtime::is_batching() {
            self.pending_notify.store(true, Ordering::SeqCst);
        }

        self.value
            .read()
            .clone()
            .unwrap_or_else(|| (self.compute)())
    }
}

impl<T> Reactive for MemoInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn subscriber_id(&self) -> SubscriberId {
        self.subscriber_id
    }

    fn mark_maybe_dirty(&self) {
        let mut state = self.state.write();
        if *state == MemoState::Clean {
            *state = MemoState::MaybeDirty;
        }
    }

    fn schedule(&self) {
        let state = *self.state.read();
        let changed = if state == MemoState::Clean {
            false
        } else {
            self.recompute()
        };

        if changed || self.pending_notify.swap(false, Ordering::SeqCst) {
            Runtime::notify_signal_change(self.id);
        }
    }

    fn is_eager(&self) -> bool {
        false
    }
}

/// A cached derived value that recomputes only when dependencies change.
///
/// The comparator decides whether a recomputed value counts as a change.
/// `Memo::new` uses `PartialEq`; `Memo::with_equality` takes a custom one.
pub struct Memo<T>
where
    T: Clone + Send + Sync + 'static,
{
    inner: Arc<MemoInner<T>>,
    handle: Arc<ReactiveHandle>,
}

impl<T> Memo<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    /// Create a new memo with the given computation function.
    ///
    /// The computation is not run immediately. It runs on first access.
    pub fn new<F>(compute: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::with_equality(compute, |a, b| a == b)
    }
}

impl<T> Memo<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a memo whose changes are judged by `equals`.
    pub fn with_equality<F, E>(compute: F, equals: E) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
        E: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        let inner = Arc::new(MemoInner {
            id: next_source_id(),
            subscriber_id: SubscriberId::new(),
            compute: Arc::new(compute),
            equals: Arc::new(equals),
            value: RwLock::new(None),
            state: RwLock::new(MemoState::Dirty),
            pending_notify: AtomicBool::new(false),
            compute_count: AtomicUsize::new(0),
            cleanups: Mutex::new(Vec::new()),
        });
        let handle = Runtime::register(inner.clone());

        Self {
            inner,
            handle: Arc::new(handle),
        }
    }

    /// Get the memo's unique ID.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Get the subscriber ID for this memo.
    pub fn subscriber_id(&self) -> SubscriberId {
        self.handle.subscriber_id()
    }

    /// Get the current value, recomputing if necessary.
    ///
    /// Inside a reactive context the read is tracked.
    pub fn get(&self) -> T {
        self.inner.get()
    }

    /// Get the current value without tracking the read.
    pub fn get_untracked(&self) -> T {
        let _ctx = ReactiveContext::untracked();
        self.inner.get()
    }

    /// Mark the memo as potentially needing recomputation.
    pub fn mark_maybe_dirty(&self) {
        self.inner.mark_maybe_dirty();
    }

    /// Mark the memo as definitely needing recomputation.
    pub fn mark_dirty(&self) {
        *self.inner.state.write() = MemoState::Dirty;
    }

    /// Get the current dirty state.
    pub fn state(&self) -> MemoState {
        *self.inner.state.read()
    }

    /// Get the number of dependents.
    pub fn dependent_count(&self) -> usize {
        Runtime::subscriber_count(self.inner.id)
    }

    /// Number of times the computation has run.
    pub fn compute_count(&self) -> usize {
        self.inner.compute_count.load(Ordering::Relaxed)
    }

    /// Check if the memo has a cached value.
    pub fn has_value(&self) -> bool {
        self.inner.value.read().is_some()
    }
}

impl<T> Clone for Memo<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            handle: Arc::clone(&self.handle),
        }
    }
}

impl<T> Debug for Memo<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memo")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .field("has_value", &self.has_value())
            .field("dependent_count", &self.dependent_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{Effect, Signal};
    use std::sync::atomic::AtomicI32;

    #[test]
    fn memo_computes_on_first_access() {
        let call_count = Arc::new(AtomicI32::new(0));
        let call_count_clone = call_count.clone();

        let memo = Memo::new(move || {
            call_count_clone.fetch_add(1, Ordering::SeqCst);
            42
        });

        assert!(!memo.has_value());
        assert_eq!(call_count.load(Ordering::SeqCst), 0);

        let value = memo.get();
        assert_eq!(value, 42);
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
        assert!(memo.has_value());
    }

    #[test]
    fn memo_caches_value_when_clean() {
        let memo = Memo::new(|| 42);

        assert_eq!(memo.get(), 42);
        assert_eq!(memo.get(), 42);
        assert_eq!(memo.get(), 42);
        assert_eq!(memo.compute_count(), 1);
    }

    #[test]
    fn memo_recomputes_when_marked_dirty() {
        let counter = Arc::new(AtomicI32::new(0));
        let counter_clone = counter.clone();

        let memo = Memo::new(move || counter_clone.load(Ordering::SeqCst));

        assert_eq!(memo.get(), 0);

        counter.store(5, Ordering::SeqCst);
        memo.mark_dirty();

        assert_eq!(memo.get(), 5);
        assert_eq!(memo.compute_count(), 2);
    }

    #[test]
    fn memo_follows_signal_automatically() {
        let signal = Signal::new(2);
        let source = signal.clone();
        let memo = Memo::new(move || source.get() * 10);

        assert_eq!(memo.get(), 20);
        signal.set(3);
        assert_eq!(memo.state(), MemoState::Clean);
        assert_eq!(memo.get(), 30);
    }

    #[test]
    fn memo_withholds_notification_when_value_is_equal() {
        let signal = Signal::new(4);
        let source = signal.clone();
        let parity = Memo::new(move || source.get() % 2);

        let runs = Arc::new(AtomicI32::new(0));
        let effect = {
            let parity = parity.clone();
            let runs = runs.clone();
            Effect::new(move || {
                parity.get();
                runs.fetch_add(1, Ordering::SeqCst);
            })
        };
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        signal.set(6);
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        signal.set(7);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        drop(effect);
    }

    #[test]
    fn custom_equality_gates_changes() {
        let signal = Signal::new(String::from("Idle"));
        let source = signal.clone();
        let memo = Memo::with_equality(
            move || source.get(),
            |a: &String, b: &String| a.eq_ignore_ascii_case(b),
        );

        assert_eq!(memo.get(), "Idle");
        signal.set(String::from("IDLE"));
        assert_eq!(memo.get(), "Idle");
        signal.set(String::from("busy"));
        assert_eq!(memo.get(), "busy");
    }

    #[test]
    fn memo_clone_shares_state() {
        let memo1 = Memo::new(|| 42);
        assert_eq!(memo1.get(), 42);

        let memo2 = memo1.clone();

        assert_eq!(memo1.id(), memo2.id());
        assert!(memo2.has_value());
        assert_eq!(memo2.get(), 42);

        memo1.mark_dirty();
        assert_eq!(memo2.state(), MemoState::Dirty);
    }

    #[test]
    fn memo_state_transitions() {
        let memo = Memo::new(|| 42);

        assert_eq!(memo.state(), MemoState::Dirty);

        memo.get();
        assert_eq!(memo.state(), MemoState::Clean);

        memo.mark_maybe_dirty();
        assert_eq!(memo.state(), MemoState::MaybeDirty);

        memo.mark_dirty();
        assert_eq!(memo.state(), MemoState::Dirty);

        memo.get();
        assert_eq!(memo.state(), MemoState::Clean);
    }
}
