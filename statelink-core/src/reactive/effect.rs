//! Effect Implementation
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its function immediately to establish
//!    initial dependencies.
//!
//! 2. When any dependency changes, the effect is queued and re-run by the
//!    runtime flush (once per flush, however many dependencies changed).
//!
//! 3. Before re-running, the effect clears its old dependencies and tracks
//!    new ones during execution.
//!
//! # Differences from Memo
//!
//! - Memos return a value; effects do not.
//! - Memos are lazy (compute on access); effects are eager (run when deps change).
//! - Memos cache results; effects just run their side effect.
//!
//! # Cleanup
//!
//! Cleanups registered with [`on_cleanup`](super::on_cleanup) while the
//! effect runs are called before the effect re-runs and when it is disposed.
//! The bridges park their actor subscriptions here, so each subscription is
//! released by exactly the run that created it.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use super::context::{Cleanup, ReactiveContext};
use super::runtime::{next_source_id, Reactive, ReactiveHandle, Runtime};
use super::subscriber::SubscriberId;

struct EffectInner {
    id: u64,
    subscriber_id: SubscriberId,
    run: Arc<dyn Fn() + Send + Sync>,
    dependencies: RwLock<HashSet<u64>>,
    disposed: AtomicBool,
    run_count: AtomicUsize,
    cleanups: Mutex<Vec<Cleanup>>,
}

impl EffectInner {
    fn run_cleanups(&self) {
        let cleanups = std::mem::take(&mut *self.cleanups.lock());
        for cleanup in cleanups {
            cleanup();
        }
    }

    fn execute(&self) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }

        self.run_cleanups();
        Runtime::clear_dependencies(self.subscriber_id);

        let new_deps: HashSet<u64> = {
            let _ctx = ReactiveContext::enter(self.subscriber_id);
            (self.run)();
            *self.cleanups.lock() = ReactiveContext::take_cleanups();
            ReactiveContext::get_dependencies().into_iter().collect()
        };

        *self.dependencies.write() = new_deps;
        self.run_count.fetch_add(1, Ordering::SeqCst);

        // Disposed by its own run: nothing will call the new cleanups later.
        if self.disposed.load(Ordering::SeqCst) {
            self.run_cleanups();
        }
    }
}

impl Reactive for EffectInner {
    fn subscriber_id(&self) -> SubscriberId {
        self.subscriber_id
    }

    fn mark_maybe_dirty(&self) {}

    fn schedule(&self) {
        self.execute();
    }

    fn is_eager(&self) -> bool {
        true
    }
}

impl Drop for EffectInner {
    fn drop(&mut self) {
        self.run_cleanups();
    }
}

/// A side-effecting computation that runs when dependencies change.
///
/// # Example
///
/// ```rust,ignore
/// let count = Signal::new(0);
///
/// let effect = Effect::new(move || {
///     println!("Count is: {}", count.get());
/// });
///
/// count.set(5);  // Prints: "Count is: 5"
/// ```
pub struct Effect {
    inner: Arc<EffectInner>,
    handle: Arc<ReactiveHandle>,
}

impl Effect {
    /// Create a new effect with the given function.
    ///
    /// The function runs immediately to establish dependencies. Writes it
    /// performs are flushed after the first run completes.
    pub fn new<F>(run: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let effect = Self::new_lazy(run);
        Runtime::batch(|| effect.execute());
        effect
    }

    /// Create a new effect without running it immediately.
    pub fn new_lazy<F>(run: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let inner = Arc::new(EffectInner {
            id: next_source_id(),
            subscriber_id: SubscriberId::new(),
            run: Arc::new(run),
            dependencies: RwLock::new(HashSet::new()),
            disposed: AtomicBool::new(false),
            run_count: AtomicUsize::new(0),
            cleanups: Mutex::new(Vec::new()),
        });
        let handle = Runtime::register(inner.clone());

        Self {
            inner,
            handle: Arc::new(handle),
        }
    }

    /// Get the effect's unique ID.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Get the subscriber ID for this effect.
    pub fn subscriber_id(&self) -> SubscriberId {
        self.handle.subscriber_id()
    }

    /// Execute the effect function.
    ///
    /// This runs the function within a reactive context to track dependencies.
    pub fn execute(&self) {
        self.inner.execute();
    }

    /// Schedule the effect to re-run.
    pub fn schedule(&self) {
        self.inner.schedule();
    }

    /// Dispose of the effect.
    ///
    /// Runs the pending cleanups once; later calls do nothing. After disposal
    /// the effect will not run again.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.run_cleanups();
        Runtime::clear_dependencies(self.inner.subscriber_id);
        self.inner.dependencies.write().clear();
    }

    /// Check if the effect has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Get the number of times the effect has run.
    pub fn run_count(&self) -> usize {
        self.inner.run_count.load(Ordering::SeqCst)
    }

    /// Get the number of dependencies.
    pub fn dependency_count(&self) -> usize {
        self.inner.dependencies.read().len()
    }
}

impl Clone for Effect {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            handle: Arc::clone(&self.handle),
        }
    }
}

impl std::fmt::Debug for Effect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.inner.id)
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
