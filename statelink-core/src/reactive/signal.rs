//! Signal Implementation
//!
//! A Signal is the fundamental reactive primitive. It holds a value and
//! tracks which computations depend on it.
//!
//! # How Signals Work
//!
//! 1. When a signal is read within a reactive context (memo/effect), the
//!    signal registers that context as a subscriber.
//!
//! 2. When a signal's value changes, all subscribers are notified.
//!
//! 3. Notifications trigger re-execution of dependent computations.
//!
//! Signals also carry plain callback subscribers. These are not part of the
//! dependency graph; the thin default actors use them to fan emissions out to
//! their observers.
//!
//! # Thread Safety
//!
//! Signals are designed to be thread-safe. The value is protected by a
//! RwLock. Callbacks are cloned out of their lock before they run, so a
//! callback may subscribe or unsubscribe while being notified.

use std::fmt::Debug;
use std::sync::Arc;

use parking_lot::RwLock;

use super::context::ReactiveContext;
use super::runtime::{next_source_id, Runtime};
use super::SubscriberId;

type Notifier = Arc<dyn Fn() + Send + Sync>;

/// A reactive signal holding a value of type T.
///
/// # Example
///
/// ```rust,ignore
/// let count = Signal::new(0);
///
/// // Read the value
/// let value = count.get();
///
/// // Update the value (notifies subscribers)
/// count.set(5);
/// ```
pub struct Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Unique identifier for this signal.
    id: u64,

    /// The current value.
    value: Arc<RwLock<T>>,

    /// Notification callbacks, in registration order.
    notifiers: Arc<RwLock<Vec<(SubscriberId, Notifier)>>>,
}

impl<T> Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a new signal with the given initial value.
    pub fn new(value: T) -> Self {
        Self {
            id: next_source_id(),
            value: Arc::new(RwLock::new(value)),
            notifiers: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Get the signal's unique ID.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Register the current computation, if any, as a dependent.
    pub fn track(&self) {
        if let Some(subscriber_id) = ReactiveContext::current_subscriber() {
            ReactiveContext::track_dependency(self.id);
            Runtime::add_dependency(self.id, subscriber_id);
        }
    }

    /// Get the current value.
    ///
    /// If called within a reactive context, this also registers the
    /// current computation as a subscriber.
    pub fn get(&self) -> T {
        self.track();
        self.value.read().clone()
    }

    /// Borrow the current value, tracking the read.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.track();
        f(&self.value.read())
    }

    /// Get the current value without tracking dependencies.
    pub fn get_untracked(&self) -> T {
        self.value.read().clone()
    }

    /// Set a new value and notify subscribers.
    pub fn set(&self, value: T) {
        *self.value.write() = value;

        self.notify_subscribers();
        Runtime::notify_signal_change(self.id);
    }

    /// Update the value using a function.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        let new_value = {
            let guard = self.value.read();
            f(&guard)
        };
        self.set(new_value);
    }

    /// Register a notification callback.
    ///
    /// The callback will be invoked after every `set`.
    pub fn subscribe<F>(&self, subscriber_id: SubscriberId, notify: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.notifiers.write().push((subscriber_id, Arc::new(notify)));
    }

    /// Remove a notification callback.
    pub fn unsubscribe(&self, subscriber_id: SubscriberId) {
        self.notifiers.write().retain(|(id, _)| *id != subscriber_id);
    }

    fn notify_subscribers(&self) {
        let notifiers: Vec<Notifier> = self
            .notifiers
            .read()
            .iter()
            .map(|(_, notify)| Arc::clone(notify))
            .collect();

        for notify in notifiers {
            notify();
        }
    }

    /// Number of callback subscribers plus tracked dependents.
    pub fn subscriber_count(&self) -> usize {
        self.notifiers.read().len() + Runtime::subscriber_count(self.id)
    }
}

impl<T> Clone for Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            value: Arc::clone(&self.value),
            notifiers: Arc::clone(&self.notifiers),
        }
    }
}

impl<T> Debug for Signal<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.id)
            .field("value", &self.get_untracked())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}
