//! Reactive Context
//!
//! The reactive context tracks which computation is currently running.
//! This enables automatic dependency tracking: when a signal is read,
//! we can register the current computation as a dependent.
//!
//! # Implementation
//!
//! We use a thread-local stack to track the currently executing computation.
//! When entering a reactive context (e.g., running a memo or effect), we push
//! the subscriber onto the stack. When the computation completes, we pop it.
//!
//! Untracked regions push an entry without a subscriber. Reads inside them
//! register nothing, but cleanups registered inside them still belong to the
//! nearest enclosing computation. The bridges rely on this: their effects
//! read only the actor reference and do all subscription work untracked.

use std::cell::RefCell;
use super::SubscriberId;

/// A deferred teardown registered by a running computation.
pub type Cleanup = Box<dyn FnOnce() + Send>;

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<ContextEntry>> = RefCell::new(Vec::new());
}

/// An entry in the reactive context stack.
struct ContextEntry {
    /// The subscriber ID of the current computation, `None` for untracked regions.
    subscriber_id: Option<SubscriberId>,
    /// Source IDs that were read during this computation.
    dependencies: Vec<u64>,
    /// Cleanups registered during this computation.
    cleanups: Vec<Cleanup>,
}

/// Guard that pops the context when dropped.
///
/// This ensures the context stack is properly maintained even if
/// the computation panics.
pub struct ReactiveContext {
    subscriber_id: Option<SubscriberId>,
}

impl ReactiveContext {
    /// Enter a new reactive context for the given subscriber.
    ///
    /// While this context is active, any signals that are read will
    /// register the subscriber as a dependent.
    pub fn enter(subscriber_id: SubscriberId) -> Self {
        Self::push(Some(subscriber_id))
    }

    /// Enter an untracked region.
    ///
    /// Reads inside the region do not register dependencies.
    pub fn untracked() -> Self {
        Self::push(None)
    }

    fn push(subscriber_id: Option<SubscriberId>) -> Self {
        CONTEXT_STACK.with(|stack| {
            stack.borrow_mut().push(ContextEntry {
                subscriber_id,
                dependencies: Vec::new(),
                cleanups: Vec::new(),
            });
        });

        Self { subscriber_id }
    }

    /// Check if reads are currently being tracked.
    pub fn is_active() -> bool {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow()
                .last()
                .map(|entry| entry.subscriber_id.is_some())
                .unwrap_or(false)
        })
    }

    /// Get the current subscriber ID, if reads are being tracked.
    pub fn current_subscriber() -> Option<SubscriberId> {
        CONTEXT_STACK.with(|stack| {
            stack.borrow().last().and_then(|entry| entry.subscriber_id)
        })
    }

    /// Record a dependency on the given source.
    ///
    /// This is called by signals and memos when they are read.
    pub fn track_dependency(source_id: u64) {
        CONTEXT_STACK.with(|stack| {
            if let Some(entry) = stack.borrow_mut().last_mut() {
                if entry.subscriber_id.is_some() {
                    entry.dependencies.push(source_id);
                }
            }
        });
    }

    /// Get the dependencies collected in the current context.
    pub fn get_dependencies() -> Vec<u64> {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow()
                .last()
                .map(|entry| entry.dependencies.clone())
                .unwrap_or_default()
        })
    }

    /// Attach a cleanup to the nearest running computation.
    ///
    /// Returns the cleanup back when no computation is running.
    pub fn register_cleanup(cleanup: Cleanup) -> Result<(), Cleanup> {
        CONTEXT_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            match stack.iter_mut().rev().find(|entry| entry.subscriber_id.is_some()) {
                Some(entry) => {
                    entry.cleanups.push(cleanup);
                    Ok(())
                }
                None => Err(cleanup),
            }
        })
    }

    /// Take the cleanups registered in the current context.
    pub fn take_cleanups() -> Vec<Cleanup> {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow_mut()
                .last_mut()
                .map(|entry| std::mem::take(&mut entry.cleanups))
                .unwrap_or_default()
        })
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        let popped = CONTEXT_STACK.with(|stack| stack.borrow_mut().pop());

        if let Some(entry) = popped {
            debug_assert_eq!(
                entry.subscriber_id, self.subscriber_id,
                "ReactiveContext mismatch: expected {:?}, got {:?}",
                self.subscriber_id, entry.subscriber_id
            );
            // Cleanups nobody collected: run them rather than leak them.
            for cleanup in entry.cleanups {
                cleanup();
            }
        }
    }
}

/// Run `f` without tracking any reads it performs.
pub fn untrack<T>(f: impl FnOnce() -> T) -> T {
    let _ctx = ReactiveContext::untracked();
    f()
}

/// Register `cleanup` to run before the current computation re-runs or is disposed.
///
/// Outside of a computation there is nothing to attach to, so the cleanup is
/// dropped. Returns whether it was registered.
pub fn on_cleanup(cleanup: impl FnOnce() + Send + 'static) -> bool {
    match ReactiveContext::register_cleanup(Box::new(cleanup)) {
        Ok(()) => true,
        Err(_) => {
            tracing::debug!("on_cleanup called outside of a reactive computation");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn context_tracks_subscriber() {
        let id = SubscriberId::new();

        assert!(!ReactiveContext::is_active());
        assert!(ReactiveContext::current_subscriber().is_none());

        {
            let _ctx = ReactiveContext::enter(id);

            assert!(ReactiveContext::is_active());
            assert_eq!(ReactiveContext::current_subscriber(), Some(id));
        }

        assert!(!ReactiveContext::is_active());
        assert!(ReactiveContext::current_subscriber().is_none());
    }

    #[test]
    fn context_tracks_dependencies() {
        let id = SubscriberId::new();
        let _ctx = ReactiveContext::enter(id);

        ReactiveContext::track_dependency(1);
        ReactiveContext::track_dependency(2);
        ReactiveContext::track_dependency(3);

        let deps = ReactiveContext::get_dependencies();
        assert_eq!(deps, vec![1, 2, 3]);
    }

    #[test]
    fn nested_contexts() {
        let id1 = SubscriberId::new();
        let id2 = SubscriberId::new();

        {
            let _ctx1 = ReactiveContext::enter(id1);
            assert_eq!(ReactiveContext::current_subscriber(), Some(id1));

            {
                let _ctx2 = ReactiveContext::enter(id2);
                assert_eq!(ReactiveContext::current_subscriber(), Some(id2));
            }

            assert_eq!(ReactiveContext::current_subscriber(), Some(id1));
        }

        assert!(ReactiveContext::current_subscriber().is_none());
    }

    #[test]
    fn untracked_region_hides_subscriber() {
        let id = SubscriberId::new();
        let _ctx = ReactiveContext::enter(id);

        untrack(|| {
            assert!(!ReactiveContext::is_active());
            ReactiveContext::track_dependency(7);
        });

        assert!(ReactiveContext::is_active());
        assert!(ReactiveContext::get_dependencies().is_empty());
    }

    #[test]
    fn cleanup_inside_untracked_region_attaches_to_enclosing_computation() {
        let id = SubscriberId::new();
        let _ctx = ReactiveContext::enter(id);

        untrack(|| {
            assert!(on_cleanup(|| {}));
        });

        assert_eq!(ReactiveContext::take_cleanups().len(), 1);
    }

    #[test]
    fn cleanup_outside_computation_is_rejected() {
        assert!(!on_cleanup(|| {}));
    }

    #[test]
    fn uncollected_cleanups_run_on_exit() {
        let ran = Arc::new(AtomicBool::new(false));
        {
            let _ctx = ReactiveContext::enter(SubscriberId::new());
            let ran = ran.clone();
            on_cleanup(move || ran.store(true, Ordering::SeqCst));
        }
        assert!(ran.load(Ordering::SeqCst));
    }
}
