//! Bridges
//!
//! A bridge connects one actor to one store for the lifetime of a scope:
//!
//! 1. At creation it reads the actor's snapshot synchronously and seeds the
//!    store, so the view is complete before anything is scheduled.
//! 2. When the scope mounts it subscribes; each emission is reconciled into
//!    the store inside one runtime batch.
//! 3. When the scope is disposed (or [`Bridge::teardown`] is called) it
//!    releases exactly the subscription it created. A scope disposed before
//!    mounting never subscribes at all.
//!
//! [`Bridge`] is bound to one actor for life. [`DynamicBridge`] follows an
//! actor reference that can change identity.

mod dynamic;
mod sender;

pub use dynamic::{use_actor, use_actor_with, ActorSource, BindState, DynamicBridge, Extractor};
pub use sender::{DeferPolicy, Sender};

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::actor::{ActorRef, ActorStatus, Emitted, Event, Observer, Subscription};
use crate::config::BridgeOptions;
use crate::derive::ViewKind;
use crate::error::{BridgeError, BridgeWarning, Result};
use crate::reactive::Scope;
use crate::view::SnapshotView;

/// Whether a bridge may stop its actor on detach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Ownership {
    /// Handed in by the caller; only observed.
    Supplied,
    /// Constructed by the bridge itself.
    Owned,
}

type DetachHook = Box<dyn FnOnce() + Send>;

struct BridgeInner {
    actor: ActorRef,
    ownership: Ownership,
    subscription: Mutex<Option<Subscription>>,
    torn_down: AtomicBool,
    warnings: Mutex<Vec<BridgeWarning>>,
    on_detach: Mutex<Vec<DetachHook>>,
}

impl BridgeInner {
    fn subscribe(&self, view: &SnapshotView) -> Result<()> {
        if self.torn_down.load(Ordering::SeqCst) {
            return Ok(());
        }

        let observer: Observer = {
            let view = view.clone();
            Arc::new(move |emitted: &Emitted| {
                view.apply(emitted);
            })
        };
        let subscription = self
            .actor
            .subscribe(observer)
            .map_err(|source| BridgeError::SourceSubscription {
                actor: self.actor.id().to_owned(),
                source,
            })?;
        tracing::debug!(actor = self.actor.id(), "bridge subscribed");

        // The actor may have moved on between seeding and subscribing.
        if self.actor.status() == ActorStatus::Running {
            view.apply(&self.actor.snapshot());
        }

        *self.subscription.lock() = Some(subscription);
        Ok(())
    }

    fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }

        let subscription = self.subscription.lock().take();
        if let Some(subscription) = subscription {
            subscription.unsubscribe();
            tracing::debug!(actor = self.actor.id(), "bridge unsubscribed");
        }

        if self.ownership == Ownership::Owned {
            self.actor.stop();
            tracing::debug!(actor = self.actor.id(), "stopped bridge-owned actor");
        }

        let hooks = std::mem::take(&mut *self.on_detach.lock());
        for hook in hooks {
            hook();
        }
    }
}

/// One actor, one store, one subscription.
#[derive(Clone)]
pub struct Bridge {
    view: SnapshotView,
    sender: Sender,
    inner: Arc<BridgeInner>,
}

/// Bridge a caller-supplied actor. The bridge never stops it.
pub fn create_bridge(scope: &Scope, actor: ActorRef, options: BridgeOptions) -> Result<Bridge> {
    attach(scope, actor, &options, Ownership::Supplied)
}

pub(crate) fn attach(
    scope: &Scope,
    actor: ActorRef,
    options: &BridgeOptions,
    ownership: Ownership,
) -> Result<Bridge> {
    let seed = seed(&actor, options);
    let view = SnapshotView::new(ViewKind::probe(&seed), &seed);
    let inner = Arc::new(BridgeInner {
        actor: actor.clone(),
        ownership,
        subscription: Mutex::new(None),
        torn_down: AtomicBool::new(false),
        warnings: Mutex::new(Vec::new()),
        on_detach: Mutex::new(Vec::new()),
    });

    {
        let inner = inner.clone();
        scope.on_cleanup(move || inner.teardown());
    }
    {
        let inner = inner.clone();
        let view = view.clone();
        scope.on_mount(move |_| inner.subscribe(&view))?;
    }

    Ok(Bridge {
        view,
        sender: Sender::bound(actor, DeferPolicy::Forward),
        inner,
    })
}

/// The emission a new bridge is seeded with.
///
/// A running actor is asked for its snapshot. One that has not started yet
/// is seeded from `rehydrate_from`, else its initial snapshot, else whatever
/// `snapshot` returns; `initial_context` is merged into that fallback.
pub(crate) fn seed(actor: &ActorRef, options: &BridgeOptions) -> Emitted {
    if actor.status() != ActorStatus::NotStarted {
        return actor.snapshot();
    }

    let initial = actor.initial_snapshot();
    let fallback = match options.rehydrate_from.clone() {
        Some(persisted) => {
            let mut snapshot = persisted.into_snapshot();
            // A persisted snapshot has no probe; borrow the actor's.
            let probe = initial
                .as_ref()
                .and_then(Emitted::as_snapshot)
                .and_then(|initial| initial.transitions());
            if let Some(probe) = probe {
                snapshot = snapshot.with_transitions(probe);
            }
            Emitted::from(snapshot)
        }
        None => initial.unwrap_or_else(|| actor.snapshot()),
    };

    match fallback {
        Emitted::State(snapshot) if options.initial_context.is_some() => {
            Emitted::from(options.apply_context((*snapshot).clone()))
        }
        other => other,
    }
}

impl Bridge {
    pub fn view(&self) -> &SnapshotView {
        &self.view
    }

    /// Forward an event to the actor unchanged.
    pub fn send(&self, event: impl Into<Event>) {
        self.sender.send(event);
    }

    pub fn sender(&self) -> Sender {
        self.sender.clone()
    }

    pub fn actor(&self) -> &ActorRef {
        &self.inner.actor
    }

    pub fn is_subscribed(&self) -> bool {
        self.inner.subscription.lock().is_some()
    }

    /// Advisories raised while the bridge was built.
    pub fn warnings(&self) -> Vec<BridgeWarning> {
        self.inner.warnings.lock().clone()
    }

    /// Detach now. Safe to combine with scope disposal; the second call does
    /// nothing.
    pub fn teardown(&self) {
        self.inner.teardown();
    }

    pub(crate) fn warn(&self, warning: BridgeWarning) {
        tracing::warn!(%warning, "stale actor");
        self.inner.warnings.lock().push(warning);
    }

    pub(crate) fn is_torn_down(&self) -> bool {
        self.inner.torn_down.load(Ordering::SeqCst)
    }

    /// Run `hook` once when the bridge detaches.
    pub(crate) fn on_detach(&self, hook: impl FnOnce() + Send + 'static) {
        if self.inner.torn_down.load(Ordering::SeqCst) {
            hook();
            return;
        }
        self.inner.on_detach.lock().push(Box::new(hook));
    }
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("actor", &self.inner.actor)
            .field("ownership", &self.inner.ownership)
            .field("subscribed", &self.is_subscribed())
            .finish()
    }
}
