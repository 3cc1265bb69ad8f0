//! Dynamic bridges.
//!
//! A dynamic bridge follows an actor reference that may change identity.
//! The reference is memoized by identity, and one effect reads only that
//! memo. Each run of the effect is one binding: it reseeds the view from the
//! new actor, subscribes, and parks the subscription as the run's cleanup,
//! so the next run (or disposal) releases exactly that subscription.
//!
//! ```text
//! Unbound ──mount──▶ Bound(a) ──identity change──▶ Bound(b) ──dispose──▶ Unbound
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::sender::{DeferPolicy, Sender};
use crate::actor::{ActorRef, Emitted, Event, Observer};
use crate::derive::ViewKind;
use crate::error::{BridgeError, Result};
use crate::reactive::{on_cleanup, untrack, Effect, Memo, Scope, Signal};
use crate::view::SnapshotView;

/// Reads the emission used to seed a binding.
pub type Extractor = Arc<dyn Fn(&ActorRef) -> Emitted + Send + Sync>;

fn current_snapshot() -> Extractor {
    Arc::new(|actor: &ActorRef| actor.snapshot())
}

/// Where a dynamic bridge gets its actor from.
#[derive(Clone)]
pub enum ActorSource {
    Static(ActorRef),
    Accessor(Arc<dyn Fn() -> ActorRef + Send + Sync>),
}

impl ActorSource {
    /// A source that re-evaluates `accessor` whenever what it reads changes.
    pub fn accessor(accessor: impl Fn() -> ActorRef + Send + Sync + 'static) -> Self {
        ActorSource::Accessor(Arc::new(accessor))
    }

    pub(crate) fn memo(self) -> Memo<ActorRef> {
        match self {
            ActorSource::Static(actor) => Memo::new(move || actor.clone()),
            ActorSource::Accessor(accessor) => Memo::new(move || accessor()),
        }
    }
}

impl From<ActorRef> for ActorSource {
    fn from(actor: ActorRef) -> Self {
        ActorSource::Static(actor)
    }
}

impl From<Signal<ActorRef>> for ActorSource {
    fn from(signal: Signal<ActorRef>) -> Self {
        ActorSource::accessor(move || signal.get())
    }
}

impl From<Memo<ActorRef>> for ActorSource {
    fn from(memo: Memo<ActorRef>) -> Self {
        ActorSource::accessor(move || memo.get())
    }
}

impl fmt::Debug for ActorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActorSource::Static(actor) => f.debug_tuple("Static").field(actor).finish(),
            ActorSource::Accessor(_) => f.write_str("Accessor(..)"),
        }
    }
}

/// Binding state of a dynamic bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindState {
    Unbound,
    Bound(ActorRef),
}

struct DynamicInner {
    actor: Memo<ActorRef>,
    view: SnapshotView,
    sender: Sender,
    extractor: Extractor,
    state: Mutex<BindState>,
    effect: Mutex<Option<Effect>>,
    last_error: Mutex<Option<BridgeError>>,
    torn_down: AtomicBool,
}

impl DynamicInner {
    fn start(self: &Arc<Self>) -> Result<()> {
        if self.torn_down.load(Ordering::SeqCst) {
            return Ok(());
        }
        let weak: Weak<DynamicInner> = Arc::downgrade(self);
        let effect = Effect::new(move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let actor = inner.actor.get();
            untrack(|| inner.bind(actor));
        });
        *self.effect.lock() = Some(effect);

        match self.last_error.lock().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// One binding. Runs untracked inside the bridge effect.
    fn bind(self: &Arc<Self>, actor: ActorRef) {
        let rebinding = !self
            .sender
            .actor()
            .is_some_and(|current| current.same(&actor));
        let generation = if rebinding {
            tracing::debug!(actor = actor.id(), "rebinding bridge");
            self.sender.rebind(Some(actor.clone()))
        } else {
            self.sender.generation()
        };

        let seed = (self.extractor)(&actor);
        self.view.rebind(ViewKind::probe(&seed), &seed);
        *self.state.lock() = BindState::Bound(actor.clone());

        let observer: Observer = {
            let weak = Arc::downgrade(self);
            Arc::new(move |emitted: &Emitted| {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                if !inner.sender.is_current(generation) {
                    return;
                }
                inner.view.apply(emitted);
                inner.sender.replay();
            })
        };

        match actor.subscribe(observer) {
            Ok(subscription) => {
                tracing::debug!(actor = actor.id(), generation, "bridge subscribed");
                let id = actor.id().to_owned();
                on_cleanup(move || {
                    subscription.unsubscribe();
                    tracing::debug!(actor = %id, "bridge unsubscribed");
                });
                *self.last_error.lock() = None;
                self.sender.replay();
            }
            Err(source) => {
                let err = BridgeError::SourceSubscription {
                    actor: actor.id().to_owned(),
                    source,
                };
                tracing::error!(error = %err, "bridge could not subscribe to its actor");
                *self.last_error.lock() = Some(err);
            }
        }
    }

    fn teardown(&self) {
        self.torn_down.store(true, Ordering::SeqCst);
        let effect = self.effect.lock().take();
        if let Some(effect) = effect {
            effect.dispose();
        }
        self.sender.rebind(None);
        *self.state.lock() = BindState::Unbound;
    }
}

/// A bridge over an actor reference that may change identity.
#[derive(Clone)]
pub struct DynamicBridge {
    inner: Arc<DynamicInner>,
}

/// Follow `source`, seeding each binding from the actor's current snapshot.
pub fn use_actor(scope: &Scope, source: impl Into<ActorSource>) -> Result<DynamicBridge> {
    use_actor_with(scope, source, current_snapshot())
}

/// Follow `source`, seeding each binding with `extractor`.
pub fn use_actor_with(
    scope: &Scope,
    source: impl Into<ActorSource>,
    extractor: Extractor,
) -> Result<DynamicBridge> {
    let actor = source.into().memo();
    let first = actor.get_untracked();
    let seed = extractor(&first);

    let inner = Arc::new(DynamicInner {
        view: SnapshotView::new(ViewKind::probe(&seed), &seed),
        sender: Sender::bound(first, DeferPolicy::UntilRunning),
        actor,
        extractor,
        state: Mutex::new(BindState::Unbound),
        effect: Mutex::new(None),
        last_error: Mutex::new(None),
        torn_down: AtomicBool::new(false),
    });

    {
        let inner = inner.clone();
        scope.on_cleanup(move || inner.teardown());
    }
    {
        let inner = inner.clone();
        scope.on_mount(move |_| inner.start())?;
    }

    Ok(DynamicBridge { inner })
}

impl DynamicBridge {
    pub fn view(&self) -> &SnapshotView {
        &self.inner.view
    }

    /// Send through the stable indirection.
    pub fn send(&self, event: impl Into<Event>) {
        self.inner.sender.send(event);
    }

    /// The stable send handle. Survives rebinds.
    pub fn sender(&self) -> Sender {
        self.inner.sender.clone()
    }

    pub fn state(&self) -> BindState {
        self.inner.state.lock().clone()
    }

    /// The most recent subscription failure, cleared by the next success.
    pub fn last_error(&self) -> Option<BridgeError> {
        self.inner.last_error.lock().clone()
    }

    /// Detach now. Idempotent with scope disposal.
    pub fn teardown(&self) {
        self.inner.teardown();
    }
}

impl fmt::Debug for DynamicBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicBridge")
            .field("state", &self.state())
            .field("sender", &self.inner.sender)
            .finish()
    }
}
