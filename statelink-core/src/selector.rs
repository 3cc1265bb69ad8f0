//! Selectors
//!
//! A selector keeps one projected slice of an actor's state in its own
//! store. Every emission, and every change of actor identity, re-runs the
//! projection; the comparator decides whether the result replaces the
//! stored one. Readers are only woken by a replacement that actually
//! changes the stored data.
//!
//! Projections that produce primitives are wrapped before they are stored
//! and unwrapped on read (see [`crate::store::StoredValue`]).

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;

use crate::actor::{ActorRef, Emitted, Observer};
use crate::bridge::{ActorSource, Extractor};
use crate::error::{BridgeError, ProjectionError, Result};
use crate::reactive::{on_cleanup, untrack, Effect, Memo, Scope, Signal};
use crate::store::{create_store, Path, ReconcileOptions, Store, StoreWriter, StoredValue};

type Projection<T> = Arc<dyn Fn(&Emitted) -> std::result::Result<T, ProjectionError> + Send + Sync>;
type Compare<T> = Arc<dyn Fn(&T, &T) -> bool + Send + Sync>;

struct SelectorInner<T>
where
    T: Clone + Serialize + Send + Sync + 'static,
{
    actor: Memo<ActorRef>,
    projection: Projection<T>,
    compare: Compare<T>,
    extractor: Extractor,
    current: RwLock<Option<T>>,
    store: Store,
    writer: StoreWriter,
    error: Signal<Option<ProjectionError>>,
    bound: Mutex<Option<ActorRef>>,
    effect: Mutex<Option<Effect>>,
    subscribe_error: Mutex<Option<BridgeError>>,
    torn_down: AtomicBool,
}

impl<T> SelectorInner<T>
where
    T: Clone + Serialize + Send + Sync + 'static,
{
    /// Project `emitted` and store the result unless the comparator calls it
    /// equal to the current one.
    fn guarded_update(&self, emitted: &Emitted) {
        let next = match (self.projection)(emitted) {
            Ok(next) => next,
            Err(err) => {
                tracing::debug!(error = %err, "selector projection failed");
                self.error.set(Some(err));
                return;
            }
        };

        if self.error.get_untracked().is_some() {
            self.error.set(None);
        }

        let unchanged = self
            .current
            .read()
            .as_ref()
            .is_some_and(|previous| (self.compare)(previous, &next));
        if unchanged {
            return;
        }

        match StoredValue::from_serialize(&next) {
            Ok(stored) => {
                *self.current.write() = Some(next);
                self.writer.reconcile(stored, &ReconcileOptions::merge());
            }
            Err(err) => self.error.set(Some(ProjectionError::new(err))),
        }
    }

    fn bind(self: &Arc<Self>, actor: ActorRef) {
        *self.bound.lock() = Some(actor.clone());
        self.guarded_update(&(self.extractor)(&actor));

        let observer: Observer = {
            let weak: Weak<Self> = Arc::downgrade(self);
            let actor = actor.clone();
            Arc::new(move |emitted: &Emitted| {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                let current = inner.bound.lock().as_ref().is_some_and(|bound| bound.same(&actor));
                if current {
                    inner.guarded_update(emitted);
                }
            })
        };

        match actor.subscribe(observer) {
            Ok(subscription) => {
                tracing::debug!(actor = actor.id(), "selector subscribed");
                on_cleanup(move || subscription.unsubscribe());
                *self.subscribe_error.lock() = None;
            }
            Err(source) => {
                let err = BridgeError::SourceSubscription {
                    actor: actor.id().to_owned(),
                    source,
                };
                tracing::error!(error = %err, "selector could not subscribe to its actor");
                *self.subscribe_error.lock() = Some(err);
            }
        }
    }

    fn start(self: &Arc<Self>) -> Result<()> {
        if self.torn_down.load(Ordering::SeqCst) {
            return Ok(());
        }
        let weak = Arc::downgrade(self);
        let effect = Effect::new(move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let actor = inner.actor.get();
            untrack(|| inner.bind(actor));
        });
        *self.effect.lock() = Some(effect);

        match self.subscribe_error.lock().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Recompute against a new actor before its binding effect has run, so a
    /// read inside the update that swapped the actor is never stale.
    fn catch_up(&self) {
        let actor = self.actor.get();
        let stale = {
            let mut bound = self.bound.lock();
            let stale = bound.as_ref().is_some_and(|bound| !bound.same(&actor));
            if stale {
                // Emissions from the old actor are ignored from here on.
                *bound = Some(actor.clone());
            }
            stale
        };
        if stale {
            untrack(|| self.guarded_update(&(self.extractor)(&actor)));
        }
    }

    fn teardown(&self) {
        self.torn_down.store(true, Ordering::SeqCst);
        let effect = self.effect.lock().take();
        if let Some(effect) = effect {
            effect.dispose();
        }
        *self.bound.lock() = None;
    }
}

/// A memoized projection of an actor's state.
pub struct Selector<T>
where
    T: Clone + Serialize + Send + Sync + 'static,
{
    inner: Arc<SelectorInner<T>>,
}

/// Select with `PartialEq` as the comparator.
pub fn select<T, F>(scope: &Scope, source: impl Into<ActorSource>, projection: F) -> Result<Selector<T>>
where
    T: Clone + PartialEq + Serialize + Send + Sync + 'static,
    F: Fn(&Emitted) -> T + Send + Sync + 'static,
{
    select_by(scope, source, projection, |a: &T, b: &T| a == b)
}

/// Select with a custom comparator.
pub fn select_by<T, F, C>(
    scope: &Scope,
    source: impl Into<ActorSource>,
    projection: F,
    compare: C,
) -> Result<Selector<T>>
where
    T: Clone + Serialize + Send + Sync + 'static,
    F: Fn(&Emitted) -> T + Send + Sync + 'static,
    C: Fn(&T, &T) -> bool + Send + Sync + 'static,
{
    try_select(scope, source, move |emitted: &Emitted| Ok(projection(emitted)), compare)
}

/// Select with a projection that may fail. A failure is kept until the next
/// successful projection and returned by every read in between.
pub fn try_select<T, F, C>(
    scope: &Scope,
    source: impl Into<ActorSource>,
    projection: F,
    compare: C,
) -> Result<Selector<T>>
where
    T: Clone + Serialize + Send + Sync + 'static,
    F: Fn(&Emitted) -> std::result::Result<T, ProjectionError> + Send + Sync + 'static,
    C: Fn(&T, &T) -> bool + Send + Sync + 'static,
{
    select_with(
        scope,
        source,
        projection,
        compare,
        Arc::new(|actor: &ActorRef| actor.snapshot()),
    )
}

/// The general form: fallible projection, comparator, and the extractor
/// used to read a newly bound actor.
pub fn select_with<T, F, C>(
    scope: &Scope,
    source: impl Into<ActorSource>,
    projection: F,
    compare: C,
    extractor: Extractor,
) -> Result<Selector<T>>
where
    T: Clone + Serialize + Send + Sync + 'static,
    F: Fn(&Emitted) -> std::result::Result<T, ProjectionError> + Send + Sync + 'static,
    C: Fn(&T, &T) -> bool + Send + Sync + 'static,
{
    let actor = source.into().memo();
    let first = actor.get_untracked();
    let projection: Projection<T> = Arc::new(projection);

    let (current, seed, error) = match projection(&extractor(&first)) {
        Ok(value) => {
            let stored = StoredValue::from_serialize(&value)?;
            (Some(value), stored, None)
        }
        Err(err) => (None, StoredValue::new(Value::Null), Some(err)),
    };
    let (store, writer) = create_store(seed);

    let inner = Arc::new(SelectorInner {
        actor,
        projection,
        compare: Arc::new(compare),
        extractor,
        current: RwLock::new(current),
        store,
        writer,
        error: Signal::new(error),
        bound: Mutex::new(Some(first)),
        effect: Mutex::new(None),
        subscribe_error: Mutex::new(None),
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

    Ok(Selector { inner })
}

impl<T> Selector<T>
where
    T: Clone + Serialize + Send + Sync + 'static,
{
    /// The selected value. Tracked; a stored projection error is returned.
    pub fn get(&self) -> Result<T> {
        self.inner.catch_up();
        self.inner.store.track(Path::root());
        self.inner.store.is_wrapped();

        if let Some(err) = self.inner.error.get() {
            return Err(BridgeError::Projection(err));
        }
        self.inner
            .current
            .read()
            .clone()
            .ok_or_else(|| BridgeError::Projection(ProjectionError::new("selector has no value")))
    }

    /// A field of the selected value. Tracks only that field.
    pub fn read(&self, path: impl Into<Path>) -> Option<Value> {
        self.inner.catch_up();
        self.inner.store.read(path)
    }

    /// The selected value as stored, unwrapped.
    pub fn to_value(&self) -> Value {
        self.inner.catch_up();
        self.inner.store.get()
    }

    /// A zero-argument accessor over this selector.
    pub fn accessor(&self) -> impl Fn() -> Result<T> + Clone + Send + Sync + 'static {
        let selector = self.clone();
        move || selector.get()
    }

    pub fn store(&self) -> &Store {
        &self.inner.store
    }

    /// Detach now. Idempotent with scope disposal.
    pub fn teardown(&self) {
        self.inner.teardown();
    }
}

impl<T> Clone for Selector<T>
where
    T: Clone + Serialize + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Selector<T>
where
    T: Clone + Serialize + Send + Sync + fmt::Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Selector")
            .field("current", &*self.inner.current.read())
            .field("wrapped", &self.inner.store.is_wrapped())
            .finish()
    }
}
