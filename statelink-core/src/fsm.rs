//! A flat finite state machine and its service.
//!
//! This is the thin default source: enough of a machine to drive a bridge
//! without bringing an interpreter along. States are atomic, transitions are
//! picked by event type and an optional guard, and actions can only assign
//! context fields.
//!
//! ```rust,ignore
//! let toggle = || {
//!     Machine::builder("toggle")
//!         .initial("off")
//!         .state("off", StateNode::new().on("FLIP", Transition::to("on")))
//!         .state("on", StateNode::new().tag("lit").on("FLIP", Transition::to("off")))
//!         .build()
//! };
//! let bridge = fsm::create_service(&scope, toggle, BridgeOptions::default())?;
//! ```

use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};

use crate::actor::{
    Actor, ActorRef, ActorStatus, Emitted, Event, Observer, PersistedSnapshot, Snapshot,
    StateValue, Subscription, Transitions,
};
use crate::bridge::{attach, Bridge, Ownership};
use crate::config::{merge_context, BridgeOptions};
use crate::error::{BridgeError, BridgeWarning, Result, SubscribeError};
use crate::reactive::{Scope, Signal, SubscriberId};

/// Decides whether a transition is enabled, from the context and the event.
pub type Guard = Arc<dyn Fn(&Value, &Event) -> bool + Send + Sync>;

/// Returns context fields to overwrite.
pub type Assign = Arc<dyn Fn(&Value, &Event) -> Map<String, Value> + Send + Sync>;

#[derive(Clone)]
pub struct Transition {
    target: Option<String>,
    guard: Option<Guard>,
    actions: Vec<Assign>,
}

impl Transition {
    /// Move to `target`.
    pub fn to(target: impl Into<String>) -> Self {
        Self {
            target: Some(target.into()),
            guard: None,
            actions: Vec::new(),
        }
    }

    /// Stay in the current state; only the actions run.
    pub fn internal() -> Self {
        Self {
            target: None,
            guard: None,
            actions: Vec::new(),
        }
    }

    pub fn guard(mut self, guard: impl Fn(&Value, &Event) -> bool + Send + Sync + 'static) -> Self {
        self.guard = Some(Arc::new(guard));
        self
    }

    /// Add an assign action. Actions run in the order they were added.
    pub fn assign(
        mut self,
        assign: impl Fn(&Value, &Event) -> Map<String, Value> + Send + Sync + 'static,
    ) -> Self {
        self.actions.push(Arc::new(assign));
        self
    }

    fn enabled(&self, context: &Value, event: &Event) -> bool {
        self.guard.as_ref().map_or(true, |guard| guard(context, event))
    }
}

impl fmt::Debug for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transition")
            .field("target", &self.target)
            .field("guarded", &self.guard.is_some())
            .field("actions", &self.actions.len())
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct StateNode {
    on: IndexMap<String, Vec<Transition>>,
    tags: BTreeSet<String>,
    terminal: bool,
}

impl StateNode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a candidate transition for `event`. Candidates are tried in the
    /// order they were added; the first enabled one is taken.
    pub fn on(mut self, event: impl Into<String>, transition: Transition) -> Self {
        self.on.entry(event.into()).or_default().push(transition);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Mark the state final. Snapshots in it are `done`.
    pub fn terminal(mut self) -> Self {
        self.terminal = true;
        self
    }
}

pub struct MachineDef {
    id: String,
    initial: String,
    context: Value,
    states: IndexMap<String, StateNode>,
}

impl MachineDef {
    fn node(&self, value: &StateValue) -> Option<&StateNode> {
        match value {
            StateValue::Atomic(name) => self.states.get(name),
            StateValue::Compound(_) => None,
        }
    }

    fn select(&self, snapshot: &Snapshot, event: &Event) -> Option<&Transition> {
        self.node(&snapshot.value)?
            .on
            .get(&event.kind)?
            .iter()
            .find(|transition| transition.enabled(&snapshot.context, event))
    }

    /// A snapshot of `state` with its tags and final flag filled in.
    fn at(self: &Arc<Self>, state: &str, context: Value, event: Event) -> Snapshot {
        let node = self.states.get(state);
        let tags: Vec<String> = node
            .map(|node| node.tags.iter().cloned().collect())
            .unwrap_or_default();
        Snapshot::new(StateValue::atomic(state), context)
            .with_tags(tags)
            .with_event(event)
            .with_done(node.is_some_and(|node| node.terminal))
            .with_transitions(self.clone())
    }
}

impl Transitions for MachineDef {
    fn can(&self, snapshot: &Snapshot, event: &Event) -> bool {
        self.select(snapshot, event).is_some()
    }
}

impl fmt::Debug for MachineDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MachineDef")
            .field("id", &self.id)
            .field("initial", &self.initial)
            .field("context", &self.context)
            .field("states", &self.states.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// A shared machine definition.
#[derive(Debug, Clone)]
pub struct Machine(Arc<MachineDef>);

pub struct MachineBuilder {
    def: MachineDef,
}

impl MachineBuilder {
    /// The starting state. Defaults to the first state added.
    pub fn initial(mut self, state: impl Into<String>) -> Self {
        self.def.initial = state.into();
        self
    }

    pub fn context(mut self, context: Value) -> Self {
        self.def.context = context;
        self
    }

    pub fn state(mut self, name: impl Into<String>, node: StateNode) -> Self {
        let name = name.into();
        if self.def.initial.is_empty() {
            self.def.initial = name.clone();
        }
        self.def.states.insert(name, node);
        self
    }

    pub fn build(self) -> Machine {
        Machine(Arc::new(self.def))
    }
}

impl Machine {
    pub fn builder(id: impl Into<String>) -> MachineBuilder {
        MachineBuilder {
            def: MachineDef {
                id: id.into(),
                initial: String::new(),
                context: Value::Object(Map::new()),
                states: IndexMap::new(),
            },
        }
    }

    pub fn id(&self) -> &str {
        &self.0.id
    }

    /// A new definition whose default context has `partial` merged over it.
    pub fn with_context(&self, partial: &Map<String, Value>) -> Machine {
        let mut context = self.0.context.clone();
        merge_context(&mut context, partial);
        Machine(Arc::new(MachineDef {
            id: self.0.id.clone(),
            initial: self.0.initial.clone(),
            context,
            states: self.0.states.clone(),
        }))
    }

    pub fn initial_state(&self) -> Snapshot {
        self.0
            .at(&self.0.initial, self.0.context.clone(), Event::init())
    }

    /// The snapshot after `event`, or `None` when no transition is enabled.
    pub fn transition(&self, from: &Snapshot, event: &Event) -> Option<Snapshot> {
        let transition = self.0.select(from, event)?;

        let mut context = from.context.clone();
        for assign in &transition.actions {
            let partial = assign(&context, event);
            merge_context(&mut context, &partial);
        }

        let next = match &transition.target {
            Some(target) => self.0.at(target, context, event.clone()),
            None => {
                let mut next = from.clone();
                next.context = context;
                next.event = event.clone();
                next
            }
        };
        Some(next)
    }

    /// Revive a persisted snapshot against this definition.
    pub fn resolve(&self, persisted: PersistedSnapshot) -> Snapshot {
        let known = self.0.node(&persisted.value).is_some();
        let snapshot = persisted.into_snapshot();
        if !known {
            tracing::debug!(machine = self.id(), value = ?snapshot.value, "persisted state not in machine");
            return snapshot.with_transitions(self.0.clone());
        }
        let StateValue::Atomic(state) = snapshot.value.clone() else {
            return snapshot.with_transitions(self.0.clone());
        };
        self.0.at(&state, snapshot.context, snapshot.event)
    }

    fn key(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }
}

/// A running instance of a [`Machine`].
///
/// Observers hang off a signal's callback list; each transition sets the
/// signal and fans the new snapshot out. Events that enable no transition
/// emit nothing.
pub struct Service {
    machine: Machine,
    state: Signal<Emitted>,
    status: RwLock<ActorStatus>,
}

impl Service {
    /// A service that has not started. Its snapshot is the machine's
    /// initial state.
    pub fn new(machine: Machine) -> Arc<Self> {
        let initial = machine.initial_state();
        Arc::new(Self {
            machine,
            state: Signal::new(Emitted::from(initial)),
            status: RwLock::new(ActorStatus::NotStarted),
        })
    }

    pub fn machine(&self) -> &Machine {
        &self.machine
    }

    /// Start from the initial state.
    pub fn start(&self) {
        self.start_at(self.machine.initial_state());
    }

    /// Start from a persisted snapshot.
    pub fn start_from(&self, persisted: PersistedSnapshot) {
        self.start_at(self.machine.resolve(persisted));
    }

    fn start_at(&self, snapshot: Snapshot) {
        {
            let mut status = self.status.write();
            if *status != ActorStatus::NotStarted {
                return;
            }
            *status = ActorStatus::Running;
        }
        tracing::debug!(machine = self.machine.id(), "service started");
        self.state.set(Emitted::from(snapshot));
    }

    pub fn current(&self) -> Arc<Snapshot> {
        match self.state.get_untracked() {
            Emitted::State(snapshot) => snapshot,
            Emitted::Value(_) => Arc::new(self.machine.initial_state()),
        }
    }
}

impl Actor for Service {
    fn id(&self) -> &str {
        self.machine.id()
    }

    fn snapshot(&self) -> Emitted {
        self.state.get_untracked()
    }

    fn initial_snapshot(&self) -> Option<Emitted> {
        Some(Emitted::from(self.machine.initial_state()))
    }

    fn subscribe(&self, observer: Observer) -> Result<Subscription, SubscribeError> {
        if self.status() == ActorStatus::Stopped {
            return Err(SubscribeError::new("service is stopped"));
        }

        let id = SubscriberId::new();
        {
            let state = self.state.clone();
            self.state
                .subscribe(id, move || observer(&state.get_untracked()));
        }
        let state = self.state.clone();
        Ok(Subscription::new(move || state.unsubscribe(id)))
    }

    fn send(&self, event: Event) {
        match self.status() {
            ActorStatus::Running => {}
            ActorStatus::NotStarted => {
                tracing::warn!(
                    machine = self.machine.id(),
                    event = %event.kind,
                    "event sent to a service that has not started; dropped"
                );
                return;
            }
            ActorStatus::Stopped => {
                tracing::debug!(machine = self.machine.id(), event = %event.kind, "event sent to a stopped service");
                return;
            }
        }

        let current = self.current();
        if let Some(next) = self.machine.transition(&current, &event) {
            self.state.set(Emitted::from(next));
        }
    }

    fn status(&self) -> ActorStatus {
        *self.status.read()
    }

    fn stop(&self) {
        let mut status = self.status.write();
        if *status != ActorStatus::Stopped {
            *status = ActorStatus::Stopped;
            tracing::debug!(machine = self.machine.id(), "service stopped");
        }
    }
}

impl Transitions for Service {
    fn can(&self, snapshot: &Snapshot, event: &Event) -> bool {
        self.machine.0.can(snapshot, event)
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("machine", &self.machine.id())
            .field("status", &self.status())
            .finish()
    }
}

/// Definitions currently backing a live bridge, by address.
static CLAIMS: OnceLock<DashMap<usize, usize>> = OnceLock::new();

fn claims() -> &'static DashMap<usize, usize> {
    CLAIMS.get_or_init(DashMap::new)
}

/// Returns whether the definition was already claimed.
fn claim(key: usize) -> bool {
    let mut count = claims().entry(key).or_insert(0);
    *count += 1;
    *count > 1
}

fn release(key: usize) {
    claims().remove_if_mut(&key, |_, count| {
        *count = count.saturating_sub(1);
        *count == 0
    });
}

/// Build a machine with `factory`, run it as a service owned by the bridge,
/// and bridge it into `scope`. The service is stopped when the bridge
/// detaches.
///
/// `factory` should build a fresh definition each call. Handing out one
/// definition to two live bridges records [`BridgeWarning::StaleActor`].
pub fn create_service<F>(scope: &Scope, factory: F, options: BridgeOptions) -> Result<Bridge>
where
    F: FnOnce() -> Machine,
{
    let machine = factory();
    let key = machine.key();
    let reused = claim(key);

    let resolved = match &options.initial_context {
        Some(partial) => machine.with_context(partial),
        None => machine.clone(),
    };
    let service = Service::new(resolved);
    match options.rehydrate_from.clone() {
        Some(persisted) => service.start_from(persisted),
        None => service.start(),
    }

    let bridge = match attach(scope, ActorRef::from(service), &options, Ownership::Owned) {
        Ok(bridge) => bridge,
        Err(err) => {
            release(key);
            return Err(err);
        }
    };

    if reused {
        bridge.warn(BridgeWarning::StaleActor {
            machine: machine.id().to_owned(),
        });
    }
    // Holding the definition keeps its address from being reused while claimed.
    bridge.on_detach(move || {
        release(key);
        drop(machine);
    });

    Ok(bridge)
}

/// [`create_service`], with `observer` also subscribed to the service from
/// mount until the bridge detaches.
pub fn create_service_with<F>(
    scope: &Scope,
    factory: F,
    options: BridgeOptions,
    observer: Observer,
) -> Result<Bridge>
where
    F: FnOnce() -> Machine,
{
    let bridge = create_service(scope, factory, options)?;

    let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
    {
        let slot = slot.clone();
        bridge.on_detach(move || {
            if let Some(subscription) = slot.lock().take() {
                subscription.unsubscribe();
            }
        });
    }
    {
        let bridge = bridge.clone();
        scope.on_mount(move |_| {
            if bridge.is_torn_down() {
                return Ok(());
            }
            let actor = bridge.actor();
            let subscription = actor
                .subscribe(observer)
                .map_err(|source| BridgeError::SourceSubscription {
                    actor: actor.id().to_owned(),
                    source,
                })?;
            *slot.lock() = Some(subscription);
            Ok(())
        })?;
    }

    Ok(bridge)
}

/// Run `machine` as a service the caller owns. The service is not started.
pub fn interpret(machine: Machine) -> Arc<Service> {
    Service::new(machine)
}
