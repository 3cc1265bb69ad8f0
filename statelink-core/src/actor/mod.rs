//! Actors
//!
//! An actor is anything the bridges can observe: it hands out its current
//! emission synchronously, accepts observers, and takes events. Transition
//! logic is the actor's own business; the bridges only use this contract.
//!
//! Two shapes of emission exist. Machine-backed actors emit [`Snapshot`]s,
//! which may carry the predicate contract; reducer-style actors emit bare
//! JSON values.

mod event;
mod snapshot;
mod state_value;
mod subscription;

pub use event::{Event, INIT_EVENT};
pub use snapshot::{PersistedSnapshot, Snapshot, Transitions};
pub use state_value::StateValue;
pub use subscription::Subscription;

use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::SubscribeError;

/// Lifecycle of an actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActorStatus {
    NotStarted,
    Running,
    Stopped,
}

/// One emission.
#[derive(Debug, Clone)]
pub enum Emitted {
    State(Arc<Snapshot>),
    Value(Value),
}

impl Emitted {
    pub fn as_snapshot(&self) -> Option<&Arc<Snapshot>> {
        match self {
            Emitted::State(snapshot) => Some(snapshot),
            Emitted::Value(_) => None,
        }
    }

    /// Whether this is a snapshot with the predicate contract.
    pub fn has_predicates(&self) -> bool {
        self.as_snapshot()
            .is_some_and(|snapshot| snapshot.has_predicates())
    }

    /// The emission as plain data.
    pub fn to_value(&self) -> Value {
        match self {
            Emitted::State(snapshot) => snapshot.to_json(),
            Emitted::Value(value) => value.clone(),
        }
    }
}

impl From<Snapshot> for Emitted {
    fn from(snapshot: Snapshot) -> Self {
        Emitted::State(Arc::new(snapshot))
    }
}

impl From<Arc<Snapshot>> for Emitted {
    fn from(snapshot: Arc<Snapshot>) -> Self {
        Emitted::State(snapshot)
    }
}

impl From<Value> for Emitted {
    fn from(value: Value) -> Self {
        Emitted::Value(value)
    }
}

/// Callback invoked with every emission.
pub type Observer = Arc<dyn Fn(&Emitted) + Send + Sync>;

/// The contract every observable actor satisfies.
pub trait Actor: Send + Sync {
    fn id(&self) -> &str;

    /// The current emission. Must be callable before anyone subscribes.
    fn snapshot(&self) -> Emitted {
        Emitted::Value(Value::Object(Map::new()))
    }

    /// What the actor would emit once started, for actors that have not
    /// started yet.
    fn initial_snapshot(&self) -> Option<Emitted> {
        None
    }

    fn subscribe(&self, observer: Observer) -> Result<Subscription, SubscribeError>;

    fn send(&self, event: Event);

    fn status(&self) -> ActorStatus {
        ActorStatus::Running
    }

    fn stop(&self) {}
}

/// Shared handle to an actor. Two refs are equal iff they point at the same
/// actor allocation.
#[derive(Clone)]
pub struct ActorRef(Arc<dyn Actor>);

impl ActorRef {
    pub fn new<A: Actor + 'static>(actor: A) -> Self {
        Self(Arc::new(actor))
    }

    pub fn from_arc(actor: Arc<dyn Actor>) -> Self {
        Self(actor)
    }

    /// Identity comparison.
    pub fn same(&self, other: &ActorRef) -> bool {
        self.addr() == other.addr()
    }

    fn addr(&self) -> *const () {
        Arc::as_ptr(&self.0) as *const ()
    }
}

impl<A: Actor + 'static> From<Arc<A>> for ActorRef {
    fn from(actor: Arc<A>) -> Self {
        Self(actor)
    }
}

impl Deref for ActorRef {
    type Target = dyn Actor;

    fn deref(&self) -> &Self::Target {
        &*self.0
    }
}

impl PartialEq for ActorRef {
    fn eq(&self, other: &Self) -> bool {
        self.same(other)
    }
}

impl Eq for ActorRef {}

impl Hash for ActorRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

impl fmt::Debug for ActorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ActorRef").field(&self.0.id()).finish()
    }
}


#[cfg(test)]
mod tests {
    use super::testing::ProbeActor;
    use super::*;
    use serde_json::json;

    #[test]
    fn refs_compare_by_identity() {
        let a = ProbeActor::new("a", json!({}));
        let b = ProbeActor::new("a", json!({}));

        let first = ActorRef::from(a.clone());
        let second = ActorRef::from(a);
        let other = ActorRef::from(b);

        assert_eq!(first, second);
        assert_ne!(first, other);
        assert_eq!(first.id(), "a");
    }

    #[test]
    fn emitted_shapes() {
        let value = Emitted::from(json!(5));
        assert!(value.as_snapshot().is_none());
        assert!(!value.has_predicates());
        assert_eq!(value.to_value(), json!(5));

        let state = Emitted::from(Snapshot::new("idle", json!({})));
        assert!(state.as_snapshot().is_some());
        assert!(!state.has_predicates());
    }

    #[test]
    fn default_snapshot_is_empty_object() {
        struct Silent;
        impl Actor for Silent {
            fn id(&self) -> &str {
                "silent"
            }
            fn subscribe(&self, _: Observer) -> Result<Subscription, SubscribeError> {
                Ok(Subscription::empty())
            }
            fn send(&self, _: Event) {}
        }

        let actor = ActorRef::new(Silent);
        assert_eq!(actor.snapshot().to_value(), json!({}));
        assert_eq!(actor.status(), ActorStatus::Running);
        assert!(actor.initial_snapshot().is_none());
    }
}
