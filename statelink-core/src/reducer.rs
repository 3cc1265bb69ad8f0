//! Reducer-style actors.
//!
//! A reducer actor holds one JSON value and folds every event into it. It
//! emits bare values, so bridges present it as plain data without
//! predicates.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use crate::actor::{Actor, ActorStatus, Emitted, Event, Observer, Subscription};
use crate::error::SubscribeError;
use crate::reactive::{Signal, SubscriberId};

pub type Reducer = Arc<dyn Fn(&Value, &Event) -> Value + Send + Sync>;

pub struct ReducerActor {
    id: String,
    reducer: Reducer,
    state: Signal<Value>,
    status: RwLock<ActorStatus>,
}

impl ReducerActor {
    /// A running actor starting from `initial`.
    pub fn spawn<R>(id: impl Into<String>, initial: Value, reducer: R) -> Arc<Self>
    where
        R: Fn(&Value, &Event) -> Value + Send + Sync + 'static,
    {
        Self::with_status(id.into(), initial, Arc::new(reducer), ActorStatus::Running)
    }

    /// An actor that stays inert until [`ReducerActor::start`].
    pub fn deferred<R>(id: impl Into<String>, initial: Value, reducer: R) -> Arc<Self>
    where
        R: Fn(&Value, &Event) -> Value + Send + Sync + 'static,
    {
        Self::with_status(id.into(), initial, Arc::new(reducer), ActorStatus::NotStarted)
    }

    fn with_status(id: String, initial: Value, reducer: Reducer, status: ActorStatus) -> Arc<Self> {
        Arc::new(Self {
            id,
            reducer,
            state: Signal::new(initial),
            status: RwLock::new(status),
        })
    }

    /// Start a deferred actor. Observers receive the current value.
    pub fn start(&self) {
        {
            let mut status = self.status.write();
            if *status != ActorStatus::NotStarted {
                return;
            }
            *status = ActorStatus::Running;
        }
        tracing::debug!(actor = %self.id, "reducer actor started");
        self.state.set(self.state.get_untracked());
    }

    pub fn value(&self) -> Value {
        self.state.get_untracked()
    }
}

impl Actor for ReducerActor {
    fn id(&self) -> &str {
        &self.id
    }

    fn snapshot(&self) -> Emitted {
        Emitted::Value(self.state.get_untracked())
    }

    fn initial_snapshot(&self) -> Option<Emitted> {
        (self.status() == ActorStatus::NotStarted).then(|| self.snapshot())
    }

    fn subscribe(&self, observer: Observer) -> Result<Subscription, SubscribeError> {
        if self.status() == ActorStatus::Stopped {
            return Err(SubscribeError::new("actor is stopped"));
        }

        let id = SubscriberId::new();
        {
            let state = self.state.clone();
            self.state
                .subscribe(id, move || observer(&Emitted::Value(state.get_untracked())));
        }
        let state = self.state.clone();
        Ok(Subscription::new(move || state.unsubscribe(id)))
    }

    fn send(&self, event: Event) {
        if self.status() != ActorStatus::Running {
            tracing::debug!(actor = %self.id, event = %event.kind, "reducer actor is not running; event dropped");
            return;
        }

        let current = self.state.get_untracked();
        let next = (self.reducer)(&current, &event);
        if next != current {
            self.state.set(next);
        }
    }

    fn status(&self) -> ActorStatus {
        *self.status.read()
    }

    fn stop(&self) {
        *self.status.write() = ActorStatus::Stopped;
    }
}

impl fmt::Debug for ReducerActor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReducerActor")
            .field("id", &self.id)
            .field("status", &self.status())
            .field("value", &self.state.get_untracked())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter(state: &Value, event: &Event) -> Value {
        match event.kind.as_str() {
            "INC" => json!(state.as_i64().unwrap_or_default() + 1),
            _ => state.clone(),
        }
    }

    #[test]
    fn folds_events_into_the_value() {
        let actor = ReducerActor::spawn("count", json!(0), counter);
        actor.send(Event::new("INC"));
        actor.send(Event::new("INC"));
        assert_eq!(actor.value(), json!(2));
        assert!(!actor.snapshot().has_predicates());
    }

    #[test]
    fn unchanged_value_is_not_emitted() {
        let actor = ReducerActor::spawn("count", json!(0), counter);
        let seen = Arc::new(AtomicUsize::new(0));
        let _subscription = {
            let seen = seen.clone();
            actor
                .subscribe(Arc::new(move |_: &Emitted| {
                    seen.fetch_add(1, Ordering::SeqCst);
                }))
                .unwrap()
        };

        actor.send(Event::new("NOPE"));
        actor.send(Event::new("INC"));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn deferred_actor_ignores_events_until_started() {
        let actor = ReducerActor::deferred("count", json!(0), counter);
        assert_eq!(actor.status(), ActorStatus::NotStarted);
        assert!(actor.initial_snapshot().is_some());

        actor.send(Event::new("INC"));
        assert_eq!(actor.value(), json!(0));

        let seen = Arc::new(AtomicUsize::new(0));
        let _subscription = {
            let seen = seen.clone();
            actor
                .subscribe(Arc::new(move |_: &Emitted| {
                    seen.fetch_add(1, Ordering::SeqCst);
                }))
                .unwrap()
        };
        actor.start();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert!(actor.initial_snapshot().is_none());

        actor.send(Event::new("INC"));
        assert_eq!(actor.value(), json!(1));
    }

    #[test]
    fn stopped_actor_refuses_observers() {
        let actor = ReducerActor::spawn("count", json!(0), counter);
        actor.stop();
        assert!(actor.subscribe(Arc::new(|_: &Emitted| {})).is_err());
    }
}
