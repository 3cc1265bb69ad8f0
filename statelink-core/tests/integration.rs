//! Integration Tests for Actor Bridges
//!
//! These tests drive bridges, selectors and the default actors together
//! through the public API only.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::{json, Map, Value};

use statelink_core::fsm::{self, Machine, StateNode, Transition};
use statelink_core::reducer::ReducerActor;
use statelink_core::{
    create_bridge, select, use_actor, Actor, ActorRef, ActorStatus, BridgeOptions, Effect, Emitted,
    Event, Runtime, Scope, Signal,
};

fn fields(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

fn counter_machine() -> Machine {
    Machine::builder("counter")
        .context(json!({"count": 0, "step": 1}))
        .state(
            "idle",
            StateNode::new()
                .on(
                    "INC",
                    Transition::internal().assign(|context, _| {
                        let count = context["count"].as_i64().unwrap_or_default();
                        let step = context["step"].as_i64().unwrap_or(1);
                        fields(json!({"count": count + step}))
                    }),
                )
                .on(
                    "SET_STEP",
                    Transition::internal().assign(|_, event: &Event| {
                        fields(json!({"step": event.get("step").cloned().unwrap_or(json!(1))}))
                    }),
                ),
        )
        .build()
}

fn toggle_machine() -> Machine {
    Machine::builder("toggle")
        .initial("off")
        .state("off", StateNode::new().on("FLIP", Transition::to("on")))
        .state("on", StateNode::new().tag("lit").on("FLIP", Transition::to("off")))
        .build()
}

fn counting(read: impl Fn() + Send + Sync + 'static) -> (Effect, Arc<AtomicUsize>) {
    let runs = Arc::new(AtomicUsize::new(0));
    let effect = {
        let runs = runs.clone();
        Effect::new(move || {
            read();
            runs.fetch_add(1, Ordering::SeqCst);
        })
    };
    (effect, runs)
}

/// An increment wakes the count reader once and never the state-value reader.
#[test]
fn counter_scenario_notifies_minimally() {
    let service = fsm::interpret(counter_machine());
    service.start();

    let scope = Scope::new();
    let bridge = create_bridge(&scope, ActorRef::from(service.clone()), BridgeOptions::default()).unwrap();
    scope.mount().unwrap();

    assert_eq!(bridge.view().value(), Some("idle".into()));
    assert_eq!(bridge.view().context_at("count"), Some(json!(0)));

    let (_count_effect, count_runs) = {
        let view = bridge.view().clone();
        counting(move || {
            let _ = view.context_at("count");
        })
    };
    let (_value_effect, value_runs) = {
        let view = bridge.view().clone();
        counting(move || {
            let _ = view.value();
        })
    };

    bridge.send("INC");

    assert_eq!(bridge.view().context_at("count"), Some(json!(1)));
    assert_eq!(count_runs.load(Ordering::SeqCst), 2);
    assert_eq!(value_runs.load(Ordering::SeqCst), 1);

    // A supplied service outlives its bridge.
    scope.dispose();
    assert_eq!(service.status(), ActorStatus::Running);
}

/// Predicates read the newest snapshot and re-run their readers.
#[test]
fn predicates_stay_fresh() {
    let scope = Scope::new();
    let bridge = fsm::create_service(&scope, toggle_machine, BridgeOptions::default()).unwrap();
    scope.mount().unwrap();

    let lit = Arc::new(AtomicUsize::new(0));
    let _effect = {
        let view = bridge.view().clone();
        let lit = lit.clone();
        Effect::new(move || {
            if view.has_tag("lit") {
                lit.fetch_add(1, Ordering::SeqCst);
            }
        })
    };

    assert!(bridge.view().matches("off"));
    assert!(bridge.view().can("FLIP"));
    bridge.send("FLIP");
    assert!(bridge.view().matches("on"));
    assert_eq!(bridge.view().to_strings(), vec!["on".to_owned()]);
    assert_eq!(lit.load(Ordering::SeqCst), 1);

    scope.dispose();
    assert_eq!(bridge.actor().status(), ActorStatus::Stopped);
}

/// A reducer actor is presented as plain data.
#[test]
fn reducer_actor_through_dynamic_bridge() {
    let actor = ReducerActor::spawn("count", json!(0), |state: &Value, event: &Event| {
        match event.kind.as_str() {
            "INC" => json!(state.as_i64().unwrap_or_default() + 1),
            _ => state.clone(),
        }
    });

    let scope = Scope::new();
    let bridge = use_actor(&scope, ActorRef::from(actor.clone())).unwrap();
    scope.mount().unwrap();

    assert_eq!(bridge.view().get(), json!(0));
    assert!(bridge.view().store().is_wrapped());
    assert!(!bridge.view().matches("anything"));

    bridge.send("INC");
    assert_eq!(bridge.view().get(), json!(1));
}

/// Events sent before a deferred actor starts are delivered once it runs.
#[test]
fn deferred_events_replay_on_start() {
    let actor = ReducerActor::deferred("count", json!(0), |state: &Value, event: &Event| {
        match event.kind.as_str() {
            "INC" => json!(state.as_i64().unwrap_or_default() + 1),
            _ => state.clone(),
        }
    });

    let scope = Scope::new();
    let bridge = use_actor(&scope, ActorRef::from(actor.clone())).unwrap();
    scope.mount().unwrap();

    bridge.send("INC");
    bridge.send("INC");
    assert_eq!(bridge.sender().pending(), 2);
    assert_eq!(actor.value(), json!(0));

    actor.start();
    assert_eq!(bridge.sender().pending(), 0);
    assert_eq!(actor.value(), json!(2));
    assert_eq!(bridge.view().get(), json!(2));
}

/// A sender taken before a rebind dispatches to the new actor.
#[test]
fn rebind_moves_sender_and_view() {
    let first = fsm::interpret(toggle_machine());
    first.start();
    let second = fsm::interpret(toggle_machine());
    second.start();

    let current = Signal::new(ActorRef::from(first.clone()));
    let scope = Scope::new();
    let bridge = use_actor(&scope, current.clone()).unwrap();
    scope.mount().unwrap();
    let send = bridge.sender().to_fn();

    current.set(ActorRef::from(second.clone()));
    send(Event::new("FLIP"));

    assert!(first.current().matches("off"));
    assert!(second.current().matches("on"));
    assert!(bridge.view().matches("on"));

    // The old actor's emissions no longer reach the view.
    first.send(Event::new("FLIP"));
    second.send(Event::new("FLIP"));
    assert!(bridge.view().matches("off"));
}

/// The view reflects the new actor within the update that swapped it.
#[test]
fn rebind_is_visible_inside_the_batch() {
    let first = ReducerActor::spawn("a", json!({"n": 1}), |state: &Value, _: &Event| state.clone());
    let second = ReducerActor::spawn("b", json!({"n": 2}), |state: &Value, _: &Event| state.clone());

    let current = Signal::new(ActorRef::from(first));
    let scope = Scope::new();
    let bridge = use_actor(&scope, current.clone()).unwrap();
    scope.mount().unwrap();

    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let _effect = {
        let view = bridge.view().clone();
        let seen = seen.clone();
        Effect::new(move || seen.lock().push(view.read("n")))
    };

    Runtime::batch(|| current.set(ActorRef::from(second)));
    assert_eq!(*seen.lock(), vec![Some(json!(1)), Some(json!(2))]);
}

/// A selector wakes its reader only when the selected value changes.
#[test]
fn selector_gates_on_equality() {
    let service = fsm::interpret(counter_machine());
    service.start();

    let scope = Scope::new();
    let count = select(&scope, ActorRef::from(service.clone()), |emitted: &Emitted| {
        emitted
            .as_snapshot()
            .map(|snapshot| snapshot.context["count"].clone())
            .unwrap_or(Value::Null)
    })
    .unwrap();
    scope.mount().unwrap();

    let (_effect, runs) = {
        let count = count.clone();
        counting(move || {
            let _ = count.get();
        })
    };

    service.send(Event::new("SET_STEP").with("step", 5));
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    service.send(Event::new("INC"));
    assert_eq!(count.get().unwrap(), json!(5));
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

/// Persisted snapshots resume a fresh service where the old one left off.
#[test]
fn rehydrate_from_msgpack() {
    let scope = Scope::new();
    let bridge = fsm::create_service(&scope, counter_machine, BridgeOptions::default()).unwrap();
    scope.mount().unwrap();
    bridge.send("INC");
    bridge.send("INC");

    let bytes = bridge
        .view()
        .snapshot()
        .map(|snapshot| snapshot.persist())
        .unwrap()
        .to_msgpack()
        .unwrap();
    scope.dispose();

    let resumed_scope = Scope::new();
    let options = BridgeOptions::new().rehydrate_from_msgpack(&bytes).unwrap();
    let resumed = fsm::create_service(&resumed_scope, counter_machine, options).unwrap();
    assert_eq!(resumed.view().context_at("count"), Some(json!(2)));
    assert_eq!(resumed.view().event().map(|event| event.kind), Some("INC".to_owned()));
}

/// Teardown and scope disposal release the subscription exactly once.
#[test]
fn teardown_then_dispose_is_safe() {
    let service = fsm::interpret(toggle_machine());
    service.start();

    let scope = Scope::new();
    let bridge = create_bridge(&scope, ActorRef::from(service.clone()), BridgeOptions::default()).unwrap();
    scope.mount().unwrap();
    assert!(bridge.is_subscribed());

    bridge.teardown();
    assert!(!bridge.is_subscribed());
    scope.dispose();

    service.send(Event::new("FLIP"));
    assert!(bridge.view().matches("off"));
}

/// Options round-trip through serde.
#[test]
fn options_deserialize_with_defaults() {
    let options: BridgeOptions =
        serde_json::from_value(json!({"initial_context": {"count": 3}})).unwrap();
    assert_eq!(options.initial_context, Some(fields(json!({"count": 3}))));
    assert!(options.rehydrate_from.is_none());

    let scope = Scope::new();
    let bridge = fsm::create_service(&scope, counter_machine, options).unwrap();
    assert_eq!(bridge.view().context_at("count"), Some(json!(3)));
}
