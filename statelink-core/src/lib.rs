//! Statelink Core
//!
//! This crate bridges push-based actors (state machine interpreters and
//! reducer-style actors) into fine-grained reactive stores. It implements:
//!
//! - Reactive primitives (signals, memos, effects, scopes)
//! - A path-tracked store with structural reconciliation
//! - Bridges from one actor, or a changing actor reference, into a store
//! - Memoized selectors over an actor's state
//!
//! # Architecture
//!
//! - `reactive`: Core reactive primitives and dependency tracking
//! - `store`: Path-addressed container and its diff-merge
//! - `actor`: The actor contract, snapshots and events
//! - `bridge`: Static and dynamic bridges, and the stable sender
//! - `selector`: Equality-gated projections
//! - `fsm`, `reducer`: Thin default actors
//!
//! # Example
//!
//! ```rust,ignore
//! use statelink_core::fsm::{self, Machine, StateNode, Transition};
//! use statelink_core::{BridgeOptions, Scope};
//!
//! let scope = Scope::new();
//! let bridge = fsm::create_service(&scope, toggle_machine, BridgeOptions::default())?;
//! scope.mount()?;
//!
//! // Only readers of `value` re-run.
//! Effect::new(move || println!("{:?}", bridge.view().value()));
//! bridge.send("FLIP");
//! ```

pub mod actor;
pub mod bridge;
pub mod config;
pub mod derive;
pub mod error;
pub mod fsm;
pub mod reactive;
pub mod reducer;
pub mod selector;
pub mod store;
pub mod view;

pub use actor::{
    Actor, ActorRef, ActorStatus, Emitted, Event, Observer, PersistedSnapshot, Snapshot,
    StateValue, Subscription, Transitions,
};
pub use bridge::{
    create_bridge, use_actor, use_actor_with, ActorSource, BindState, Bridge, DeferPolicy,
    DynamicBridge, Sender,
};
pub use config::BridgeOptions;
pub use derive::{derive_service_state, DerivedState, ViewKind};
pub use error::{BridgeError, BridgeWarning, ProjectionError, Result, SubscribeError};
pub use reactive::{Effect, Memo, Runtime, Scope, Signal};
pub use selector::{select, select_by, select_with, try_select, Selector};
pub use store::{create_store, Path, ReconcileOptions, Store, StoreWriter, StoredValue};
pub use view::SnapshotView;
