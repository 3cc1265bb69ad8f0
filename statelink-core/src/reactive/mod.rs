//! Reactive Primitives
//!
//! This module implements the core reactive system: signals, memos, and effects,
//! plus the scopes that tie them to a component's lifetime. These primitives
//! form the container the actor bridges reconcile into.
//!
//! # Concepts
//!
//! ## Signals
//!
//! A Signal is a container for mutable state. When a signal's value is read
//! within a tracking context (such as a memo or effect), the signal automatically
//! registers that context as a dependent. When the signal's value changes, all
//! dependents are notified.
//!
//! ## Memos
//!
//! A Memo is a derived value that caches its result. It re-evaluates only when
//! one of its dependencies changes, and its own dependents hear about it only
//! when the new value compares unequal to the old one.
//!
//! ## Effects
//!
//! An Effect is a side-effecting computation that runs whenever its dependencies
//! change. Effects are used to synchronize reactive state with external systems,
//! such as subscribing to an actor.
//!
//! ## Scopes
//!
//! A Scope collects attach and detach hooks for one component lifetime.
//!
//! # Implementation Notes
//!
//! The reactive system uses a thread-local tracking context to automatically
//! detect dependencies. When a signal is read, we check if there is an active
//! tracking context and, if so, register the dependency.
//!
//! This approach (sometimes called "automatic dependency tracking" or
//! "transparent reactivity") is used by SolidJS, Vue 3, and Leptos.

mod context;
mod effect;
mod memo;
mod runtime;
mod scope;
mod signal;
mod subscriber;

pub use context::{on_cleanup, untrack, Cleanup, ReactiveContext};
pub use effect::Effect;
pub use memo::{Memo, MemoState};
pub use runtime::{Reactive, ReactiveHandle, Runtime};
pub use scope::{Scope, ScopeState};
pub use signal::Signal;
pub use subscriber::SubscriberId;
