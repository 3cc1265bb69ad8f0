//! Stable send handle.
//!
//! A [`Sender`] never captures an actor. It holds a shared slot naming the
//! current binding and resolves it on every call, so a handle taken before
//! a rebind dispatches to the new actor afterwards.
//!
//! With [`DeferPolicy::UntilRunning`] events sent while the bound actor has
//! not started are queued in order. The queue is replayed once the bridge
//! sees the actor running, or by the first send after it started; a rebind
//! drops the queue instead of redirecting it.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::actor::{ActorRef, ActorStatus, Event};
use crate::reactive::Runtime;

/// What a sender does with events for an actor that has not started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferPolicy {
    /// Hand every event straight to the actor.
    Forward,
    /// Queue events until the actor is running.
    UntilRunning,
}

struct Binding {
    actor: Option<ActorRef>,
    generation: u64,
    deferred: VecDeque<Event>,
    replaying: bool,
}

#[derive(Clone)]
pub struct Sender {
    slot: Arc<Mutex<Binding>>,
    policy: DeferPolicy,
}

impl Sender {
    pub(crate) fn bound(actor: ActorRef, policy: DeferPolicy) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Binding {
                actor: Some(actor),
                generation: 0,
                deferred: VecDeque::new(),
                replaying: false,
            })),
            policy,
        }
    }

    /// Dispatch to whatever actor is bound right now.
    pub fn send(&self, event: impl Into<Event>) {
        let event = event.into();
        let target = {
            let mut binding = self.slot.lock();
            let Some(actor) = binding.actor.clone() else {
                tracing::debug!(event = %event.kind, "event sent to a detached bridge dropped");
                return;
            };
            if self.policy == DeferPolicy::UntilRunning {
                let status = actor.status();
                // Replay in progress or still queued: keep source order.
                if binding.replaying
                    || !binding.deferred.is_empty()
                    || status == ActorStatus::NotStarted
                {
                    tracing::trace!(event = %event.kind, actor = actor.id(), "deferring event");
                    binding.deferred.push_back(event);
                    // The actor may have started without emitting.
                    let flush = status == ActorStatus::Running && !binding.replaying;
                    drop(binding);
                    if flush {
                        self.replay();
                    }
                    return;
                }
            }
            actor
        };
        target.send(event);
    }

    /// A plain closure over this sender.
    pub fn to_fn(&self) -> impl Fn(Event) + Clone + Send + Sync + 'static {
        let sender = self.clone();
        move |event| sender.send(event)
    }

    /// The actor events currently go to.
    pub fn actor(&self) -> Option<ActorRef> {
        self.slot.lock().actor.clone()
    }

    /// Events waiting for the actor to start.
    pub fn pending(&self) -> usize {
        self.slot.lock().deferred.len()
    }

    pub(crate) fn generation(&self) -> u64 {
        self.slot.lock().generation
    }

    pub(crate) fn is_current(&self, generation: u64) -> bool {
        self.slot.lock().generation == generation
    }

    /// Point the slot at `actor`, dropping anything queued for the old one.
    /// Returns the new generation.
    pub(crate) fn rebind(&self, actor: Option<ActorRef>) -> u64 {
        let mut binding = self.slot.lock();
        binding.generation += 1;
        binding.replaying = false;
        let dropped = binding.deferred.len();
        binding.deferred.clear();
        if dropped > 0 {
            tracing::debug!(dropped, "dropped events deferred for the previous actor");
        }
        binding.actor = actor;
        binding.generation
    }

    /// Deliver the queue in order if the bound actor is running. Events sent
    /// during the replay join the end of the queue and go out in the same
    /// batch. Returns the number delivered.
    pub(crate) fn replay(&self) -> usize {
        let (actor, generation) = {
            let mut binding = self.slot.lock();
            if binding.replaying || binding.deferred.is_empty() {
                return 0;
            }
            let Some(actor) = binding.actor.clone() else {
                return 0;
            };
            if actor.status() != ActorStatus::Running {
                return 0;
            }
            binding.replaying = true;
            (actor, binding.generation)
        };

        let delivered = Runtime::batch(|| {
            let mut delivered = 0;
            loop {
                let next = {
                    let mut binding = self.slot.lock();
                    // Rebound while replaying: the rest of the queue is gone.
                    if binding.generation != generation {
                        break;
                    }
                    match binding.deferred.pop_front() {
                        Some(event) => event,
                        None => {
                            binding.replaying = false;
                            break;
                        }
                    }
                };
                actor.send(next);
                delivered += 1;
            }
            delivered
        });

        tracing::debug!(delivered, actor = actor.id(), "replayed deferred events");
        delivered
    }
}

impl fmt::Debug for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let binding = self.slot.lock();
        f.debug_struct("Sender")
            .field("actor", &binding.actor)
            .field("generation", &binding.generation)
            .field("pending", &binding.deferred.len())
            .field("policy", &self.policy)
            .finish()
    }
}
