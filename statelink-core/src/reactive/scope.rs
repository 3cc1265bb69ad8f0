//! Scopes
//!
//! A Scope stands in for a component's lifetime. Code that runs while a view
//! is being built registers attach hooks (`on_mount`) and detach hooks
//! (`on_cleanup`); the host calls `mount` once the view is attached and
//! `dispose` when it goes away.
//!
//! # Ordering
//!
//! - Attach hooks run in registration order, inside one runtime batch.
//! - Detach hooks run in reverse registration order.
//! - Disposing before mounting drops the attach hooks unrun, so nothing that
//!   would have been acquired at attach time can leak.
//! - Disposal is idempotent and also happens when the last handle is dropped.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use super::runtime::Runtime;
use crate::error::Result;

type MountHook = Box<dyn FnOnce(&Scope) -> Result<()> + Send>;
type CleanupHook = Box<dyn FnOnce() + Send>;

/// Lifecycle phase of a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeState {
    /// Created, not yet attached.
    Pending,
    /// Attach hooks have run.
    Mounted,
    /// Detach hooks have run.
    Disposed,
}

struct ScopeInner {
    state: Mutex<ScopeState>,
    mount_hooks: Mutex<Vec<MountHook>>,
    cleanups: Mutex<Vec<CleanupHook>>,
}

impl ScopeInner {
    fn dispose(&self) {
        {
            let mut state = self.state.lock();
            if *state == ScopeState::Disposed {
                return;
            }
            *state = ScopeState::Disposed;
        }

        let unrun = std::mem::take(&mut *self.mount_hooks.lock());
        if !unrun.is_empty() {
            tracing::debug!(hooks = unrun.len(), "scope disposed before mount");
        }

        let cleanups = std::mem::take(&mut *self.cleanups.lock());
        Runtime::batch(|| {
            for cleanup in cleanups.into_iter().rev() {
                cleanup();
            }
        });
    }
}

impl Drop for ScopeInner {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Owner of attach and detach hooks for one component lifetime.
#[derive(Clone)]
pub struct Scope {
    inner: Arc<ScopeInner>,
}

impl Scope {
    /// Create a scope in the `Pending` state.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                state: Mutex::new(ScopeState::Pending),
                mount_hooks: Mutex::new(Vec::new()),
                cleanups: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Current lifecycle phase.
    pub fn state(&self) -> ScopeState {
        *self.inner.state.lock()
    }

    pub fn is_mounted(&self) -> bool {
        self.state() == ScopeState::Mounted
    }

    pub fn is_disposed(&self) -> bool {
        self.state() == ScopeState::Disposed
    }

    /// Register an attach hook.
    ///
    /// On an already-mounted scope the hook runs immediately and its error is
    /// returned; on a disposed scope it is dropped.
    pub fn on_mount<F>(&self, hook: F) -> Result<()>
    where
        F: FnOnce(&Scope) -> Result<()> + Send + 'static,
    {
        let state = self.inner.state.lock();
        let current = *state;
        match current {
            ScopeState::Pending => {
                self.inner.mount_hooks.lock().push(Box::new(hook));
                Ok(())
            }
            ScopeState::Mounted => {
                drop(state);
                Runtime::batch(|| hook(self))
            }
            ScopeState::Disposed => Ok(()),
        }
    }

    /// Register a detach hook. On a disposed scope it runs immediately.
    pub fn on_cleanup<F>(&self, cleanup: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let state = self.inner.state.lock();
        if *state == ScopeState::Disposed {
            drop(state);
            cleanup();
            return;
        }
        self.inner.cleanups.lock().push(Box::new(cleanup));
    }

    /// Run the attach hooks.
    ///
    /// The first failing hook aborts the rest and its error is returned; the
    /// scope still counts as mounted, so detach hooks registered so far run
    /// on dispose. Mounting twice is a no-op.
    pub fn mount(&self) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            if *state != ScopeState::Pending {
                return Ok(());
            }
            *state = ScopeState::Mounted;
        }

        let hooks = std::mem::take(&mut *self.inner.mount_hooks.lock());
        Runtime::batch(|| {
            for hook in hooks {
                hook(self)?;
            }
            Ok(())
        })
    }

    /// Run the detach hooks. Idempotent.
    pub fn dispose(&self) {
        self.inner.dispose();
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("state", &self.state())
            .field("cleanups", &self.inner.cleanups.lock().len())
            .finish()
    }
}
