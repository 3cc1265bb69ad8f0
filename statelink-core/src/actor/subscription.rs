use std::fmt;

use parking_lot::Mutex;

type Unsubscribe = Box<dyn FnOnce() + Send>;

/// RAII handle for an observer registered with an actor.
///
/// `unsubscribe` runs the release closure at most once; dropping the handle
/// unsubscribes too.
pub struct Subscription {
    release: Mutex<Option<Unsubscribe>>,
}

impl Subscription {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Mutex::new(Some(Box::new(release))),
        }
    }

    /// A subscription with nothing to release.
    pub fn empty() -> Self {
        Self {
            release: Mutex::new(None),
        }
    }

    pub fn unsubscribe(&self) {
        let release = self.release.lock().take();
        if let Some(release) = release {
            release();
        }
    }

    pub fn is_active(&self) -> bool {
        self.release.lock().is_some()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}
