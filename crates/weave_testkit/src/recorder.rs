//! Capturing watcher callbacks.

use parking_lot::Mutex;
use std::sync::Arc;

/// Shared log of values pushed from callbacks.
///
/// Clones share the same log, so one clone can move into a watcher while
/// the test keeps another.
#[derive(Debug)]
pub struct Recorder<T> {
    events: Arc<Mutex<Vec<T>>>,
}

impl<T> Clone for Recorder<T> {
    fn clone(&self) -> Self {
        Self {
            events: Arc::clone(&self.events),
        }
    }
}

impl<T> Default for Recorder<T> {
    fn default() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<T: Clone> Recorder<T> {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an event.
    pub fn push(&self, event: T) {
        self.events.lock().push(event);
    }

    /// Number of events recorded.
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Returns true if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Copies out all events.
    pub fn events(&self) -> Vec<T> {
        self.events.lock().clone()
    }

    /// Most recent event.
    pub fn last(&self) -> Option<T> {
        self.events.lock().last().cloned()
    }

    /// Removes and returns all events.
    pub fn take(&self) -> Vec<T> {
        std::mem::take(&mut *self.events.lock())
    }
}

impl Recorder<()> {
    /// Returns a callback that records one `()` per call.
    pub fn tick(&self) -> impl Fn() + Send + Sync + 'static {
        let recorder = self.clone();
        move || recorder.push(())
    }
}
