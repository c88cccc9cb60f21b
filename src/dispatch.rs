//! Event dispatch.
//!
//! Routes decoded events to the listeners registered for their category.
//! Listeners run in registration order; a listener that fails or panics is
//! reported to the error sink and never prevents the remaining listeners
//! from running.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::RwLock;

use log::error;

use crate::types::{Event, EventCategory};

/// Error a listener may report back to the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub struct ListenerError(pub String);

impl std::fmt::Display for ListenerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "listener error: {}", self.0)
    }
}

impl std::error::Error for ListenerError {}

/// A registered event listener.
pub type Listener = Box<dyn Fn(&Event) -> Result<(), ListenerError> + Send + Sync>;

/// Category-keyed listener registry.
#[derive(Default)]
pub struct Dispatcher {
    listeners: RwLock<HashMap<EventCategory, Vec<Listener>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for one event category. Listeners fire in
    /// registration order. Must not be called from inside a listener (the
    /// registry is locked for the duration of a dispatch).
    pub fn add_listener<F>(&self, category: EventCategory, listener: F)
    where
        F: Fn(&Event) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        let mut listeners = self.listeners.write().expect("listener registry poisoned");
        listeners
            .entry(category)
            .or_default()
            .push(Box::new(listener));
    }

    /// Number of listeners registered for a category.
    pub fn listener_count(&self, category: EventCategory) -> usize {
        let listeners = self.listeners.read().expect("listener registry poisoned");
        listeners.get(&category).map_or(0, Vec::len)
    }

    /// Deliver an event to every listener of its category. Infallible for
    /// the caller: failures go to the error sink.
    pub fn dispatch(&self, event: &Event) {
        let listeners = self.listeners.read().expect("listener registry poisoned");
        let Some(registered) = listeners.get(&event.category()) else {
            return;
        };

        for (index, listener) in registered.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(
                        "listener {} for {:?} failed: {}",
                        index,
                        event.category(),
                        e
                    );
                }
                Err(_) => {
                    error!("listener {} for {:?} panicked", index, event.category());
                }
            }
        }
    }
}
