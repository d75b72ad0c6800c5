//! Named-event listener registry
//!
//! This crate provides the EventRegistry backing `listen_event` and
//! `fire_event`. Listeners are kept per event name in registration order.
//!
//! Firing an event reaches only the *first* listener registered for its
//! name. Existing automation tests depend on this, even though it is
//! inconsistent with `listen_state` where every match fires. Use
//! [`EventRegistry::listeners`] if a test needs to see the full list.

use ad_core::EventCallback;
use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

/// A unique identifier for an event listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventHandle(u64);

/// A registered `listen_event` subscription
#[derive(Clone)]
pub struct EventSubscription {
    pub handle: EventHandle,
    pub event_name: String,
    pub callback: EventCallback,
}

impl fmt::Debug for EventSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSubscription")
            .field("handle", &self.handle)
            .field("event_name", &self.event_name)
            .finish_non_exhaustive()
    }
}

/// The registry of named-event listeners
pub struct EventRegistry {
    /// Listeners keyed by event name, in registration order
    listeners: DashMap<String, Vec<EventSubscription>>,
    /// Counter for generating unique handles
    next_handle: AtomicU64,
}

impl EventRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            listeners: DashMap::new(),
            next_handle: AtomicU64::new(1),
        }
    }

    /// Register a listener for `event_name`
    pub fn subscribe(
        &self,
        event_name: impl Into<String>,
        callback: EventCallback,
    ) -> EventSubscription {
        let event_name = event_name.into();
        let subscription = EventSubscription {
            handle: EventHandle(self.next_handle.fetch_add(1, Ordering::SeqCst)),
            event_name: event_name.clone(),
            callback,
        };
        trace!(event_name = %event_name, handle = subscription.handle.0, "Subscribing to event");

        self.listeners
            .entry(event_name)
            .or_default()
            .push(subscription.clone());
        subscription
    }

    /// The listener that receives `event_name` when it fires
    ///
    /// Only the first-registered listener is returned; see the crate docs.
    pub fn first(&self, event_name: &str) -> Option<EventSubscription> {
        let first = self
            .listeners
            .get(event_name)
            .and_then(|subs| subs.first().cloned());
        if first.is_none() {
            debug!(event_name, "No listener for event");
        }
        first
    }

    /// All listeners registered for `event_name`
    pub fn listeners(&self, event_name: &str) -> Vec<EventSubscription> {
        self.listeners
            .get(event_name)
            .map(|subs| subs.clone())
            .unwrap_or_default()
    }

    /// Remove a listener; unknown handles are ignored
    pub fn cancel(&self, handle: EventHandle) -> bool {
        let mut removed = false;
        for mut entry in self.listeners.iter_mut() {
            let before = entry.len();
            entry.retain(|s| s.handle != handle);
            if entry.len() != before {
                removed = true;
                break;
            }
        }
        self.listeners.retain(|_, subs| !subs.is_empty());
        removed
    }

    /// Number of listeners for an event name
    pub fn count(&self, event_name: &str) -> usize {
        self.listeners.get(event_name).map(|s| s.len()).unwrap_or(0)
    }

    /// Drop every listener
    pub fn clear(&self) {
        self.listeners.clear();
    }
}

impl Default for EventRegistry {
    fn default() -> Self {
        Self::new()
    }
}
