// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Callback registry keyed by event name.
//!
//! Inbound frames are published under their `type` and under
//! [`EVENT_MESSAGE`]; lifecycle changes under [`EVENT_CONNECTED`],
//! [`EVENT_DISCONNECTED`] and [`EVENT_ERROR`].

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;
use tracing::error;

pub const EVENT_MESSAGE: &str = "message";
pub const EVENT_CONNECTED: &str = "connected";
pub const EVENT_DISCONNECTED: &str = "disconnected";
pub const EVENT_ERROR: &str = "error";

pub type Callback = Arc<dyn Fn(&Value) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    next_id: u64,
    by_event: HashMap<String, Vec<(u64, Callback)>>,
}

/// Publish/subscribe hub shared by a client and its background tasks.
#[derive(Clone, Default)]
pub struct EventBus {
    listeners: Arc<Mutex<Listeners>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for `event`.
    pub fn on(&self, event: &str, callback: impl Fn(&Value) + Send + Sync + 'static) -> Subscription {
        let mut listeners = self.listeners.lock();
        listeners.next_id += 1;
        let id = listeners.next_id;
        listeners.by_event.entry(event.to_owned()).or_default().push((id, Arc::new(callback)));
        Subscription { listeners: Arc::downgrade(&self.listeners), event: event.to_owned(), id }
    }

    /// Invoke every callback registered for `event`. Returns how many ran to
    /// completion.
    ///
    /// Callbacks run on a snapshot taken before the first one is called, so a
    /// callback may subscribe or unsubscribe without affecting this dispatch.
    /// A panicking callback is logged and skipped.
    pub fn emit(&self, event: &str, payload: &Value) -> usize {
        let snapshot: Vec<Callback> = match self.listeners.lock().by_event.get(event) {
            Some(entries) => entries.iter().map(|(_, cb)| Arc::clone(cb)).collect(),
            None => return 0,
        };

        let mut completed = 0;
        for callback in snapshot {
            match catch_unwind(AssertUnwindSafe(|| callback(payload))) {
                Ok(()) => completed += 1,
                Err(_) => error!(event, "event callback panicked"),
            }
        }
        completed
    }

    /// Remove every callback registered for `event`. Returns how many were
    /// removed. Outstanding [`Subscription`]s for them become no-ops.
    pub fn off(&self, event: &str) -> usize {
        self.listeners.lock().by_event.remove(event).map_or(0, |entries| entries.len())
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners.lock().by_event.get(event).map_or(0, Vec::len)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let listeners = self.listeners.lock();
        f.debug_struct("EventBus").field("events", &listeners.by_event.len()).finish()
    }
}

/// Handle returned by [`EventBus::on`]. Dropping it keeps the callback.
#[derive(Debug)]
pub struct Subscription {
    listeners: Weak<Mutex<Listeners>>,
    event: String,
    id: u64,
}

impl Subscription {
    /// Remove the callback. Safe to call repeatedly and after the bus is gone.
    pub fn unsubscribe(&self) {
        let Some(listeners) = self.listeners.upgrade() else {
            return;
        };
        let mut listeners = listeners.lock();
        if let Some(entries) = listeners.by_event.get_mut(&self.event) {
            entries.retain(|(id, _)| *id != self.id);
            if entries.is_empty() {
                listeners.by_event.remove(&self.event);
            }
        }
    }
}

#[cfg(test)]
#[path = "events_tests.rs"]
mod tests;
