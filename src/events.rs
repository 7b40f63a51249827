//! Lifecycle event bus.
//!
//! Collaborators (chat layer, UI, tests) subscribe typed listeners and get
//! every engine lifecycle notification synchronously, in registration
//! order. A panicking listener is logged and skipped; the rest still run.
//! Payloads are serializable so hosts can forward them over IPC unchanged.
//!
//! The engine owns the bus; a [`Subscription`] handle holds only a weak
//! reference back, so dropping the engine drops the listeners with it.
//! Listeners run on the emitting thread and must not call back into the
//! engine facade.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::registry::KbOrigin;
use crate::state::EngineMode;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum RagEvent {
    #[serde(rename = "engine_state_loaded")]
    StateLoaded {
        enabled: bool,
        mode: EngineMode,
        active_name: Option<String>,
    },
    #[serde(rename = "engine_enabled_changed")]
    EnabledChanged { old: bool, new: bool },
    #[serde(rename = "engine_mode_changed")]
    ModeChanged { old: EngineMode, new: EngineMode },
    #[serde(rename = "kb_added")]
    KbAdded {
        name: String,
        path: String,
        chunk_count: usize,
        origin: KbOrigin,
    },
    #[serde(rename = "kb_removed")]
    KbRemoved { name: String },
    #[serde(rename = "kb_switched")]
    KbSwitched { name: String, path: String },
    #[serde(rename = "system_kbs_loaded")]
    SystemKbsLoaded { count: usize },
}

type Listener = Box<dyn Fn(&RagEvent) + Send + Sync>;
type ListenerSlots = Mutex<Vec<(Uuid, Listener)>>;

#[derive(Clone, Default)]
pub struct EventBus {
    listeners: Arc<ListenerSlots>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener; it stays registered until the returned handle is
    /// cancelled or the bus is dropped.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&RagEvent) + Send + Sync + 'static,
    {
        let id = Uuid::new_v4();
        self.listeners.lock().push((id, Box::new(listener)));
        Subscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    /// Dispatch synchronously, in registration order. Dispatch holds the
    /// listener table lock, which is what gives every listener the same
    /// global event order.
    pub fn emit(&self, event: &RagEvent) {
        let listeners = self.listeners.lock();
        for (id, listener) in listeners.iter() {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                warn!(listener = %id, "Event listener panicked, continuing with the rest");
            }
        }
    }

    #[cfg(test)]
    fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }
}

/// Cancellation handle returned by [`EventBus::subscribe`].
pub struct Subscription {
    id: Uuid,
    listeners: Weak<ListenerSlots>,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Remove the listener. A no-op when the bus is already gone.
    pub fn cancel(self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.lock().retain(|(id, _)| *id != self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kb_added(name: &str) -> RagEvent {
        RagEvent::KbAdded {
            name: name.to_string(),
            path: format!("/kb/{name}.txt"),
            chunk_count: 3,
            origin: KbOrigin::User,
        }
    }

    #[test]
    fn test_listeners_run_in_registration_order() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second", "third"] {
            let seen = seen.clone();
            bus.subscribe(move |_| seen.lock().push(tag));
        }
        bus.emit(&kb_added("a"));
        assert_eq!(*seen.lock(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_panicking_listener_does_not_block_the_rest() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe(|_| panic!("listener bug"));
        {
            let seen = seen.clone();
            bus.subscribe(move |event| {
                if let RagEvent::KbRemoved { name } = event {
                    seen.lock().push(name.clone());
                }
            });
        }
        bus.emit(&RagEvent::KbRemoved {
            name: "doomed".to_string(),
        });
        assert_eq!(*seen.lock(), vec!["doomed"]);
    }

    #[test]
    fn test_cancel_removes_listener() {
        let bus = EventBus::new();
        let sub = bus.subscribe(|_| {});
        let kept = bus.subscribe(|_| {});
        assert_eq!(bus.listener_count(), 2);
        sub.cancel();
        assert_eq!(bus.listener_count(), 1);
        kept.cancel();
        assert_eq!(bus.listener_count(), 0);
    }

    #[test]
    fn test_cancel_after_bus_dropped_is_noop() {
        let bus = EventBus::new();
        let sub = bus.subscribe(|_| {});
        drop(bus);
        sub.cancel();
    }

    #[test]
    fn test_event_wire_shape() {
        let json = serde_json::to_value(kb_added("notes")).unwrap();
        assert_eq!(json["type"], "kb_added");
        assert_eq!(json["data"]["name"], "notes");
        assert_eq!(json["data"]["origin"], "user");
        assert_eq!(json["data"]["chunk_count"], 3);
    }
}
