//! Typed event registry.
//!
//! A closed set of event kinds, a map from kind to subscriber closures,
//! and an unsubscribe capability returned from every `on`. Emission is
//! synchronous on the session task; handlers should hand work off rather
//! than block.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use chorus_core::{ChatMessage, SessionState};

use crate::error::ClientError;

/// Events emitted by the client session.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Session state changed.
    StateChange(SessionState),
    /// A message was appended to the local conversation.
    Message(ChatMessage),
    /// Partial or final user transcript.
    Transcript { text: String, is_final: bool },
    /// A client- or server-side error.
    Error(ClientError),
    /// Transport established.
    Connected,
    /// Transport lost or intentionally closed.
    Disconnected,
    /// Microphone and playback pipelines are running.
    AudioReady,
    /// The conversation was reset.
    Reset,
}

impl ClientEvent {
    /// The kind used for subscription routing.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::StateChange(_) => EventKind::StateChange,
            Self::Message(_) => EventKind::Message,
            Self::Transcript { .. } => EventKind::Transcript,
            Self::Error(_) => EventKind::Error,
            Self::Connected => EventKind::Connected,
            Self::Disconnected => EventKind::Disconnected,
            Self::AudioReady => EventKind::AudioReady,
            Self::Reset => EventKind::Reset,
        }
    }
}

/// The closed set of subscribable kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    StateChange,
    Message,
    Transcript,
    Error,
    Connected,
    Disconnected,
    AudioReady,
    Reset,
}

type Handler = Box<dyn Fn(&ClientEvent) + Send + Sync>;

/// Subscriber registry shared between the session task and the application.
#[derive(Default)]
pub struct EventBus {
    handlers: Mutex<HashMap<EventKind, HashMap<u64, Arc<Handler>>>>,
    next_id: AtomicU64,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a handler for one event kind. The returned subscription
    /// unsubscribes explicitly; dropping it keeps the handler alive.
    pub fn on(
        self: &Arc<Self>,
        kind: EventKind,
        handler: impl Fn(&ClientEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers
            .lock()
            .unwrap()
            .entry(kind)
            .or_default()
            .insert(id, Arc::new(Box::new(handler)));
        Subscription {
            bus: Arc::downgrade(self),
            kind,
            id,
        }
    }

    /// Emit one event to its kind's subscribers.
    pub fn emit(&self, event: &ClientEvent) {
        // Snapshot the handlers so a subscriber may unsubscribe (or
        // subscribe) from inside its own callback without deadlocking.
        let snapshot: Vec<Arc<Handler>> = self
            .handlers
            .lock()
            .unwrap()
            .get(&event.kind())
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default();
        for handler in snapshot {
            handler(event);
        }
    }
}

/// Capability to remove one subscription.
pub struct Subscription {
    bus: Weak<EventBus>,
    kind: EventKind,
    id: u64,
}

impl Subscription {
    /// Remove the handler. Idempotent by construction — the id is unique.
    pub fn unsubscribe(self) {
        if let Some(bus) = self.bus.upgrade() {
            if let Some(handlers) = bus.handlers.lock().unwrap().get_mut(&self.kind) {
                handlers.remove(&self.id);
            }
        }
    }
}
