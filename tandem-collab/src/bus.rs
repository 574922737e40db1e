//! Synchronous pub/sub bus with a closed set of event tags.
//!
//! Every component announces state changes through this bus. Handlers are
//! invoked synchronously, in subscription order, on the caller's stack. A
//! handler that panics is contained and logged so it cannot prevent
//! delivery to the remaining subscribers.
//!
//! Event tags are a closed enum rather than string keys, so consumers can
//! match exhaustively and the compiler flags unhandled kinds.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

use uuid::Uuid;

use crate::activity::ActivityEvent;
use crate::conflict::Conflict;
use crate::notify::Notification;
use crate::presence::Collaborator;
use crate::session::LiveEditSession;
use crate::types::ActorId;
use crate::update_log::Update;

/// Closed set of event tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    PresenceChanged,
    UpdateRecorded,
    ConflictDetected,
    ConflictResolved,
    SessionStarted,
    SessionUpdated,
    SessionEnded,
    NotificationAdded,
    NotificationUpdated,
    ActivityAdded,
}

/// A published state change with its typed payload.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    PresenceChanged { collaborator: Collaborator },
    UpdateRecorded { update: Update },
    ConflictDetected { conflict: Conflict },
    ConflictResolved { conflict: Conflict },
    SessionStarted { session: LiveEditSession },
    SessionUpdated { session: LiveEditSession },
    SessionEnded { session: LiveEditSession },
    NotificationAdded { notification: Notification },
    NotificationUpdated { id: Uuid, reader: ActorId },
    ActivityAdded { event: ActivityEvent },
}

impl EngineEvent {
    /// The tag this payload is published under.
    pub fn kind(&self) -> EventKind {
        match self {
            EngineEvent::PresenceChanged { .. } => EventKind::PresenceChanged,
            EngineEvent::UpdateRecorded { .. } => EventKind::UpdateRecorded,
            EngineEvent::ConflictDetected { .. } => EventKind::ConflictDetected,
            EngineEvent::ConflictResolved { .. } => EventKind::ConflictResolved,
            EngineEvent::SessionStarted { .. } => EventKind::SessionStarted,
            EngineEvent::SessionUpdated { .. } => EventKind::SessionUpdated,
            EngineEvent::SessionEnded { .. } => EventKind::SessionEnded,
            EngineEvent::NotificationAdded { .. } => EventKind::NotificationAdded,
            EngineEvent::NotificationUpdated { .. } => EventKind::NotificationUpdated,
            EngineEvent::ActivityAdded { .. } => EventKind::ActivityAdded,
        }
    }
}

/// Handle returned by [`EventBus::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler = Box<dyn Fn(&EngineEvent)>;

/// Per-tag handler registry.
#[derive(Default)]
pub struct EventBus {
    handlers: HashMap<EventKind, Vec<(SubscriptionId, Handler)>>,
    next_id: u64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one event tag.
    pub fn subscribe<F>(&mut self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&EngineEvent) + 'static,
    {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        self.handlers
            .entry(kind)
            .or_default()
            .push((id, Box::new(handler)));
        id
    }

    /// Remove a previously registered handler. Returns false if unknown.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        for entries in self.handlers.values_mut() {
            if let Some(pos) = entries.iter().position(|(sid, _)| *sid == id) {
                entries.remove(pos);
                return true;
            }
        }
        false
    }

    /// Deliver an event to every subscriber of its tag.
    ///
    /// Returns the number of handlers that ran to completion. A panicking
    /// handler is caught and logged; delivery continues.
    pub fn publish(&self, event: &EngineEvent) -> usize {
        let kind = event.kind();
        let Some(entries) = self.handlers.get(&kind) else {
            return 0;
        };

        let mut delivered = 0;
        for (id, handler) in entries {
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(()) => delivered += 1,
                Err(_) => {
                    log::error!("{kind:?} handler {id:?} panicked; subscriber skipped");
                }
            }
        }
        delivered
    }

    /// Number of handlers registered for a tag.
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.handlers.get(&kind).map_or(0, Vec::len)
    }

    /// Drop every subscription.
    pub fn clear(&mut self) {
        self.handlers.clear();
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let total: usize = self.handlers.values().map(Vec::len).sum();
        f.debug_struct("EventBus")
            .field("subscriptions", &total)
            .finish()
    }
}
