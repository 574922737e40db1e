//! Collaborator roster: identity, status, and current location.
//!
//! The registry is a plain map of actor id → collaborator plus the
//! bookkeeping for cursor-move throttling. Cross-component effects of
//! joining/leaving (session teardown, notifications, activity) are
//! orchestrated by the engine facade; this module only owns roster state.
//!
//! Cursor-only location changes are high-frequency, so their
//! `PresenceChanged` emission is rate-limited per actor. Status changes and
//! moves to a different entity always emit. State is updated either way —
//! only event emission is throttled.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{color_tag, ActorId, Location, PresenceStatus, Role};

/// A registered participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collaborator {
    pub id: ActorId,
    pub display_name: String,
    /// Stable hex color derived from the id, for cursor/avatar rendering.
    pub color_tag: String,
    pub role: Role,
    pub status: PresenceStatus,
    pub last_seen_at: u64,
    pub location: Option<Location>,
}

/// Caller-supplied identity for registration.
#[derive(Debug, Clone)]
pub struct NewCollaborator {
    pub id: ActorId,
    pub display_name: String,
    pub role: Role,
}

impl NewCollaborator {
    pub fn new(display_name: impl Into<String>, role: Role) -> Self {
        Self {
            id: Uuid::new_v4(),
            display_name: display_name.into(),
            role,
        }
    }

    /// Registration with a caller-chosen id (reconnecting actors).
    pub fn with_id(id: ActorId, display_name: impl Into<String>, role: Role) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            role,
        }
    }
}

/// Roster errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RosterError {
    /// An actor with this id is already registered.
    DuplicateActor(ActorId),
    /// The configured collaborator cap is reached.
    RosterFull { cap: usize },
}

impl std::fmt::Display for RosterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RosterError::DuplicateActor(id) => write!(f, "Actor already registered: {id}"),
            RosterError::RosterFull { cap } => write!(f, "Roster full ({cap} collaborators)"),
        }
    }
}

impl std::error::Error for RosterError {}

/// Result of a presence update: the new state plus whether the change
/// should be announced (cursor moves may be throttled).
#[derive(Debug, Clone)]
pub struct PresenceChange {
    pub collaborator: Collaborator,
    pub emit: bool,
}

/// Actor roster with cursor-emit throttling.
#[derive(Debug)]
pub struct PresenceRegistry {
    actors: HashMap<ActorId, Collaborator>,
    cap: usize,
    emit_interval_ms: u64,
    last_emit: HashMap<ActorId, u64>,
}

impl PresenceRegistry {
    pub fn new(cap: usize, emit_interval_ms: u64) -> Self {
        Self {
            actors: HashMap::new(),
            cap,
            emit_interval_ms,
            last_emit: HashMap::new(),
        }
    }

    /// Register a collaborator, online, seen now.
    pub fn add(&mut self, new: NewCollaborator, now_ms: u64) -> Result<Collaborator, RosterError> {
        if self.actors.contains_key(&new.id) {
            return Err(RosterError::DuplicateActor(new.id));
        }
        if self.actors.len() >= self.cap {
            return Err(RosterError::RosterFull { cap: self.cap });
        }

        let collaborator = Collaborator {
            id: new.id,
            color_tag: color_tag(&new.id),
            display_name: new.display_name,
            role: new.role,
            status: PresenceStatus::Online,
            last_seen_at: now_ms,
            location: None,
        };
        self.actors.insert(collaborator.id, collaborator.clone());
        Ok(collaborator)
    }

    /// Remove a collaborator. Unknown ids are a no-op.
    ///
    /// The returned clone is stamped offline for the departure event.
    pub fn remove(&mut self, id: ActorId) -> Option<Collaborator> {
        let mut gone = self.actors.remove(&id)?;
        self.last_emit.remove(&id);
        gone.status = PresenceStatus::Offline;
        Some(gone)
    }

    /// Update an actor's location and/or status. Unknown ids are a no-op.
    ///
    /// `emit` is false when the change is a cursor/section move inside the
    /// same entity and the per-actor emit interval has not elapsed.
    pub fn update(
        &mut self,
        id: ActorId,
        location: Option<Location>,
        status: Option<PresenceStatus>,
        cursors_enabled: bool,
        now_ms: u64,
    ) -> Option<PresenceChange> {
        let actor = self.actors.get_mut(&id)?;

        let status_changed = status.map_or(false, |s| s != actor.status);
        let moved_entity = match (&actor.location, &location) {
            (Some(old), Some(new)) => !old.same_place(new),
            (None, Some(_)) => true,
            _ => false,
        };

        actor.last_seen_at = now_ms;
        if let Some(status) = status {
            actor.status = status;
        }
        if let Some(mut location) = location {
            if !cursors_enabled {
                location.cursor = None;
            }
            actor.location = Some(location);
        }

        let emit = if status_changed || moved_entity {
            self.last_emit.insert(id, now_ms);
            true
        } else {
            let last = self.last_emit.get(&id).copied().unwrap_or(0);
            if now_ms.saturating_sub(last) >= self.emit_interval_ms {
                self.last_emit.insert(id, now_ms);
                true
            } else {
                false
            }
        };

        Some(PresenceChange {
            collaborator: actor.clone(),
            emit,
        })
    }

    /// Roster snapshot: online first, then away, then offline; most
    /// recently seen first within each status.
    pub fn list(&self) -> Vec<Collaborator> {
        let mut out: Vec<Collaborator> = self.actors.values().cloned().collect();
        out.sort_by(|a, b| {
            a.status
                .rank()
                .cmp(&b.status.rank())
                .then(b.last_seen_at.cmp(&a.last_seen_at))
                .then(a.id.cmp(&b.id))
        });
        out
    }

    pub fn get(&self, id: ActorId) -> Option<&Collaborator> {
        self.actors.get(&id)
    }

    pub fn contains(&self, id: ActorId) -> bool {
        self.actors.contains_key(&id)
    }

    /// Every registered actor id except the given one.
    pub fn others(&self, id: ActorId) -> Vec<ActorId> {
        self.actors.keys().copied().filter(|k| *k != id).collect()
    }

    /// Display name for an actor, short id fallback for unregistered ones.
    pub fn display_name(&self, id: ActorId) -> String {
        match self.actors.get(&id) {
            Some(actor) => actor.display_name.clone(),
            None => format!("actor-{}", &id.to_string()[..8]),
        }
    }

    pub fn count(&self) -> usize {
        self.actors.len()
    }

    pub fn clear(&mut self) {
        self.actors.clear();
        self.last_emit.clear();
    }
}
