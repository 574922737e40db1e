//! Bounded, human-readable chronological feed of workspace activity.
//!
//! Entries are derived from updates, presence changes, conflicts, and edit
//! sessions. Structured context rides along as a closed tagged union per
//! kind, so consumers can match exhaustively instead of probing an open
//! metadata map.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::conflict::ResolutionStrategy;
use crate::types::{ActorId, EntityRef, PresenceStatus};
use crate::update_log::UpdateKind;

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Joined,
    Left,
    EntityUpdated,
    ConflictDetected,
    ConflictResolved,
    EditingStarted,
    EditingStopped,
}

/// Structured per-kind context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActivityDetail {
    Presence {
        status: PresenceStatus,
    },
    Update {
        kind: UpdateKind,
        path: String,
    },
    Conflict {
        conflict_id: String,
        members: usize,
        strategy: Option<ResolutionStrategy>,
    },
    Edit {
        field: String,
    },
}

/// One feed entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub id: Uuid,
    pub kind: ActivityKind,
    pub actor_id: ActorId,
    pub entity: Option<EntityRef>,
    pub entity_name: String,
    pub timestamp_ms: u64,
    pub description: String,
    pub detail: Option<ActivityDetail>,
}

/// Query filters; unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct ActivityFilter {
    pub kinds: Option<Vec<ActivityKind>>,
    pub actors: Option<Vec<ActorId>>,
    pub since_ms: Option<u64>,
    pub until_ms: Option<u64>,
}

impl ActivityFilter {
    pub fn kinds(mut self, kinds: impl IntoIterator<Item = ActivityKind>) -> Self {
        self.kinds = Some(kinds.into_iter().collect());
        self
    }

    pub fn actors(mut self, actors: impl IntoIterator<Item = ActorId>) -> Self {
        self.actors = Some(actors.into_iter().collect());
        self
    }

    pub fn between(mut self, since_ms: u64, until_ms: u64) -> Self {
        self.since_ms = Some(since_ms);
        self.until_ms = Some(until_ms);
        self
    }

    fn matches(&self, event: &ActivityEvent) -> bool {
        if let Some(kinds) = &self.kinds {
            if !kinds.contains(&event.kind) {
                return false;
            }
        }
        if let Some(actors) = &self.actors {
            if !actors.contains(&event.actor_id) {
                return false;
            }
        }
        if let Some(since) = self.since_ms {
            if event.timestamp_ms < since {
                return false;
            }
        }
        if let Some(until) = self.until_ms {
            if event.timestamp_ms > until {
                return false;
            }
        }
        true
    }
}

/// Bounded ring of activity entries, newest first.
#[derive(Debug)]
pub struct ActivityFeed {
    events: VecDeque<ActivityEvent>,
    cap: usize,
    enabled: bool,
}

impl ActivityFeed {
    pub fn new(cap: usize, enabled: bool) -> Self {
        Self {
            events: VecDeque::with_capacity(cap.min(256)),
            cap,
            enabled,
        }
    }

    /// Append an entry, evicting the oldest beyond the cap.
    ///
    /// Returns `None` when the feed is disabled.
    #[allow(clippy::too_many_arguments)]
    pub fn record(
        &mut self,
        kind: ActivityKind,
        actor_id: ActorId,
        entity: Option<EntityRef>,
        entity_name: impl Into<String>,
        description: impl Into<String>,
        detail: Option<ActivityDetail>,
        now_ms: u64,
    ) -> Option<ActivityEvent> {
        if !self.enabled {
            return None;
        }

        let event = ActivityEvent {
            id: Uuid::new_v4(),
            kind,
            actor_id,
            entity,
            entity_name: entity_name.into(),
            timestamp_ms: now_ms,
            description: description.into(),
            detail,
        };
        self.events.push_front(event.clone());
        self.events.truncate(self.cap);
        Some(event)
    }

    /// Newest-first slice matching the filter, at most `limit` entries.
    pub fn query(&self, limit: usize, filter: &ActivityFilter) -> Vec<ActivityEvent> {
        self.events
            .iter()
            .filter(|e| filter.matches(e))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Newest-first, unfiltered.
    pub fn recent(&self, limit: usize) -> Vec<ActivityEvent> {
        self.query(limit, &ActivityFilter::default())
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}
