//! Ephemeral live-editing sessions with heartbeats and staleness sweep.
//!
//! A session records that one actor is actively editing one field of one
//! entity. At most one active session exists per (entity, field, actor)
//! tuple; several actors holding sessions on the same field is expected —
//! that concurrency is what the conflict detector later observes as
//! conflicting updates.
//!
//! Sessions that miss heartbeats longer than the TTL are ended by the
//! periodic staleness sweep, so disconnected editors do not linger as
//! ghosts in the editing indicators.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{ActorId, EntityRef};

/// One actor actively editing one entity field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveEditSession {
    pub id: Uuid,
    pub entity: EntityRef,
    pub field: String,
    pub actor_id: ActorId,
    pub started_at: u64,
    pub last_heartbeat_at: u64,
    pub cursor_position: Option<u32>,
    pub draft_content: Option<String>,
    pub active: bool,
}

type SessionKey = (EntityRef, String, ActorId);

/// Outcome of a start call.
#[derive(Debug, Clone)]
pub enum StartOutcome {
    /// A fresh session was created.
    Started(LiveEditSession),
    /// An active session for the exact tuple already existed; its
    /// heartbeat was reset instead of duplicating it.
    Resumed(LiveEditSession),
}

impl StartOutcome {
    pub fn session(&self) -> &LiveEditSession {
        match self {
            StartOutcome::Started(s) | StartOutcome::Resumed(s) => s,
        }
    }

    pub fn into_session(self) -> LiveEditSession {
        match self {
            StartOutcome::Started(s) | StartOutcome::Resumed(s) => s,
        }
    }

    pub fn is_fresh(&self) -> bool {
        matches!(self, StartOutcome::Started(_))
    }
}

/// Index of active sessions.
#[derive(Debug)]
pub struct EditTracker {
    sessions: HashMap<Uuid, LiveEditSession>,
    index: HashMap<SessionKey, Uuid>,
    ttl_ms: u64,
}

impl EditTracker {
    pub fn new(ttl_ms: u64) -> Self {
        Self {
            sessions: HashMap::new(),
            index: HashMap::new(),
            ttl_ms,
        }
    }

    /// Start (or resume) a session for the exact (entity, field, actor)
    /// tuple.
    pub fn start(
        &mut self,
        entity: EntityRef,
        field: impl Into<String>,
        actor: ActorId,
        now_ms: u64,
    ) -> StartOutcome {
        let field = field.into();
        let key: SessionKey = (entity, field.clone(), actor);

        if let Some(id) = self.index.get(&key) {
            if let Some(session) = self.sessions.get_mut(id) {
                session.last_heartbeat_at = now_ms;
                return StartOutcome::Resumed(session.clone());
            }
        }

        let session = LiveEditSession {
            id: Uuid::new_v4(),
            entity,
            field,
            actor_id: actor,
            started_at: now_ms,
            last_heartbeat_at: now_ms,
            cursor_position: None,
            draft_content: None,
            active: true,
        };
        self.index.insert(key, session.id);
        self.sessions.insert(session.id, session.clone());
        StartOutcome::Started(session)
    }

    /// Refresh a session's heartbeat and any provided draft/cursor.
    ///
    /// Unknown ids are a silent no-op (heartbeats race with sweeps).
    pub fn heartbeat(
        &mut self,
        id: Uuid,
        draft: Option<String>,
        cursor: Option<u32>,
        now_ms: u64,
    ) -> Option<LiveEditSession> {
        let session = self.sessions.get_mut(&id)?;
        session.last_heartbeat_at = now_ms;
        if let Some(draft) = draft {
            session.draft_content = Some(draft);
        }
        if let Some(cursor) = cursor {
            session.cursor_position = Some(cursor);
        }
        Some(session.clone())
    }

    /// End a session. Unknown ids are a silent no-op.
    ///
    /// The returned clone carries `active = false`; the live entry is
    /// dropped from the tracker.
    pub fn end(&mut self, id: Uuid) -> Option<LiveEditSession> {
        let mut session = self.sessions.remove(&id)?;
        self.index
            .remove(&(session.entity, session.field.clone(), session.actor_id));
        session.active = false;
        Some(session)
    }

    /// End every session owned by an actor (collaborator removal cascade).
    pub fn end_for_actor(&mut self, actor: ActorId) -> Vec<LiveEditSession> {
        let ids: Vec<Uuid> = self
            .sessions
            .values()
            .filter(|s| s.actor_id == actor)
            .map(|s| s.id)
            .collect();
        ids.into_iter().filter_map(|id| self.end(id)).collect()
    }

    /// End sessions whose last heartbeat is older than the TTL.
    pub fn sweep_stale(&mut self, now_ms: u64) -> Vec<LiveEditSession> {
        let stale: Vec<Uuid> = self
            .sessions
            .values()
            .filter(|s| now_ms.saturating_sub(s.last_heartbeat_at) > self.ttl_ms)
            .map(|s| s.id)
            .collect();
        stale.into_iter().filter_map(|id| self.end(id)).collect()
    }

    /// Whether any actor holds an active session on the field.
    pub fn is_being_edited(&self, entity: EntityRef, field: &str) -> bool {
        self.sessions
            .values()
            .any(|s| s.entity == entity && s.field == field)
    }

    /// Actors holding active sessions on the field.
    pub fn editors_of(&self, entity: EntityRef, field: &str) -> Vec<ActorId> {
        self.sessions
            .values()
            .filter(|s| s.entity == entity && s.field == field)
            .map(|s| s.actor_id)
            .collect()
    }

    /// Active sessions, optionally restricted to one entity.
    pub fn list_active(&self, entity: Option<EntityRef>) -> Vec<LiveEditSession> {
        let mut out: Vec<LiveEditSession> = self
            .sessions
            .values()
            .filter(|s| entity.map_or(true, |e| s.entity == e))
            .cloned()
            .collect();
        out.sort_by_key(|s| (s.started_at, s.id));
        out
    }

    pub fn get(&self, id: Uuid) -> Option<&LiveEditSession> {
        self.sessions.get(&id)
    }

    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn ttl_ms(&self) -> u64 {
        self.ttl_ms
    }

    /// Drop every session without emitting anything (engine teardown).
    pub fn clear(&mut self) {
        self.sessions.clear();
        self.index.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EntityKind;

    fn task() -> EntityRef {
        EntityRef::new(EntityKind::Task, Uuid::new_v4())
    }

    #[test]
    fn test_start_creates_active_session() {
        let mut tracker = EditTracker::new(30_000);
        let entity = task();
        let actor = Uuid::new_v4();

        let outcome = tracker.start(entity, "title", actor, 1_000);
        assert!(outcome.is_fresh());
        let session = outcome.session();
        assert!(session.active);
        assert_eq!(session.started_at, 1_000);
        assert!(tracker.is_being_edited(entity, "title"));
    }

    #[test]
    fn test_start_reuses_existing_tuple() {
        let mut tracker = EditTracker::new(30_000);
        let entity = task();
        let actor = Uuid::new_v4();

        let first = tracker.start(entity, "title", actor, 1_000).into_session();
        let second = tracker.start(entity, "title", actor, 2_000);

        assert!(!second.is_fresh());
        assert_eq!(second.session().id, first.id);
        assert_eq!(second.session().last_heartbeat_at, 2_000);
        assert_eq!(tracker.active_count(), 1);
    }

    #[test]
    fn test_concurrent_actors_on_same_field() {
        let mut tracker = EditTracker::new(30_000);
        let entity = task();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        tracker.start(entity, "title", a, 1_000);
        tracker.start(entity, "title", b, 1_100);

        assert_eq!(tracker.active_count(), 2);
        let editors = tracker.editors_of(entity, "title");
        assert!(editors.contains(&a) && editors.contains(&b));
    }

    #[test]
    fn test_heartbeat_updates_draft_and_cursor() {
        let mut tracker = EditTracker::new(30_000);
        let entity = task();
        let session = tracker
            .start(entity, "title", Uuid::new_v4(), 1_000)
            .into_session();

        let updated = tracker
            .heartbeat(session.id, Some("draft text".into()), Some(10), 2_000)
            .unwrap();
        assert_eq!(updated.last_heartbeat_at, 2_000);
        assert_eq!(updated.draft_content.as_deref(), Some("draft text"));
        assert_eq!(updated.cursor_position, Some(10));

        // Omitted fields are preserved.
        let kept = tracker.heartbeat(session.id, None, None, 3_000).unwrap();
        assert_eq!(kept.draft_content.as_deref(), Some("draft text"));
        assert_eq!(kept.cursor_position, Some(10));
    }

    #[test]
    fn test_heartbeat_unknown_session_is_noop() {
        let mut tracker = EditTracker::new(30_000);
        assert!(tracker.heartbeat(Uuid::new_v4(), None, None, 1_000).is_none());
    }

    #[test]
    fn test_end_session() {
        let mut tracker = EditTracker::new(30_000);
        let entity = task();
        let session = tracker
            .start(entity, "title", Uuid::new_v4(), 1_000)
            .into_session();

        let ended = tracker.end(session.id).unwrap();
        assert!(!ended.active);
        assert!(!tracker.is_being_edited(entity, "title"));
        assert!(tracker.end(session.id).is_none()); // second end: no-op
    }

    #[test]
    fn test_end_for_actor_cascades() {
        let mut tracker = EditTracker::new(30_000);
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        tracker.start(task(), "title", a, 1_000);
        tracker.start(task(), "body", a, 1_000);
        tracker.start(task(), "title", b, 1_000);

        let ended = tracker.end_for_actor(a);
        assert_eq!(ended.len(), 2);
        assert_eq!(tracker.active_count(), 1);
        assert!(tracker.list_active(None).iter().all(|s| s.actor_id == b));
    }

    #[test]
    fn test_sweep_ends_only_stale_sessions() {
        let mut tracker = EditTracker::new(30_000);
        let entity = task();
        let stale_actor = Uuid::new_v4();
        let fresh_actor = Uuid::new_v4();

        let stale = tracker
            .start(entity, "title", stale_actor, 1_000)
            .into_session();
        let fresh = tracker
            .start(entity, "body", fresh_actor, 1_000)
            .into_session();
        tracker.heartbeat(fresh.id, None, None, 40_000);

        let swept = tracker.sweep_stale(40_000);
        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].id, stale.id);
        assert!(tracker.get(fresh.id).is_some());
    }

    #[test]
    fn test_sweep_boundary_requires_strictly_older() {
        let mut tracker = EditTracker::new(30_000);
        tracker.start(task(), "title", Uuid::new_v4(), 1_000);

        // Exactly TTL old: kept. One past: swept.
        assert!(tracker.sweep_stale(31_000).is_empty());
        assert_eq!(tracker.sweep_stale(31_001).len(), 1);
    }

    #[test]
    fn test_list_active_filter() {
        let mut tracker = EditTracker::new(30_000);
        let entity = task();
        tracker.start(entity, "title", Uuid::new_v4(), 1_000);
        tracker.start(task(), "title", Uuid::new_v4(), 2_000);

        assert_eq!(tracker.list_active(None).len(), 2);
        assert_eq!(tracker.list_active(Some(entity)).len(), 1);
    }
}
