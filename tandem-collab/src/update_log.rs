//! Append-only bounded log of change operations, and conflict *detection*.
//!
//! The log is a fixed-capacity ring: new updates are prepended, the oldest
//! entry is evicted once the cap is reached. Updates are immutable once
//! appended, except for the two correlation flags (`conflict_flag`,
//! `resolved_flag`) which the resolver maintains.
//!
//! Total order over updates is `(timestamp_ms, seq)` — wall-clock first,
//! monotonic insertion counter as tiebreak, so same-millisecond updates
//! still order deterministically.

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{ActorId, EntityRef};

/// What kind of change an update describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateKind {
    Create,
    Update,
    Delete,
    Move,
    Rename,
    StatusChange,
    ContentEdit,
    PropertyChange,
}

/// Low-level shape of the applied operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
    Insert,
    Delete,
    Replace,
    Move,
    PropertySet,
}

/// The concrete field mutation carried by an update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub op_kind: OpKind,
    /// Field path within the entity, e.g. `title` or `settings.color`.
    pub path: String,
    pub new_value: Value,
    pub old_value: Option<Value>,
    pub position: Option<u32>,
    pub length: Option<u32>,
}

impl Operation {
    pub fn replace(path: impl Into<String>, new_value: Value, old_value: Option<Value>) -> Self {
        Self {
            op_kind: OpKind::Replace,
            path: path.into(),
            new_value,
            old_value,
            position: None,
            length: None,
        }
    }

    pub fn insert(path: impl Into<String>, new_value: Value, position: u32) -> Self {
        Self {
            op_kind: OpKind::Insert,
            path: path.into(),
            new_value,
            old_value: None,
            position: Some(position),
            length: None,
        }
    }

    pub fn property_set(path: impl Into<String>, new_value: Value, old_value: Option<Value>) -> Self {
        Self {
            op_kind: OpKind::PropertySet,
            path: path.into(),
            new_value,
            old_value,
            position: None,
            length: None,
        }
    }
}

/// A recorded change operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Update {
    /// `update_<counter>_<timestamp>` — unique for the engine's lifetime.
    pub id: String,
    pub kind: UpdateKind,
    pub entity: EntityRef,
    pub actor_id: ActorId,
    pub timestamp_ms: u64,
    /// Monotonic insertion counter, tiebreak for same-millisecond updates.
    pub seq: u64,
    pub operation: Operation,
    /// Set when this update became a member of a detected conflict.
    pub conflict_flag: bool,
    /// Set when a conflict containing this update was resolved.
    pub resolved_flag: bool,
}

/// Caller-supplied portion of an update; id and ordering are assigned on
/// record.
#[derive(Debug, Clone)]
pub struct NewUpdate {
    pub kind: UpdateKind,
    pub entity: EntityRef,
    pub actor_id: ActorId,
    pub operation: Operation,
}

/// Bounded ring of updates, newest first.
#[derive(Debug)]
pub struct UpdateLog {
    entries: VecDeque<Update>,
    cap: usize,
    counter: u64,
}

impl UpdateLog {
    pub fn new(cap: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(cap.min(1024)),
            cap,
            counter: 0,
        }
    }

    /// Assign identity and ordering, prepend, evict beyond cap.
    ///
    /// Returns the stored update.
    pub fn record(&mut self, draft: NewUpdate, now_ms: u64) -> Update {
        self.counter += 1;
        let update = Update {
            id: format!("update_{}_{}", self.counter, now_ms),
            kind: draft.kind,
            entity: draft.entity,
            actor_id: draft.actor_id,
            timestamp_ms: now_ms,
            seq: self.counter,
            operation: draft.operation,
            conflict_flag: false,
            resolved_flag: false,
        };
        self.entries.push_front(update.clone());
        self.entries.truncate(self.cap);
        update
    }

    /// Scan for prior updates that conflict with `update`.
    ///
    /// A prior update V conflicts when it touches the same entity and
    /// operation path, comes from a different actor, lies within the
    /// detection window, and has not already been consumed by a resolved
    /// conflict. When one rival actor has several in-window updates on the
    /// path, only their latest is returned, keeping conflict members
    /// pairwise distinct by actor.
    ///
    /// Returned matches are in chronological `(timestamp, seq)` order.
    pub fn find_conflicting(&self, update: &Update, window_ms: u64) -> Vec<Update> {
        let mut latest_per_actor: HashMap<ActorId, &Update> = HashMap::new();

        for prior in &self.entries {
            if prior.seq == update.seq {
                continue;
            }
            if prior.entity != update.entity || prior.operation.path != update.operation.path {
                continue;
            }
            if prior.actor_id == update.actor_id {
                continue;
            }
            if prior.resolved_flag {
                continue;
            }
            if update.timestamp_ms.abs_diff(prior.timestamp_ms) >= window_ms {
                continue;
            }

            latest_per_actor
                .entry(prior.actor_id)
                .and_modify(|held| {
                    if (prior.timestamp_ms, prior.seq) > (held.timestamp_ms, held.seq) {
                        *held = prior;
                    }
                })
                .or_insert(prior);
        }

        let mut matched: Vec<Update> = latest_per_actor.into_values().cloned().collect();
        matched.sort_by_key(|u| (u.timestamp_ms, u.seq));
        matched
    }

    /// Mark the given updates as conflict members, where still in the log.
    pub fn flag_conflicted(&mut self, ids: &[String]) {
        for entry in &mut self.entries {
            if ids.iter().any(|id| id == &entry.id) {
                entry.conflict_flag = true;
            }
        }
    }

    /// Mark the given updates as belonging to a resolved conflict.
    pub fn flag_resolved(&mut self, ids: &[String]) {
        for entry in &mut self.entries {
            if ids.iter().any(|id| id == &entry.id) {
                entry.resolved_flag = true;
            }
        }
    }

    /// Most-recent-first slice, at most `limit` entries.
    pub fn recent(&self, limit: usize) -> Vec<Update> {
        self.entries.iter().take(limit).cloned().collect()
    }

    pub fn get(&self, id: &str) -> Option<&Update> {
        self.entries.iter().find(|u| u.id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    /// Drop every entry (engine teardown). The id counter is kept so ids
    /// never repeat within one engine lifetime.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EntityKind;
    use serde_json::json;
    use uuid::Uuid;

    fn draft(entity: EntityRef, actor: ActorId, path: &str, value: Value) -> NewUpdate {
        NewUpdate {
            kind: UpdateKind::ContentEdit,
            entity,
            actor_id: actor,
            operation: Operation::replace(path, value, None),
        }
    }

    fn task() -> EntityRef {
        EntityRef::new(EntityKind::Task, Uuid::new_v4())
    }

    // ── Recording tests ──────────────────────────────────────────

    #[test]
    fn test_record_assigns_id_and_order() {
        let mut log = UpdateLog::new(100);
        let entity = task();
        let actor = Uuid::new_v4();

        let u1 = log.record(draft(entity, actor, "title", json!("a")), 1_000);
        let u2 = log.record(draft(entity, actor, "title", json!("b")), 1_000);

        assert_eq!(u1.id, "update_1_1000");
        assert_eq!(u2.id, "update_2_1000");
        assert!(u2.seq > u1.seq);
        assert!(!u1.conflict_flag && !u1.resolved_flag);
    }

    #[test]
    fn test_ring_evicts_oldest() {
        let mut log = UpdateLog::new(3);
        let entity = task();
        let actor = Uuid::new_v4();

        for i in 0..5u64 {
            log.record(draft(entity, actor, "title", json!(i)), 1_000 + i);
        }

        assert_eq!(log.len(), 3);
        let recent = log.recent(10);
        assert_eq!(recent.len(), 3);
        // Newest first; update_1/update_2 evicted.
        assert_eq!(recent[0].id, "update_5_1004");
        assert_eq!(recent[2].id, "update_3_1002");
        assert!(log.get("update_1_1000").is_none());
    }

    #[test]
    fn test_recent_respects_limit() {
        let mut log = UpdateLog::new(100);
        let entity = task();
        let actor = Uuid::new_v4();
        for i in 0..10u64 {
            log.record(draft(entity, actor, "title", json!(i)), i);
        }
        assert_eq!(log.recent(4).len(), 4);
    }

    // ── Detection tests ──────────────────────────────────────────

    #[test]
    fn test_detects_other_actor_in_window() {
        let mut log = UpdateLog::new(100);
        let entity = task();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        log.record(draft(entity, a, "title", json!("from a")), 1_000);
        let u = log.record(draft(entity, b, "title", json!("from b")), 1_400);

        let matched = log.find_conflicting(&u, 5_000);
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].actor_id, a);
    }

    #[test]
    fn test_no_detection_outside_window() {
        let mut log = UpdateLog::new(100);
        let entity = task();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        log.record(draft(entity, a, "title", json!("old")), 1_000);
        let u = log.record(draft(entity, b, "title", json!("new")), 7_000);

        assert!(log.find_conflicting(&u, 5_000).is_empty());
    }

    #[test]
    fn test_window_boundary_is_exclusive() {
        let mut log = UpdateLog::new(100);
        let entity = task();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        log.record(draft(entity, a, "title", json!("old")), 1_000);
        let u = log.record(draft(entity, b, "title", json!("new")), 6_000);

        // Δt == W exactly → no conflict (strict `< W`).
        assert!(log.find_conflicting(&u, 5_000).is_empty());
    }

    #[test]
    fn test_same_actor_never_conflicts() {
        let mut log = UpdateLog::new(100);
        let entity = task();
        let a = Uuid::new_v4();

        log.record(draft(entity, a, "title", json!("first")), 1_000);
        let u = log.record(draft(entity, a, "title", json!("second")), 1_100);

        assert!(log.find_conflicting(&u, 5_000).is_empty());
    }

    #[test]
    fn test_different_path_or_entity_never_conflicts() {
        let mut log = UpdateLog::new(100);
        let entity = task();
        let other_entity = task();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        log.record(draft(entity, a, "description", json!("x")), 1_000);
        log.record(draft(other_entity, a, "title", json!("y")), 1_000);
        let u = log.record(draft(entity, b, "title", json!("z")), 1_100);

        assert!(log.find_conflicting(&u, 5_000).is_empty());
    }

    #[test]
    fn test_resolved_members_excluded() {
        let mut log = UpdateLog::new(100);
        let entity = task();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        let v = log.record(draft(entity, a, "title", json!("x")), 1_000);
        log.flag_resolved(std::slice::from_ref(&v.id));

        let u = log.record(draft(entity, b, "title", json!("y")), 1_100);
        assert!(log.find_conflicting(&u, 5_000).is_empty());
    }

    #[test]
    fn test_dedupes_matches_per_actor_keeping_latest() {
        let mut log = UpdateLog::new(100);
        let entity = task();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        log.record(draft(entity, a, "title", json!("a1")), 1_000);
        log.record(draft(entity, a, "title", json!("a2")), 1_200);
        let u = log.record(draft(entity, b, "title", json!("b1")), 1_300);

        let matched = log.find_conflicting(&u, 5_000);
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].operation.new_value, json!("a2"));
    }

    #[test]
    fn test_matches_sorted_chronologically() {
        let mut log = UpdateLog::new(100);
        let entity = task();
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        log.record(draft(entity, b, "title", json!("b")), 1_500);
        log.record(draft(entity, a, "title", json!("a")), 1_000);
        let u = log.record(draft(entity, c, "title", json!("c")), 1_800);

        let matched = log.find_conflicting(&u, 5_000);
        assert_eq!(matched.len(), 2);
        assert_eq!(matched[0].timestamp_ms, 1_000);
        assert_eq!(matched[1].timestamp_ms, 1_500);
    }

    #[test]
    fn test_flag_conflicted_marks_entries() {
        let mut log = UpdateLog::new(100);
        let entity = task();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        let v = log.record(draft(entity, a, "title", json!("x")), 1_000);
        let u = log.record(draft(entity, b, "title", json!("y")), 1_100);

        log.flag_conflicted(&[v.id.clone(), u.id.clone()]);
        assert!(log.get(&v.id).unwrap().conflict_flag);
        assert!(log.get(&u.id).unwrap().conflict_flag);
        assert!(!log.get(&v.id).unwrap().resolved_flag);
    }
}
