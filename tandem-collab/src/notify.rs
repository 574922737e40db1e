//! Per-actor targeted, priority-tagged notifications with read tracking.
//!
//! Dispatch runs through a per-kind allow-list, excludes the source actor
//! from its own notifications (system-sourced messages reach everyone),
//! and appends to a bounded FIFO log. Read state is tracked per recipient
//! and marking is idempotent.

use std::collections::{HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{ActorId, EntityRef, SYSTEM_ACTOR};

/// Delivery priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
}

/// Kinds of notifications the engine emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    UserJoined,
    UserLeft,
    ConflictDetected,
    ConflictResolved,
}

impl NotificationKind {
    /// Every kind, for default allow-lists.
    pub fn all() -> [NotificationKind; 4] {
        [
            NotificationKind::UserJoined,
            NotificationKind::UserLeft,
            NotificationKind::ConflictDetected,
            NotificationKind::ConflictResolved,
        ]
    }

    /// Default priority per kind.
    pub fn default_priority(&self) -> Priority {
        match self {
            NotificationKind::UserJoined | NotificationKind::UserLeft => Priority::Low,
            NotificationKind::ConflictDetected => Priority::High,
            NotificationKind::ConflictResolved => Priority::Medium,
        }
    }
}

/// A targeted message. The target set never grows after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub kind: NotificationKind,
    pub source: ActorId,
    pub targets: Vec<ActorId>,
    pub entity: Option<EntityRef>,
    pub message: String,
    pub priority: Priority,
    pub created_at: u64,
    pub read_by: HashSet<ActorId>,
}

impl Notification {
    pub fn is_target(&self, actor: ActorId) -> bool {
        self.targets.contains(&actor)
    }

    pub fn is_read_by(&self, actor: ActorId) -> bool {
        self.read_by.contains(&actor)
    }
}

/// Bounded notification log with allow-list filtering.
#[derive(Debug)]
pub struct NotificationCenter {
    log: VecDeque<Notification>,
    cap: usize,
    allowed: HashSet<NotificationKind>,
}

impl NotificationCenter {
    pub fn new(cap: usize, allowed: impl IntoIterator<Item = NotificationKind>) -> Self {
        Self {
            log: VecDeque::with_capacity(cap.min(256)),
            cap,
            allowed: allowed.into_iter().collect(),
        }
    }

    /// Build and store a notification.
    ///
    /// Returns `None` when the kind is filtered out by configuration or
    /// when no targets remain after excluding the source (the source actor
    /// never receives its own notification unless the source is the
    /// system).
    #[allow(clippy::too_many_arguments)]
    pub fn dispatch(
        &mut self,
        kind: NotificationKind,
        source: ActorId,
        targets: Vec<ActorId>,
        entity: Option<EntityRef>,
        message: impl Into<String>,
        priority: Priority,
        now_ms: u64,
    ) -> Option<Notification> {
        if !self.allowed.contains(&kind) {
            return None;
        }

        let mut resolved: Vec<ActorId> = Vec::with_capacity(targets.len());
        for target in targets {
            if target == source && source != SYSTEM_ACTOR {
                continue;
            }
            if !resolved.contains(&target) {
                resolved.push(target);
            }
        }
        if resolved.is_empty() {
            return None;
        }

        let notification = Notification {
            id: Uuid::new_v4(),
            kind,
            source,
            targets: resolved,
            entity,
            message: message.into(),
            priority,
            created_at: now_ms,
            read_by: HashSet::new(),
        };
        self.log.push_front(notification.clone());
        self.log.truncate(self.cap);
        Some(notification)
    }

    /// Mark a notification read for one recipient.
    ///
    /// Returns true only on the first transition. Unknown ids and
    /// non-target actors are silent no-ops.
    pub fn mark_read(&mut self, id: Uuid, actor: ActorId) -> bool {
        let Some(notification) = self.log.iter_mut().find(|n| n.id == id) else {
            return false;
        };
        if !notification.is_target(actor) {
            return false;
        }
        notification.read_by.insert(actor)
    }

    /// Notifications targeting an actor, newest first, capped.
    pub fn for_actor(&self, actor: ActorId, limit: usize) -> Vec<Notification> {
        self.log
            .iter()
            .filter(|n| n.is_target(actor))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Target notifications the actor has not read yet.
    pub fn unread_count(&self, actor: ActorId) -> usize {
        self.log
            .iter()
            .filter(|n| n.is_target(actor) && !n.is_read_by(actor))
            .count()
    }

    pub fn get(&self, id: Uuid) -> Option<&Notification> {
        self.log.iter().find(|n| n.id == id)
    }

    /// Whole log, newest first.
    pub fn all(&self) -> Vec<Notification> {
        self.log.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    pub fn clear(&mut self) {
        self.log.clear();
    }
}
