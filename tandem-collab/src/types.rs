//! Shared identity and entity types used across the engine.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of a participant whose edits the engine tracks.
pub type ActorId = Uuid;

/// Reserved identity for engine-initiated actions (auto-resolution, sweeps).
///
/// Notifications sourced from the system actor are delivered to every
/// target, including actors that would otherwise be excluded as senders.
pub const SYSTEM_ACTOR: ActorId = Uuid::nil();

/// Kinds of shared entities in the Tandem workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Task,
    Notebook,
    Board,
    Comment,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EntityKind::Task => "task",
            EntityKind::Notebook => "notebook",
            EntityKind::Board => "board",
            EntityKind::Comment => "comment",
        };
        f.write_str(name)
    }
}

/// Reference to a single shared entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: Uuid,
}

impl EntityRef {
    pub fn new(kind: EntityKind, id: Uuid) -> Self {
        Self { kind, id }
    }

    /// Short human-readable label, e.g. `task 550e8400`.
    pub fn label(&self) -> String {
        format!("{} {}", self.kind, &self.id.to_string()[..8])
    }
}

impl std::fmt::Display for EntityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.label())
    }
}

/// Access role of a collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Owner,
    Editor,
    Viewer,
    Guest,
}

/// Presence status of a collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
    Online,
    Away,
    Offline,
}

impl PresenceStatus {
    /// Sort rank for roster snapshots: online first, offline last.
    pub fn rank(&self) -> u8 {
        match self {
            PresenceStatus::Online => 0,
            PresenceStatus::Away => 1,
            PresenceStatus::Offline => 2,
        }
    }
}

/// Where a collaborator is currently looking/working.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub kind: EntityKind,
    pub entity_id: Option<Uuid>,
    pub section: Option<String>,
    pub cursor: Option<u32>,
}

impl Location {
    pub fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            entity_id: None,
            section: None,
            cursor: None,
        }
    }

    pub fn entity(kind: EntityKind, id: Uuid) -> Self {
        Self {
            kind,
            entity_id: Some(id),
            section: None,
            cursor: None,
        }
    }

    pub fn with_section(mut self, section: impl Into<String>) -> Self {
        self.section = Some(section.into());
        self
    }

    pub fn with_cursor(mut self, cursor: u32) -> Self {
        self.cursor = Some(cursor);
        self
    }

    /// True when `other` differs only in cursor/section position.
    pub fn same_place(&self, other: &Location) -> bool {
        self.kind == other.kind && self.entity_id == other.entity_id
    }
}

/// Generate a stable, visually distinct hex color tag from an actor id.
///
/// Same scheme as cursor coloring: the low bytes of the id hash become RGB,
/// so the same actor always renders with the same color.
pub fn color_tag(id: &ActorId) -> String {
    let hash = id.as_u128();
    let r = (hash & 0xFF) as u8;
    let g = ((hash >> 8) & 0xFF) as u8;
    let b = ((hash >> 16) & 0xFF) as u8;
    format!("#{r:02x}{g:02x}{b:02x}")
}
