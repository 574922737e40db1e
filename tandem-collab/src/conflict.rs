//! Conflict lifecycle and resolution strategies.
//!
//! A conflict is created by the detector when two or more actors touch the
//! same entity field within the detection window. Its state machine is
//! one-way: `Pending → Resolved`, terminal. Conflicts are never deleted —
//! they remain available for audit and the activity feed.
//!
//! Resolution strategies:
//!
//! | Strategy | Final value |
//! |----------|-------------|
//! | `LastWriterWins` | member with the maximum `(timestamp, seq)` |
//! | `FirstWriterWins` | member with the minimum `(timestamp, seq)` |
//! | `MergeChanges` | chronological fold; objects shallow-merge, scalars later-wins |
//! | `UserChoice` | caller-picked value (required) |
//! | `CustomResolution` | caller-computed value, earliest member as fallback |

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{ActorId, EntityRef};
use crate::update_log::Update;

/// Lifecycle state. `Resolved` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictState {
    Pending,
    Resolved,
}

/// Algorithm used to compute a single final value from the members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    LastWriterWins,
    FirstWriterWins,
    MergeChanges,
    UserChoice,
    CustomResolution,
}

/// Caller-supplied inputs for `UserChoice` / `CustomResolution`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolutionPayload {
    pub chosen_value: Option<Value>,
    pub custom_value: Option<Value>,
}

impl ResolutionPayload {
    pub fn chosen(value: Value) -> Self {
        Self {
            chosen_value: Some(value),
            custom_value: None,
        }
    }

    pub fn custom(value: Value) -> Self {
        Self {
            chosen_value: None,
            custom_value: Some(value),
        }
    }
}

/// A detected edit conflict over one entity field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    /// `conflict_<counter>_<timestamp>`.
    pub id: String,
    pub entity: EntityRef,
    pub path: String,
    /// Owned clones of the member updates, chronological order, pairwise
    /// distinct by actor. Owned because log entries may be evicted while
    /// the conflict must survive.
    pub members: Vec<Update>,
    pub state: ConflictState,
    pub detected_at: u64,
    pub strategy: Option<ResolutionStrategy>,
    pub resolved_by: Option<ActorId>,
    pub resolved_at: Option<u64>,
    pub final_value: Option<Value>,
}

impl Conflict {
    pub fn is_resolved(&self) -> bool {
        self.state == ConflictState::Resolved
    }

    /// Distinct actors among the members, in member order.
    pub fn actor_ids(&self) -> Vec<ActorId> {
        let mut out = Vec::with_capacity(self.members.len());
        for member in &self.members {
            if !out.contains(&member.actor_id) {
                out.push(member.actor_id);
            }
        }
        out
    }

    /// Ids of the member updates.
    pub fn member_ids(&self) -> Vec<String> {
        self.members.iter().map(|m| m.id.clone()).collect()
    }
}

/// Resolution errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// No conflict with the given id.
    UnknownConflict(String),
    /// `UserChoice` without a chosen value; the conflict stays pending.
    MissingChoice,
    /// Strategy applied to a conflict with no members.
    EmptyConflict,
}

impl std::fmt::Display for ResolveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolveError::UnknownConflict(id) => write!(f, "Unknown conflict: {id}"),
            ResolveError::MissingChoice => write!(f, "user_choice strategy requires a chosen value"),
            ResolveError::EmptyConflict => write!(f, "Conflict has no members"),
        }
    }
}

impl std::error::Error for ResolveError {}

/// Result of a resolve call.
#[derive(Debug, Clone)]
pub enum ResolveOutcome {
    /// The conflict transitioned to `Resolved` with this call.
    Applied(Conflict),
    /// The conflict was already terminal; the existing resolution is
    /// returned unchanged.
    AlreadyResolved(Conflict),
}

impl ResolveOutcome {
    pub fn conflict(&self) -> &Conflict {
        match self {
            ResolveOutcome::Applied(c) | ResolveOutcome::AlreadyResolved(c) => c,
        }
    }

    pub fn into_conflict(self) -> Conflict {
        match self {
            ResolveOutcome::Applied(c) | ResolveOutcome::AlreadyResolved(c) => c,
        }
    }

    pub fn newly_resolved(&self) -> bool {
        matches!(self, ResolveOutcome::Applied(_))
    }
}

/// Registry of every conflict the detector has created.
#[derive(Debug, Default)]
pub struct ConflictBook {
    conflicts: HashMap<String, Conflict>,
    /// Insertion order, for stable listings.
    order: Vec<String>,
    counter: u64,
}

impl ConflictBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a pending conflict from the matched members plus the
    /// triggering update. Members are stored chronologically with their
    /// conflict flags set.
    pub fn create(
        &mut self,
        entity: EntityRef,
        path: impl Into<String>,
        mut members: Vec<Update>,
        now_ms: u64,
    ) -> Conflict {
        self.counter += 1;
        members.sort_by_key(|m| (m.timestamp_ms, m.seq));
        for member in &mut members {
            member.conflict_flag = true;
        }

        let conflict = Conflict {
            id: format!("conflict_{}_{}", self.counter, now_ms),
            entity,
            path: path.into(),
            members,
            state: ConflictState::Pending,
            detected_at: now_ms,
            strategy: None,
            resolved_by: None,
            resolved_at: None,
            final_value: None,
        };
        self.order.push(conflict.id.clone());
        self.conflicts.insert(conflict.id.clone(), conflict.clone());
        conflict
    }

    /// Compute the final value a strategy would produce. Pure.
    pub fn compute(
        strategy: ResolutionStrategy,
        members: &[Update],
        payload: &ResolutionPayload,
    ) -> Result<Value, ResolveError> {
        let latest = || {
            members
                .iter()
                .max_by_key(|m| (m.timestamp_ms, m.seq))
                .map(|m| m.operation.new_value.clone())
                .ok_or(ResolveError::EmptyConflict)
        };
        let earliest = || {
            members
                .iter()
                .min_by_key(|m| (m.timestamp_ms, m.seq))
                .map(|m| m.operation.new_value.clone())
                .ok_or(ResolveError::EmptyConflict)
        };

        match strategy {
            ResolutionStrategy::LastWriterWins => latest(),
            ResolutionStrategy::FirstWriterWins => earliest(),
            ResolutionStrategy::MergeChanges => {
                let mut sorted: Vec<&Update> = members.iter().collect();
                sorted.sort_by_key(|m| (m.timestamp_ms, m.seq));
                let mut iter = sorted.into_iter();
                let first = iter.next().ok_or(ResolveError::EmptyConflict)?;
                let mut acc = first.operation.new_value.clone();
                for member in iter {
                    let next = &member.operation.new_value;
                    match (&mut acc, next) {
                        (Value::Object(acc_map), Value::Object(next_map)) => {
                            for (key, value) in next_map {
                                acc_map.insert(key.clone(), value.clone());
                            }
                        }
                        // Later scalar (or mixed shapes) wins outright.
                        _ => acc = next.clone(),
                    }
                }
                Ok(acc)
            }
            ResolutionStrategy::UserChoice => payload
                .chosen_value
                .clone()
                .ok_or(ResolveError::MissingChoice),
            ResolutionStrategy::CustomResolution => match payload.custom_value.clone() {
                Some(value) => Ok(value),
                None => earliest(),
            },
        }
    }

    /// Resolve a pending conflict.
    ///
    /// Idempotent on terminal conflicts: the stored resolution is returned
    /// unchanged. A strategy error (e.g. `MissingChoice`) leaves the
    /// conflict pending with no partial mutation.
    pub fn resolve(
        &mut self,
        id: &str,
        strategy: ResolutionStrategy,
        actor: ActorId,
        payload: &ResolutionPayload,
        now_ms: u64,
    ) -> Result<ResolveOutcome, ResolveError> {
        let Some(conflict) = self.conflicts.get_mut(id) else {
            return Err(ResolveError::UnknownConflict(id.to_string()));
        };

        if conflict.is_resolved() {
            return Ok(ResolveOutcome::AlreadyResolved(conflict.clone()));
        }

        let final_value = Self::compute(strategy, &conflict.members, payload)?;

        conflict.state = ConflictState::Resolved;
        conflict.strategy = Some(strategy);
        conflict.resolved_by = Some(actor);
        conflict.resolved_at = Some(now_ms);
        conflict.final_value = Some(final_value);
        for member in &mut conflict.members {
            member.resolved_flag = true;
        }

        Ok(ResolveOutcome::Applied(conflict.clone()))
    }

    /// Preview what a strategy would produce, without mutating anything.
    ///
    /// Returns `None` for unknown conflicts or unsatisfiable strategies.
    pub fn preview(
        &self,
        id: &str,
        strategy: ResolutionStrategy,
        payload: &ResolutionPayload,
    ) -> Option<Value> {
        let conflict = self.conflicts.get(id)?;
        Self::compute(strategy, &conflict.members, payload).ok()
    }

    pub fn get(&self, id: &str) -> Option<&Conflict> {
        self.conflicts.get(id)
    }

    /// Every conflict, oldest first.
    pub fn all(&self) -> Vec<Conflict> {
        self.order
            .iter()
            .filter_map(|id| self.conflicts.get(id).cloned())
            .collect()
    }

    /// Pending conflicts only, oldest first.
    pub fn pending(&self) -> Vec<Conflict> {
        self.order
            .iter()
            .filter_map(|id| self.conflicts.get(id))
            .filter(|c| !c.is_resolved())
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.conflicts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conflicts.is_empty()
    }

    /// Drop every conflict (engine teardown).
    pub fn clear(&mut self) {
        self.conflicts.clear();
        self.order.clear();
    }
}
