//! Engine facade: composition, configuration, timers, and lifecycle.
//!
//! `CollabEngine` owns every component and performs the cross-component
//! choreography: recording an update asks the detector for correlated
//! rivals, a detected conflict fans out a notification and an activity
//! entry, removing a collaborator tears down their edit sessions, and so
//! on. All public operations are synchronous single-owner mutations; the
//! only asynchrony is the deadline queue drained by [`CollabEngine::poll_timers`].
//!
//! Timers are cancellable and idempotent: manually resolving a conflict
//! disarms its auto-resolve entry, and an entry firing after the conflict
//! reached its terminal state is a safe no-op. An external driver decides
//! the polling cadence (see `examples/simulate.rs`).

use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use crate::activity::{ActivityDetail, ActivityEvent, ActivityFeed, ActivityFilter, ActivityKind};
use crate::bus::{EngineEvent, EventBus, EventKind, SubscriptionId};
use crate::clock::{Clock, SystemClock};
use crate::conflict::{
    Conflict, ConflictBook, ResolutionPayload, ResolutionStrategy, ResolveError,
};
use crate::notify::{Notification, NotificationCenter, NotificationKind, Priority};
use crate::presence::{Collaborator, NewCollaborator, PresenceRegistry, RosterError};
use crate::session::{EditTracker, LiveEditSession};
use crate::types::{ActorId, EntityRef, Location, PresenceStatus, SYSTEM_ACTOR};
use crate::update_log::{NewUpdate, Update, UpdateLog};

/// Engine configuration. All fields have defaults.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum registered collaborators.
    pub max_collaborators: usize,
    /// Detection window W: same-field edits from different actors closer
    /// than this are conflicting.
    pub conflict_window_ms: u64,
    /// Deadline for auto-resolution of a pending conflict.
    pub conflict_resolution_timeout_ms: u64,
    /// Arm an auto-resolve timer for every detected conflict.
    pub auto_resolve_conflicts: bool,
    /// Minimum interval between presence events for cursor-only moves.
    pub presence_update_interval_ms: u64,
    /// Sessions without a heartbeat for this long are swept.
    pub session_ttl_ms: u64,
    /// Cadence of the staleness sweep (0 disables it).
    pub session_sweep_interval_ms: u64,
    /// Update log capacity.
    pub update_log_cap: usize,
    /// Notification log capacity.
    pub notification_cap: usize,
    /// Activity feed capacity.
    pub activity_cap: usize,
    /// Track cursor positions in locations and sessions.
    pub cursors_enabled: bool,
    /// Record activity entries at all.
    pub activity_feed_enabled: bool,
    /// Notification kinds that may be dispatched.
    pub enabled_notifications: Vec<NotificationKind>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_collaborators: 50,
            conflict_window_ms: 5_000,
            conflict_resolution_timeout_ms: 30_000,
            auto_resolve_conflicts: false,
            presence_update_interval_ms: 100,
            session_ttl_ms: 30_000,
            session_sweep_interval_ms: 10_000,
            update_log_cap: 100,
            notification_cap: 50,
            activity_cap: 100,
            cursors_enabled: true,
            activity_feed_enabled: true,
            enabled_notifications: NotificationKind::all().to_vec(),
        }
    }
}

/// Engine errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The engine was destroyed; mutating calls are rejected.
    Destroyed,
    /// An actor with this id is already registered.
    DuplicateActor(ActorId),
    /// The collaborator cap is reached.
    RosterFull { cap: usize },
    /// No conflict with the given id.
    UnknownConflict(String),
    /// `UserChoice` resolution without a chosen value.
    MissingChoice,
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Destroyed => write!(f, "Engine destroyed"),
            EngineError::DuplicateActor(id) => write!(f, "Actor already registered: {id}"),
            EngineError::RosterFull { cap } => write!(f, "Roster full ({cap} collaborators)"),
            EngineError::UnknownConflict(id) => write!(f, "Unknown conflict: {id}"),
            EngineError::MissingChoice => {
                write!(f, "user_choice strategy requires a chosen value")
            }
        }
    }
}

impl std::error::Error for EngineError {}

impl From<RosterError> for EngineError {
    fn from(err: RosterError) -> Self {
        match err {
            RosterError::DuplicateActor(id) => EngineError::DuplicateActor(id),
            RosterError::RosterFull { cap } => EngineError::RosterFull { cap },
        }
    }
}

/// Counters for monitoring engine health.
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    pub updates_recorded: u64,
    pub conflicts_detected: u64,
    pub conflicts_resolved: u64,
    pub auto_resolutions: u64,
    pub notifications_dispatched: u64,
    pub events_published: u64,
    pub timers_fired: u64,
    pub active_collaborators: usize,
    pub active_sessions: usize,
}

/// Deferred work scheduled against the clock.
#[derive(Debug, Clone, PartialEq, Eq)]
enum TimerTask {
    AutoResolve { conflict_id: String },
    SessionSweep,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct TimerEntry {
    deadline: u64,
    seq: u64,
    task: TimerTask,
}

// BinaryHeap is a max-heap; reverse the comparison for earliest-first.
impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// The collaboration engine.
pub struct CollabEngine {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    bus: EventBus,
    presence: PresenceRegistry,
    updates: UpdateLog,
    conflicts: ConflictBook,
    sessions: EditTracker,
    notifications: NotificationCenter,
    activity: ActivityFeed,
    timers: BinaryHeap<TimerEntry>,
    /// Conflict id → seq of its currently armed auto-resolve entry.
    /// Manual resolution removes the entry; a popped timer whose seq no
    /// longer matches is stale and skipped.
    armed_auto: HashMap<String, u64>,
    timer_seq: u64,
    stats: EngineStats,
    destroyed: bool,
}

impl CollabEngine {
    /// Create an engine on the wall clock.
    pub fn new(config: EngineConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(EngineConfig::default())
    }

    /// Create with an injected clock (tests, deterministic drivers).
    pub fn with_clock(config: EngineConfig, clock: Arc<dyn Clock>) -> Self {
        let mut engine = Self {
            presence: PresenceRegistry::new(
                config.max_collaborators,
                config.presence_update_interval_ms,
            ),
            updates: UpdateLog::new(config.update_log_cap),
            conflicts: ConflictBook::new(),
            sessions: EditTracker::new(config.session_ttl_ms),
            notifications: NotificationCenter::new(
                config.notification_cap,
                config.enabled_notifications.iter().copied(),
            ),
            activity: ActivityFeed::new(config.activity_cap, config.activity_feed_enabled),
            bus: EventBus::new(),
            timers: BinaryHeap::new(),
            armed_auto: HashMap::new(),
            timer_seq: 0,
            stats: EngineStats::default(),
            destroyed: false,
            clock,
            config,
        };

        if engine.config.session_sweep_interval_ms > 0 {
            let first = engine.clock.now_ms() + engine.config.session_sweep_interval_ms;
            engine.push_timer(first, TimerTask::SessionSweep);
        }
        engine
    }

    // ─── Event bus ───────────────────────────────────────────────

    /// Subscribe a handler to one event tag.
    pub fn subscribe<F>(&mut self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&EngineEvent) + 'static,
    {
        self.bus.subscribe(kind, handler)
    }

    /// Remove a subscription.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.bus.unsubscribe(id)
    }

    fn publish(&mut self, event: EngineEvent) {
        self.bus.publish(&event);
        self.stats.events_published += 1;
    }

    fn notify(
        &mut self,
        kind: NotificationKind,
        source: ActorId,
        targets: Vec<ActorId>,
        entity: Option<EntityRef>,
        message: String,
        priority: Priority,
    ) {
        let now = self.clock.now_ms();
        if let Some(notification) =
            self.notifications
                .dispatch(kind, source, targets, entity, message, priority, now)
        {
            self.stats.notifications_dispatched += 1;
            self.publish(EngineEvent::NotificationAdded { notification });
        }
    }

    fn note_activity(
        &mut self,
        kind: ActivityKind,
        actor: ActorId,
        entity: Option<EntityRef>,
        entity_name: impl Into<String>,
        description: impl Into<String>,
        detail: Option<ActivityDetail>,
    ) {
        let now = self.clock.now_ms();
        if let Some(event) =
            self.activity
                .record(kind, actor, entity, entity_name, description, detail, now)
        {
            self.publish(EngineEvent::ActivityAdded { event });
        }
    }

    // ─── Presence ────────────────────────────────────────────────

    /// Register a collaborator and announce the arrival.
    pub fn add_collaborator(&mut self, new: NewCollaborator) -> Result<Collaborator, EngineError> {
        if self.destroyed {
            return Err(EngineError::Destroyed);
        }
        let now = self.clock.now_ms();
        let collaborator = self.presence.add(new, now)?;
        let name = collaborator.display_name.clone();

        self.publish(EngineEvent::PresenceChanged {
            collaborator: collaborator.clone(),
        });
        self.note_activity(
            ActivityKind::Joined,
            collaborator.id,
            None,
            "workspace",
            format!("{name} joined"),
            Some(ActivityDetail::Presence {
                status: PresenceStatus::Online,
            }),
        );
        let others = self.presence.others(collaborator.id);
        self.notify(
            NotificationKind::UserJoined,
            collaborator.id,
            others,
            None,
            format!("{name} joined the workspace"),
            Priority::Low,
        );
        Ok(collaborator)
    }

    /// Remove a collaborator, ending every session they own. Unknown ids
    /// are a no-op.
    pub fn remove_collaborator(&mut self, id: ActorId) {
        if self.destroyed || !self.presence.contains(id) {
            return;
        }

        for session in self.sessions.end_for_actor(id) {
            self.publish(EngineEvent::SessionEnded { session });
        }

        let Some(gone) = self.presence.remove(id) else {
            return;
        };
        let name = gone.display_name.clone();

        self.publish(EngineEvent::PresenceChanged {
            collaborator: gone,
        });
        self.note_activity(
            ActivityKind::Left,
            id,
            None,
            "workspace",
            format!("{name} left"),
            Some(ActivityDetail::Presence {
                status: PresenceStatus::Offline,
            }),
        );
        let remaining = self.presence.others(id);
        self.notify(
            NotificationKind::UserLeft,
            id,
            remaining,
            None,
            format!("{name} left the workspace"),
            Priority::Low,
        );
    }

    /// Update an actor's location and/or status. Unknown ids are a no-op.
    pub fn update_presence(
        &mut self,
        id: ActorId,
        location: Option<Location>,
        status: Option<PresenceStatus>,
    ) {
        if self.destroyed {
            return;
        }
        let now = self.clock.now_ms();
        let cursors_enabled = self.config.cursors_enabled;
        if let Some(change) = self
            .presence
            .update(id, location, status, cursors_enabled, now)
        {
            if change.emit {
                self.publish(EngineEvent::PresenceChanged {
                    collaborator: change.collaborator,
                });
            }
        }
    }

    /// Roster snapshot, online first, most recently seen first.
    pub fn collaborators(&self) -> Vec<Collaborator> {
        self.presence.list()
    }

    pub fn collaborator(&self, id: ActorId) -> Option<Collaborator> {
        self.presence.get(id).cloned()
    }

    // ─── Updates & conflicts ─────────────────────────────────────

    /// Append an update to the log and run conflict detection.
    ///
    /// Returns the stored update (with flags as of detection time).
    pub fn record_update(&mut self, draft: NewUpdate) -> Result<Update, EngineError> {
        if self.destroyed {
            return Err(EngineError::Destroyed);
        }
        let now = self.clock.now_ms();
        let mut stored = self.updates.record(draft, now);
        self.stats.updates_recorded += 1;

        let matched = self
            .updates
            .find_conflicting(&stored, self.config.conflict_window_ms);

        if matched.is_empty() {
            self.publish(EngineEvent::UpdateRecorded {
                update: stored.clone(),
            });
            let actor_name = self.presence.display_name(stored.actor_id);
            let label = stored.entity.label();
            self.note_activity(
                ActivityKind::EntityUpdated,
                stored.actor_id,
                Some(stored.entity),
                label.clone(),
                format!("{actor_name} changed {} on {label}", stored.operation.path),
                Some(ActivityDetail::Update {
                    kind: stored.kind,
                    path: stored.operation.path.clone(),
                }),
            );
            return Ok(stored);
        }

        // Correlated rivals found: the matched set plus the trigger become
        // one conflict.
        let mut members = matched;
        members.push(stored.clone());
        let member_ids: Vec<String> = members.iter().map(|m| m.id.clone()).collect();
        self.updates.flag_conflicted(&member_ids);
        stored.conflict_flag = true;

        let conflict =
            self.conflicts
                .create(stored.entity, stored.operation.path.clone(), members, now);
        self.stats.conflicts_detected += 1;

        self.publish(EngineEvent::UpdateRecorded {
            update: stored.clone(),
        });
        self.publish(EngineEvent::ConflictDetected {
            conflict: conflict.clone(),
        });

        let label = conflict.entity.label();
        self.note_activity(
            ActivityKind::ConflictDetected,
            stored.actor_id,
            Some(conflict.entity),
            label.clone(),
            format!("Conflicting edits to {} on {label}", conflict.path),
            Some(ActivityDetail::Conflict {
                conflict_id: conflict.id.clone(),
                members: conflict.members.len(),
                strategy: None,
            }),
        );
        self.notify(
            NotificationKind::ConflictDetected,
            SYSTEM_ACTOR,
            conflict.actor_ids(),
            Some(conflict.entity),
            format!("Edit conflict on {} of {label}", conflict.path),
            Priority::High,
        );

        if self.config.auto_resolve_conflicts {
            let deadline = now + self.config.conflict_resolution_timeout_ms;
            self.arm_auto_resolve(&conflict.id, deadline);
        }

        Ok(stored)
    }

    /// Most-recent-first slice of the update log.
    pub fn recent_updates(&self, limit: usize) -> Vec<Update> {
        self.updates.recent(limit)
    }

    /// Resolve a conflict with the given strategy.
    ///
    /// Idempotent on already-resolved conflicts: the stored resolution is
    /// returned unchanged and nothing is emitted.
    pub fn resolve_conflict(
        &mut self,
        conflict_id: &str,
        strategy: ResolutionStrategy,
        actor: ActorId,
        payload: Option<ResolutionPayload>,
    ) -> Result<Conflict, EngineError> {
        if self.destroyed {
            return Err(EngineError::Destroyed);
        }
        let now = self.clock.now_ms();
        let payload = payload.unwrap_or_default();

        let outcome = match self
            .conflicts
            .resolve(conflict_id, strategy, actor, &payload, now)
        {
            Ok(outcome) => outcome,
            Err(ResolveError::UnknownConflict(id)) => {
                return Err(EngineError::UnknownConflict(id))
            }
            Err(ResolveError::MissingChoice) => return Err(EngineError::MissingChoice),
            // Conflicts are created with ≥2 members; an empty one means a
            // caller-constructed id collision, treat as unknown.
            Err(ResolveError::EmptyConflict) => {
                return Err(EngineError::UnknownConflict(conflict_id.to_string()))
            }
        };

        if !outcome.newly_resolved() {
            return Ok(outcome.into_conflict());
        }

        let conflict = outcome.into_conflict();
        self.stats.conflicts_resolved += 1;
        self.disarm_auto_resolve(conflict_id);
        self.updates.flag_resolved(&conflict.member_ids());

        self.publish(EngineEvent::ConflictResolved {
            conflict: conflict.clone(),
        });

        let resolver_name = if actor == SYSTEM_ACTOR {
            "system".to_string()
        } else {
            self.presence.display_name(actor)
        };
        let label = conflict.entity.label();
        self.note_activity(
            ActivityKind::ConflictResolved,
            actor,
            Some(conflict.entity),
            label.clone(),
            format!(
                "{resolver_name} resolved the conflict on {} of {label}",
                conflict.path
            ),
            Some(ActivityDetail::Conflict {
                conflict_id: conflict.id.clone(),
                members: conflict.members.len(),
                strategy: Some(strategy),
            }),
        );
        self.notify(
            NotificationKind::ConflictResolved,
            SYSTEM_ACTOR,
            conflict.actor_ids(),
            Some(conflict.entity),
            format!("Conflict on {} of {label} resolved", conflict.path),
            Priority::Medium,
        );

        Ok(conflict)
    }

    /// Preview a strategy's final value without committing. Pure.
    pub fn preview_resolution(
        &self,
        conflict_id: &str,
        strategy: ResolutionStrategy,
        payload: Option<&ResolutionPayload>,
    ) -> Option<Value> {
        let default = ResolutionPayload::default();
        self.conflicts
            .preview(conflict_id, strategy, payload.unwrap_or(&default))
    }

    pub fn conflict(&self, conflict_id: &str) -> Option<Conflict> {
        self.conflicts.get(conflict_id).cloned()
    }

    /// Every conflict ever detected, oldest first.
    pub fn conflicts(&self) -> Vec<Conflict> {
        self.conflicts.all()
    }

    /// Conflicts still awaiting resolution, oldest first.
    pub fn pending_conflicts(&self) -> Vec<Conflict> {
        self.conflicts.pending()
    }

    // ─── Live edit sessions ──────────────────────────────────────

    /// Start (or resume) a live-edit session on an entity field.
    pub fn start_editing(
        &mut self,
        entity: EntityRef,
        field: impl Into<String>,
        actor: ActorId,
    ) -> Option<LiveEditSession> {
        if self.destroyed {
            return None;
        }
        let now = self.clock.now_ms();
        let outcome = self.sessions.start(entity, field, actor, now);
        let fresh = outcome.is_fresh();
        let session = outcome.into_session();

        if fresh {
            self.publish(EngineEvent::SessionStarted {
                session: session.clone(),
            });
            let name = self.presence.display_name(actor);
            let label = entity.label();
            self.note_activity(
                ActivityKind::EditingStarted,
                actor,
                Some(entity),
                label.clone(),
                format!("{name} started editing {} on {label}", session.field),
                Some(ActivityDetail::Edit {
                    field: session.field.clone(),
                }),
            );
        } else {
            self.publish(EngineEvent::SessionUpdated {
                session: session.clone(),
            });
        }
        Some(session)
    }

    /// Refresh a session with optional draft content and cursor position.
    /// Unknown sessions are a silent no-op.
    pub fn heartbeat(&mut self, session_id: Uuid, draft: Option<String>, cursor: Option<u32>) {
        if self.destroyed {
            return;
        }
        let now = self.clock.now_ms();
        let cursor = if self.config.cursors_enabled {
            cursor
        } else {
            None
        };
        if let Some(session) = self.sessions.heartbeat(session_id, draft, cursor, now) {
            self.publish(EngineEvent::SessionUpdated { session });
        }
    }

    /// End a session. Unknown ids are a silent no-op.
    pub fn end_editing(&mut self, session_id: Uuid) {
        if self.destroyed {
            return;
        }
        if let Some(session) = self.sessions.end(session_id) {
            self.publish(EngineEvent::SessionEnded {
                session: session.clone(),
            });
            let name = self.presence.display_name(session.actor_id);
            let label = session.entity.label();
            self.note_activity(
                ActivityKind::EditingStopped,
                session.actor_id,
                Some(session.entity),
                label.clone(),
                format!("{name} stopped editing {} on {label}", session.field),
                Some(ActivityDetail::Edit {
                    field: session.field.clone(),
                }),
            );
        }
    }

    pub fn is_being_edited(&self, entity: EntityRef, field: &str) -> bool {
        self.sessions.is_being_edited(entity, field)
    }

    pub fn editors_of(&self, entity: EntityRef, field: &str) -> Vec<ActorId> {
        self.sessions.editors_of(entity, field)
    }

    /// Active sessions, optionally restricted to one entity.
    pub fn active_sessions(&self, entity: Option<EntityRef>) -> Vec<LiveEditSession> {
        self.sessions.list_active(entity)
    }

    // ─── Notifications ───────────────────────────────────────────

    /// Notifications targeting an actor, newest first.
    pub fn notifications_for(&self, actor: ActorId, limit: usize) -> Vec<Notification> {
        self.notifications.for_actor(actor, limit)
    }

    pub fn unread_count(&self, actor: ActorId) -> usize {
        self.notifications.unread_count(actor)
    }

    /// Mark a notification read for one recipient. Idempotent; unknown
    /// ids and non-target actors are silent no-ops.
    pub fn mark_notification_read(&mut self, id: Uuid, actor: ActorId) -> bool {
        if self.destroyed {
            return false;
        }
        let changed = self.notifications.mark_read(id, actor);
        if changed {
            self.publish(EngineEvent::NotificationUpdated { id, reader: actor });
        }
        changed
    }

    // ─── Activity ────────────────────────────────────────────────

    /// Newest-first activity entries matching the filter.
    pub fn activity(&self, limit: usize, filter: &ActivityFilter) -> Vec<ActivityEvent> {
        self.activity.query(limit, filter)
    }

    /// Newest-first activity entries, unfiltered.
    pub fn recent_activity(&self, limit: usize) -> Vec<ActivityEvent> {
        self.activity.recent(limit)
    }

    // ─── Timers ──────────────────────────────────────────────────

    /// Fire every due timer: auto-resolutions and staleness sweeps.
    ///
    /// Returns the number of timers fired. Safe to call at any cadence.
    pub fn poll_timers(&mut self) -> usize {
        if self.destroyed {
            return 0;
        }
        let now = self.clock.now_ms();
        let mut fired = 0;

        loop {
            match self.timers.peek() {
                Some(entry) if entry.deadline <= now => {}
                _ => break,
            }
            let Some(entry) = self.timers.pop() else {
                break;
            };
            fired += 1;
            self.stats.timers_fired += 1;

            match entry.task {
                TimerTask::AutoResolve { conflict_id } => {
                    // Stale entries (manually resolved, or re-armed) no
                    // longer match the armed generation.
                    if self.armed_auto.get(&conflict_id) != Some(&entry.seq) {
                        continue;
                    }
                    self.armed_auto.remove(&conflict_id);

                    let still_pending = self
                        .conflicts
                        .get(&conflict_id)
                        .map_or(false, |c| !c.is_resolved());
                    if !still_pending {
                        continue;
                    }
                    match self.resolve_conflict(
                        &conflict_id,
                        ResolutionStrategy::LastWriterWins,
                        SYSTEM_ACTOR,
                        None,
                    ) {
                        Ok(_) => self.stats.auto_resolutions += 1,
                        Err(err) => {
                            log::warn!("auto-resolve of {conflict_id} failed: {err}");
                        }
                    }
                }
                TimerTask::SessionSweep => {
                    for session in self.sessions.sweep_stale(now) {
                        let name = self.presence.display_name(session.actor_id);
                        let label = session.entity.label();
                        self.publish(EngineEvent::SessionEnded {
                            session: session.clone(),
                        });
                        self.note_activity(
                            ActivityKind::EditingStopped,
                            session.actor_id,
                            Some(session.entity),
                            label.clone(),
                            format!("{name} stopped editing {} on {label}", session.field),
                            Some(ActivityDetail::Edit {
                                field: session.field.clone(),
                            }),
                        );
                    }
                    if self.config.session_sweep_interval_ms > 0 {
                        let next = now + self.config.session_sweep_interval_ms;
                        self.push_timer(next, TimerTask::SessionSweep);
                    }
                }
            }
        }
        fired
    }

    /// Earliest pending deadline, for drivers that sleep until due work.
    pub fn next_timer_at(&self) -> Option<u64> {
        self.timers.peek().map(|e| e.deadline)
    }

    fn push_timer(&mut self, deadline: u64, task: TimerTask) -> u64 {
        self.timer_seq += 1;
        self.timers.push(TimerEntry {
            deadline,
            seq: self.timer_seq,
            task,
        });
        self.timer_seq
    }

    fn arm_auto_resolve(&mut self, conflict_id: &str, deadline: u64) {
        let seq = self.push_timer(
            deadline,
            TimerTask::AutoResolve {
                conflict_id: conflict_id.to_string(),
            },
        );
        self.armed_auto.insert(conflict_id.to_string(), seq);
    }

    fn disarm_auto_resolve(&mut self, conflict_id: &str) {
        self.armed_auto.remove(conflict_id);
    }

    // ─── Lifecycle & introspection ───────────────────────────────

    /// Tear down: cancel all timers, drop subscriptions, clear state.
    ///
    /// Subsequent mutating calls return [`EngineError::Destroyed`] or
    /// degrade to silent no-ops; queries return empty collections.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        self.timers.clear();
        self.armed_auto.clear();
        self.bus.clear();
        self.sessions.clear();
        self.presence.clear();
        self.notifications.clear();
        self.activity.clear();
        self.updates.clear();
        self.conflicts.clear();
        log::debug!("collab engine destroyed");
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Counter snapshot with live gauges filled in.
    pub fn stats(&self) -> EngineStats {
        let mut stats = self.stats.clone();
        stats.active_collaborators = self.presence.count();
        stats.active_sessions = self.sessions.active_count();
        stats
    }
}

impl std::fmt::Debug for CollabEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollabEngine")
            .field("collaborators", &self.presence.count())
            .field("updates", &self.updates.len())
            .field("conflicts", &self.conflicts.len())
            .field("sessions", &self.sessions.active_count())
            .field("destroyed", &self.destroyed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::presence::NewCollaborator;
    use crate::types::{EntityKind, Role};
    use crate::update_log::{Operation, UpdateKind};
    use serde_json::json;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn engine_at(start_ms: u64, config: EngineConfig) -> (CollabEngine, ManualClock) {
        let clock = ManualClock::new(start_ms);
        let engine = CollabEngine::with_clock(config, Arc::new(clock.clone()));
        (engine, clock)
    }

    fn join(engine: &mut CollabEngine, name: &str) -> ActorId {
        engine
            .add_collaborator(NewCollaborator::new(name, Role::Editor))
            .unwrap()
            .id
    }

    fn edit(entity: EntityRef, actor: ActorId, path: &str, value: Value) -> NewUpdate {
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

    // ── Configuration tests ──────────────────────────────────────

    #[test]
    fn test_config_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_collaborators, 50);
        assert_eq!(config.conflict_window_ms, 5_000);
        assert_eq!(config.conflict_resolution_timeout_ms, 30_000);
        assert!(!config.auto_resolve_conflicts);
        assert_eq!(config.update_log_cap, 100);
        assert_eq!(config.notification_cap, 50);
        assert_eq!(config.activity_cap, 100);
        assert!(config.cursors_enabled);
        assert!(config.activity_feed_enabled);
        assert_eq!(config.enabled_notifications.len(), 4);
    }

    // ── Orchestration tests ──────────────────────────────────────

    #[test]
    fn test_join_announces_to_others() {
        let (mut engine, _) = engine_at(1_000, EngineConfig::default());
        let alice = join(&mut engine, "Alice");
        let bob = join(&mut engine, "Bob");

        // Bob's join notified Alice, not Bob.
        assert_eq!(engine.unread_count(alice), 1);
        assert_eq!(engine.unread_count(bob), 0);

        let feed = engine.recent_activity(10);
        assert_eq!(feed.len(), 2);
        assert_eq!(feed[0].description, "Bob joined");
    }

    #[test]
    fn test_conflict_detection_wires_everything() {
        let (mut engine, clock) = engine_at(1_000, EngineConfig::default());
        let alice = join(&mut engine, "Alice");
        let bob = join(&mut engine, "Bob");
        let entity = task();

        let events: Rc<RefCell<Vec<EventKind>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = events.clone();
        engine.subscribe(EventKind::ConflictDetected, move |event| {
            sink.borrow_mut().push(event.kind());
        });

        engine
            .record_update(edit(entity, alice, "title", json!("from alice")))
            .unwrap();
        clock.advance(400);
        let second = engine
            .record_update(edit(entity, bob, "title", json!("from bob")))
            .unwrap();

        assert!(second.conflict_flag);
        assert_eq!(events.borrow().len(), 1);

        let pending = engine.pending_conflicts();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].members.len(), 2);

        // Both rivals were notified with high priority.
        let inbox = engine.notifications_for(alice, 10);
        assert!(inbox
            .iter()
            .any(|n| n.kind == NotificationKind::ConflictDetected
                && n.priority == Priority::High));
    }

    #[test]
    fn test_no_conflict_across_window() {
        let (mut engine, clock) = engine_at(1_000, EngineConfig::default());
        let alice = join(&mut engine, "Alice");
        let bob = join(&mut engine, "Bob");
        let entity = task();

        engine
            .record_update(edit(entity, alice, "title", json!("a")))
            .unwrap();
        clock.advance(6_000);
        engine
            .record_update(edit(entity, bob, "title", json!("b")))
            .unwrap();

        assert!(engine.pending_conflicts().is_empty());
    }

    #[test]
    fn test_resolve_emits_and_is_idempotent() {
        let (mut engine, clock) = engine_at(1_000, EngineConfig::default());
        let alice = join(&mut engine, "Alice");
        let bob = join(&mut engine, "Bob");
        let entity = task();

        engine
            .record_update(edit(entity, alice, "title", json!("a")))
            .unwrap();
        clock.advance(100);
        engine
            .record_update(edit(entity, bob, "title", json!("b")))
            .unwrap();

        let conflict_id = engine.pending_conflicts()[0].id.clone();
        clock.advance(1_000);
        let resolved = engine
            .resolve_conflict(&conflict_id, ResolutionStrategy::LastWriterWins, alice, None)
            .unwrap();
        assert_eq!(resolved.final_value, Some(json!("b")));
        assert_eq!(resolved.resolved_by, Some(alice));

        clock.advance(1_000);
        let again = engine
            .resolve_conflict(&conflict_id, ResolutionStrategy::FirstWriterWins, bob, None)
            .unwrap();
        assert_eq!(again.resolved_at, resolved.resolved_at);
        assert_eq!(again.final_value, resolved.final_value);
        assert_eq!(engine.stats().conflicts_resolved, 1);
    }

    #[test]
    fn test_resolved_members_do_not_rematch() {
        let (mut engine, clock) = engine_at(1_000, EngineConfig::default());
        let alice = join(&mut engine, "Alice");
        let bob = join(&mut engine, "Bob");
        let entity = task();

        engine
            .record_update(edit(entity, alice, "title", json!("a")))
            .unwrap();
        clock.advance(100);
        engine
            .record_update(edit(entity, bob, "title", json!("b")))
            .unwrap();
        let conflict_id = engine.pending_conflicts()[0].id.clone();
        engine
            .resolve_conflict(&conflict_id, ResolutionStrategy::LastWriterWins, alice, None)
            .unwrap();

        // A third in-window edit only correlates with the still-unresolved
        // rival, not the consumed members.
        clock.advance(100);
        let charlie = join(&mut engine, "Charlie");
        engine
            .record_update(edit(entity, charlie, "title", json!("c")))
            .unwrap();

        assert!(engine.pending_conflicts().is_empty());
        assert_eq!(engine.conflicts().len(), 1);
    }

    // ── Auto-resolve tests ───────────────────────────────────────

    fn auto_config() -> EngineConfig {
        EngineConfig {
            auto_resolve_conflicts: true,
            conflict_resolution_timeout_ms: 2_000,
            ..EngineConfig::default()
        }
    }

    #[test]
    fn test_auto_resolve_fires_when_pending() {
        let (mut engine, clock) = engine_at(1_000, auto_config());
        let alice = join(&mut engine, "Alice");
        let bob = join(&mut engine, "Bob");
        let entity = task();

        engine
            .record_update(edit(entity, alice, "title", json!("a")))
            .unwrap();
        clock.advance(100);
        engine
            .record_update(edit(entity, bob, "title", json!("b")))
            .unwrap();
        let conflict_id = engine.pending_conflicts()[0].id.clone();

        // Before the deadline: nothing fires.
        clock.advance(1_999);
        engine.poll_timers();
        assert_eq!(engine.pending_conflicts().len(), 1);

        clock.advance(1);
        engine.poll_timers();

        let conflict = engine.conflict(&conflict_id).unwrap();
        assert!(conflict.is_resolved());
        assert_eq!(conflict.resolved_by, Some(SYSTEM_ACTOR));
        assert_eq!(conflict.strategy, Some(ResolutionStrategy::LastWriterWins));
        assert_eq!(conflict.final_value, Some(json!("b")));
        assert_eq!(engine.stats().auto_resolutions, 1);
    }

    #[test]
    fn test_manual_resolution_disarms_auto_resolve() {
        let (mut engine, clock) = engine_at(1_000, auto_config());
        let alice = join(&mut engine, "Alice");
        let bob = join(&mut engine, "Bob");
        let entity = task();

        engine
            .record_update(edit(entity, alice, "title", json!("a")))
            .unwrap();
        clock.advance(100);
        engine
            .record_update(edit(entity, bob, "title", json!("b")))
            .unwrap();
        let conflict_id = engine.pending_conflicts()[0].id.clone();

        engine
            .resolve_conflict(&conflict_id, ResolutionStrategy::FirstWriterWins, alice, None)
            .unwrap();

        // The timer firing later neither double-resolves nor overrides.
        clock.advance(10_000);
        engine.poll_timers();

        let conflict = engine.conflict(&conflict_id).unwrap();
        assert_eq!(conflict.strategy, Some(ResolutionStrategy::FirstWriterWins));
        assert_eq!(conflict.resolved_by, Some(alice));
        assert_eq!(engine.stats().auto_resolutions, 0);
        assert_eq!(engine.stats().conflicts_resolved, 1);
    }

    // ── Session sweep tests ──────────────────────────────────────

    #[test]
    fn test_sweep_ends_idle_sessions_and_rearms() {
        let config = EngineConfig {
            session_ttl_ms: 5_000,
            session_sweep_interval_ms: 1_000,
            ..EngineConfig::default()
        };
        let (mut engine, clock) = engine_at(1_000, config);
        let alice = join(&mut engine, "Alice");
        let entity = task();

        engine.start_editing(entity, "title", alice).unwrap();
        assert!(engine.is_being_edited(entity, "title"));

        // First sweeps pass while the session is fresh.
        clock.advance(2_000);
        engine.poll_timers();
        assert!(engine.is_being_edited(entity, "title"));

        // Past the TTL the (re-armed) sweep ends it.
        clock.advance(5_000);
        engine.poll_timers();
        assert!(!engine.is_being_edited(entity, "title"));
        assert!(engine.next_timer_at().is_some()); // sweep re-armed
    }

    // ── Lifecycle tests ──────────────────────────────────────────

    #[test]
    fn test_remove_collaborator_cascades_sessions() {
        let (mut engine, _) = engine_at(1_000, EngineConfig::default());
        let alice = join(&mut engine, "Alice");
        let bob = join(&mut engine, "Bob");
        let entity = task();

        engine.start_editing(entity, "title", alice).unwrap();
        engine.start_editing(entity, "body", alice).unwrap();
        engine.start_editing(entity, "title", bob).unwrap();

        engine.remove_collaborator(alice);

        assert!(engine.collaborator(alice).is_none());
        let active = engine.active_sessions(None);
        assert_eq!(active.len(), 1);
        assert!(active.iter().all(|s| s.actor_id == bob));
    }

    #[test]
    fn test_destroy_cancels_everything() {
        let (mut engine, clock) = engine_at(1_000, auto_config());
        let alice = join(&mut engine, "Alice");
        let bob = join(&mut engine, "Bob");
        let entity = task();

        let events: Rc<RefCell<Vec<EventKind>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = events.clone();
        engine.subscribe(EventKind::PresenceChanged, move |event| {
            sink.borrow_mut().push(event.kind());
        });

        engine
            .record_update(edit(entity, alice, "title", json!("a")))
            .unwrap();
        engine
            .record_update(edit(entity, bob, "title", json!("b")))
            .unwrap();

        engine.destroy();
        assert!(engine.is_destroyed());
        assert!(engine.next_timer_at().is_none());

        // Mutations are rejected or silently dropped; queries are empty.
        assert_eq!(
            engine.add_collaborator(NewCollaborator::new("Eve", Role::Guest)),
            Err(EngineError::Destroyed)
        );
        assert!(matches!(
            engine.record_update(edit(entity, alice, "title", json!("x"))),
            Err(EngineError::Destroyed)
        ));
        assert!(engine.start_editing(entity, "title", alice).is_none());
        assert!(engine.collaborators().is_empty());
        assert!(engine.recent_updates(10).is_empty());
        assert!(engine.pending_conflicts().is_empty());

        let before = events.borrow().len();
        clock.advance(60_000);
        assert_eq!(engine.poll_timers(), 0);
        assert_eq!(events.borrow().len(), before);

        engine.destroy(); // second destroy: no-op
    }

    #[test]
    fn test_stats_snapshot() {
        let (mut engine, clock) = engine_at(1_000, EngineConfig::default());
        let alice = join(&mut engine, "Alice");
        let bob = join(&mut engine, "Bob");
        let entity = task();

        engine
            .record_update(edit(entity, alice, "title", json!("a")))
            .unwrap();
        clock.advance(50);
        engine
            .record_update(edit(entity, bob, "title", json!("b")))
            .unwrap();
        engine.start_editing(entity, "title", alice).unwrap();

        let stats = engine.stats();
        assert_eq!(stats.updates_recorded, 2);
        assert_eq!(stats.conflicts_detected, 1);
        assert_eq!(stats.active_collaborators, 2);
        assert_eq!(stats.active_sessions, 1);
        assert!(stats.notifications_dispatched >= 2);
        assert!(stats.events_published > 0);
    }
}
