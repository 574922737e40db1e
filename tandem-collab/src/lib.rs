//! # tandem-collab — Collaborative update & conflict-resolution engine
//!
//! Tracks concurrent actors editing shared Tandem entities, detects when
//! two or more actors touch the same field within a short time window,
//! resolves those conflicts under a configurable strategy, tracks
//! ephemeral live-editing sessions, and fans out bounded notification and
//! activity streams to observers.
//!
//! ## Architecture
//!
//! ```text
//! record_update()
//!       │
//!       ▼
//! ┌────────────┐  same field, other actor,  ┌───────────────┐
//! │ UpdateLog  │ ─────── within W ────────► │ ConflictBook  │
//! │ (ring 100) │                            │ Pending→Resolved │
//! └─────┬──────┘                            └──────┬────────┘
//!       │                                          │
//!       ▼                                          ▼
//! ┌─────────────────────────────────────────────────────┐
//! │                      EventBus                        │
//! │  PresenceChanged · ConflictDetected · Session* · …   │
//! └───────┬─────────────────┬────────────────┬──────────┘
//!         ▼                 ▼                ▼
//!  PresenceRegistry  NotificationCenter  ActivityFeed
//!  (roster, status)  (targeted, cap 50)  (ring, cap 100)
//! ```
//!
//! ## Modules
//!
//! - [`engine`] — `CollabEngine` facade: config, orchestration, timers
//! - [`bus`] — closed-enum synchronous pub/sub
//! - [`presence`] — collaborator roster and locations
//! - [`update_log`] — bounded update ring + conflict detection
//! - [`conflict`] — conflict lifecycle and resolution strategies
//! - [`session`] — live-edit sessions with heartbeats and TTL sweep
//! - [`notify`] — targeted, priority-tagged notifications
//! - [`activity`] — bounded human-readable feed
//! - [`clock`] — injectable millisecond time source
//!
//! The engine is a single-owner, synchronous value: construct with
//! [`EngineConfig`], call operations, subscribe for change events, and
//! call [`CollabEngine::destroy`] on teardown. Deferred work (conflict
//! auto-resolution, session staleness sweeps) sits in an internal
//! deadline queue drained by [`CollabEngine::poll_timers`] — drivers
//! decide the cadence (see `examples/simulate.rs`).

pub mod activity;
pub mod bus;
pub mod clock;
pub mod conflict;
pub mod engine;
pub mod notify;
pub mod presence;
pub mod session;
pub mod types;
pub mod update_log;

// Re-exports for convenience
pub use activity::{ActivityDetail, ActivityEvent, ActivityFeed, ActivityFilter, ActivityKind};
pub use bus::{EngineEvent, EventBus, EventKind, SubscriptionId};
pub use clock::{Clock, ManualClock, SystemClock};
pub use conflict::{
    Conflict, ConflictBook, ConflictState, ResolutionPayload, ResolutionStrategy, ResolveError,
    ResolveOutcome,
};
pub use engine::{CollabEngine, EngineConfig, EngineError, EngineStats};
pub use notify::{Notification, NotificationCenter, NotificationKind, Priority};
pub use presence::{Collaborator, NewCollaborator, PresenceChange, PresenceRegistry, RosterError};
pub use session::{EditTracker, LiveEditSession, StartOutcome};
pub use types::{
    color_tag, ActorId, EntityKind, EntityRef, Location, PresenceStatus, Role, SYSTEM_ACTOR,
};
pub use update_log::{NewUpdate, OpKind, Operation, Update, UpdateKind, UpdateLog};
