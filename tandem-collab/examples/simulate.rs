//! Simulation driver: three actors hammering the same task title.
//!
//! The engine itself is purely reactive; this harness plays the role of
//! the embedding application — it owns the runtime, submits updates and
//! heartbeats through the public API, and drains the timer queue on a
//! fixed cadence.
//!
//! Run with: `cargo run --example simulate`

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use uuid::Uuid;

use tandem_collab::{
    CollabEngine, EngineConfig, EntityKind, EntityRef, EventKind, NewCollaborator, NewUpdate,
    Operation, Role, SystemClock, UpdateKind,
};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let config = EngineConfig {
        auto_resolve_conflicts: true,
        conflict_resolution_timeout_ms: 2_000,
        session_ttl_ms: 3_000,
        session_sweep_interval_ms: 500,
        ..EngineConfig::default()
    };
    let mut engine = CollabEngine::with_clock(config, Arc::new(SystemClock));

    engine.subscribe(EventKind::ConflictDetected, |event| {
        if let tandem_collab::EngineEvent::ConflictDetected { conflict } = event {
            println!(
                "!! conflict {} on {} ({} members)",
                conflict.id,
                conflict.path,
                conflict.members.len()
            );
        }
    });
    engine.subscribe(EventKind::ConflictResolved, |event| {
        if let tandem_collab::EngineEvent::ConflictResolved { conflict } = event {
            println!(
                "   resolved {} -> {:?} (by {:?})",
                conflict.id, conflict.final_value, conflict.resolved_by
            );
        }
    });

    let actors: Vec<_> = ["Alice", "Bob", "Carol"]
        .iter()
        .map(|name| {
            engine
                .add_collaborator(NewCollaborator::new(*name, Role::Editor))
                .expect("fresh roster")
                .id
        })
        .collect();

    let task = EntityRef::new(EntityKind::Task, Uuid::new_v4());

    // Everyone opens an editing session on the same field — exactly the
    // concurrency the detector exists for.
    let sessions: Vec<_> = actors
        .iter()
        .map(|actor| {
            engine
                .start_editing(task, "title", *actor)
                .expect("engine is live")
                .id
        })
        .collect();

    let mut tick = tokio::time::interval(Duration::from_millis(250));
    for round in 0..20u32 {
        tick.tick().await;

        // Each actor types; every fourth round they all commit a title
        // change nearly simultaneously.
        for (i, actor) in actors.iter().enumerate() {
            engine.heartbeat(
                sessions[i],
                Some(format!("draft {round} by actor {i}")),
                Some(round * 3 + i as u32),
            );
            if round % 4 == 3 {
                engine
                    .record_update(NewUpdate {
                        kind: UpdateKind::ContentEdit,
                        entity: task,
                        actor_id: *actor,
                        operation: Operation::replace(
                            "title",
                            json!(format!("Title r{round} a{i}")),
                            None,
                        ),
                    })
                    .expect("engine is live");
            }
        }

        engine.poll_timers();
    }

    // Let the pending auto-resolve deadlines pass, then drain them.
    tokio::time::sleep(Duration::from_millis(2_500)).await;
    engine.poll_timers();

    let stats = engine.stats();
    println!("--");
    println!("updates recorded        {}", stats.updates_recorded);
    println!("conflicts detected      {}", stats.conflicts_detected);
    println!("conflicts resolved      {}", stats.conflicts_resolved);
    println!("  of which automatic    {}", stats.auto_resolutions);
    println!("notifications sent      {}", stats.notifications_dispatched);
    println!("events published        {}", stats.events_published);

    for entry in engine.recent_activity(8) {
        println!("feed: {}", entry.description);
    }

    engine.destroy();
}
