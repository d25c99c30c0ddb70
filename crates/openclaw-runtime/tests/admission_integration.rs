//! End-to-end admission control scenarios against the public API.

#![allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use openclaw_core::config::CleanupPolicy;
use openclaw_runtime::events::EventBus;
use openclaw_runtime::gateway::OriginRef;
use openclaw_runtime::subagents::{
    DenyReason, ReserveOutcome, SubagentContext, SubagentLimits, SubagentManager, SubagentOutcome,
    SubagentRegistry,
};

fn manager(dir: &TempDir, limits: SubagentLimits) -> SubagentManager {
    SubagentManager::new(
        limits,
        SubagentRegistry::new(dir.path().join("registry.json")),
        EventBus::default(),
    )
}

fn context(run_id: &str, requester: &str) -> SubagentContext {
    SubagentContext {
        run_id: run_id.to_string(),
        child_session_key: format!("subagent:{run_id}"),
        requester_session_key: requester.to_string(),
        task: format!("task {run_id}"),
        label: None,
        started_at_ms: 1,
        model: None,
        plan_mode: false,
        cleanup: CleanupPolicy::Keep,
        origin: OriginRef::default(),
    }
}

fn spawn_one(manager: &SubagentManager, run_id: &str, requester: &str) {
    let ReserveOutcome::Allowed { reserve_id } = manager.reserve_slot(requester) else {
        panic!("no slot for {run_id}");
    };
    manager.register(context(run_id, requester), &reserve_id).unwrap();
}

// Session with five running subagents: reservation denied, freed by one
// completion, and a leaked reservation is reclaimed automatically.
#[tokio::test]
async fn admission_saturation_cycle() {
    let dir = TempDir::new().unwrap();
    let manager = Arc::new(manager(
        &dir,
        SubagentLimits {
            reservation_ttl: Duration::from_millis(120),
            ..SubagentLimits::default()
        },
    ));
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let gc = manager.spawn_reservation_gc(shutdown_rx);

    for i in 0..5 {
        spawn_one(&manager, &format!("r{i}"), "S");
    }

    let denied = manager.reserve_slot("S");
    match denied {
        ReserveOutcome::Denied { reason, .. } => {
            assert_eq!(reason, DenyReason::Concurrency);
            assert!(reason.to_string().contains("concurrency"));
        }
        ReserveOutcome::Allowed { .. } => panic!("sixth slot must be denied"),
    }

    manager.mark_completed("r0", SubagentOutcome::ok(), None, None);
    let ReserveOutcome::Allowed { reserve_id } = manager.reserve_slot("S") else {
        panic!("slot must free after completion");
    };
    assert!(!reserve_id.is_empty());

    // Leak the reservation: never register it. The background GC reclaims
    // the slot after the TTL.
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(manager.counts_for("S").reserved, 0);
    assert!(matches!(manager.reserve_slot("S"), ReserveOutcome::Allowed { .. }));

    shutdown_tx.send(true).unwrap();
    gc.await.unwrap();
}

// Session at the retained cap: denial carries the three oldest completed
// run ids as removal suggestions.
#[tokio::test]
async fn capacity_denial_with_suggestions() {
    let dir = TempDir::new().unwrap();
    let manager = manager(&dir, SubagentLimits::default());

    for i in 0..14 {
        let run_id = format!("c{i:02}");
        spawn_one(&manager, &run_id, "S");
        manager.mark_completed(&run_id, SubagentOutcome::ok(), None, None);
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    spawn_one(&manager, "live", "S");

    let denied = manager.reserve_slot("S");
    let ReserveOutcome::Denied { reason, suggestions } = denied else {
        panic!("sixteenth record must be denied");
    };
    assert_eq!(reason, DenyReason::Capacity);
    assert_eq!(suggestions, vec!["c00", "c01", "c02"]);

    // Removing a suggested record frees capacity.
    manager.remove("c00", "S").unwrap();
    assert!(matches!(manager.reserve_slot("S"), ReserveOutcome::Allowed { .. }));
}

// Two sessions never share budgets.
#[tokio::test]
async fn budgets_are_per_session() {
    let dir = TempDir::new().unwrap();
    let manager = manager(&dir, SubagentLimits::default());

    for i in 0..5 {
        spawn_one(&manager, &format!("a{i}"), "S");
    }
    assert!(matches!(
        manager.reserve_slot("S"),
        ReserveOutcome::Denied { .. }
    ));

    for i in 0..5 {
        spawn_one(&manager, &format!("b{i}"), "T");
    }
    let counts = manager.counts_for("T");
    assert_eq!(counts.running, 5);
}

// The invariant `running + completed + reserved <= 15` holds through a
// mixed workload.
#[tokio::test]
async fn retained_invariant_holds() {
    let dir = TempDir::new().unwrap();
    let manager = manager(&dir, SubagentLimits::default());

    let mut spawned = 0;
    for round in 0..30 {
        match manager.reserve_slot("S") {
            ReserveOutcome::Allowed { reserve_id } => {
                let run_id = format!("run{round}");
                manager.register(context(&run_id, "S"), &reserve_id).unwrap();
                spawned += 1;
                if round % 2 == 0 {
                    manager.mark_completed(&run_id, SubagentOutcome::ok(), None, None);
                }
            }
            ReserveOutcome::Denied { .. } => {}
        }
        let counts = manager.counts_for("S");
        assert!(counts.running + counts.reserved <= 5, "round {round}: {counts:?}");
        assert!(
            counts.running + counts.completed + counts.reserved <= 15,
            "round {round}: {counts:?}"
        );
    }
    assert!(spawned > 0);
}
