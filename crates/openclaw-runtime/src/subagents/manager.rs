//! Subagent lifecycle manager.
//!
//! [`SubagentManager`] is the admission controller and lifecycle tracker for
//! background child runs:
//! - atomic slot reservation against two budgets (concurrent and retained)
//! - registration, completion, and explicit removal
//! - reservation garbage collection (leaked slots die after the TTL)
//! - durable registry persistence and restart restore
//!
//! The `(running, completed, reserved)` triple is one logical resource
//! guarded by a single mutex; every operation on it is a short synchronous
//! critical section.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use openclaw_core::config::LimitsConfig;
use openclaw_core::text::truncate_str;

use crate::clock::now_ms;
use crate::dispatch::CoalescedHeartbeat;
use crate::events::{AgentEvent, EventBus};

use super::registry::SubagentRegistry;
use super::types::{
    DenyReason, RegisterError, RemoveError, ReserveOutcome, SubagentContext, SubagentOutcome,
    SubagentReservation, SubagentResult, SubagentRunRecord,
};

/// Capacity-denial suggestions: how many removable run ids to offer.
const CAPACITY_SUGGESTIONS: usize = 3;

/// Admission budgets and reservation TTL.
#[derive(Debug, Clone)]
pub struct SubagentLimits {
    /// Running + reserved allowed per requester session.
    pub max_concurrent: usize,
    /// Running + completed + reserved retained per requester session.
    pub max_retained: usize,
    pub reservation_ttl: Duration,
}

impl Default for SubagentLimits {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            max_retained: 15,
            reservation_ttl: Duration::from_secs(30),
        }
    }
}

impl From<&LimitsConfig> for SubagentLimits {
    fn from(limits: &LimitsConfig) -> Self {
        Self {
            max_concurrent: limits.max_concurrent_subagents,
            max_retained: limits.max_retained_subagents,
            reservation_ttl: Duration::from_secs(limits.reservation_ttl_secs),
        }
    }
}

/// Per-session occupancy snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionCounts {
    pub running: usize,
    pub completed: usize,
    pub reserved: usize,
}

#[derive(Default)]
struct State {
    running: HashMap<String, SubagentContext>,
    completed: HashMap<String, SubagentResult>,
    reserved: HashMap<String, SubagentReservation>,
}

impl State {
    fn counts_for(&self, session_key: &str) -> SessionCounts {
        SessionCounts {
            running: self
                .running
                .values()
                .filter(|c| c.requester_session_key == session_key)
                .count(),
            completed: self
                .completed
                .values()
                .filter(|r| r.context.requester_session_key == session_key)
                .count(),
            reserved: self
                .reserved
                .values()
                .filter(|r| r.requester_session_key == session_key)
                .count(),
        }
    }

    fn gc_reservations(&mut self, ttl: Duration) -> usize {
        let before = self.reserved.len();
        self.reserved.retain(|_, r| r.reserved_at.elapsed() <= ttl);
        before - self.reserved.len()
    }

    fn records(&self) -> Vec<SubagentRunRecord> {
        let created_at = now_ms();
        let mut records: Vec<SubagentRunRecord> = self
            .running
            .values()
            .map(|ctx| SubagentRunRecord::from_running(ctx, created_at))
            .chain(
                self.completed
                    .values()
                    .map(|res| SubagentRunRecord::from_result(res, created_at)),
            )
            .collect();
        records.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        records
    }
}

/// Admission control, lifecycle state, and durable registry for subagents.
pub struct SubagentManager {
    limits: SubagentLimits,
    state: Mutex<State>,
    registry: SubagentRegistry,
    bus: EventBus,
    heartbeat: Option<Arc<CoalescedHeartbeat>>,
}

impl SubagentManager {
    pub fn new(limits: SubagentLimits, registry: SubagentRegistry, bus: EventBus) -> Self {
        Self {
            limits,
            state: Mutex::new(State::default()),
            registry,
            bus,
            heartbeat: None,
        }
    }

    /// Attach the dispatcher heartbeat used to wake parents on completion.
    pub fn with_heartbeat(mut self, heartbeat: Arc<CoalescedHeartbeat>) -> Self {
        self.heartbeat = Some(heartbeat);
        self
    }

    pub const fn limits(&self) -> &SubagentLimits {
        &self.limits
    }

    /// Restore state from the durable registry at startup.
    ///
    /// Finished records land in `completed` with `notified = true` so a
    /// restart never re-announces old runs; records without an outcome are
    /// still running (the child process owns its own session) and go back
    /// under observation.
    pub fn load_registry(&self) -> usize {
        let records = self.registry.load();
        let count = records.len();
        for record in records {
            self.sync_from_record(record);
        }
        if count > 0 {
            info!(count, "Restored subagent registry");
        }
        count
    }

    /// Merge one durable record into the live maps.
    pub fn sync_from_record(&self, record: SubagentRunRecord) {
        let mut state = self.state.lock();
        if let (Some(ended_at), Some(outcome)) = (record.ended_at, record.outcome.clone()) {
            let result = SubagentResult {
                context: record.context(),
                ended_at_ms: Some(ended_at),
                outcome,
                summary: record.summary.clone(),
                notified: true,
                completed_at_ms: record.completed_at.unwrap_or(ended_at),
                plan_approved: record.plan_approved,
            };
            state.completed.insert(record.run_id.clone(), result);
        } else {
            state
                .running
                .insert(record.run_id.clone(), record.context());
        }
    }

    /// Atomic admission check and slot reservation.
    pub fn reserve_slot(&self, requester_session_key: &str) -> ReserveOutcome {
        let mut state = self.state.lock();
        state.gc_reservations(self.limits.reservation_ttl);

        let counts = state.counts_for(requester_session_key);
        if counts.running + counts.reserved >= self.limits.max_concurrent {
            debug!(
                session_key = requester_session_key,
                running = counts.running,
                reserved = counts.reserved,
                "Subagent admission denied: concurrency"
            );
            return ReserveOutcome::Denied {
                reason: DenyReason::Concurrency,
                suggestions: Vec::new(),
            };
        }

        if counts.running + counts.completed + counts.reserved >= self.limits.max_retained {
            let mut finished: Vec<&SubagentResult> = state
                .completed
                .values()
                .filter(|r| r.context.requester_session_key == requester_session_key)
                .collect();
            finished.sort_by_key(|r| r.completed_at_ms);
            let suggestions = finished
                .iter()
                .take(CAPACITY_SUGGESTIONS)
                .map(|r| r.context.run_id.clone())
                .collect();
            debug!(
                session_key = requester_session_key,
                "Subagent admission denied: capacity"
            );
            return ReserveOutcome::Denied {
                reason: DenyReason::Capacity,
                suggestions,
            };
        }

        let reserve_id = Uuid::new_v4().to_string();
        state.reserved.insert(
            reserve_id.clone(),
            SubagentReservation {
                reserve_id: reserve_id.clone(),
                requester_session_key: requester_session_key.to_string(),
                reserved_at: std::time::Instant::now(),
            },
        );
        ReserveOutcome::Allowed { reserve_id }
    }

    /// Consume a reservation and start tracking the child as running.
    pub fn register(&self, context: SubagentContext, reserve_id: &str) -> Result<(), RegisterError> {
        let event = {
            let mut state = self.state.lock();
            let Some(reservation) = state.reserved.remove(reserve_id) else {
                return Err(RegisterError::UnknownReservation {
                    reserve_id: reserve_id.to_string(),
                });
            };
            if reservation.reserved_at.elapsed() > self.limits.reservation_ttl {
                // The slot already lapsed; do not resurrect it.
                return Err(RegisterError::UnknownReservation {
                    reserve_id: reserve_id.to_string(),
                });
            }
            if reservation.requester_session_key != context.requester_session_key {
                // Not ours: put it back and reject.
                state.reserved.insert(reserve_id.to_string(), reservation);
                return Err(RegisterError::UnknownReservation {
                    reserve_id: reserve_id.to_string(),
                });
            }

            let event = AgentEvent::SubagentSpawned {
                run_id: context.run_id.clone(),
                requester_session_key: context.requester_session_key.clone(),
                child_session_key: context.child_session_key.clone(),
                task: context.task.clone(),
                at_ms: now_ms(),
            };
            state.running.insert(context.run_id.clone(), context);
            self.registry.save(&state.records());
            event
        };
        self.bus.publish(event);
        Ok(())
    }

    /// Move a running subagent to `completed`.
    ///
    /// No-op for unknown run ids (late or duplicate completion signals).
    /// The announce flow is driven by the registry listener, not here.
    pub fn mark_completed(
        &self,
        run_id: &str,
        outcome: SubagentOutcome,
        summary: Option<String>,
        ended_at_ms: Option<u64>,
    ) {
        let event = {
            let mut state = self.state.lock();
            let Some(context) = state.running.remove(run_id) else {
                debug!(run_id, "Completion for unknown run ignored");
                return;
            };
            let now = now_ms();
            let event = AgentEvent::SubagentCompleted {
                run_id: run_id.to_string(),
                requester_session_key: context.requester_session_key.clone(),
                outcome: outcome.clone(),
                at_ms: now,
            };
            state.completed.insert(
                run_id.to_string(),
                SubagentResult {
                    context,
                    ended_at_ms: Some(ended_at_ms.unwrap_or(now)),
                    outcome,
                    summary,
                    notified: false,
                    completed_at_ms: now,
                    plan_approved: None,
                },
            );
            self.registry.save(&state.records());
            event
        };
        self.bus.publish(event);
        // Wake the parent's dispatcher promptly; bursts coalesce.
        if let Some(heartbeat) = &self.heartbeat {
            heartbeat.request();
        }
    }

    /// Remove a completed subagent. Running subagents cannot be removed,
    /// and sessions cannot remove each other's records.
    pub fn remove(&self, run_id: &str, requester_session_key: &str) -> Result<(), RemoveError> {
        let mut state = self.state.lock();
        if state.running.contains_key(run_id) {
            return Err(RemoveError::StillRunning {
                run_id: run_id.to_string(),
            });
        }
        let Some(result) = state.completed.get(run_id) else {
            return Err(RemoveError::NotFound {
                run_id: run_id.to_string(),
            });
        };
        if result.context.requester_session_key != requester_session_key {
            warn!(
                run_id,
                requester = requester_session_key,
                owner = %result.context.requester_session_key,
                "Cross-session subagent removal denied"
            );
            return Err(RemoveError::PermissionDenied {
                run_id: run_id.to_string(),
            });
        }

        state.completed.remove(run_id);
        self.registry.save(&state.records());
        Ok(())
    }

    /// Drop reservations older than the TTL. Returns how many died.
    pub fn gc_reservations(&self) -> usize {
        let reclaimed = self.state.lock().gc_reservations(self.limits.reservation_ttl);
        if reclaimed > 0 {
            debug!(reclaimed, "Reclaimed expired subagent reservations");
        }
        reclaimed
    }

    /// Background reservation GC, stopped via the shutdown channel.
    pub fn spawn_reservation_gc(
        self: &Arc<Self>,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        let period = (manager.limits.reservation_ttl / 3)
            .clamp(Duration::from_millis(50), Duration::from_secs(10));
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(period);
            timer.tick().await;
            loop {
                tokio::select! {
                    _ = timer.tick() => {
                        manager.gc_reservations();
                    }
                    _ = shutdown.changed() => {
                        debug!("Reservation GC shutting down");
                        return;
                    }
                }
            }
        })
    }

    /// Record that the announce flow delivered (or gave up on) a child.
    pub fn record_announced(&self, run_id: &str, summary: Option<String>) {
        let mut state = self.state.lock();
        if let Some(result) = state.completed.get_mut(run_id) {
            result.notified = true;
            if summary.is_some() {
                result.summary = summary;
            }
            self.registry.save(&state.records());
        }
    }

    /// Backfill run timestamps learned from `agent.wait`.
    pub fn update_run_times(&self, run_id: &str, started_at: Option<u64>, ended_at: Option<u64>) {
        let mut state = self.state.lock();
        if let Some(result) = state.completed.get_mut(run_id) {
            if let Some(started) = started_at
                && result.context.started_at_ms == 0
            {
                result.context.started_at_ms = started;
            }
            if let Some(ended) = ended_at
                && result.ended_at_ms.is_none()
            {
                result.ended_at_ms = Some(ended);
            }
            self.registry.save(&state.records());
        }
    }

    /// Mark a plan-mode child approved or rejected.
    pub fn set_plan_approved(&self, run_id: &str, approved: bool) {
        let mut state = self.state.lock();
        if let Some(result) = state.completed.get_mut(run_id) {
            result.plan_approved = Some(approved);
            self.registry.save(&state.records());
        }
    }

    pub fn get_result(&self, run_id: &str) -> Option<SubagentResult> {
        self.state.lock().completed.get(run_id).cloned()
    }

    pub fn get_running(&self, run_id: &str) -> Option<SubagentContext> {
        self.state.lock().running.get(run_id).cloned()
    }

    pub fn counts_for(&self, session_key: &str) -> SessionCounts {
        self.state.lock().counts_for(session_key)
    }

    /// Running and completed subagents of a session, newest first.
    pub fn list_for_session(&self, session_key: &str) -> (Vec<SubagentContext>, Vec<SubagentResult>) {
        let state = self.state.lock();
        let mut running: Vec<SubagentContext> = state
            .running
            .values()
            .filter(|c| c.requester_session_key == session_key)
            .cloned()
            .collect();
        running.sort_by_key(|c| std::cmp::Reverse(c.started_at_ms));
        let mut completed: Vec<SubagentResult> = state
            .completed
            .values()
            .filter(|r| r.context.requester_session_key == session_key)
            .cloned()
            .collect();
        completed.sort_by_key(|r| std::cmp::Reverse(r.completed_at_ms));
        (running, completed)
    }

    /// Markdown status block injected into the parent's prompt. Empty when
    /// the session has no subagents.
    pub fn status_text(&self, session_key: &str) -> String {
        let (running, completed) = self.list_for_session(session_key);
        if running.is_empty() && completed.is_empty() {
            return String::new();
        }

        let used = running.len() + completed.len();
        let mut text = format!("Subagents ({used}/{}):\n", self.limits.max_retained);
        for ctx in &running {
            let plan = if ctx.plan_mode { " [PLAN]" } else { "" };
            let _ = writeln!(text, "- {} {} — running{plan}", short_id(&ctx.run_id), display_name(ctx));
        }
        for result in &completed {
            let plan = if result.context.plan_mode {
                match result.plan_approved {
                    Some(true) => " [PLAN:APPROVED]",
                    None if result.outcome.succeeded() => " [PLAN:AWAITING APPROVAL]",
                    _ => " [PLAN]",
                }
            } else {
                ""
            };
            let _ = writeln!(
                text,
                "- {} {} — {}{plan}",
                short_id(&result.context.run_id),
                display_name(&result.context),
                result.outcome.status,
            );
        }
        text
    }
}

fn short_id(run_id: &str) -> &str {
    truncate_str(run_id, 8)
}

fn display_name(ctx: &SubagentContext) -> &str {
    ctx.label
        .as_deref()
        .unwrap_or_else(|| truncate_str(&ctx.task, 50))
}
