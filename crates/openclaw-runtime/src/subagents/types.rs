//! Subagent lifecycle types.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use openclaw_core::config::CleanupPolicy;

use crate::gateway::OriginRef;

/// A running subagent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubagentContext {
    /// Globally unique run id, stable across restarts.
    pub run_id: String,
    pub child_session_key: String,
    pub requester_session_key: String,
    pub task: String,
    pub label: Option<String>,
    pub started_at_ms: u64,
    pub model: Option<String>,
    pub plan_mode: bool,
    /// Child-session cleanup after announce.
    pub cleanup: CleanupPolicy,
    /// Requester origin captured at spawn time; fresher than the session's
    /// stored routing fields.
    pub origin: OriginRef,
}

/// Terminal status of a subagent run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Ok,
    Error,
    Timeout,
    #[default]
    Unknown,
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            Self::Ok => "ok",
            Self::Error => "error",
            Self::Timeout => "timeout",
            Self::Unknown => "unknown",
        };
        f.write_str(tag)
    }
}

/// How a subagent run ended.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubagentOutcome {
    pub status: OutcomeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SubagentOutcome {
    pub const fn ok() -> Self {
        Self {
            status: OutcomeStatus::Ok,
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Error,
            error: Some(message.into()),
        }
    }

    pub const fn succeeded(&self) -> bool {
        matches!(self.status, OutcomeStatus::Ok)
    }
}

/// A finished subagent, retained until explicitly removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubagentResult {
    pub context: SubagentContext,
    pub ended_at_ms: Option<u64>,
    pub outcome: SubagentOutcome,
    pub summary: Option<String>,
    /// Whether the completion announce reached the parent.
    pub notified: bool,
    pub completed_at_ms: u64,
    pub plan_approved: Option<bool>,
}

/// A pre-registration hold on a concurrency/capacity slot.
#[derive(Debug, Clone)]
pub struct SubagentReservation {
    pub reserve_id: String,
    pub requester_session_key: String,
    pub reserved_at: Instant,
}

/// Durable registry record; running entries have no `ended_at`/`outcome`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SubagentRunRecord {
    pub run_id: String,
    pub child_session_key: String,
    pub requester_session_key: String,
    pub task: String,
    pub label: Option<String>,
    pub started_at: u64,
    pub model: Option<String>,
    pub plan_mode: bool,
    pub cleanup: CleanupPolicy,
    pub origin: OriginRef,
    pub ended_at: Option<u64>,
    pub outcome: Option<SubagentOutcome>,
    pub summary: Option<String>,
    pub notified: bool,
    pub completed_at: Option<u64>,
    pub plan_approved: Option<bool>,
    pub created_at: u64,
}

impl Default for SubagentRunRecord {
    fn default() -> Self {
        Self {
            run_id: String::new(),
            child_session_key: String::new(),
            requester_session_key: String::new(),
            task: String::new(),
            label: None,
            started_at: 0,
            model: None,
            plan_mode: false,
            cleanup: CleanupPolicy::Keep,
            origin: OriginRef::default(),
            ended_at: None,
            outcome: None,
            summary: None,
            notified: false,
            completed_at: None,
            plan_approved: None,
            created_at: 0,
        }
    }
}

impl SubagentRunRecord {
    pub fn from_running(ctx: &SubagentContext, created_at: u64) -> Self {
        Self {
            run_id: ctx.run_id.clone(),
            child_session_key: ctx.child_session_key.clone(),
            requester_session_key: ctx.requester_session_key.clone(),
            task: ctx.task.clone(),
            label: ctx.label.clone(),
            started_at: ctx.started_at_ms,
            model: ctx.model.clone(),
            plan_mode: ctx.plan_mode,
            cleanup: ctx.cleanup,
            origin: ctx.origin.clone(),
            created_at,
            ..Self::default()
        }
    }

    pub fn from_result(result: &SubagentResult, created_at: u64) -> Self {
        Self {
            ended_at: result.ended_at_ms,
            outcome: Some(result.outcome.clone()),
            summary: result.summary.clone(),
            notified: result.notified,
            completed_at: Some(result.completed_at_ms),
            plan_approved: result.plan_approved,
            ..Self::from_running(&result.context, created_at)
        }
    }

    pub fn context(&self) -> SubagentContext {
        SubagentContext {
            run_id: self.run_id.clone(),
            child_session_key: self.child_session_key.clone(),
            requester_session_key: self.requester_session_key.clone(),
            task: self.task.clone(),
            label: self.label.clone(),
            started_at_ms: self.started_at,
            model: self.model.clone(),
            plan_mode: self.plan_mode,
            cleanup: self.cleanup,
            origin: self.origin.clone(),
        }
    }
}

/// Why admission was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    Concurrency,
    Capacity,
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Concurrency => f.write_str("concurrency"),
            Self::Capacity => f.write_str("capacity"),
        }
    }
}

/// Result of a slot reservation attempt. Denials are structured results,
/// never errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReserveOutcome {
    Allowed {
        reserve_id: String,
    },
    Denied {
        reason: DenyReason,
        /// For capacity denials: run ids of the oldest completed subagents
        /// the caller may remove.
        suggestions: Vec<String>,
    },
}

/// Errors from `register`.
#[derive(Debug, Error)]
pub enum RegisterError {
    #[error("Reservation {reserve_id} not found, expired, or owned by another session")]
    UnknownReservation { reserve_id: String },
}

/// Errors from `remove`.
#[derive(Debug, Error)]
pub enum RemoveError {
    #[error("Subagent {run_id} is still running")]
    StillRunning { run_id: String },

    #[error("Subagent {run_id} belongs to another session")]
    PermissionDenied { run_id: String },

    #[error("Subagent {run_id} not found")]
    NotFound { run_id: String },
}
