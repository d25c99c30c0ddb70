//! Tool surface exposed to LLM runs for managing subagents and sessions.
//!
//! Schemas use plain string/number/bool/array/object types only; several
//! chat backends reject union schemas. Admission denials and permission
//! errors are structured tool results, never errors.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::warn;
use uuid::Uuid;

use openclaw_core::config::CleanupPolicy;

use crate::clock::now_ms;
use crate::gateway::{AgentParams, GatewayClient, OriginRef};

use super::manager::SubagentManager;
use super::types::{ReserveOutcome, SubagentContext, SubagentOutcome};

/// Arguments of the `sessions_spawn` tool.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpawnArgs {
    pub task: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub plan_mode: bool,
    #[serde(default)]
    pub cleanup: Option<CleanupPolicy>,
    #[serde(default)]
    pub model: Option<String>,
}

/// JSON schema for `sessions_spawn`.
pub fn sessions_spawn_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "task": { "type": "string", "description": "What the subagent should do" },
            "label": { "type": "string", "description": "Short display label" },
            "planMode": { "type": "boolean", "description": "Plan first and wait for approval" },
            "cleanup": { "type": "string", "description": "keep or delete the child session after announce" },
            "model": { "type": "string", "description": "Model override for the child" }
        },
        "required": ["task"]
    })
}

/// JSON schema for `sessions_subagent_remove`.
pub fn sessions_subagent_remove_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "runId": { "type": "string", "description": "Run id of a completed subagent" }
        },
        "required": ["runId"]
    })
}

/// JSON schema for `sessions_list`.
pub fn sessions_list_schema() -> Value {
    json!({ "type": "object", "properties": {} })
}

/// JSON schema for `sessions_history`.
pub fn sessions_history_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "sessionKey": { "type": "string" }
        },
        "required": ["sessionKey"]
    })
}

/// JSON schema for `sessions_send`.
pub fn sessions_send_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "sessionKey": { "type": "string" },
            "message": { "type": "string" }
        },
        "required": ["sessionKey", "message"]
    })
}

/// Handlers behind the sessions tool surface.
pub struct SubagentTools {
    manager: Arc<SubagentManager>,
    gateway: GatewayClient,
    /// Directory holding per-session transcripts, for `sessions_history`.
    transcript_dir: PathBuf,
    default_cleanup: CleanupPolicy,
}

impl SubagentTools {
    pub fn new(
        manager: Arc<SubagentManager>,
        gateway: GatewayClient,
        transcript_dir: PathBuf,
        default_cleanup: CleanupPolicy,
    ) -> Self {
        Self {
            manager,
            gateway,
            transcript_dir,
            default_cleanup,
        }
    }

    /// `sessions_spawn {task, label?, planMode?, cleanup?}`.
    ///
    /// Reserves a slot, registers the child, and kicks off its run through
    /// the gateway. Returns `{runId, childSessionKey}` or
    /// `{error, suggestions?}`.
    pub async fn sessions_spawn(
        &self,
        requester_session_key: &str,
        origin: OriginRef,
        args: SpawnArgs,
    ) -> Value {
        if args.task.trim().is_empty() {
            return json!({ "error": "task must not be empty" });
        }

        let reserve_id = match self.manager.reserve_slot(requester_session_key) {
            ReserveOutcome::Allowed { reserve_id } => reserve_id,
            ReserveOutcome::Denied {
                reason,
                suggestions,
            } => {
                let mut denial = json!({
                    "error": format!("Subagent limit reached ({reason})"),
                });
                if !suggestions.is_empty()
                    && let Value::Object(map) = &mut denial
                {
                    map.insert("suggestions".to_string(), json!(suggestions));
                }
                return denial;
            }
        };

        let run_id = Uuid::new_v4().to_string();
        let child_session_key = format!("subagent:{run_id}");
        let context = SubagentContext {
            run_id: run_id.clone(),
            child_session_key: child_session_key.clone(),
            requester_session_key: requester_session_key.to_string(),
            task: args.task.clone(),
            label: args.label,
            started_at_ms: now_ms(),
            model: args.model,
            plan_mode: args.plan_mode,
            cleanup: args.cleanup.unwrap_or(self.default_cleanup),
            origin,
        };

        if let Err(e) = self.manager.register(context, &reserve_id) {
            return json!({ "error": e.to_string() });
        }

        let message = child_kickoff_message(&args.task, args.plan_mode);
        let params = AgentParams {
            deliver: false,
            ..AgentParams::new(child_session_key.clone(), message)
        }
        .with_idempotency_key(format!("subagent-spawn-{run_id}"));

        if let Err(e) = self.gateway.agent(params, false).await {
            warn!(run_id, error = %e, "Child run kickoff failed");
            self.manager.mark_completed(
                &run_id,
                SubagentOutcome::error(format!("failed to start child run: {e}")),
                None,
                None,
            );
            return json!({ "error": format!("failed to start subagent: {e}") });
        }

        json!({ "runId": run_id, "childSessionKey": child_session_key })
    }

    /// `sessions_subagent_remove {runId}`. Running subagents stay.
    pub fn sessions_subagent_remove(&self, requester_session_key: &str, run_id: &str) -> Value {
        match self.manager.remove(run_id, requester_session_key) {
            Ok(()) => json!({ "status": "ok", "message": format!("removed subagent {run_id}") }),
            Err(e) => json!({ "status": "error", "error": e.to_string() }),
        }
    }

    /// `sessions_list {}`: the requester's subagents, running first.
    pub fn sessions_list(&self, requester_session_key: &str) -> Value {
        let (running, completed) = self.manager.list_for_session(requester_session_key);
        let entries: Vec<Value> = running
            .iter()
            .map(|ctx| {
                json!({
                    "runId": ctx.run_id,
                    "sessionKey": ctx.child_session_key,
                    "status": "running",
                    "task": ctx.task,
                    "label": ctx.label,
                })
            })
            .chain(completed.iter().map(|result| {
                json!({
                    "runId": result.context.run_id,
                    "sessionKey": result.context.child_session_key,
                    "status": result.outcome.status.to_string(),
                    "task": result.context.task,
                    "label": result.context.label,
                    "summary": result.summary,
                })
            }))
            .collect();
        json!({ "subagents": entries })
    }

    /// `sessions_history {sessionKey}`: transcript records of a session.
    pub async fn sessions_history(&self, session_key: &str) -> Value {
        let path = self.transcript_path(session_key);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) => {
                return json!({ "error": format!("no transcript for {session_key}: {e}") });
            }
        };
        let records: Vec<Value> = content
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();
        json!({ "records": records })
    }

    /// `sessions_send {sessionKey, message}`: address another session.
    pub async fn sessions_send(&self, session_key: &str, message: &str) -> Value {
        let params = AgentParams::new(session_key.to_string(), message.to_string())
            .with_idempotency_key(format!("sessions-send-{}", Uuid::new_v4()));
        match self.gateway.agent(params, false).await {
            Ok(_) => json!({ "status": "ok" }),
            Err(e) => json!({ "status": "error", "error": e.to_string() }),
        }
    }

    fn transcript_path(&self, session_key: &str) -> PathBuf {
        let safe: String = session_key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
            .collect();
        self.transcript_dir.join(format!("{safe}.jsonl"))
    }
}

/// The first message of a child session. The summary convention feeds the
/// announce flow's marker extraction.
fn child_kickoff_message(task: &str, plan_mode: bool) -> String {
    let mut message = String::new();
    if plan_mode {
        message.push_str(
            "Plan the following task without executing it. Present the plan and wait for approval.\n\n",
        );
    }
    message.push_str(task);
    message.push_str(
        "\n\nWhen finished, end your reply with `SUMMARY:` followed by one or two sentences for the requesting session.",
    );
    message
}
