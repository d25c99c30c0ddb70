//! Subagent completion announce flow.
//!
//! Converts a finished child run into one bounded message delivered to the
//! parent session. Every outbound step is best-effort: a failed gateway
//! call is logged and swallowed, never propagated. Core invariants do not
//! depend on delivery.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, warn};

use openclaw_core::config::{CleanupPolicy, ModelConfig, QueueSettings};
use openclaw_core::text::{format_duration_compact, tail_chars, truncate_str};

use crate::dispatch::Dispatcher;
use crate::gateway::{AgentParams, GatewayClient, OriginRef};
use crate::transcript;

use super::manager::SubagentManager;
use super::types::SubagentResult;

/// Hard cap on the extracted summary, in characters.
pub const MAX_SUMMARY_CHARS: usize = 200;

/// Marker a child can use to flag the announce-worthy part of its reply.
pub const SUMMARY_MARKER: &str = "SUMMARY:";

/// Upper bound on the finalization wait, regardless of the run timeout.
const MAX_WAIT_MS: u64 = 60_000;

/// Inputs for announcing one completed child.
#[derive(Debug, Clone)]
pub struct AnnounceRequest {
    pub run_id: String,
    /// The child's run timeout; the finalization wait is capped at 60 s.
    pub timeout_ms: u64,
    /// Child session transcript, when the session store has one.
    pub child_transcript: Option<PathBuf>,
    /// CLI-side session id of the child, for the stats line.
    pub child_cli_session_id: Option<String>,
    /// The parent session's queue settings.
    pub queue: QueueSettings,
    /// The parent session's stored routing fields (`lastChannel` etc.).
    pub stored_origin: OriginRef,
}

/// Drives completion announcements into parent sessions.
pub struct AnnounceFlow {
    gateway: GatewayClient,
    dispatcher: Arc<dyn Dispatcher>,
    manager: Arc<SubagentManager>,
    models: HashMap<String, ModelConfig>,
}

impl AnnounceFlow {
    pub fn new(
        gateway: GatewayClient,
        dispatcher: Arc<dyn Dispatcher>,
        manager: Arc<SubagentManager>,
        models: HashMap<String, ModelConfig>,
    ) -> Self {
        Self {
            gateway,
            dispatcher,
            manager,
            models,
        }
    }

    /// Listen for completion events and announce each finished child.
    ///
    /// `resolve` supplies the per-run announce inputs (transcript path,
    /// queue settings, stored origin) from the embedding session store.
    pub fn spawn_completion_listener<F>(
        self: Arc<Self>,
        bus: &crate::events::EventBus,
        resolve: F,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()>
    where
        F: Fn(&str) -> AnnounceRequest + Send + Sync + 'static,
    {
        let mut rx = bus.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = rx.recv() => match event {
                        Ok(crate::events::AgentEvent::SubagentCompleted { run_id, .. }) => {
                            self.run(resolve(&run_id)).await;
                        }
                        Ok(_) => {}
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Announce listener lagged behind completion events");
                        }
                    },
                    _ = shutdown.changed() => break,
                }
            }
        })
    }

    /// Announce one completed child into its parent session.
    pub async fn run(&self, req: AnnounceRequest) {
        let Some(mut result) = self.manager.get_result(&req.run_id) else {
            debug!(run_id = %req.run_id, "Announce requested for unknown or running subagent");
            return;
        };

        // Give the child's agent-run a bounded chance to finalize, and pick
        // up authoritative timestamps from the reply.
        match self
            .gateway
            .agent_wait(&req.run_id, req.timeout_ms.min(MAX_WAIT_MS))
            .await
        {
            Ok(reply) => {
                if result.context.started_at_ms == 0
                    && let Some(started) = reply.started_at
                {
                    result.context.started_at_ms = started;
                }
                if result.ended_at_ms.is_none() {
                    result.ended_at_ms = reply.ended_at;
                }
                self.manager
                    .update_run_times(&req.run_id, reply.started_at, reply.ended_at);
            }
            Err(e) => debug!(run_id = %req.run_id, error = %e, "agent.wait failed, announcing anyway"),
        }

        let reply_text = match &req.child_transcript {
            Some(path) => transcript::latest_assistant_text(path).await,
            None => None,
        };
        let summary = reply_text.as_deref().map(extract_summary);

        let usage = match &req.child_transcript {
            Some(path) => transcript::transcript_usage(path).await,
            None => None,
        };
        let stats = self.build_stats_line(&result, usage.as_ref());
        let message = build_trigger_message(&result, summary.as_deref(), &stats, &req);

        self.deliver(&result, &message, &req).await;
        self.manager.record_announced(&req.run_id, summary);

        // Best-effort bookkeeping on the child session.
        let label = format!(
            "subagent: {}",
            result
                .context
                .label
                .as_deref()
                .unwrap_or_else(|| truncate_str(&result.context.task, 40))
        );
        if let Err(e) = self
            .gateway
            .sessions_patch(&result.context.child_session_key, &label)
            .await
        {
            debug!(run_id = %req.run_id, error = %e, "Child session label patch failed");
        }
        if result.context.cleanup == CleanupPolicy::Delete && !result.context.plan_mode {
            if let Err(e) = self
                .gateway
                .sessions_delete(&result.context.child_session_key, true)
                .await
            {
                debug!(run_id = %req.run_id, error = %e, "Child session cleanup failed");
            }
        }
    }

    /// Deliver by steering, by queueing behind the active run, or directly
    /// through the gateway, in that order.
    async fn deliver(&self, result: &SubagentResult, message: &str, req: &AnnounceRequest) {
        let parent = &result.context.requester_session_key;

        if req.queue.mode.attempts_steer() && self.dispatcher.try_steer(parent, message) {
            debug!(run_id = %result.context.run_id, "Announce steered into running run");
            return;
        }
        if req.queue.mode.queues_when_active() && self.dispatcher.queue_announcement(parent, message)
        {
            debug!(run_id = %result.context.run_id, "Announce queued behind active run");
            return;
        }

        let origin = result.context.origin.merged_over(&req.stored_origin);
        let params = AgentParams::new(parent.clone(), message.to_string())
            .with_origin(origin)
            .with_idempotency_key(format!("subagent-announce-{}", result.context.run_id));
        if let Err(e) = self.gateway.agent(params, true).await {
            warn!(run_id = %result.context.run_id, error = %e, "Announce delivery failed");
        }
    }

    fn build_stats_line(
        &self,
        result: &SubagentResult,
        usage: Option<&openclaw_core::cli_output::CliUsage>,
    ) -> String {
        let runtime = match (result.context.started_at_ms, result.ended_at_ms) {
            (started, Some(ended)) if started > 0 && ended >= started => {
                format_duration_compact(ended - started)
            }
            _ => "n/a".to_string(),
        };

        let tokens = usage.map_or_else(
            || "n/a".to_string(),
            |u| {
                let total = if u.total_tokens > 0 {
                    u.total_tokens
                } else {
                    u.input_tokens + u.output_tokens
                };
                format!("{} in / {} out / {total} total", u.input_tokens, u.output_tokens)
            },
        );

        let cost = result
            .context
            .model
            .as_deref()
            .and_then(|model| self.models.get(model))
            .and_then(|model| model.cost)
            .zip(usage)
            .map_or_else(
                || "n/a".to_string(),
                |(cost, u)| format!("${:.4}", cost.estimate(u.input_tokens, u.output_tokens)),
            );

        format!("Runtime {runtime} · tokens {tokens} · cost {cost}")
    }
}

/// The announce-worthy summary of a child reply, capped at 200 chars:
/// the text after the last `SUMMARY:` marker, or the reply tail.
pub fn extract_summary(reply: &str) -> String {
    let relevant = reply
        .rfind(SUMMARY_MARKER)
        .map_or_else(|| tail_chars(reply, MAX_SUMMARY_CHARS), |idx| {
            reply[idx + SUMMARY_MARKER.len()..].trim()
        });
    truncate_str(relevant.trim(), MAX_SUMMARY_CHARS).to_string()
}

fn build_trigger_message(
    result: &SubagentResult,
    summary: Option<&str>,
    stats: &str,
    req: &AnnounceRequest,
) -> String {
    let name = result
        .context
        .label
        .as_deref()
        .unwrap_or_else(|| truncate_str(&result.context.task, 50));
    let short_run = truncate_str(&result.context.run_id, 8);
    let session_line = format!(
        "Session: {} ({})",
        result.context.child_session_key,
        req.child_cli_session_id.as_deref().unwrap_or("n/a"),
    );
    let transcript_line = format!(
        "Transcript: {}",
        req.child_transcript
            .as_ref()
            .map_or_else(|| "n/a".to_string(), |p| p.display().to_string()),
    );

    if result.context.plan_mode {
        if result.outcome.succeeded() {
            return format!(
                "Subagent `{name}` finished planning ({short_run}).\n\
                 Plan summary: {}\n\
                 {stats}\n\
                 {session_line}\n\
                 Reply `approve {short_run}` to execute the plan, or give new instructions.",
                summary.unwrap_or("n/a"),
            );
        }
        return format!(
            "Subagent `{name}` failed while planning ({}).\n\
             Error: {}\n\
             {stats}\n\
             {session_line}",
            result.outcome.status,
            result.outcome.error.as_deref().unwrap_or("n/a"),
        );
    }

    format!(
        "Subagent `{name}` completed ({}).\n\
         Summary: {}\n\
         {stats}\n\
         {session_line}\n\
         {transcript_line}",
        result.outcome.status,
        summary.unwrap_or("n/a"),
    )
}
