//! The CLI runner.
//!
//! Composes backend resolution, the per-backend queue, the stale-process
//! sweep, argv construction, sandbox wrapping, execution, output parsing,
//! transcript writing, and pending-interaction registration into one run
//! pipeline.

pub mod cleanup;
pub mod exec;
pub mod invocation;
pub mod queue;
pub mod sandbox;
pub mod types;

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use openclaw_core::Config;
use openclaw_core::backend::{SandboxMode, resolve_backend};
use openclaw_core::cli_output::{CliOutput, parse_output};

use crate::interaction::{InteractionManager, PendingInteraction};
use crate::transcript::TranscriptWriter;

pub use cleanup::{ProcessEntry, ProcessLister, PsProcessLister, StaleProcessCleaner};
pub use exec::{ExecError, ExecRequest, ExecResult, FailoverError, FailoverReason, classify_failover, execute};
pub use invocation::{Invocation, build_invocation};
pub use queue::RunQueue;
pub use sandbox::{sandbox_env, shell_quote, should_sandbox, wrap_sandboxed};
pub use types::{RunRequest, SandboxContext, ToolResultPayload};

/// Env var that enables verbose logging of each CLI call.
pub const CLI_LOG_OUTPUT_ENV: &str = "OPENCLAW_CLAUDE_CLI_LOG_OUTPUT";

/// Errors from the run pipeline.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Unknown backend: {provider}")]
    UnknownBackend { provider: String },

    #[error("Backend {provider} requires an enabled sandbox context")]
    SandboxRequired { provider: String },

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error(transparent)]
    Failover(#[from] FailoverError),
}

/// Result of a successful run.
#[derive(Debug)]
pub struct CliRunOutcome {
    pub backend_id: String,
    pub resolved_model: Option<String>,
    pub output: CliOutput,
    pub exec: ExecResult,
}

/// Runs CLI backend invocations end to end.
pub struct CliRunner {
    config: Arc<Config>,
    queue: RunQueue,
    cleaner: StaleProcessCleaner,
    transcript: Arc<TranscriptWriter>,
    interactions: Arc<InteractionManager>,
}

impl CliRunner {
    pub fn new(
        config: Arc<Config>,
        transcript: Arc<TranscriptWriter>,
        interactions: Arc<InteractionManager>,
    ) -> Self {
        let threshold = config.limits.stopped_process_kill_threshold;
        Self {
            config,
            queue: RunQueue::new(),
            cleaner: StaleProcessCleaner::new(Box::new(PsProcessLister), threshold),
            transcript,
            interactions,
        }
    }

    /// Replace the stale-process cleaner (tests inject a fake lister).
    pub fn with_cleaner(mut self, cleaner: StaleProcessCleaner) -> Self {
        self.cleaner = cleaner;
        self
    }

    /// Execute one run request through the full pipeline.
    pub async fn run(&self, req: RunRequest) -> Result<CliRunOutcome, RunnerError> {
        let (backend_id, spec) =
            resolve_backend(&self.config, &req.provider).map_err(|_| RunnerError::UnknownBackend {
                provider: req.provider.clone(),
            })?;
        let spec = spec.clone();

        let sandboxed = should_sandbox(&spec, req.sandbox.as_ref());
        if spec.sandbox_mode == SandboxMode::Always && !sandboxed {
            return Err(RunnerError::SandboxRequired {
                provider: req.provider.clone(),
            });
        }

        let key = RunQueue::queue_key(spec.serialize, &backend_id, &req.run_id);
        self.queue
            .run(&key, self.run_inner(backend_id, spec, req, sandboxed))
            .await
    }

    async fn run_inner(
        &self,
        backend_id: String,
        spec: openclaw_core::BackendSpec,
        req: RunRequest,
        sandboxed: bool,
    ) -> Result<CliRunOutcome, RunnerError> {
        let killed = self.cleaner.sweep(&spec, &req);
        if !killed.is_empty() {
            debug!(run_id = %req.run_id, count = killed.len(), "Stale processes killed before run");
        }

        let invocation = build_invocation(&spec, &req);
        let (argv, env, clear_env) = match req.sandbox.as_ref() {
            Some(ctx) if sandboxed => {
                let inner_env = sandbox_env(&invocation.env, ctx, &spec);
                (wrap_sandboxed(&invocation.argv, ctx, &inner_env), HashMap::new(), false)
            }
            _ => (invocation.argv.clone(), invocation.env.clone(), invocation.clear_env),
        };

        let exec_result = execute(ExecRequest {
            argv: &argv,
            cwd: &req.workspace_dir,
            env: &env,
            clear_env,
            stdin_payload: invocation.stdin_payload.as_deref(),
            timeout_ms: req.timeout_ms,
        })
        .await?;

        if cli_logging_enabled() {
            info!(
                run_id = %req.run_id,
                argv = %argv.join(" "),
                exit_code = ?exec_result.exit_code,
                stdout = %exec_result.stdout,
                stderr = %exec_result.stderr,
                "CLI call finished"
            );
        }

        if exec_result.killed {
            return Err(FailoverError {
                reason: FailoverReason::Timeout,
                provider: backend_id,
                model: invocation.resolved_model,
                status: exec_result.exit_code,
                message: format!("run timed out after {} ms", req.timeout_ms),
            }
            .into());
        }
        if !exec_result.success() {
            let detail = if exec_result.stderr.trim().is_empty() {
                exec_result.stdout.clone()
            } else {
                exec_result.stderr.clone()
            };
            return Err(FailoverError {
                reason: classify_failover(&detail),
                provider: backend_id,
                model: invocation.resolved_model,
                status: exec_result.exit_code,
                message: detail.trim().to_string(),
            }
            .into());
        }

        let mode = spec.output_mode(req.is_resume());
        // Unparseable stdout degrades to a raw-text reply.
        let output = parse_output(mode, &exec_result.stdout, &spec.session_id_fields)
            .unwrap_or_else(|| CliOutput {
                text: exec_result.stdout.trim().to_string(),
                ..CliOutput::default()
            });

        self.transcript
            .append_run(
                &req.session_key,
                &req.session_file,
                &req.workspace_dir,
                &req.session_id,
                &output,
            )
            .await;

        if let Some(detected) = output.pending_interaction.clone() {
            let cli_session_id = output.session_id.clone().or_else(|| req.cli_session_id.clone());
            self.interactions
                .set(PendingInteraction::from_detected(
                    detected,
                    req.session_key.clone(),
                    cli_session_id,
                    req.run_id.clone(),
                    backend_id.clone(),
                    self.interactions.config().ttl,
                ))
                .await;
        }

        Ok(CliRunOutcome {
            backend_id,
            resolved_model: invocation.resolved_model,
            output,
            exec: exec_result,
        })
    }
}

fn cli_logging_enabled() -> bool {
    std::env::var(CLI_LOG_OUTPUT_ENV).is_ok_and(|v| {
        matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on")
    })
}
