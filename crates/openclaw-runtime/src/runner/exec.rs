//! Process executor for CLI backend runs.
//!
//! Spawns the child in its own process group, drains stdout/stderr
//! concurrently, feeds an optional stdin payload, and enforces the run
//! timeout. A timeout is fatal: the whole group is killed and the result is
//! marked `killed`.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tracing::warn;

/// Raw result of one child process execution.
#[derive(Debug, Clone, Default)]
pub struct ExecResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    /// Set when the run timed out and the process group was terminated.
    pub killed: bool,
}

impl ExecResult {
    pub const fn success(&self) -> bool {
        !self.killed && matches!(self.exit_code, Some(0))
    }
}

/// Errors from process execution.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("Failed to spawn subprocess: {reason}")]
    Spawn { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Inputs for one execution.
pub struct ExecRequest<'a> {
    pub argv: &'a [String],
    pub cwd: &'a Path,
    pub env: &'a HashMap<String, String>,
    pub clear_env: bool,
    pub stdin_payload: Option<&'a str>,
    pub timeout_ms: u64,
}

/// Run the child to completion or timeout.
pub async fn execute(req: ExecRequest<'_>) -> Result<ExecResult, ExecError> {
    let Some((program, args)) = req.argv.split_first() else {
        return Err(ExecError::Spawn {
            reason: "empty argv".to_string(),
        });
    };

    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(req.cwd)
        .stdin(if req.stdin_payload.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if req.clear_env {
        cmd.env_clear();
    }
    for (key, value) in req.env {
        cmd.env(key, value);
    }
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd.spawn().map_err(|e| ExecError::Spawn {
        reason: e.to_string(),
    })?;

    if let Some(payload) = req.stdin_payload
        && let Some(mut stdin) = child.stdin.take()
    {
        let mut line = payload.to_string();
        if !line.ends_with('\n') {
            line.push('\n');
        }
        if let Err(e) = stdin.write_all(line.as_bytes()).await {
            warn!(error = %e, "Failed to write stdin payload");
        }
        drop(stdin);
    }

    let stdout_task = child.stdout.take().map(|mut pipe| {
        tokio::spawn(async move {
            let mut buf = String::new();
            let _ = pipe.read_to_string(&mut buf).await;
            buf
        })
    });
    let stderr_task = child.stderr.take().map(|mut pipe| {
        tokio::spawn(async move {
            let mut buf = String::new();
            let _ = pipe.read_to_string(&mut buf).await;
            buf
        })
    });

    let timeout = Duration::from_millis(req.timeout_ms);
    let (status, killed) = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(wait_result) => (wait_result?, false),
        Err(_) => {
            warn!(timeout_ms = req.timeout_ms, "Run timed out, killing process group");
            kill_process_group(&child);
            child.kill().await.ok();
            (child.wait().await?, true)
        }
    };

    let stdout = match stdout_task {
        Some(task) => task.await.unwrap_or_default(),
        None => String::new(),
    };
    let stderr = match stderr_task {
        Some(task) => task.await.unwrap_or_default(),
        None => String::new(),
    };

    Ok(ExecResult {
        stdout,
        stderr,
        exit_code: status.code(),
        signal: exit_signal(&status),
        killed,
    })
}

#[cfg(unix)]
fn kill_process_group(child: &Child) {
    if let Some(pid) = child.id() {
        // SAFETY: pid comes from our own Child handle; the child was placed
        // in its own process group, so signalling -pid reaches only it and
        // its descendants.
        #[allow(unsafe_code, clippy::cast_possible_wrap)]
        let ret = unsafe { libc::kill(-(pid as i32), libc::SIGKILL) };
        if ret != 0 {
            let err = std::io::Error::last_os_error();
            warn!(pid, error = %err, "Failed to kill process group");
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_child: &Child) {}

#[cfg(unix)]
fn exit_signal(status: &std::process::ExitStatus) -> Option<i32> {
    std::os::unix::process::ExitStatusExt::signal(status)
}

#[cfg(not(unix))]
fn exit_signal(_status: &std::process::ExitStatus) -> Option<i32> {
    None
}

// =============================================================================
// Failover classification
// =============================================================================

/// Why a backend invocation failed, for fail-over decisions upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailoverReason {
    RateLimit,
    Auth,
    Quota,
    Network,
    ModelUnavailable,
    Timeout,
    Unknown,
}

impl fmt::Display for FailoverReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            Self::RateLimit => "rate-limit",
            Self::Auth => "auth",
            Self::Quota => "quota",
            Self::Network => "network",
            Self::ModelUnavailable => "model-unavailable",
            Self::Timeout => "timeout",
            Self::Unknown => "unknown",
        };
        f.write_str(tag)
    }
}

/// Classify an error message into a failover reason. Pure function of the
/// message text.
pub fn classify_failover(message: &str) -> FailoverReason {
    let lower = message.to_lowercase();
    let any = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    if any(&["rate limit", "rate_limit", "429", "too many requests", "overloaded"]) {
        FailoverReason::RateLimit
    } else if any(&["unauthorized", "401", "403", "invalid api key", "authentication", "not logged in"]) {
        FailoverReason::Auth
    } else if any(&["quota", "billing", "insufficient credit", "out of credits"]) {
        FailoverReason::Quota
    } else if any(&["model not found", "unknown model", "no such model", "model is not available"]) {
        FailoverReason::ModelUnavailable
    } else if any(&["timed out", "timeout"]) {
        FailoverReason::Timeout
    } else if any(&["network", "connection", "econn", "enotfound", "etimedout", "dns", "socket"]) {
        FailoverReason::Network
    } else {
        FailoverReason::Unknown
    }
}

/// A failed invocation with a classified reason, surfaced to the
/// orchestrator for potential backend fail-over. Never retried here.
#[derive(Debug, Error)]
#[error("Backend {provider} failed ({reason}): {message}")]
pub struct FailoverError {
    pub reason: FailoverReason,
    pub provider: String,
    pub model: Option<String>,
    pub status: Option<i32>,
    pub message: String,
}
