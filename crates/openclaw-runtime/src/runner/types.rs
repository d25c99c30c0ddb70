//! Run request types for the CLI runner.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A single end-to-end CLI backend invocation for one turn.
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Gateway session id (stable uuid for the session).
    pub session_id: String,
    /// Session key (routing identity, e.g. `agent:main:telegram:123`).
    pub session_key: String,
    /// Transcript file of the session.
    pub session_file: PathBuf,
    /// Working directory for the child process.
    pub workspace_dir: PathBuf,
    pub prompt: String,
    /// Provider (backend) name to resolve.
    pub provider: String,
    pub model: Option<String>,
    /// System prompt to inject, subject to the backend's policy.
    pub system_prompt: Option<String>,
    pub timeout_ms: u64,
    /// Run id; globally unique, minted by the dispatcher.
    pub run_id: String,
    /// Image attachments, passed per the backend's image flags.
    pub images: Vec<PathBuf>,
    /// CLI-side session id to resume, when one was captured earlier.
    pub cli_session_id: Option<String>,
    /// Tool result to feed back when resuming a paused interaction.
    pub tool_result: Option<ToolResultPayload>,
    /// Sandbox context of the session, if any.
    pub sandbox: Option<SandboxContext>,
}

/// Answer to a pending tool call, sent on resume via stdin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResultPayload {
    pub tool_use_id: String,
    pub content: String,
}

/// Container execution context for sandboxed runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SandboxContext {
    pub enabled: bool,
    /// Container name or id passed to `docker exec`.
    pub container: String,
    /// Working directory inside the container.
    pub workdir: Option<String>,
    /// Environment exported into the container invocation.
    pub env: HashMap<String, String>,
}

impl RunRequest {
    /// Whether this run resumes an existing CLI session.
    pub const fn is_resume(&self) -> bool {
        self.cli_session_id.is_some()
    }
}
