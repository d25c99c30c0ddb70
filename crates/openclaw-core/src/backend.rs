//! Declarative CLI backend specs.
//!
//! A backend describes how to invoke an external LLM CLI: the command, how
//! session continuity works, where the prompt goes, and how stdout must be
//! parsed. Specs are data, resolved once per run from the user config.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{Error, Result};

/// How the backend handles session-id flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    /// Pass a session id on every invocation, minting one when absent.
    #[default]
    Always,
    /// Pass a session id only when resuming an existing CLI session.
    Existing,
    /// The backend has no session concept.
    None,
}

/// When the system prompt flag is appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemPromptWhen {
    /// Only on the first call of a session (no resume id yet).
    #[default]
    First,
    Always,
    Never,
}

/// How image paths are passed on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageMode {
    /// Repeat the flag once per image path.
    #[default]
    Repeat,
    /// Emit the flag once followed by all paths.
    List,
}

/// How the prompt reaches the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputMode {
    /// Appended as the final argv element.
    #[default]
    Arg,
    /// Written to the child's stdin.
    Stdin,
}

/// stdout format produced by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputMode {
    #[default]
    Text,
    Json,
    Jsonl,
    StreamJsonl,
}

/// Whether runs are wrapped in the sandbox container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxMode {
    /// Never sandboxed, even when the session runs sandboxed.
    Off,
    /// Sandboxed when the session's sandbox context is enabled.
    #[default]
    Inherit,
    /// Like `Inherit`, but the runner refuses to launch without an enabled
    /// sandbox context.
    Always,
}

/// Default field names scanned for a session id in parsed output.
pub const DEFAULT_SESSION_ID_FIELDS: [&str; 4] =
    ["session_id", "sessionId", "conversation_id", "conversationId"];

/// Declarative spec for one CLI backend. Immutable per process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackendSpec {
    /// Executable to spawn.
    pub command: String,
    /// Base argv appended after the command.
    pub args: Vec<String>,
    /// Argv fragment used instead of `args` when resuming; `{sessionId}` is
    /// substituted.
    pub resume_args: Vec<String>,
    /// Single flag carrying the session id (e.g. `--session-id`).
    pub session_arg: Option<String>,
    /// Multi-token session flags; `{sessionId}` is substituted in each.
    pub session_args: Vec<String>,
    pub session_mode: SessionMode,
    pub system_prompt_arg: Option<String>,
    pub system_prompt_when: SystemPromptWhen,
    pub model_arg: Option<String>,
    /// Model alias table; keys compared case-insensitively as a fallback.
    pub model_aliases: HashMap<String, String>,
    pub image_arg: Option<String>,
    pub image_mode: ImageMode,
    pub input: InputMode,
    /// When set and the prompt exceeds this length, the prompt moves to stdin.
    pub max_prompt_arg_chars: Option<usize>,
    pub output: OutputMode,
    /// Output mode for resumed runs; falls back to `output` when unset.
    pub resume_output: Option<OutputMode>,
    /// Extra environment for the child process.
    pub env: HashMap<String, String>,
    /// Start the child from an empty environment.
    pub clear_env: bool,
    pub sandbox_mode: SandboxMode,
    /// Environment overrides applied only inside the sandbox container.
    pub sandbox_overrides: HashMap<String, String>,
    /// Serialize all runs of this backend behind one queue.
    pub serialize: bool,
    /// Expose the gateway tool surface to this backend.
    pub enable_tools: bool,
    /// Field names scanned for a session id in parsed output.
    pub session_id_fields: Vec<String>,
}

impl Default for BackendSpec {
    fn default() -> Self {
        Self {
            command: String::new(),
            args: Vec::new(),
            resume_args: Vec::new(),
            session_arg: None,
            session_args: Vec::new(),
            session_mode: SessionMode::default(),
            system_prompt_arg: None,
            system_prompt_when: SystemPromptWhen::default(),
            model_arg: None,
            model_aliases: HashMap::new(),
            image_arg: None,
            image_mode: ImageMode::default(),
            input: InputMode::default(),
            max_prompt_arg_chars: None,
            output: OutputMode::default(),
            resume_output: None,
            env: HashMap::new(),
            clear_env: false,
            sandbox_mode: SandboxMode::default(),
            sandbox_overrides: HashMap::new(),
            serialize: false,
            enable_tools: false,
            session_id_fields: DEFAULT_SESSION_ID_FIELDS
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

impl BackendSpec {
    /// Output mode in effect for a run, honoring `resume_output` on resumes.
    pub fn output_mode(&self, resuming: bool) -> OutputMode {
        if resuming {
            self.resume_output.unwrap_or(self.output)
        } else {
            self.output
        }
    }
}

/// Resolve a provider name to its backend spec.
///
/// Pure lookup; `Error::UnknownBackend` when the provider is not configured.
pub fn resolve_backend<'a>(config: &'a Config, provider: &str) -> Result<(String, &'a BackendSpec)> {
    config
        .backends
        .get(provider)
        .map(|spec| (provider.to_string(), spec))
        .ok_or_else(|| Error::UnknownBackend {
            provider: provider.to_string(),
        })
}

/// Normalize a model id through the backend's alias table.
///
/// Exact match first, then a case-insensitive scan; unmatched ids pass
/// through unchanged.
pub fn resolve_model_alias(spec: &BackendSpec, model: &str) -> String {
    if let Some(resolved) = spec.model_aliases.get(model) {
        return resolved.clone();
    }
    let lowered = model.to_lowercase();
    for (alias, resolved) in &spec.model_aliases {
        if alias.to_lowercase() == lowered {
            return resolved.clone();
        }
    }
    model.to_string()
}
