//! Configuration resolution for OpenClaw.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. User config (~/.openclaw/openclaw.json)
//! 3. Environment variables (highest priority)

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::backend::BackendSpec;
use crate::error::{Error, Result};

/// Complete OpenClaw configuration document.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// CLI backends keyed by provider name.
    pub backends: HashMap<String, BackendSpec>,
    /// Model metadata keyed by model id.
    pub models: HashMap<String, ModelConfig>,
    pub limits: LimitsConfig,
    pub sessions: SessionDefaults,
}

/// Per-model metadata.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct ModelConfig {
    /// Cost per million tokens, used for announce stats.
    pub cost: Option<ModelCost>,
}

/// USD cost per million tokens.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ModelCost {
    pub input: f64,
    pub output: f64,
}

impl ModelCost {
    /// Estimated USD cost for a run's token counts.
    pub fn estimate(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        let (i, o) = (input_tokens as f64, output_tokens as f64);
        (i * self.input + o * self.output) / 1_000_000.0
    }
}

/// Subagent, interaction, and typing limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LimitsConfig {
    /// Running + reserved subagents allowed per requester session.
    pub max_concurrent_subagents: usize,
    /// Running + completed + reserved subagents retained per requester session.
    pub max_retained_subagents: usize,
    /// Seconds before an unconsumed slot reservation is reclaimed.
    pub reservation_ttl_secs: u64,
    /// Seconds a pending interaction waits for a user answer.
    pub interaction_ttl_secs: u64,
    /// Seconds between typing-indicator refreshes.
    pub typing_interval_secs: u64,
    /// Seconds of inactivity before the typing loop stops.
    pub typing_ttl_secs: u64,
    /// Seconds between timeout reminders after the typing TTL expires.
    pub typing_reminder_interval_secs: u64,
    /// Reply sentinel that suppresses the typing indicator.
    pub silent_reply_token: String,
    /// Stopped CLI processes tolerated before the sweep force-kills them.
    pub stopped_process_kill_threshold: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_concurrent_subagents: 5,
            max_retained_subagents: 15,
            reservation_ttl_secs: 30,
            interaction_ttl_secs: 5 * 60,
            typing_interval_secs: 6,
            typing_ttl_secs: 2 * 60,
            typing_reminder_interval_secs: 5 * 60,
            silent_reply_token: "NO_REPLY".to_string(),
            stopped_process_kill_threshold: 10,
        }
    }
}

/// Session-level defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionDefaults {
    pub default_provider: String,
    pub default_timeout_secs: u64,
    pub queue: QueueSettings,
    /// Child-session cleanup policy after announce (`keep` or `delete`).
    pub cleanup: CleanupPolicy,
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self {
            default_provider: "claude".to_string(),
            default_timeout_secs: 600,
            queue: QueueSettings::default(),
            cleanup: CleanupPolicy::Keep,
        }
    }
}

/// How announcements interact with a session's running dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueueMode {
    Off,
    Followup,
    #[default]
    Collect,
    Interrupt,
    Steer,
    SteerBacklog,
}

impl QueueMode {
    /// Whether announce delivery should first try steering into the live run.
    pub const fn attempts_steer(self) -> bool {
        matches!(self, Self::Steer | Self::SteerBacklog)
    }

    /// Whether announce delivery may queue behind an active run.
    pub const fn queues_when_active(self) -> bool {
        matches!(
            self,
            Self::Followup | Self::Collect | Self::SteerBacklog | Self::Interrupt | Self::Steer
        )
    }
}

/// Dispatcher queue settings for a session.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    pub mode: QueueMode,
}

/// Child-session cleanup after a completed announce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CleanupPolicy {
    #[default]
    Keep,
    Delete,
}

/// Load configuration with hierarchical resolution.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut config = Config::default();

    let resolved = path.map_or_else(default_config_path, |p| Some(p.to_path_buf()));
    if let Some(file) = resolved
        && file.exists()
    {
        config = load_config_file(&file)?;
    }

    apply_env_overrides(&mut config);
    Ok(config)
}

/// State directory for registries and transcripts: `~/.openclaw`.
pub fn state_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".openclaw"))
}

/// Default user config path: `~/.openclaw/openclaw.json`.
pub fn default_config_path() -> Option<PathBuf> {
    state_dir().map(|d| d.join("openclaw.json"))
}

fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {e}", path.display()))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {e}", path.display()))
    })
}

fn apply_env_overrides(config: &mut Config) {
    if let Ok(val) = std::env::var("OPENCLAW_MAX_CONCURRENT_SUBAGENTS")
        && let Ok(n) = val.parse()
    {
        config.limits.max_concurrent_subagents = n;
    }
    if let Ok(val) = std::env::var("OPENCLAW_MAX_RETAINED_SUBAGENTS")
        && let Ok(n) = val.parse()
    {
        config.limits.max_retained_subagents = n;
    }
    if let Ok(val) = std::env::var("OPENCLAW_DEFAULT_PROVIDER") {
        config.sessions.default_provider = val;
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_limits_match_contract() {
        let config = Config::default();
        assert_eq!(config.limits.max_concurrent_subagents, 5);
        assert_eq!(config.limits.max_retained_subagents, 15);
        assert_eq!(config.limits.reservation_ttl_secs, 30);
        assert_eq!(config.limits.interaction_ttl_secs, 300);
        assert_eq!(config.limits.silent_reply_token, "NO_REPLY");
    }

    #[test]
    fn queue_mode_kebab_case() {
        let mode: QueueMode = serde_json::from_str("\"steer-backlog\"").unwrap();
        assert_eq!(mode, QueueMode::SteerBacklog);
        assert!(mode.attempts_steer());
        assert!(mode.queues_when_active());
        assert!(!QueueMode::Off.queues_when_active());
    }

    #[test]
    fn model_cost_estimate() {
        let cost = ModelCost {
            input: 3.0,
            output: 15.0,
        };
        let usd = cost.estimate(1_000_000, 100_000);
        assert!((usd - 4.5).abs() < f64::EPSILON);
    }

    #[test]
    fn load_config_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("openclaw.json");
        std::fs::write(
            &path,
            r#"{"backends":{"claude":{"command":"claude","output":"stream-jsonl"}}}"#,
        )
        .unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert!(config.backends.contains_key("claude"));
        assert_eq!(config.limits.max_concurrent_subagents, 5);
    }

    #[test]
    fn invalid_config_file_is_config_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("openclaw.json");
        std::fs::write(&path, "not-json").unwrap();

        let err = load_config(Some(&path)).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
