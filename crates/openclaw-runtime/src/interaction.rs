//! Pending interaction manager.
//!
//! Tracks AskUserQuestion / plan-approval requests that paused a CLI run,
//! keyed by session. At most one interaction is pending per session; a new
//! one replaces the old. Entries expire silently after their TTL; a cleanup
//! timer runs while the map is non-empty and stops when it drains.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use openclaw_core::cli_output::{DetectedInteraction, InteractionOption, PendingInteractionKind};

/// Configuration for the interaction manager.
#[derive(Debug, Clone)]
pub struct InteractionConfig {
    /// How long a question waits for a user answer.
    pub ttl: Duration,
    /// Interval of the expiry sweep while entries exist.
    pub cleanup_interval: Duration,
}

impl Default for InteractionConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(5 * 60),
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

/// A question waiting for a user answer.
#[derive(Debug, Clone)]
pub struct PendingInteraction {
    pub id: String,
    pub cli_session_id: Option<String>,
    pub session_key: String,
    pub tool_call_id: String,
    pub kind: PendingInteractionKind,
    pub question: String,
    pub options: Vec<InteractionOption>,
    pub multi_select: bool,
    pub created_at: Instant,
    pub expires_at: Instant,
    pub agent_id: String,
    pub provider: String,
}

impl PendingInteraction {
    /// Build from a detected interaction at run completion.
    pub fn from_detected(
        detected: DetectedInteraction,
        session_key: impl Into<String>,
        cli_session_id: Option<String>,
        agent_id: impl Into<String>,
        provider: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        let now = Instant::now();
        Self {
            id: Uuid::new_v4().to_string(),
            cli_session_id,
            session_key: session_key.into(),
            tool_call_id: detected.tool_call_id,
            kind: detected.kind,
            question: detected.question,
            options: detected.options,
            multi_select: detected.multi_select,
            created_at: now,
            expires_at: now + ttl,
            agent_id: agent_id.into(),
            provider: provider.into(),
        }
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() > self.expires_at
    }
}

/// Process-wide map of pending interactions, one per session key.
pub struct InteractionManager {
    entries: Arc<RwLock<HashMap<String, PendingInteraction>>>,
    config: InteractionConfig,
    cleanup_task: Mutex<Option<JoinHandle<()>>>,
}

impl InteractionManager {
    pub fn new(config: InteractionConfig) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            config,
            cleanup_task: Mutex::new(None),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(InteractionConfig::default())
    }

    pub const fn config(&self) -> &InteractionConfig {
        &self.config
    }

    /// Register a pending interaction, replacing any previous one for the
    /// session, and make sure the cleanup timer is running.
    pub async fn set(&self, interaction: PendingInteraction) {
        let session_key = interaction.session_key.clone();
        let replaced = self
            .entries
            .write()
            .await
            .insert(session_key.clone(), interaction)
            .is_some();
        debug!(session_key, replaced, "Pending interaction registered");
        self.ensure_cleanup_task().await;
    }

    /// The pending interaction for a session, if it has not expired.
    /// Expired entries are dropped on access.
    pub async fn get(&self, session_key: &str) -> Option<PendingInteraction> {
        let mut entries = self.entries.write().await;
        match entries.get(session_key) {
            Some(entry) if entry.is_expired() => {
                entries.remove(session_key);
                None
            }
            Some(entry) => Some(entry.clone()),
            None => None,
        }
    }

    /// Drop the pending interaction for a session, returning it.
    pub async fn clear(&self, session_key: &str) -> Option<PendingInteraction> {
        self.entries.write().await.remove(session_key)
    }

    /// Sweep expired entries; returns the session keys removed.
    pub async fn cleanup_expired(&self) -> Vec<String> {
        let mut entries = self.entries.write().await;
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, e)| e.is_expired())
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            entries.remove(key);
            warn!(session_key = %key, "Pending interaction expired");
        }
        expired
    }

    pub async fn count(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Spawn the expiry sweep if it is not already running. The task stops
    /// itself once the map drains, so an idle process keeps no timer alive.
    async fn ensure_cleanup_task(&self) {
        let mut task = self.cleanup_task.lock().await;
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }

        let entries = Arc::clone(&self.entries);
        let interval = self.config.cleanup_interval;
        *task = Some(tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.tick().await; // skip the immediate tick
            loop {
                timer.tick().await;
                let mut map = entries.write().await;
                map.retain(|key, entry| {
                    let keep = !entry.is_expired();
                    if !keep {
                        warn!(session_key = %key, "Pending interaction expired");
                    }
                    keep
                });
                if map.is_empty() {
                    break;
                }
            }
        }));
    }
}

impl Default for InteractionManager {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Interpret a user message as an answer to a pending question.
///
/// Option lists accept 1-based indices (comma-separated when multi-select)
/// or case-insensitive labels; anything else is passed through as a
/// free-form answer.
pub fn parse_user_answer(input: &str, options: &[InteractionOption], multi_select: bool) -> String {
    let trimmed = input.trim();
    if options.is_empty() {
        return trimmed.to_string();
    }

    if multi_select && trimmed.contains(',') {
        let mut labels: Vec<&str> = Vec::new();
        for token in trimmed.split(',') {
            if let Ok(index) = token.trim().parse::<usize>()
                && index >= 1
                && let Some(option) = options.get(index - 1)
                && !labels.contains(&option.label.as_str())
            {
                labels.push(&option.label);
            }
        }
        if !labels.is_empty() {
            return labels.join(", ");
        }
    }

    if let Ok(index) = trimmed.parse::<usize>()
        && index >= 1
        && let Some(option) = options.get(index - 1)
    {
        return option.label.clone();
    }

    if let Some(option) = options
        .iter()
        .find(|o| o.label.eq_ignore_ascii_case(trimmed))
    {
        return option.label.clone();
    }

    trimmed.to_string()
}
