//! Durable subagent registry.
//!
//! One JSON file per host holding the list of [`SubagentRunRecord`]s.
//! Every mutation rewrites the file atomically (write to a temp file, then
//! rename) so a crash can never leave a half-written registry behind.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{error, warn};

use super::types::SubagentRunRecord;

/// Durable registry backed by a single JSON file.
#[derive(Debug, Clone)]
pub struct SubagentRegistry {
    path: PathBuf,
}

impl SubagentRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Default per-host registry path: `~/.openclaw/subagents/<host>.json`.
    pub fn default_path() -> Option<PathBuf> {
        let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
        openclaw_core::config::state_dir().map(|dir| dir.join("subagents").join(format!("{host}.json")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load all records. A missing file is an empty registry; a corrupt one
    /// is logged and treated as empty rather than blocking startup.
    pub fn load(&self) -> Vec<SubagentRunRecord> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to read subagent registry");
                return Vec::new();
            }
        };
        match serde_json::from_str(&content) {
            Ok(records) => records,
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "Corrupt subagent registry, starting empty");
                Vec::new()
            }
        }
    }

    /// Persist the full record list with an atomic replace.
    pub fn save(&self, records: &[SubagentRunRecord]) {
        if let Err(e) = self.try_save(records) {
            error!(path = %self.path.display(), error = %e, "Failed to persist subagent registry");
        }
    }

    fn try_save(&self, records: &[SubagentRunRecord]) -> std::io::Result<()> {
        let parent = self
            .path
            .parent()
            .ok_or_else(|| std::io::Error::other("registry path has no parent"))?;
        std::fs::create_dir_all(parent)?;

        let tmp_name = format!(
            ".{}.tmp-{}-{}",
            self.path
                .file_name()
                .and_then(|v| v.to_str())
                .unwrap_or("registry"),
            std::process::id(),
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or(0),
        );
        let tmp_path = parent.join(tmp_name);

        let content = serde_json::to_vec_pretty(records).map_err(std::io::Error::other)?;
        {
            let mut file = std::fs::OpenOptions::new()
                .create_new(true)
                .write(true)
                .open(&tmp_path)?;
            file.write_all(&content)?;
            file.sync_all()?;
        }

        std::fs::rename(&tmp_path, &self.path)?;
        sync_parent_dir(parent)
    }
}

#[cfg(unix)]
fn sync_parent_dir(parent: &Path) -> std::io::Result<()> {
    std::fs::File::open(parent)?.sync_all()
}

#[cfg(not(unix))]
fn sync_parent_dir(_parent: &Path) -> std::io::Result<()> {
    Ok(())
}
