//! Stale-process cleanup before each run.
//!
//! CLI backends occasionally leave suspended children behind (a `claude`
//! stopped under job control, or an orphaned resume of the same session).
//! Before each run the sweep kills two classes of strays:
//! 1. stopped processes of this backend, once their count exceeds a
//!    threshold;
//! 2. on resume, any process already attached to the same CLI session id.

use regex::Regex;
use tracing::{debug, warn};

use openclaw_core::backend::BackendSpec;

use super::types::RunRequest;

/// One row of the platform process listing.
#[derive(Debug, Clone)]
pub struct ProcessEntry {
    pub pid: i32,
    /// State column (`STAT`); a `T` marks a stopped process.
    pub state: String,
    pub command: String,
}

/// Pluggable process listing, `ps -ax` in production.
pub trait ProcessLister: Send + Sync {
    fn list(&self) -> std::io::Result<Vec<ProcessEntry>>;
}

/// `ps -ax` backed lister. Returns an empty listing on non-unix platforms.
#[derive(Debug, Default, Clone, Copy)]
pub struct PsProcessLister;

impl ProcessLister for PsProcessLister {
    fn list(&self) -> std::io::Result<Vec<ProcessEntry>> {
        #[cfg(unix)]
        {
            let output = std::process::Command::new("ps").arg("-ax").output()?;
            Ok(parse_ps_output(&String::from_utf8_lossy(&output.stdout)))
        }
        #[cfg(not(unix))]
        {
            Ok(Vec::new())
        }
    }
}

/// Parse `ps -ax` output: `PID TTY STAT TIME COMMAND`.
pub fn parse_ps_output(text: &str) -> Vec<ProcessEntry> {
    text.lines()
        .skip(1)
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let pid = parts.next()?.parse().ok()?;
            let _tty = parts.next()?;
            let state = parts.next()?.to_string();
            let _time = parts.next()?;
            let command = parts.collect::<Vec<_>>().join(" ");
            Some(ProcessEntry { pid, state, command })
        })
        .collect()
}

/// Pre-run sweep of stale backend processes.
pub struct StaleProcessCleaner {
    lister: Box<dyn ProcessLister>,
    /// Stopped processes tolerated before the sweep kills them all.
    stopped_threshold: usize,
}

impl StaleProcessCleaner {
    pub fn new(lister: Box<dyn ProcessLister>, stopped_threshold: usize) -> Self {
        Self {
            lister,
            stopped_threshold,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(Box::new(PsProcessLister), 10)
    }

    /// Compute the pids the sweep would kill, without killing anything.
    pub fn plan(&self, spec: &BackendSpec, req: &RunRequest) -> Vec<i32> {
        let entries = match self.lister.list() {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "Process listing failed, skipping stale sweep");
                return Vec::new();
            }
        };

        let mut targets = Vec::new();

        let stopped: Vec<&ProcessEntry> = entries
            .iter()
            .filter(|entry| entry.command.contains(&spec.command) && entry.state.contains('T'))
            .collect();
        if stopped.len() > self.stopped_threshold {
            warn!(
                count = stopped.len(),
                threshold = self.stopped_threshold,
                backend = %spec.command,
                "Stopped backend processes over threshold, scheduling kill"
            );
            targets.extend(stopped.iter().map(|entry| entry.pid));
        }

        if let Some(resume_re) = resume_pattern(spec, req) {
            for entry in &entries {
                if resume_re.is_match(&entry.command) && !targets.contains(&entry.pid) {
                    debug!(pid = entry.pid, "Killing stale resume of the same CLI session");
                    targets.push(entry.pid);
                }
            }
        }

        targets
    }

    /// Run the sweep, force-killing the planned pids.
    pub fn sweep(&self, spec: &BackendSpec, req: &RunRequest) -> Vec<i32> {
        let targets = self.plan(spec, req);
        for pid in &targets {
            force_kill(*pid);
        }
        targets
    }
}

/// Command-line pattern matching a resume of this run's CLI session.
fn resume_pattern(spec: &BackendSpec, req: &RunRequest) -> Option<Regex> {
    let session_id = req.cli_session_id.as_deref()?;
    if !spec.resume_args.iter().any(|a| a.contains("{sessionId}")) {
        return None;
    }
    let resume = spec
        .resume_args
        .iter()
        .map(|arg| regex::escape(&arg.replace("{sessionId}", session_id)))
        .collect::<Vec<_>>()
        .join("\\s+");
    Regex::new(&format!("{}.*{resume}", regex::escape(&spec.command))).ok()
}

#[cfg(unix)]
fn force_kill(pid: i32) {
    // SAFETY: kill(2) on an arbitrary pid is memory-safe; the worst outcome
    // of a stale pid is ESRCH, which is logged and ignored.
    #[allow(unsafe_code)]
    let ret = unsafe { libc::kill(pid, libc::SIGKILL) };
    if ret != 0 {
        let err = std::io::Error::last_os_error();
        debug!(pid, error = %err, "Force kill failed");
    }
}

#[cfg(not(unix))]
fn force_kill(_pid: i32) {}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    struct FixedLister(Vec<ProcessEntry>);

    impl ProcessLister for FixedLister {
        fn list(&self) -> std::io::Result<Vec<ProcessEntry>> {
            Ok(self.0.clone())
        }
    }

    fn entry(pid: i32, state: &str, command: &str) -> ProcessEntry {
        ProcessEntry {
            pid,
            state: state.to_string(),
            command: command.to_string(),
        }
    }

    fn claude_spec() -> BackendSpec {
        BackendSpec {
            command: "claude".to_string(),
            resume_args: vec!["--resume".to_string(), "{sessionId}".to_string()],
            ..BackendSpec::default()
        }
    }

    fn request(cli_session_id: Option<&str>) -> RunRequest {
        RunRequest {
            session_id: "s".to_string(),
            session_key: "agent:main".to_string(),
            session_file: PathBuf::new(),
            workspace_dir: PathBuf::new(),
            prompt: String::new(),
            provider: "claude".to_string(),
            model: None,
            system_prompt: None,
            timeout_ms: 1_000,
            run_id: "r".to_string(),
            images: Vec::new(),
            cli_session_id: cli_session_id.map(String::from),
            tool_result: None,
            sandbox: None,
        }
    }

    #[test]
    fn parse_ps_rows() {
        let text = "  PID TTY      STAT   TIME COMMAND\n\
                    123 pts/0    T      0:01 claude -p hi\n\
                    456 ?        Ss     0:00 /usr/bin/sshd -D\n";
        let entries = parse_ps_output(text);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].pid, 123);
        assert_eq!(entries[0].state, "T");
        assert_eq!(entries[0].command, "claude -p hi");
    }

    #[test]
    fn under_threshold_keeps_stopped_processes() {
        let cleaner = StaleProcessCleaner::new(
            Box::new(FixedLister(vec![
                entry(1, "T", "claude -p a"),
                entry(2, "T", "claude -p b"),
            ])),
            10,
        );
        assert!(cleaner.plan(&claude_spec(), &request(None)).is_empty());
    }

    #[test]
    fn over_threshold_kills_all_stopped() {
        let entries: Vec<ProcessEntry> = (1..=4)
            .map(|pid| entry(pid, "T", "claude -p x"))
            .collect();
        let cleaner = StaleProcessCleaner::new(Box::new(FixedLister(entries)), 3);

        let plan = cleaner.plan(&claude_spec(), &request(None));
        assert_eq!(plan, vec![1, 2, 3, 4]);
    }

    #[test]
    fn running_processes_not_counted_as_stopped() {
        let cleaner = StaleProcessCleaner::new(
            Box::new(FixedLister(vec![
                entry(1, "Ss", "claude -p a"),
                entry(2, "R+", "claude -p b"),
            ])),
            0,
        );
        assert!(cleaner.plan(&claude_spec(), &request(None)).is_empty());
    }

    #[test]
    fn resume_kills_same_session_process() {
        let cleaner = StaleProcessCleaner::new(
            Box::new(FixedLister(vec![
                entry(7, "Ss", "claude --resume sess-42 -p continue"),
                entry(8, "Ss", "claude --resume other -p continue"),
            ])),
            10,
        );

        let plan = cleaner.plan(&claude_spec(), &request(Some("sess-42")));
        assert_eq!(plan, vec![7]);
    }

    #[test]
    fn no_resume_pattern_without_cli_session() {
        let cleaner = StaleProcessCleaner::new(
            Box::new(FixedLister(vec![entry(
                7,
                "Ss",
                "claude --resume sess-42 -p continue",
            )])),
            10,
        );
        assert!(cleaner.plan(&claude_spec(), &request(None)).is_empty());
    }
}
