//! Sandboxed command wrapping.
//!
//! Sandboxed runs execute inside the session's container via
//! `docker exec -i [-w dir] [-e K=V]... <container> sh -lc '<cmd>'`.
//! Every argument of the inner command is single-quoted; untrusted prompt
//! contents must never be interpretable by the shell.

use std::collections::HashMap;

use openclaw_core::backend::{BackendSpec, SandboxMode};

use super::types::SandboxContext;

/// Single-quote one shell argument (`'` becomes `'\''`).
pub fn shell_quote(arg: &str) -> String {
    let mut quoted = String::with_capacity(arg.len() + 2);
    quoted.push('\'');
    for ch in arg.chars() {
        if ch == '\'' {
            quoted.push_str("'\\''");
        } else {
            quoted.push(ch);
        }
    }
    quoted.push('\'');
    quoted
}

/// Whether a run must be wrapped in the sandbox container.
pub fn should_sandbox(spec: &BackendSpec, sandbox: Option<&SandboxContext>) -> bool {
    match spec.sandbox_mode {
        SandboxMode::Off => false,
        SandboxMode::Inherit | SandboxMode::Always => sandbox.is_some_and(|ctx| ctx.enabled),
    }
}

/// The environment visible to a sandboxed command: default PATH, then the
/// caller env, the container env, and backend overrides, later wins.
pub fn sandbox_env(
    caller_env: &HashMap<String, String>,
    ctx: &SandboxContext,
    spec: &BackendSpec,
) -> HashMap<String, String> {
    let mut env = HashMap::new();
    env.insert(
        "PATH".to_string(),
        "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin".to_string(),
    );
    env.extend(caller_env.clone());
    env.extend(ctx.env.clone());
    env.extend(spec.sandbox_overrides.clone());
    env
}

/// Wrap `argv` as a `docker exec` invocation of the session's container.
pub fn wrap_sandboxed(
    argv: &[String],
    ctx: &SandboxContext,
    env: &HashMap<String, String>,
) -> Vec<String> {
    let mut wrapped = vec!["docker".to_string(), "exec".to_string(), "-i".to_string()];
    if let Some(workdir) = &ctx.workdir {
        wrapped.push("-w".to_string());
        wrapped.push(workdir.clone());
    }

    let mut env_keys: Vec<&String> = env.keys().collect();
    env_keys.sort();
    for key in env_keys {
        wrapped.push("-e".to_string());
        wrapped.push(format!("{key}={}", env[key]));
    }

    wrapped.push(ctx.container.clone());
    wrapped.push("sh".to_string());
    wrapped.push("-lc".to_string());
    wrapped.push(
        argv.iter()
            .map(|arg| shell_quote(arg))
            .collect::<Vec<_>>()
            .join(" "),
    );
    wrapped
}
