//! Command-line construction from a backend spec and a run request.

use std::collections::HashMap;

use openclaw_core::backend::{
    BackendSpec, ImageMode, InputMode, SessionMode, SystemPromptWhen, resolve_model_alias,
};
use serde_json::json;

use super::types::RunRequest;

/// Placeholder substituted with the CLI session id in spec arg templates.
const SESSION_ID_PLACEHOLDER: &str = "{sessionId}";

/// A fully built child invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// argv including the command at index 0.
    pub argv: Vec<String>,
    pub stdin_payload: Option<String>,
    pub env: HashMap<String, String>,
    pub clear_env: bool,
    /// Model after alias resolution, when one was requested.
    pub resolved_model: Option<String>,
}

/// Build the argv, stdin payload, and environment for one run.
pub fn build_invocation(spec: &BackendSpec, req: &RunRequest) -> Invocation {
    let mut argv = vec![spec.command.clone()];
    let resuming = req.is_resume() && !spec.resume_args.is_empty();

    if resuming {
        let session_id = req.cli_session_id.as_deref().unwrap_or_default();
        argv.extend(
            spec.resume_args
                .iter()
                .map(|arg| arg.replace(SESSION_ID_PLACEHOLDER, session_id)),
        );
    } else {
        argv.extend(spec.args.iter().cloned());
    }

    let resolved_model = req.model.as_deref().map(|m| resolve_model_alias(spec, m));
    if let (Some(flag), Some(model)) = (&spec.model_arg, &resolved_model) {
        argv.push(flag.clone());
        argv.push(model.clone());
    }

    if let (Some(flag), Some(prompt)) = (&spec.system_prompt_arg, &req.system_prompt) {
        let include = match spec.system_prompt_when {
            SystemPromptWhen::First => req.cli_session_id.is_none(),
            SystemPromptWhen::Always => true,
            SystemPromptWhen::Never => false,
        };
        if include {
            argv.push(flag.clone());
            argv.push(prompt.clone());
        }
    }

    // Resume args already carry the session id; session flags apply only to
    // the non-resume path.
    if !resuming {
        let session_id = match spec.session_mode {
            SessionMode::Always => Some(
                req.cli_session_id
                    .clone()
                    .unwrap_or_else(|| req.session_id.clone()),
            ),
            SessionMode::Existing => req.cli_session_id.clone(),
            SessionMode::None => None,
        };
        if let Some(id) = session_id {
            if let Some(flag) = &spec.session_arg {
                argv.push(flag.clone());
                argv.push(id.clone());
            }
            argv.extend(
                spec.session_args
                    .iter()
                    .map(|arg| arg.replace(SESSION_ID_PLACEHOLDER, &id)),
            );
        }
    }

    if let Some(flag) = &spec.image_arg
        && !req.images.is_empty()
    {
        match spec.image_mode {
            ImageMode::Repeat => {
                for image in &req.images {
                    argv.push(flag.clone());
                    argv.push(image.display().to_string());
                }
            }
            ImageMode::List => {
                argv.push(flag.clone());
                argv.extend(req.images.iter().map(|p| p.display().to_string()));
            }
        }
    }

    let mut stdin_payload = None;
    if let Some(tool_result) = &req.tool_result
        && req.is_resume()
    {
        // Interaction resumption: the tool result is the entire input.
        stdin_payload = Some(
            json!({
                "type": "tool_result",
                "tool_use_id": tool_result.tool_use_id,
                "content": tool_result.content,
            })
            .to_string(),
        );
    } else {
        let prompt_fits_arg = spec
            .max_prompt_arg_chars
            .is_none_or(|max| req.prompt.chars().count() <= max);
        match spec.input {
            InputMode::Arg if prompt_fits_arg => argv.push(req.prompt.clone()),
            InputMode::Arg | InputMode::Stdin => stdin_payload = Some(req.prompt.clone()),
        }
    }

    Invocation {
        argv,
        stdin_payload,
        env: spec.env.clone(),
        clear_env: spec.clear_env,
        resolved_model,
    }
}
