//! Tolerant parser for the four CLI stdout formats.

use serde_json::Value;
use tracing::debug;

use crate::backend::OutputMode;

use super::types::{
    CliOutput, CliToolResult, CliToolUse, CliUsage, DetectedInteraction, InteractionOption,
    PendingInteractionKind,
};

/// Parse a run's stdout according to the backend's output mode.
///
/// Returns `None` when the stdout contains no parseable JSON at all (except
/// in `text` mode, which never fails); callers fall back to treating stdout
/// as raw text.
pub fn parse_output(mode: OutputMode, stdout: &str, session_id_fields: &[String]) -> Option<CliOutput> {
    match mode {
        OutputMode::Text => Some(CliOutput {
            text: stdout.trim().to_string(),
            ..CliOutput::default()
        }),
        OutputMode::Json => parse_json(stdout, session_id_fields),
        OutputMode::Jsonl => parse_jsonl(stdout, session_id_fields),
        OutputMode::StreamJsonl => parse_stream_jsonl(stdout, session_id_fields),
    }
}

fn parse_json(stdout: &str, session_id_fields: &[String]) -> Option<CliOutput> {
    let raw: Value = serde_json::from_str(stdout.trim()).ok()?;

    let session_id = scan_session_id(&raw, session_id_fields);
    let usage = raw.get("usage").map(CliUsage::from_value).unwrap_or_default();
    let text = extract_object_text(&raw);

    Some(CliOutput {
        text,
        session_id,
        usage,
        ..CliOutput::default()
    })
}

fn parse_jsonl(stdout: &str, session_id_fields: &[String]) -> Option<CliOutput> {
    let mut parsed_any = false;
    let mut out = CliOutput::default();
    let mut texts: Vec<String> = Vec::new();

    for line in stdout.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(raw) = serde_json::from_str::<Value>(line) else {
            continue;
        };
        parsed_any = true;

        if out.session_id.is_none() {
            out.session_id = scan_session_id(&raw, session_id_fields);
        }
        if let Some(usage) = raw.get("usage") {
            out.usage.merge(CliUsage::from_value(usage));
        }
        let text = extract_object_text(&raw);
        if !text.is_empty() {
            texts.push(text);
        }
    }

    if !parsed_any {
        return None;
    }
    out.text = texts.join("\n");
    Some(out)
}

fn parse_stream_jsonl(stdout: &str, session_id_fields: &[String]) -> Option<CliOutput> {
    let mut parsed_any = false;
    let mut out = CliOutput::default();
    let mut root_session_id: Option<String> = None;
    let mut field_session_id: Option<String> = None;
    let mut result_fallback: Option<String> = None;

    for line in stdout.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(raw) = serde_json::from_str::<Value>(line) else {
            continue;
        };
        parsed_any = true;

        if root_session_id.is_none() {
            root_session_id = raw
                .get("session_id")
                .and_then(Value::as_str)
                .map(String::from);
        }
        if field_session_id.is_none() {
            field_session_id = scan_session_id(&raw, session_id_fields);
        }

        match raw.get("type").and_then(Value::as_str) {
            Some("assistant") => collect_assistant(&raw, &mut out),
            Some("user") => collect_tool_results(&raw, &mut out.tool_results),
            Some("result") => {
                if let Some(usage) = raw.get("usage") {
                    out.usage.merge(CliUsage::from_value(usage));
                }
                result_fallback = raw
                    .get("result")
                    .and_then(Value::as_str)
                    .map(String::from);
            }
            Some(other) => debug!(event_type = other, "Ignoring unknown stream event"),
            None => {}
        }
    }

    if !parsed_any {
        return None;
    }

    if out.text.is_empty()
        && let Some(fallback) = result_fallback
    {
        out.text = fallback;
    }
    out.session_id = root_session_id.or(field_session_id);
    out.pending_interaction = detect_pending_interaction(&out.tool_uses, &out.tool_results);
    Some(out)
}

fn collect_assistant(raw: &Value, out: &mut CliOutput) {
    let Some(message) = raw.get("message") else {
        return;
    };
    if let Some(usage) = message.get("usage") {
        out.usage.merge(CliUsage::from_value(usage));
    }
    let Some(blocks) = message.get("content").and_then(Value::as_array) else {
        return;
    };
    for block in blocks {
        match block.get("type").and_then(Value::as_str) {
            Some("text") => {
                if let Some(text) = block.get("text").and_then(Value::as_str) {
                    out.text.push_str(text);
                }
            }
            Some("tool_use") => {
                let (Some(id), Some(name)) = (
                    block.get("id").and_then(Value::as_str),
                    block.get("name").and_then(Value::as_str),
                ) else {
                    continue;
                };
                out.tool_uses.push(CliToolUse {
                    id: id.to_string(),
                    name: name.to_string(),
                    input: block.get("input").cloned().unwrap_or(Value::Null),
                });
            }
            _ => {}
        }
    }
}

fn collect_tool_results(raw: &Value, results: &mut Vec<CliToolResult>) {
    let Some(blocks) = raw
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(Value::as_array)
    else {
        return;
    };
    for block in blocks {
        if block.get("type").and_then(Value::as_str) != Some("tool_result") {
            continue;
        }
        let Some(tool_use_id) = block.get("tool_use_id").and_then(Value::as_str) else {
            continue;
        };
        results.push(CliToolResult {
            tool_use_id: tool_use_id.to_string(),
            content: flatten_result_content(block.get("content")),
            is_error: block
                .get("is_error")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        });
    }
}

/// Flatten a `tool_result` content field: strings pass through, arrays
/// concatenate each element's `text` in order.
fn flatten_result_content(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| item.get("text").and_then(Value::as_str))
            .collect(),
        _ => String::new(),
    }
}

/// Scan the configured id fields on a JSON object, first hit wins.
fn scan_session_id(raw: &Value, session_id_fields: &[String]) -> Option<String> {
    session_id_fields
        .iter()
        .find_map(|field| raw.get(field).and_then(Value::as_str))
        .map(String::from)
}

/// Text extraction for `json`/`jsonl` objects: `message`, `content`,
/// `result`, then the root itself when it is a plain string.
fn extract_object_text(raw: &Value) -> String {
    let mut parts: Vec<String> = Vec::new();
    for field in ["message", "content", "result"] {
        if let Some(text) = raw.get(field).and_then(extract_text_value) {
            parts.push(text);
        }
    }
    if parts.is_empty()
        && let Some(text) = raw.as_str()
    {
        parts.push(text.trim().to_string());
    }
    parts.join("\n")
}

/// A field's text: a string, an object with `text`, or an array of text
/// blocks joined in order.
fn extract_text_value(val: &Value) -> Option<String> {
    match val {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Object(_) => val
            .get("text")
            .and_then(Value::as_str)
            .map(|s| s.trim().to_string()),
        Value::Array(items) => {
            let joined: String = items
                .iter()
                .filter_map(|item| item.get("text").and_then(Value::as_str))
                .collect();
            (!joined.is_empty()).then_some(joined)
        }
        _ => None,
    }
}

/// Find the unanswered question at the tail of the tool stream, if any.
///
/// The candidate is the highest-indexed `tool_use` with no matching
/// `tool_result`; only `AskUserQuestion` and `ExitPlanMode` produce an
/// interaction. At most one interaction is ever detected.
pub fn detect_pending_interaction(
    tool_uses: &[CliToolUse],
    tool_results: &[CliToolResult],
) -> Option<DetectedInteraction> {
    let dangling = tool_uses
        .iter()
        .rev()
        .find(|tu| !tool_results.iter().any(|tr| tr.tool_use_id == tu.id))?;

    match dangling.name.as_str() {
        "AskUserQuestion" => {
            let question = dangling.input.get("questions")?.get(0)?;
            let text = question.get("question").and_then(Value::as_str)?;
            let options = question
                .get("options")
                .and_then(Value::as_array)
                .map(|opts| {
                    opts.iter()
                        .filter_map(|opt| {
                            Some(InteractionOption {
                                label: opt.get("label").and_then(Value::as_str)?.to_string(),
                                description: opt
                                    .get("description")
                                    .and_then(Value::as_str)
                                    .map(String::from),
                            })
                        })
                        .collect()
                })
                .unwrap_or_default();
            Some(DetectedInteraction {
                kind: PendingInteractionKind::AskUserQuestion,
                tool_call_id: dangling.id.clone(),
                question: text.to_string(),
                options,
                multi_select: question
                    .get("multiSelect")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            })
        }
        "ExitPlanMode" => Some(DetectedInteraction {
            kind: PendingInteractionKind::PlanApproval,
            tool_call_id: dangling.id.clone(),
            question: "AI has finished planning, approve execution?".to_string(),
            options: Vec::new(),
            multi_select: false,
        }),
        _ => None,
    }
}
