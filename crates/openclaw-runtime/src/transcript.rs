//! Session transcript writer.
//!
//! Transcripts are append-only JSONL files, one per session, consumed later
//! by memory indexing. The first line is a `session` header; subsequent
//! lines are records with `role` ∈ {`user`, `assistant`, `toolResult`}.
//! Transcript writing never fails a run: errors are logged and swallowed.

use std::path::Path;

use serde_json::{Value, json};
use tokio::io::AsyncWriteExt;
use tracing::warn;
use uuid::Uuid;

use openclaw_core::cli_output::CliOutput;

use crate::clock::now_ms;
use crate::events::{AgentEvent, EventBus};

/// Transcript schema version written into the header record.
pub const TRANSCRIPT_VERSION: u32 = 1;

/// Appends run records to per-session transcript files.
pub struct TranscriptWriter {
    bus: EventBus,
}

impl TranscriptWriter {
    pub fn new(bus: EventBus) -> Self {
        Self { bus }
    }

    /// Append the tool events of a finished run to the session transcript.
    ///
    /// Runs without tool events leave no transcript trace. Errors never
    /// propagate; a transcript gap is preferable to a failed run.
    pub async fn append_run(
        &self,
        session_key: &str,
        path: &Path,
        cwd: &Path,
        session_id: &str,
        output: &CliOutput,
    ) {
        if output.tool_uses.is_empty() && output.tool_results.is_empty() {
            return;
        }

        match append_records(path, cwd, session_id, output).await {
            Ok(()) => self.bus.publish(AgentEvent::SessionTranscriptUpdate {
                session_key: session_key.to_string(),
                path: path.display().to_string(),
            }),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Transcript append failed");
            }
        }
    }
}

async fn append_records(
    path: &Path,
    cwd: &Path,
    session_id: &str,
    output: &CliOutput,
) -> std::io::Result<()> {
    let mut buffer = String::new();

    let fresh = tokio::fs::metadata(path)
        .await
        .map_or(true, |meta| meta.len() == 0);
    let now = now_ms();
    if fresh {
        push_line(
            &mut buffer,
            &json!({
                "type": "session",
                "version": TRANSCRIPT_VERSION,
                "id": session_id,
                "timestamp": now,
                "cwd": cwd.display().to_string(),
            }),
        );
    }

    let mut content: Vec<Value> = output
        .tool_uses
        .iter()
        .map(|tu| {
            json!({
                "type": "toolCall",
                "id": tu.id,
                "name": tu.name,
                "input": tu.input,
            })
        })
        .collect();
    if !output.text.is_empty() {
        content.push(json!({ "type": "text", "text": output.text }));
    }

    let stop_reason = if output.tool_uses.is_empty() { "stop" } else { "toolUse" };
    push_line(
        &mut buffer,
        &json!({
            "role": "assistant",
            "id": Uuid::new_v4().to_string(),
            "timestamp": now,
            "content": content,
            "stopReason": stop_reason,
            "usage": output.usage,
        }),
    );

    // Tool results follow the assistant record with strictly increasing
    // timestamps, preserving parser order.
    for (i, result) in output.tool_results.iter().enumerate() {
        push_line(
            &mut buffer,
            &json!({
                "role": "toolResult",
                "id": Uuid::new_v4().to_string(),
                "timestamp": now + 1 + i as u64,
                "toolUseId": result.tool_use_id,
                "content": result.content,
                "isError": result.is_error,
            }),
        );
    }

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(buffer.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}

fn push_line(buffer: &mut String, record: &Value) {
    buffer.push_str(&record.to_string());
    buffer.push('\n');
}

/// The latest assistant reply text in a transcript, for announce summaries.
pub async fn latest_assistant_text(path: &Path) -> Option<String> {
    latest_assistant_record(path)
        .await
        .map(|(text, _)| text)
        .filter(|text| !text.is_empty())
}

/// Accumulated usage across all assistant records of a transcript.
pub async fn transcript_usage(path: &Path) -> Option<openclaw_core::cli_output::CliUsage> {
    let content = tokio::fs::read_to_string(path).await.ok()?;
    let mut usage = openclaw_core::cli_output::CliUsage::default();
    for line in content.lines() {
        let Ok(record) = serde_json::from_str::<Value>(line) else {
            continue;
        };
        if record.get("role").and_then(Value::as_str) != Some("assistant") {
            continue;
        }
        if let Some(value) = record.get("usage") {
            usage.merge(openclaw_core::cli_output::CliUsage::from_value(value));
        }
    }
    (!usage.is_empty()).then_some(usage)
}

async fn latest_assistant_record(path: &Path) -> Option<(String, Value)> {
    let content = tokio::fs::read_to_string(path).await.ok()?;
    let mut latest = None;
    for line in content.lines() {
        let Ok(record) = serde_json::from_str::<Value>(line) else {
            continue;
        };
        if record.get("role").and_then(Value::as_str) != Some("assistant") {
            continue;
        }
        let text: String = record
            .get("content")
            .and_then(Value::as_array)
            .map(|blocks| {
                blocks
                    .iter()
                    .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
                    .filter_map(|b| b.get("text").and_then(Value::as_str))
                    .collect()
            })
            .unwrap_or_default();
        if !text.is_empty() {
            latest = Some((text, record));
        }
    }
    latest
}
