//! Parsed CLI output types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Token usage accumulated across a run's events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CliUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_input_tokens: u64,
    pub cache_write_input_tokens: u64,
    pub total_tokens: u64,
}

impl CliUsage {
    /// Read usage from a JSON object, accepting snake_case and camelCase keys.
    pub fn from_value(val: &Value) -> Self {
        let field = |snake: &str, camel: &str| {
            val.get(snake)
                .or_else(|| val.get(camel))
                .and_then(Value::as_u64)
                .unwrap_or(0)
        };
        Self {
            input_tokens: field("input_tokens", "inputTokens"),
            output_tokens: field("output_tokens", "outputTokens"),
            cache_read_input_tokens: field("cache_read_input_tokens", "cacheReadInputTokens"),
            cache_write_input_tokens: field("cache_write_input_tokens", "cacheWriteInputTokens"),
            total_tokens: field("total_tokens", "totalTokens"),
        }
    }

    /// Fold another usage sample into this one.
    pub fn merge(&mut self, other: Self) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cache_read_input_tokens += other.cache_read_input_tokens;
        self.cache_write_input_tokens += other.cache_write_input_tokens;
        self.total_tokens += other.total_tokens;
    }

    /// True when no counter has been populated.
    pub const fn is_empty(&self) -> bool {
        self.input_tokens == 0
            && self.output_tokens == 0
            && self.cache_read_input_tokens == 0
            && self.cache_write_input_tokens == 0
            && self.total_tokens == 0
    }
}

/// A tool invocation requested by the assistant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CliToolUse {
    pub id: String,
    pub name: String,
    /// Argument name → value mapping as emitted by the backend.
    pub input: Value,
}

/// A tool execution result echoed back through the stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CliToolResult {
    pub tool_use_id: String,
    pub content: String,
    pub is_error: bool,
}

/// One selectable option of a pending question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionOption {
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// The two interaction kinds a backend can park a run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingInteractionKind {
    AskUserQuestion,
    PlanApproval,
}

/// An unanswered question detected at the tail of a run's tool stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectedInteraction {
    pub kind: PendingInteractionKind,
    pub tool_call_id: String,
    pub question: String,
    #[serde(default)]
    pub options: Vec<InteractionOption>,
    #[serde(default)]
    pub multi_select: bool,
}

/// Everything extracted from one CLI run's stdout.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CliOutput {
    pub text: String,
    pub session_id: Option<String>,
    pub usage: CliUsage,
    pub tool_uses: Vec<CliToolUse>,
    pub tool_results: Vec<CliToolResult>,
    pub pending_interaction: Option<DetectedInteraction>,
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn usage_reads_both_casings() {
        let snake = CliUsage::from_value(&json!({"input_tokens": 10, "output_tokens": 4}));
        assert_eq!(snake.input_tokens, 10);
        let camel = CliUsage::from_value(&json!({"inputTokens": 7, "cacheReadInputTokens": 2}));
        assert_eq!(camel.input_tokens, 7);
        assert_eq!(camel.cache_read_input_tokens, 2);
    }

    #[test]
    fn usage_merge_sums() {
        let mut usage = CliUsage::from_value(&json!({"input_tokens": 10}));
        usage.merge(CliUsage::from_value(&json!({"input_tokens": 5, "output_tokens": 3})));
        assert_eq!(usage.input_tokens, 15);
        assert_eq!(usage.output_tokens, 3);
        assert!(!usage.is_empty());
    }

    #[test]
    fn interaction_kind_serializes_snake_case() {
        let kind = serde_json::to_string(&PendingInteractionKind::AskUserQuestion).unwrap();
        assert_eq!(kind, "\"ask_user_question\"");
    }
}
