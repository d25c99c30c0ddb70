//! Gateway RPC parameter and reply types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Routing hints for delivering a message back to its origin channel.
///
/// All fields optional; an empty origin routes by session alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OriginRef {
    pub channel: Option<String>,
    pub account_id: Option<String>,
    pub to: Option<String>,
    pub thread_id: Option<String>,
}

impl OriginRef {
    /// Merge two origins; fields of `self` win, `fallback` fills the gaps.
    pub fn merged_over(&self, fallback: &Self) -> Self {
        Self {
            channel: self.channel.clone().or_else(|| fallback.channel.clone()),
            account_id: self
                .account_id
                .clone()
                .or_else(|| fallback.account_id.clone()),
            to: self.to.clone().or_else(|| fallback.to.clone()),
            thread_id: self
                .thread_id
                .clone()
                .or_else(|| fallback.thread_id.clone()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.channel.is_none() && self.account_id.is_none() && self.to.is_none() && self.thread_id.is_none()
    }
}

/// Parameters for the `agent` method.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentParams {
    pub session_key: String,
    pub message: String,
    #[serde(flatten)]
    pub origin: OriginRef,
    pub deliver: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

impl AgentParams {
    pub fn new(session_key: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            session_key: session_key.into(),
            message: message.into(),
            origin: OriginRef::default(),
            deliver: true,
            idempotency_key: None,
        }
    }

    pub fn with_origin(mut self, origin: OriginRef) -> Self {
        self.origin = origin;
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub(crate) fn into_value(self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Terminal status reported by `agent.wait`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitStatus {
    Ok,
    Error,
    Timeout,
}

/// Reply of the `agent.wait` method.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentWaitReply {
    pub status: WaitStatus,
    #[serde(default)]
    pub started_at: Option<u64>,
    #[serde(default)]
    pub ended_at: Option<u64>,
    #[serde(default)]
    pub error: Option<String>,
}
