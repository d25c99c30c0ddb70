//! Outbound gateway RPC client.
//!
//! The orchestration core consumes a single `callGateway({method, params})`
//! RPC exposed by the gateway process: `agent`, `agent.wait`,
//! `sessions.patch`, and `sessions.delete`. Transport is JSON over HTTP with
//! an optional bearer token from `OPENCLAW_GATEWAY_TOKEN`; tests inject an
//! in-memory transport instead.

mod types;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::{Value, json};
use thiserror::Error;
use tracing::debug;

pub use types::{AgentParams, AgentWaitReply, OriginRef, WaitStatus};

/// Env var holding the bearer token for outbound gateway calls.
pub const GATEWAY_TOKEN_ENV: &str = "OPENCLAW_GATEWAY_TOKEN";

/// Errors from gateway RPC calls.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Gateway error ({status}): {message}")]
    Status { status: u16, message: String },

    #[error("Invalid gateway reply: {0}")]
    Reply(String),
}

type CallFuture<'a> = Pin<Box<dyn Future<Output = Result<Value, GatewayError>> + Send + 'a>>;

/// Pluggable transport for `callGateway`.
pub trait GatewayTransport: Send + Sync {
    fn call<'a>(&'a self, method: &'a str, params: Value) -> CallFuture<'a>;
}

/// HTTP transport posting `{method, params}` to `{base_url}/rpc`.
pub struct HttpGatewayTransport {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpGatewayTransport {
    /// Create a transport for the given gateway base URL. The bearer token
    /// is read from `OPENCLAW_GATEWAY_TOKEN` when present.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            token: std::env::var(GATEWAY_TOKEN_ENV).ok(),
        }
    }
}

impl GatewayTransport for HttpGatewayTransport {
    fn call<'a>(&'a self, method: &'a str, params: Value) -> CallFuture<'a> {
        Box::pin(async move {
            let url = format!("{}/rpc", self.base_url.trim_end_matches('/'));
            let mut request = self
                .http
                .post(&url)
                .json(&json!({ "method": method, "params": params }));
            if let Some(token) = &self.token {
                request = request.bearer_auth(token);
            }

            let response = request.send().await?;
            let status = response.status();
            if !status.is_success() {
                let message = response.text().await.unwrap_or_default();
                return Err(GatewayError::Status {
                    status: status.as_u16(),
                    message,
                });
            }
            Ok(response.json::<Value>().await?)
        })
    }
}

/// High-level client over the four gateway methods the core consumes.
#[derive(Clone)]
pub struct GatewayClient {
    transport: Arc<dyn GatewayTransport>,
}

impl GatewayClient {
    pub fn new(transport: Arc<dyn GatewayTransport>) -> Self {
        Self { transport }
    }

    /// Convenience constructor over the HTTP transport.
    pub fn http(base_url: impl Into<String>) -> Self {
        Self::new(Arc::new(HttpGatewayTransport::new(base_url)))
    }

    /// Start or continue a run in a session. With `expect_final` the gateway
    /// blocks until the run reaches a terminal state.
    pub async fn agent(&self, params: AgentParams, expect_final: bool) -> Result<Value, GatewayError> {
        let mut body = params.into_value();
        if expect_final
            && let Value::Object(map) = &mut body
        {
            map.insert("expectFinal".to_string(), Value::Bool(true));
        }
        debug!(method = "agent", "Gateway call");
        self.transport.call("agent", body).await
    }

    /// Wait for a run to finalize, bounded by `timeout_ms`.
    pub async fn agent_wait(&self, run_id: &str, timeout_ms: u64) -> Result<AgentWaitReply, GatewayError> {
        let reply = self
            .transport
            .call("agent.wait", json!({ "runId": run_id, "timeoutMs": timeout_ms }))
            .await?;
        serde_json::from_value(reply).map_err(|e| GatewayError::Reply(e.to_string()))
    }

    /// Patch a session's label. Best-effort at call sites.
    pub async fn sessions_patch(&self, key: &str, label: &str) -> Result<(), GatewayError> {
        self.transport
            .call("sessions.patch", json!({ "key": key, "label": label }))
            .await
            .map(|_| ())
    }

    /// Delete a session, optionally with its transcript.
    pub async fn sessions_delete(&self, key: &str, delete_transcript: bool) -> Result<(), GatewayError> {
        self.transport
            .call(
                "sessions.delete",
                json!({ "key": key, "deleteTranscript": delete_transcript }),
            )
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Transport that records calls and replies with a fixed value.
    pub struct RecordingTransport {
        pub calls: Mutex<Vec<(String, Value)>>,
        pub reply: Value,
    }

    impl RecordingTransport {
        pub fn replying(reply: Value) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                reply,
            })
        }
    }

    impl GatewayTransport for RecordingTransport {
        fn call<'a>(&'a self, method: &'a str, params: Value) -> CallFuture<'a> {
            self.calls.lock().push((method.to_string(), params));
            let reply = self.reply.clone();
            Box::pin(async move { Ok(reply) })
        }
    }

    #[tokio::test]
    async fn agent_adds_expect_final() {
        let transport = RecordingTransport::replying(json!({}));
        let client = GatewayClient::new(transport.clone());

        let params = AgentParams::new("session-1", "hello");
        client.agent(params, true).await.unwrap();

        let calls = transport.calls.lock();
        assert_eq!(calls[0].0, "agent");
        assert_eq!(calls[0].1["sessionKey"], "session-1");
        assert_eq!(calls[0].1["expectFinal"], true);
    }

    #[tokio::test]
    async fn agent_wait_parses_reply() {
        let transport = RecordingTransport::replying(json!({
            "status": "ok",
            "startedAt": 100,
            "endedAt": 250,
        }));
        let client = GatewayClient::new(transport);

        let reply = client.agent_wait("run-1", 5_000).await.unwrap();
        assert_eq!(reply.status, WaitStatus::Ok);
        assert_eq!(reply.started_at, Some(100));
        assert_eq!(reply.ended_at, Some(250));
    }

    #[tokio::test]
    async fn sessions_delete_sends_flag() {
        let transport = RecordingTransport::replying(json!({}));
        let client = GatewayClient::new(transport.clone());

        client.sessions_delete("child-1", true).await.unwrap();

        let calls = transport.calls.lock();
        assert_eq!(calls[0].0, "sessions.delete");
        assert_eq!(calls[0].1["deleteTranscript"], true);
    }
}
