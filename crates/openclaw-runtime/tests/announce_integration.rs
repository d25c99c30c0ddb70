//! Announce-flow scenarios with a scripted gateway transport and dispatcher.

#![allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde_json::{Value, json};
use tempfile::TempDir;

use openclaw_core::cli_output::{CliOutput, CliToolUse, CliUsage};
use openclaw_core::config::{CleanupPolicy, ModelConfig, ModelCost, QueueMode, QueueSettings};
use openclaw_runtime::dispatch::Dispatcher;
use openclaw_runtime::events::EventBus;
use openclaw_runtime::gateway::{GatewayClient, GatewayError, GatewayTransport, OriginRef};
use openclaw_runtime::subagents::{
    AnnounceFlow, AnnounceRequest, ReserveOutcome, SubagentContext, SubagentLimits,
    SubagentManager, SubagentOutcome, SubagentRegistry,
};
use openclaw_runtime::transcript::TranscriptWriter;

type CallFuture<'a> = Pin<Box<dyn Future<Output = Result<Value, GatewayError>> + Send + 'a>>;

/// Transport that answers `agent.wait` with a scripted reply and records
/// every call.
struct ScriptedTransport {
    calls: Mutex<Vec<(String, Value)>>,
    wait_reply: Value,
}

impl ScriptedTransport {
    fn new(wait_reply: Value) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            wait_reply,
        })
    }

    fn calls_for(&self, method: &str) -> Vec<Value> {
        self.calls
            .lock()
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, params)| params.clone())
            .collect()
    }
}

impl GatewayTransport for ScriptedTransport {
    fn call<'a>(&'a self, method: &'a str, params: Value) -> CallFuture<'a> {
        self.calls.lock().push((method.to_string(), params));
        let reply = if method == "agent.wait" {
            self.wait_reply.clone()
        } else {
            json!({})
        };
        Box::pin(async move { Ok(reply) })
    }
}

/// Dispatcher double with switchable steer/queue acceptance.
#[derive(Default)]
struct ScriptedDispatcher {
    accept_steer: AtomicBool,
    accept_queue: AtomicBool,
    steered: Mutex<Vec<(String, String)>>,
    queued: Mutex<Vec<(String, String)>>,
}

impl Dispatcher for ScriptedDispatcher {
    fn try_steer(&self, session_key: &str, message: &str) -> bool {
        if self.accept_steer.load(Ordering::SeqCst) {
            self.steered
                .lock()
                .push((session_key.to_string(), message.to_string()));
            true
        } else {
            false
        }
    }

    fn queue_announcement(&self, session_key: &str, message: &str) -> bool {
        if self.accept_queue.load(Ordering::SeqCst) {
            self.queued
                .lock()
                .push((session_key.to_string(), message.to_string()));
            true
        } else {
            false
        }
    }

    fn request_heartbeat(&self) {}
}

struct Harness {
    manager: Arc<SubagentManager>,
    transport: Arc<ScriptedTransport>,
    dispatcher: Arc<ScriptedDispatcher>,
    flow: AnnounceFlow,
    dir: TempDir,
}

async fn harness() -> Harness {
    let dir = TempDir::new().unwrap();
    let manager = Arc::new(SubagentManager::new(
        SubagentLimits::default(),
        SubagentRegistry::new(dir.path().join("registry.json")),
        EventBus::default(),
    ));
    let transport = ScriptedTransport::new(json!({
        "status": "ok",
        "startedAt": 10_000_u64,
        "endedAt": 195_000_u64,
    }));
    let dispatcher = Arc::new(ScriptedDispatcher::default());

    let mut models = HashMap::new();
    models.insert(
        "claude-sonnet-4-20250514".to_string(),
        ModelConfig {
            cost: Some(ModelCost {
                input: 3.0,
                output: 15.0,
            }),
        },
    );

    let flow = AnnounceFlow::new(
        GatewayClient::new(transport.clone()),
        dispatcher.clone(),
        manager.clone(),
        models,
    );

    Harness {
        manager,
        transport,
        dispatcher,
        flow,
        dir,
    }
}

async fn complete_child(h: &Harness, run_id: &str, plan_mode: bool, cleanup: CleanupPolicy) -> PathBuf {
    let ReserveOutcome::Allowed { reserve_id } = h.manager.reserve_slot("agent:parent") else {
        panic!("reservation failed");
    };
    h.manager
        .register(
            SubagentContext {
                run_id: run_id.to_string(),
                child_session_key: format!("subagent:{run_id}"),
                requester_session_key: "agent:parent".to_string(),
                task: "chase the flaky integration test".to_string(),
                label: Some("flaky-hunt".to_string()),
                started_at_ms: 10_000,
                model: Some("claude-sonnet-4-20250514".to_string()),
                plan_mode,
                cleanup,
                origin: OriginRef {
                    channel: Some("telegram".to_string()),
                    to: Some("chat-77".to_string()),
                    ..OriginRef::default()
                },
            },
            &reserve_id,
        )
        .unwrap();
    h.manager
        .mark_completed(run_id, SubagentOutcome::ok(), None, Some(195_000));

    // Child transcript with a SUMMARY: marker and usage.
    let path = h.dir.path().join(format!("{run_id}.jsonl"));
    let writer = TranscriptWriter::new(EventBus::default());
    let output = CliOutput {
        text: "investigated the retry loop.\nSUMMARY: the test races on port reuse; pinned the port".to_string(),
        usage: CliUsage {
            input_tokens: 1_000_000,
            output_tokens: 100_000,
            ..CliUsage::default()
        },
        tool_uses: vec![CliToolUse {
            id: "t1".to_string(),
            name: "Bash".to_string(),
            input: json!({"command": "cargo test"}),
        }],
        ..CliOutput::default()
    };
    writer
        .append_run(&format!("subagent:{run_id}"), &path, h.dir.path(), run_id, &output)
        .await;
    path
}

fn request(run_id: &str, path: PathBuf, mode: QueueMode) -> AnnounceRequest {
    AnnounceRequest {
        run_id: run_id.to_string(),
        timeout_ms: 600_000,
        child_transcript: Some(path),
        child_cli_session_id: Some("cli-sess-9".to_string()),
        queue: QueueSettings { mode },
        stored_origin: OriginRef {
            channel: Some("discord".to_string()),
            thread_id: Some("thread-3".to_string()),
            ..OriginRef::default()
        },
    }
}

#[tokio::test]
async fn direct_delivery_builds_bounded_message() {
    let h = harness().await;
    let path = complete_child(&h, "run-1", false, CleanupPolicy::Keep).await;

    h.flow.run(request("run-1", path.clone(), QueueMode::Off)).await;

    let agent_calls = h.transport.calls_for("agent");
    assert_eq!(agent_calls.len(), 1);
    let params = &agent_calls[0];
    assert_eq!(params["sessionKey"], "agent:parent");
    assert_eq!(params["expectFinal"], true);
    assert_eq!(params["idempotencyKey"], "subagent-announce-run-1");
    // Requester-captured origin wins; stored fields fill the gaps.
    assert_eq!(params["channel"], "telegram");
    assert_eq!(params["to"], "chat-77");
    assert_eq!(params["threadId"], "thread-3");

    let message = params["message"].as_str().unwrap();
    assert!(message.starts_with("Subagent `flaky-hunt` completed (ok)."));
    assert!(message.contains("Summary: the test races on port reuse; pinned the port"));
    assert!(message.contains("Runtime 3m 05s"));
    assert!(message.contains("tokens 1000000 in / 100000 out"));
    assert!(message.contains("cost $4.5000"));
    assert!(message.contains("Session: subagent:run-1 (cli-sess-9)"));
    assert!(message.contains(&format!("Transcript: {}", path.display())));
    assert_eq!(message.lines().count(), 5);

    // Announce marks the record notified and stores the summary.
    let result = h.manager.get_result("run-1").unwrap();
    assert!(result.notified);
    assert!(result.summary.as_deref().unwrap().starts_with("the test races"));

    // Label patched, no cleanup for keep policy.
    assert_eq!(h.transport.calls_for("sessions.patch").len(), 1);
    assert!(h.transport.calls_for("sessions.delete").is_empty());
}

#[tokio::test]
async fn steer_mode_short_circuits_gateway_delivery() {
    let h = harness().await;
    let path = complete_child(&h, "run-2", false, CleanupPolicy::Keep).await;
    h.dispatcher.accept_steer.store(true, Ordering::SeqCst);

    h.flow.run(request("run-2", path, QueueMode::Steer)).await;

    let steered = h.dispatcher.steered.lock();
    assert_eq!(steered.len(), 1);
    assert_eq!(steered[0].0, "agent:parent");
    assert!(h.transport.calls_for("agent").is_empty());
}

#[tokio::test]
async fn collect_mode_queues_behind_active_run() {
    let h = harness().await;
    let path = complete_child(&h, "run-3", false, CleanupPolicy::Keep).await;
    h.dispatcher.accept_queue.store(true, Ordering::SeqCst);

    h.flow.run(request("run-3", path, QueueMode::Collect)).await;

    assert_eq!(h.dispatcher.queued.lock().len(), 1);
    assert!(h.transport.calls_for("agent").is_empty());
}

#[tokio::test]
async fn steer_backlog_falls_back_to_queue_then_gateway() {
    let h = harness().await;
    let path = complete_child(&h, "run-4", false, CleanupPolicy::Keep).await;
    // Neither steering nor queueing accepted: direct delivery.
    h.flow.run(request("run-4", path, QueueMode::SteerBacklog)).await;

    assert!(h.dispatcher.steered.lock().is_empty());
    assert!(h.dispatcher.queued.lock().is_empty());
    assert_eq!(h.transport.calls_for("agent").len(), 1);
}

#[tokio::test]
async fn plan_mode_asks_for_approval() {
    let h = harness().await;
    let path = complete_child(&h, "run-5", true, CleanupPolicy::Delete).await;

    h.flow.run(request("run-5", path, QueueMode::Off)).await;

    let agent_calls = h.transport.calls_for("agent");
    let message = agent_calls[0]["message"].as_str().unwrap();
    assert!(message.contains("finished planning"));
    assert!(message.contains("approve run-5"));

    // Plan-mode children are never cleaned up before approval.
    assert!(h.transport.calls_for("sessions.delete").is_empty());
}

#[tokio::test]
async fn cleanup_delete_removes_child_session() {
    let h = harness().await;
    let path = complete_child(&h, "run-6", false, CleanupPolicy::Delete).await;

    h.flow.run(request("run-6", path, QueueMode::Off)).await;

    let deletes = h.transport.calls_for("sessions.delete");
    assert_eq!(deletes.len(), 1);
    assert_eq!(deletes[0]["key"], "subagent:run-6");
    assert_eq!(deletes[0]["deleteTranscript"], true);
}

// Completion events from the manager drive the announce flow end to end.
#[tokio::test]
async fn completion_listener_announces_automatically() {
    let dir = TempDir::new().unwrap();
    let bus = EventBus::default();
    let manager = Arc::new(SubagentManager::new(
        SubagentLimits::default(),
        SubagentRegistry::new(dir.path().join("registry.json")),
        bus.clone(),
    ));
    let transport = ScriptedTransport::new(json!({ "status": "ok" }));
    let flow = Arc::new(AnnounceFlow::new(
        GatewayClient::new(transport.clone()),
        Arc::new(ScriptedDispatcher::default()),
        manager.clone(),
        HashMap::new(),
    ));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let listener = flow.spawn_completion_listener(
        &bus,
        |run_id| AnnounceRequest {
            run_id: run_id.to_string(),
            timeout_ms: 1_000,
            child_transcript: None,
            child_cli_session_id: None,
            queue: QueueSettings { mode: QueueMode::Off },
            stored_origin: OriginRef::default(),
        },
        shutdown_rx,
    );

    let ReserveOutcome::Allowed { reserve_id } = manager.reserve_slot("agent:parent") else {
        panic!("reservation failed");
    };
    manager
        .register(
            SubagentContext {
                run_id: "auto-1".to_string(),
                child_session_key: "subagent:auto-1".to_string(),
                requester_session_key: "agent:parent".to_string(),
                task: "quick check".to_string(),
                label: None,
                started_at_ms: 1,
                model: None,
                plan_mode: false,
                cleanup: CleanupPolicy::Keep,
                origin: OriginRef::default(),
            },
            &reserve_id,
        )
        .unwrap();
    manager.mark_completed("auto-1", SubagentOutcome::ok(), None, None);

    // Give the listener a moment to run the flow.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(transport.calls_for("agent").len(), 1);
    assert!(manager.get_result("auto-1").unwrap().notified);

    shutdown_tx.send(true).unwrap();
    listener.await.unwrap();
}

#[tokio::test]
async fn missing_transcript_renders_na() {
    let h = harness().await;
    let _path = complete_child(&h, "run-7", false, CleanupPolicy::Keep).await;

    let req = AnnounceRequest {
        run_id: "run-7".to_string(),
        timeout_ms: 600_000,
        child_transcript: None,
        child_cli_session_id: None,
        queue: QueueSettings { mode: QueueMode::Off },
        stored_origin: OriginRef::default(),
    };
    h.flow.run(req).await;

    let message_calls = h.transport.calls_for("agent");
    let message = message_calls[0]["message"].as_str().unwrap();
    assert!(message.contains("Summary: n/a"));
    assert!(message.contains("tokens n/a"));
    assert!(message.contains("(n/a)"));
    assert!(message.contains("Transcript: n/a"));
}
