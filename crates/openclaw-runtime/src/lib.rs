//! `OpenClaw` Runtime Library
//!
//! The subagent orchestration core of the OpenClaw gateway:
//! - CLI runner: per-backend queue, process executor, sandbox, output parsing
//! - Session transcript writer
//! - Pending-interaction tracking and answer parsing
//! - Subagent admission control, durable registry, and the announce flow
//! - Typing controller bridging run liveness to the outbound channel
//!
//! Channel adapters and the dispatcher loop live in the embedding gateway
//! process; they appear here only as the [`dispatch::Dispatcher`] trait and
//! the [`gateway::GatewayClient`] RPC consumer.

pub mod clock;
pub mod dispatch;
pub mod events;
pub mod gateway;
pub mod interaction;
pub mod runner;
pub mod subagents;
pub mod transcript;
pub mod typing;

pub use dispatch::{Dispatcher, NullDispatcher};
pub use events::{AgentEvent, EventBus};
pub use gateway::GatewayClient;
pub use interaction::InteractionManager;
pub use runner::CliRunner;
pub use subagents::SubagentManager;
pub use typing::TypingController;
