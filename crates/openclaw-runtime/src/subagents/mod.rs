//! Subagent orchestration: admission control, lifecycle tracking, durable
//! registry, the announce flow, and the LLM-facing tool surface.

pub mod announce;
pub mod manager;
pub mod registry;
pub mod tools;
pub mod types;

pub use announce::{AnnounceFlow, AnnounceRequest, extract_summary};
pub use manager::{SessionCounts, SubagentLimits, SubagentManager};
pub use registry::SubagentRegistry;
pub use tools::{SpawnArgs, SubagentTools};
pub use types::{
    DenyReason, OutcomeStatus, RegisterError, RemoveError, ReserveOutcome, SubagentContext,
    SubagentOutcome, SubagentReservation, SubagentResult, SubagentRunRecord,
};
