//! Output parsing for CLI backend protocols.
//!
//! Backends emit one of four stdout formats (`text`, `json`, `jsonl`,
//! `stream-jsonl`). The parser is a tolerant reader: unknown fields and
//! event types are ignored, and a stdout that yields no JSON at all returns
//! `None` so callers can fall back to raw text.

mod parser;
mod types;

pub use parser::{detect_pending_interaction, parse_output};
pub use types::{
    CliOutput, CliToolResult, CliToolUse, CliUsage, DetectedInteraction, InteractionOption,
    PendingInteractionKind,
};
