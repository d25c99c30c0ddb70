//! Dispatcher-facing interfaces.
//!
//! The per-session dispatcher loop lives in the embedding gateway process.
//! The announce flow only needs three capabilities from it, expressed as the
//! [`Dispatcher`] trait so tests and headless deployments can run against a
//! null implementation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Capabilities the announce flow needs from the session dispatcher.
pub trait Dispatcher: Send + Sync {
    /// Inject a message into the session's running LLM run so it arrives
    /// mid-dialogue. Returns `false` when no run is active or the runner
    /// does not support steering.
    fn try_steer(&self, session_key: &str, message: &str) -> bool;

    /// Queue an announcement behind the session's active run. Returns
    /// `false` when the session is idle, in which case the caller delivers
    /// directly via the gateway.
    fn queue_announcement(&self, session_key: &str, message: &str) -> bool;

    /// Wake the dispatcher loop for its next poll.
    fn request_heartbeat(&self);
}

/// Dispatcher that never steers and never queues.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDispatcher;

impl Dispatcher for NullDispatcher {
    fn try_steer(&self, _session_key: &str, _message: &str) -> bool {
        false
    }

    fn queue_announcement(&self, _session_key: &str, _message: &str) -> bool {
        false
    }

    fn request_heartbeat(&self) {}
}

/// Coalesces heartbeat requests so bursts of subagent completions wake the
/// dispatcher at most once per interval.
pub struct CoalescedHeartbeat {
    dispatcher: Arc<dyn Dispatcher>,
    min_interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl CoalescedHeartbeat {
    /// Default coalescing window between forwarded heartbeats.
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

    pub fn new(dispatcher: Arc<dyn Dispatcher>, min_interval: Duration) -> Self {
        Self {
            dispatcher,
            min_interval,
            last: Mutex::new(None),
        }
    }

    /// Request an immediate heartbeat; suppressed when one was forwarded
    /// within the coalescing window.
    pub fn request(&self) {
        let mut last = self.last.lock();
        let due = last.is_none_or(|at| at.elapsed() >= self.min_interval);
        if due {
            *last = Some(Instant::now());
            drop(last);
            self.dispatcher.request_heartbeat();
        }
    }
}
