//! Typing controller.
//!
//! Keeps a channel's "typing…" indicator alive across long tool executions
//! by re-invoking `on_reply_start` on an interval, bounded by a TTL. When
//! the run completes *and* the dispatcher goes idle the controller seals
//! itself: upstream emitters do not await their listeners, so stale events
//! from a dead tool-stream can arrive after the final reply, and a sealed
//! controller must ignore them.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

/// Timer settings for one controller.
#[derive(Debug, Clone)]
pub struct TypingConfig {
    /// Interval between `on_reply_start` refreshes.
    pub interval: Duration,
    /// Inactivity deadline; on expiry the loop stops but the controller
    /// stays usable.
    pub ttl: Duration,
    /// Interval of timeout reminders after the TTL expired.
    pub reminder_interval: Duration,
    /// Reply sentinel that must not trigger a typing indicator.
    pub silent_reply_token: String,
}

impl Default for TypingConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(6),
            ttl: Duration::from_secs(2 * 60),
            reminder_interval: Duration::from_secs(5 * 60),
            silent_reply_token: "NO_REPLY".to_string(),
        }
    }
}

/// Callback starting or refreshing the channel's typing indicator.
pub type ReplyStartFn = Arc<dyn Fn() + Send + Sync>;
/// Callback invoked with the elapsed milliseconds when typing times out.
pub type TypingTimeoutFn = Arc<dyn Fn(u64) + Send + Sync>;

#[derive(Default)]
struct State {
    started: bool,
    active: bool,
    run_complete: bool,
    dispatch_idle: bool,
    sealed: bool,
    typing_started_at: Option<Instant>,
    typing_timer: Option<JoinHandle<()>>,
    ttl_timer: Option<JoinHandle<()>>,
    reminder_timer: Option<JoinHandle<()>>,
    ttl_generation: u64,
}

impl State {
    fn stop_timers(&mut self) {
        for timer in [
            self.typing_timer.take(),
            self.ttl_timer.take(),
            self.reminder_timer.take(),
        ]
        .into_iter()
        .flatten()
        {
            timer.abort();
        }
    }
}

struct Inner {
    config: TypingConfig,
    on_reply_start: ReplyStartFn,
    on_typing_timeout: Option<TypingTimeoutFn>,
    state: Mutex<State>,
}

/// Per-reply-cycle typing indicator controller.
#[derive(Clone)]
pub struct TypingController {
    inner: Arc<Inner>,
}

impl TypingController {
    pub fn new(
        config: TypingConfig,
        on_reply_start: ReplyStartFn,
        on_typing_timeout: Option<TypingTimeoutFn>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                on_reply_start,
                on_typing_timeout,
                state: Mutex::new(State::default()),
            }),
        }
    }

    /// Mark the cycle active and fire `on_reply_start` on the first call.
    /// No-op once sealed or after run completion.
    pub fn ensure_start(&self) {
        let fire = {
            let mut state = self.inner.state.lock();
            if state.sealed || state.run_complete {
                return;
            }
            state.active = true;
            if state.started {
                false
            } else {
                state.started = true;
                state.typing_started_at.get_or_insert_with(Instant::now);
                true
            }
        };
        if fire {
            (self.inner.on_reply_start)();
        }
    }

    /// Start (or keep) the periodic typing loop. Idempotent; every call
    /// refreshes the TTL.
    pub fn start_typing_loop(&self) {
        let fire = {
            let mut state = self.inner.state.lock();
            if state.sealed || state.run_complete {
                return;
            }
            state.active = true;
            let fire = if state.started {
                false
            } else {
                state.started = true;
                state.typing_started_at.get_or_insert_with(Instant::now);
                true
            };

            Self::arm_ttl(&self.inner, &mut state);

            if state.typing_timer.as_ref().is_none_or(JoinHandle::is_finished) {
                let inner = Arc::clone(&self.inner);
                state.typing_timer = Some(tokio::spawn(async move {
                    loop {
                        tokio::time::sleep(inner.config.interval).await;
                        {
                            let state = inner.state.lock();
                            if state.sealed || state.run_complete {
                                break;
                            }
                        }
                        (inner.on_reply_start)();
                    }
                }));
            }
            fire
        };
        if fire {
            (self.inner.on_reply_start)();
        }
    }

    /// Start typing for an outgoing text, unless it is empty or the
    /// silent-reply sentinel.
    pub fn start_typing_on_text(&self, text: &str) {
        if text.is_empty() || text.trim() == self.inner.config.silent_reply_token {
            return;
        }
        self.start_typing_loop();
    }

    /// Push the TTL deadline out again.
    pub fn refresh_typing_ttl(&self) {
        let mut state = self.inner.state.lock();
        if state.sealed || state.run_complete {
            return;
        }
        Self::arm_ttl(&self.inner, &mut state);
    }

    /// Mark the LLM run finished. Seals once the dispatcher is idle too.
    pub fn mark_run_complete(&self) {
        let mut state = self.inner.state.lock();
        if state.sealed {
            return;
        }
        state.run_complete = true;
        if state.dispatch_idle {
            Self::cleanup(&mut state);
        }
    }

    /// Mark the dispatcher idle. Seals once the run is complete too.
    pub fn mark_dispatch_idle(&self) {
        let mut state = self.inner.state.lock();
        if state.sealed {
            return;
        }
        state.dispatch_idle = true;
        if state.run_complete {
            Self::cleanup(&mut state);
        }
    }

    /// Whether the controller is sealed for this cycle.
    pub fn is_sealed(&self) -> bool {
        self.inner.state.lock().sealed
    }

    /// Whether the typing loop is currently armed.
    pub fn is_active(&self) -> bool {
        self.inner.state.lock().active
    }

    fn cleanup(state: &mut State) {
        state.stop_timers();
        state.active = false;
        state.started = false;
        state.sealed = true;
        debug!("Typing controller sealed");
    }

    /// (Re)arm the TTL. On expiry the periodic loop stops; the controller
    /// itself stays alive so a reminder can fire until the cycle ends.
    fn arm_ttl(inner: &Arc<Inner>, state: &mut State) {
        state.ttl_generation += 1;
        let generation = state.ttl_generation;
        if let Some(old) = state.ttl_timer.take() {
            old.abort();
        }

        let inner = Arc::clone(inner);
        state.ttl_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(inner.config.ttl).await;
            Inner::on_ttl_expired(&inner, generation);
        }));
    }
}

impl Inner {
    fn on_ttl_expired(inner: &Arc<Self>, generation: u64) {
        let elapsed_ms = {
            let mut state = inner.state.lock();
            if state.sealed || state.run_complete || state.ttl_generation != generation {
                return;
            }
            if let Some(timer) = state.typing_timer.take() {
                timer.abort();
            }
            state.typing_started_at.map(|at| {
                u64::try_from(at.elapsed().as_millis()).unwrap_or(u64::MAX)
            })
        };

        let (Some(on_timeout), Some(elapsed_ms)) = (inner.on_typing_timeout.clone(), elapsed_ms)
        else {
            return;
        };
        on_timeout(elapsed_ms);

        let mut state = inner.state.lock();
        if state.sealed || state.run_complete {
            return;
        }
        if state.reminder_timer.as_ref().is_none_or(JoinHandle::is_finished) {
            let inner = Arc::clone(inner);
            state.reminder_timer = Some(tokio::spawn(async move {
                loop {
                    tokio::time::sleep(inner.config.reminder_interval).await;
                    let elapsed_ms = {
                        let state = inner.state.lock();
                        if state.sealed || state.run_complete {
                            break;
                        }
                        state.typing_started_at.map(|at| {
                            u64::try_from(at.elapsed().as_millis()).unwrap_or(u64::MAX)
                        })
                    };
                    if let (Some(cb), Some(ms)) = (inner.on_typing_timeout.clone(), elapsed_ms) {
                        cb(ms);
                    }
                }
            }));
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_config() -> TypingConfig {
        TypingConfig {
            interval: Duration::from_millis(20),
            ttl: Duration::from_millis(200),
            reminder_interval: Duration::from_millis(50),
            silent_reply_token: "NO_REPLY".to_string(),
        }
    }

    fn counting_controller(config: TypingConfig) -> (TypingController, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let starts = Arc::new(AtomicUsize::new(0));
        let timeouts = Arc::new(AtomicUsize::new(0));
        let s = starts.clone();
        let t = timeouts.clone();
        let controller = TypingController::new(
            config,
            Arc::new(move || {
                s.fetch_add(1, Ordering::SeqCst);
            }),
            Some(Arc::new(move |_elapsed| {
                t.fetch_add(1, Ordering::SeqCst);
            })),
        );
        (controller, starts, timeouts)
    }

    #[tokio::test]
    async fn ensure_start_fires_once() {
        let (controller, starts, _) = counting_controller(fast_config());
        controller.ensure_start();
        controller.ensure_start();
        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert!(controller.is_active());
    }

    #[tokio::test]
    async fn typing_loop_refreshes_periodically() {
        let (controller, starts, _) = counting_controller(fast_config());
        controller.start_typing_loop();
        tokio::time::sleep(Duration::from_millis(90)).await;
        assert!(starts.load(Ordering::SeqCst) >= 3, "got {}", starts.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn silent_reply_token_suppresses_typing() {
        let (controller, starts, _) = counting_controller(fast_config());
        controller.start_typing_on_text("");
        controller.start_typing_on_text("  NO_REPLY  ");
        assert_eq!(starts.load(Ordering::SeqCst), 0);

        controller.start_typing_on_text("real reply");
        assert_eq!(starts.load(Ordering::SeqCst), 1);
    }

    // A stale tool-stream event after completion must not restart typing.
    #[tokio::test]
    async fn seal_blocks_late_events() {
        let (controller, starts, _) = counting_controller(fast_config());
        controller.start_typing_loop();
        controller.mark_run_complete();
        controller.mark_dispatch_idle();
        assert!(controller.is_sealed());

        let count_at_seal = starts.load(Ordering::SeqCst);
        controller.ensure_start();
        controller.start_typing_loop();
        controller.start_typing_on_text("late text");
        controller.refresh_typing_ttl();
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert_eq!(starts.load(Ordering::SeqCst), count_at_seal);
    }

    #[tokio::test]
    async fn one_flag_alone_does_not_seal() {
        let (controller, _, _) = counting_controller(fast_config());
        controller.start_typing_loop();
        controller.mark_run_complete();
        assert!(!controller.is_sealed());

        controller.mark_dispatch_idle();
        assert!(controller.is_sealed());
    }

    #[tokio::test]
    async fn ttl_expiry_stops_loop_and_fires_timeout() {
        let (controller, starts, timeouts) = counting_controller(TypingConfig {
            interval: Duration::from_millis(20),
            ttl: Duration::from_millis(60),
            reminder_interval: Duration::from_secs(60),
            silent_reply_token: "NO_REPLY".to_string(),
        });
        controller.start_typing_loop();
        tokio::time::sleep(Duration::from_millis(120)).await;

        assert_eq!(timeouts.load(Ordering::SeqCst), 1);
        let after_expiry = starts.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(60)).await;
        // Periodic loop stopped; no further refreshes.
        assert_eq!(starts.load(Ordering::SeqCst), after_expiry);
        // Not sealed: the cycle can still finish normally.
        assert!(!controller.is_sealed());
    }

    #[tokio::test]
    async fn reminders_repeat_until_sealed() {
        let (controller, _, timeouts) = counting_controller(TypingConfig {
            interval: Duration::from_millis(10),
            ttl: Duration::from_millis(40),
            reminder_interval: Duration::from_millis(30),
            silent_reply_token: "NO_REPLY".to_string(),
        });
        controller.start_typing_loop();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(timeouts.load(Ordering::SeqCst) >= 2);

        controller.mark_run_complete();
        controller.mark_dispatch_idle();
        let at_seal = timeouts.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(timeouts.load(Ordering::SeqCst), at_seal);
    }

    #[tokio::test]
    async fn refresh_postpones_expiry() {
        let (controller, _, timeouts) = counting_controller(TypingConfig {
            interval: Duration::from_millis(10),
            ttl: Duration::from_millis(80),
            reminder_interval: Duration::from_secs(60),
            silent_reply_token: "NO_REPLY".to_string(),
        });
        controller.start_typing_loop();
        for _ in 0..4 {
            tokio::time::sleep(Duration::from_millis(40)).await;
            controller.refresh_typing_ttl();
        }
        // Deadline kept moving; no timeout yet.
        assert_eq!(timeouts.load(Ordering::SeqCst), 0);
    }
}
