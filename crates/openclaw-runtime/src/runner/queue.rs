//! Per-backend run queue.
//!
//! Runs of a `serialize` backend share one queue key and execute strictly
//! FIFO; other backends get a per-run key and run freely. A failed or
//! cancelled predecessor never blocks its successors.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::FutureExt;
use futures::channel::oneshot;
use futures::future::Shared;
use tokio::sync::Mutex;

type DoneSignal = Shared<oneshot::Receiver<()>>;

struct Tail {
    id: u64,
    done: DoneSignal,
}

/// Queue of tail-chained run tasks keyed by `queue_key`.
#[derive(Default)]
pub struct RunQueue {
    tails: Mutex<HashMap<String, Tail>>,
    next_id: AtomicU64,
}

impl RunQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// The queue key for a run: the backend id when the backend serializes,
    /// otherwise a per-run key.
    pub fn queue_key(serialize: bool, backend_id: &str, run_id: &str) -> String {
        if serialize {
            backend_id.to_string()
        } else {
            format!("{backend_id}:{run_id}")
        }
    }

    /// Run `task` after the current tail of `key`, becoming the new tail.
    ///
    /// The map entry is erased only when the finishing task is still the
    /// tail, so a queue with waiters never loses its chain.
    pub async fn run<F, T>(&self, key: &str, task: F) -> T
    where
        F: Future<Output = T>,
    {
        let (done_tx, done_rx) = oneshot::channel::<()>();
        let my_id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let previous = {
            let mut tails = self.tails.lock().await;
            tails.insert(
                key.to_string(),
                Tail {
                    id: my_id,
                    done: done_rx.shared(),
                },
            )
        };

        // Predecessor failure (dropped sender) is deliberately ignored.
        if let Some(prev) = previous {
            let _ = prev.done.await;
        }

        let out = task.await;
        let _ = done_tx.send(());

        let mut tails = self.tails.lock().await;
        if tails.get(key).is_some_and(|tail| tail.id == my_id) {
            tails.remove(key);
        }
        out
    }

    /// Number of queue keys currently tracked.
    pub async fn len(&self) -> usize {
        self.tails.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tails.lock().await.is_empty()
    }
}
