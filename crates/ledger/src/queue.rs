use std::collections::VecDeque;
use std::sync::Arc;

use llmgate_core::ledger::{LedgerEvent, LedgerEventType};
use parking_lot::Mutex;
use tokio::sync::{oneshot, Notify};

pub struct QueuedEvent {
    pub event: LedgerEvent,
    pub completion: Option<oneshot::Sender<()>>,
}

fn is_terminal(event_type: LedgerEventType) -> bool {
    matches!(event_type, LedgerEventType::Commit | LedgerEventType::Cancel)
}

/// Bounded in-memory queue feeding the single-writer worker (§4.3).
///
/// Enqueue never blocks. When full, the oldest non-terminal event is dropped
/// to make room — `commit`/`cancel` events are never dropped.
pub struct LedgerQueue {
    inner: Mutex<VecDeque<QueuedEvent>>,
    notify: Notify,
    capacity: usize,
    dropped: std::sync::atomic::AtomicU64,
}

impl LedgerQueue {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            notify: Notify::new(),
            capacity,
            dropped: std::sync::atomic::AtomicU64::new(0),
        })
    }

    pub fn push(&self, event: LedgerEvent, completion: Option<oneshot::Sender<()>>) {
        {
            let mut guard = self.inner.lock();
            if guard.len() >= self.capacity {
                if let Some(pos) = guard.iter().position(|q| !is_terminal(q.event.event_type)) {
                    guard.remove(pos);
                    self.dropped.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                }
            }
            guard.push_back(QueuedEvent { event, completion });
        }
        self.notify.notify_one();
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(std::sync::atomic::Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Waits until at least one item is queued (or the notify fires spuriously),
    /// then drains up to `max` items.
    pub async fn wait_for_item(&self) {
        if !self.is_empty() {
            return;
        }
        self.notify.notified().await;
    }

    pub fn drain_up_to(&self, max: usize) -> Vec<QueuedEvent> {
        let mut guard = self.inner.lock();
        let n = max.min(guard.len());
        guard.drain(..n).collect()
    }
}
