//! In-memory queue bus.

use super::QueueBus;
use crate::errors::BusError;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<String>,
    notify: Arc<Notify>,
}

/// An in-memory `QueueBus`.
///
/// Pops park on a per-queue notifier and re-check the queue on every
/// wakeup, so multiple consumers may drain one queue concurrently.
#[derive(Debug, Default)]
pub struct MemoryQueueBus {
    queues: Mutex<HashMap<String, QueueState>>,
    counters: DashMap<String, i64>,
}

impl MemoryQueueBus {
    /// Creates a new empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn notifier(&self, queue: &str) -> Arc<Notify> {
        let mut queues = self.queues.lock();
        queues.entry(queue.to_string()).or_default().notify.clone()
    }

    fn try_pop(&self, queue: &str) -> Option<String> {
        let mut queues = self.queues.lock();
        queues.get_mut(queue).and_then(|q| q.items.pop_front())
    }
}

#[async_trait]
impl QueueBus for MemoryQueueBus {
    async fn push(&self, queue: &str, payload: String) -> Result<(), BusError> {
        let notify = {
            let mut queues = self.queues.lock();
            let state = queues.entry(queue.to_string()).or_default();
            state.items.push_back(payload);
            state.notify.clone()
        };
        notify.notify_one();
        Ok(())
    }

    async fn pop(&self, queue: &str, timeout: Duration) -> Result<Option<String>, BusError> {
        let deadline = Instant::now() + timeout;
        let notify = self.notifier(queue);

        loop {
            if let Some(item) = self.try_pop(queue) {
                return Ok(Some(item));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::select! {
                () = notify.notified() => {}
                () = tokio::time::sleep_until(deadline) => {
                    return Ok(self.try_pop(queue));
                }
            }
        }
    }

    async fn queue_len(&self, queue: &str) -> Result<usize, BusError> {
        let queues = self.queues.lock();
        Ok(queues.get(queue).map_or(0, |q| q.items.len()))
    }

    async fn counter_init(&self, key: &str, value: i64) -> Result<(), BusError> {
        self.counters.insert(key.to_string(), value);
        Ok(())
    }

    async fn counter_decrement(&self, key: &str) -> Result<i64, BusError> {
        let mut entry = self.counters.entry(key.to_string()).or_insert(0);
        *entry -= 1;
        Ok(*entry)
    }

    async fn counter_get(&self, key: &str) -> Result<Option<i64>, BusError> {
        Ok(self.counters.get(key).map(|v| *v))
    }

    async fn counter_delete(&self, key: &str) -> Result<(), BusError> {
        self.counters.remove(key);
        Ok(())
    }
}
