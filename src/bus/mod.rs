//! The queue bus: named FIFO queues plus small atomic counters.
//!
//! Queues carry thin, JSON-encoded messages (identifiers only). The
//! counters back fan-in joins: `counter_decrement` is the linearisation
//! point between the last producer's completion and the join becoming
//! ready.

mod memory;

pub use memory::MemoryQueueBus;

use crate::errors::BusError;
use async_trait::async_trait;
use std::time::Duration;

/// Named FIFO queues with blocking pop, plus atomic integer counters.
#[async_trait]
pub trait QueueBus: Send + Sync {
    /// Appends a payload to the tail of a queue.
    async fn push(&self, queue: &str, payload: String) -> Result<(), BusError>;

    /// Pops the head of a queue, blocking up to `timeout`.
    ///
    /// Returns `None` on timeout. This is a natural suspension point;
    /// consumers loop on it.
    async fn pop(&self, queue: &str, timeout: Duration) -> Result<Option<String>, BusError>;

    /// Returns the current depth of a queue.
    async fn queue_len(&self, queue: &str) -> Result<usize, BusError>;

    /// Sets a counter to the given value, creating it if absent.
    async fn counter_init(&self, key: &str, value: i64) -> Result<(), BusError>;

    /// Atomically decrements a counter and returns the new value.
    ///
    /// A missing counter is treated as zero-initialised.
    async fn counter_decrement(&self, key: &str) -> Result<i64, BusError>;

    /// Reads a counter, or `None` if it was never initialised.
    async fn counter_get(&self, key: &str) -> Result<Option<i64>, BusError>;

    /// Removes a counter.
    async fn counter_delete(&self, key: &str) -> Result<(), BusError>;
}
