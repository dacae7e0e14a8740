//! Work-queue layer: FIFO main queue, retry sorted set, DLQ, and the atomic
//! kv markers the compliance rails rely on.

pub mod memory;
pub mod redis;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub use self::memory::InMemoryQueue;
pub use self::redis::RedisQueue;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue backend error: {0}")]
    Backend(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Atomic queue/kv operations shared by the webhook path and the worker.
///
/// Every method is non-blocking except `blocking_pop`, which long-polls the
/// main queue bounded by `timeout`. Each operation touches a single key, so
/// no cross-key transactions are needed.
#[async_trait]
pub trait ActionQueue: Send + Sync {
    /// Push onto the main FIFO queue (right end). Returns the queue length.
    async fn push(&self, raw: &str) -> Result<u64, QueueError>;

    /// Pop from the main queue (left end) without blocking.
    async fn pop(&self) -> Result<Option<String>, QueueError>;

    /// Long-poll the main queue, bounded by `timeout`.
    async fn blocking_pop(&self, timeout: Duration) -> Result<Option<String>, QueueError>;

    async fn queue_depth(&self) -> Result<u64, QueueError>;

    /// Add an entry to the retry set, due at epoch second `due_at`.
    async fn schedule_retry(&self, raw: &str, due_at: f64) -> Result<(), QueueError>;

    /// Entries whose due time is at or before `now`, oldest first.
    async fn due_retries(&self, now: f64) -> Result<Vec<String>, QueueError>;

    /// Remove an entry from the retry set. False when it was already gone
    /// (another worker promoted it first).
    async fn remove_retry(&self, raw: &str) -> Result<bool, QueueError>;

    /// Push onto the dead-letter list.
    async fn push_dlq(&self, raw: &str) -> Result<(), QueueError>;

    /// Pop from the dead-letter list.
    async fn pop_dlq(&self) -> Result<Option<String>, QueueError>;

    async fn dlq_depth(&self) -> Result<u64, QueueError>;

    /// Atomically set a marker key iff absent (`SET NX EX`). True when the
    /// marker was acquired, false when it already existed.
    async fn try_acquire(&self, key: &str, ttl_secs: u64) -> Result<bool, QueueError>;

    /// Drop a marker key. Used to give back a dedup slot when the guarded
    /// execution did not happen.
    async fn release(&self, key: &str) -> Result<(), QueueError>;

    /// Slide the rate window for `key`: drop timestamps older than the
    /// window, count the rest, record `now`, refresh the expiry. Returns the
    /// count *before* the new timestamp was added.
    async fn record_rate_event(
        &self,
        key: &str,
        now: f64,
        window_secs: u64,
    ) -> Result<u64, QueueError>;
}

/// Push an action envelope onto the main work queue. Returns queue length.
pub async fn enqueue_action(queue: &dyn ActionQueue, action: &Value) -> Result<u64, QueueError> {
    let raw = serde_json::to_string(action)?;
    queue.push(&raw).await
}
