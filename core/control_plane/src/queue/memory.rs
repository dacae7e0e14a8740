//! In-memory queue for dev/test. Single process only; the async mutex
//! serializes every operation, standing in for Redis atomicity.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{ActionQueue, QueueError};

fn now_epoch() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

#[derive(Default)]
struct QueueState {
    main: VecDeque<String>,
    retry: Vec<(f64, String)>,
    dlq: VecDeque<String>,
    /// marker key → expiry epoch second
    markers: HashMap<String, f64>,
    /// rate key → recorded timestamps
    rate: HashMap<String, Vec<f64>>,
}

#[derive(Default)]
pub struct InMemoryQueue {
    state: Mutex<QueueState>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test hook: true when a marker is currently held.
    pub async fn marker_held(&self, key: &str) -> bool {
        let state = self.state.lock().await;
        state
            .markers
            .get(key)
            .map(|expiry| *expiry > now_epoch())
            .unwrap_or(false)
    }
}

#[async_trait]
impl ActionQueue for InMemoryQueue {
    async fn push(&self, raw: &str) -> Result<u64, QueueError> {
        let mut state = self.state.lock().await;
        state.main.push_back(raw.to_string());
        Ok(state.main.len() as u64)
    }

    async fn pop(&self) -> Result<Option<String>, QueueError> {
        let mut state = self.state.lock().await;
        Ok(state.main.pop_front())
    }

    async fn blocking_pop(&self, timeout: Duration) -> Result<Option<String>, QueueError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(raw) = self.pop().await? {
                return Ok(Some(raw));
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    async fn queue_depth(&self) -> Result<u64, QueueError> {
        let state = self.state.lock().await;
        Ok(state.main.len() as u64)
    }

    async fn schedule_retry(&self, raw: &str, due_at: f64) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        state.retry.retain(|(_, entry)| entry != raw);
        state.retry.push((due_at, raw.to_string()));
        state
            .retry
            .sort_by(|(a, _), (b, _)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        Ok(())
    }

    async fn due_retries(&self, now: f64) -> Result<Vec<String>, QueueError> {
        let state = self.state.lock().await;
        Ok(state
            .retry
            .iter()
            .filter(|(due, _)| *due <= now)
            .map(|(_, raw)| raw.clone())
            .collect())
    }

    async fn remove_retry(&self, raw: &str) -> Result<bool, QueueError> {
        let mut state = self.state.lock().await;
        let before = state.retry.len();
        state.retry.retain(|(_, entry)| entry != raw);
        Ok(state.retry.len() < before)
    }

    async fn push_dlq(&self, raw: &str) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        state.dlq.push_back(raw.to_string());
        Ok(())
    }

    async fn pop_dlq(&self) -> Result<Option<String>, QueueError> {
        let mut state = self.state.lock().await;
        Ok(state.dlq.pop_front())
    }

    async fn dlq_depth(&self) -> Result<u64, QueueError> {
        let state = self.state.lock().await;
        Ok(state.dlq.len() as u64)
    }

    async fn try_acquire(&self, key: &str, ttl_secs: u64) -> Result<bool, QueueError> {
        let mut state = self.state.lock().await;
        let now = now_epoch();
        if let Some(expiry) = state.markers.get(key) {
            if *expiry > now {
                return Ok(false);
            }
        }
        state.markers.insert(key.to_string(), now + ttl_secs as f64);
        Ok(true)
    }

    async fn release(&self, key: &str) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        state.markers.remove(key);
        Ok(())
    }

    async fn record_rate_event(
        &self,
        key: &str,
        now: f64,
        window_secs: u64,
    ) -> Result<u64, QueueError> {
        let mut state = self.state.lock().await;
        let window_start = now - window_secs as f64;
        let timestamps = state.rate.entry(key.to_string()).or_default();
        timestamps.retain(|ts| *ts > window_start);
        let count = timestamps.len() as u64;
        timestamps.push(now);
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::dedup_key;

    #[tokio::test]
    async fn fifo_order() {
        let queue = InMemoryQueue::new();
        queue.push("a").await.unwrap();
        queue.push("b").await.unwrap();
        assert_eq!(queue.pop().await.unwrap().as_deref(), Some("a"));
        assert_eq!(queue.pop().await.unwrap().as_deref(), Some("b"));
        assert_eq!(queue.pop().await.unwrap(), None);
    }

    #[tokio::test]
    async fn blocking_pop_times_out_empty() {
        let queue = InMemoryQueue::new();
        let popped = queue.blocking_pop(Duration::from_millis(50)).await.unwrap();
        assert_eq!(popped, None);
    }

    #[tokio::test]
    async fn retry_entries_become_due() {
        let queue = InMemoryQueue::new();
        queue.schedule_retry("x", 100.0).await.unwrap();
        queue.schedule_retry("y", 200.0).await.unwrap();
        assert_eq!(queue.due_retries(150.0).await.unwrap(), vec!["x"]);
        assert!(queue.remove_retry("x").await.unwrap());
        assert!(!queue.remove_retry("x").await.unwrap());
    }

    #[tokio::test]
    async fn markers_are_acquire_once() {
        let queue = InMemoryQueue::new();
        let key = dedup_key("APT-1", "sms");
        assert!(queue.try_acquire(&key, 60).await.unwrap());
        assert!(!queue.try_acquire(&key, 60).await.unwrap());
    }

    #[tokio::test]
    async fn rate_window_counts_before_add() {
        let queue = InMemoryQueue::new();
        assert_eq!(queue.record_rate_event("k", 1000.0, 60).await.unwrap(), 0);
        assert_eq!(queue.record_rate_event("k", 1001.0, 60).await.unwrap(), 1);
        assert_eq!(queue.record_rate_event("k", 1002.0, 60).await.unwrap(), 2);
        assert_eq!(queue.record_rate_event("k", 1050.0, 60).await.unwrap(), 3);
        // Outside the window the old timestamps fall away.
        assert_eq!(queue.record_rate_event("k", 2000.0, 60).await.unwrap(), 0);
    }
}
