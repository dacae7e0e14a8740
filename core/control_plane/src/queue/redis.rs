//! Redis-backed queue implementation.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use shared_types::{DLQ_KEY, QUEUE_KEY, RETRY_KEY};

use super::{ActionQueue, QueueError};

impl From<redis::RedisError> for QueueError {
    fn from(e: redis::RedisError) -> Self {
        QueueError::Backend(e.to_string())
    }
}

/// Queue over a shared Redis. Connections are acquired per operation so the
/// blocking dequeue never starves other callers of a multiplexed pipe.
pub struct RedisQueue {
    client: redis::Client,
}

impl RedisQueue {
    pub fn new(url: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(url)?;
        Ok(Self { client })
    }

    async fn connection(&self) -> Result<redis::aio::Connection, QueueError> {
        Ok(self.client.get_async_connection().await?)
    }
}

#[async_trait]
impl ActionQueue for RedisQueue {
    async fn push(&self, raw: &str) -> Result<u64, QueueError> {
        let mut conn = self.connection().await?;
        Ok(conn.rpush(QUEUE_KEY, raw).await?)
    }

    async fn pop(&self) -> Result<Option<String>, QueueError> {
        let mut conn = self.connection().await?;
        Ok(conn.lpop(QUEUE_KEY, None).await?)
    }

    async fn blocking_pop(&self, timeout: Duration) -> Result<Option<String>, QueueError> {
        let mut conn = self.connection().await?;
        let popped: Option<(String, String)> =
            conn.blpop(QUEUE_KEY, timeout.as_secs() as f64).await?;
        Ok(popped.map(|(_, raw)| raw))
    }

    async fn queue_depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.connection().await?;
        Ok(conn.llen(QUEUE_KEY).await?)
    }

    async fn schedule_retry(&self, raw: &str, due_at: f64) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        let _: u64 = conn.zadd(RETRY_KEY, raw, due_at).await?;
        Ok(())
    }

    async fn due_retries(&self, now: f64) -> Result<Vec<String>, QueueError> {
        let mut conn = self.connection().await?;
        Ok(conn.zrangebyscore(RETRY_KEY, "-inf", now).await?)
    }

    async fn remove_retry(&self, raw: &str) -> Result<bool, QueueError> {
        let mut conn = self.connection().await?;
        let removed: u64 = conn.zrem(RETRY_KEY, raw).await?;
        Ok(removed > 0)
    }

    async fn push_dlq(&self, raw: &str) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        let _: u64 = conn.rpush(DLQ_KEY, raw).await?;
        Ok(())
    }

    async fn pop_dlq(&self) -> Result<Option<String>, QueueError> {
        let mut conn = self.connection().await?;
        Ok(conn.lpop(DLQ_KEY, None).await?)
    }

    async fn dlq_depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.connection().await?;
        Ok(conn.llen(DLQ_KEY).await?)
    }

    async fn try_acquire(&self, key: &str, ttl_secs: u64) -> Result<bool, QueueError> {
        let mut conn = self.connection().await?;
        let outcome: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs)
            .query_async(&mut conn)
            .await?;
        Ok(outcome.is_some())
    }

    async fn release(&self, key: &str) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        let _: u64 = conn.del(key).await?;
        Ok(())
    }

    async fn record_rate_event(
        &self,
        key: &str,
        now: f64,
        window_secs: u64,
    ) -> Result<u64, QueueError> {
        let mut conn = self.connection().await?;
        let (_removed, count, _added, _expired): (u64, u64, u64, u64) = redis::pipe()
            .atomic()
            .zrembyscore(key, 0f64, now - window_secs as f64)
            .zcard(key)
            .zadd(key, format!("{now}"), now)
            .expire(key, window_secs as usize)
            .query_async(&mut conn)
            .await?;
        Ok(count)
    }
}
