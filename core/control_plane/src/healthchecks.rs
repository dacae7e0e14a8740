//! Reachability probes for downstream dependencies.

use std::time::Duration;

use serde_json::json;
use sqlx::postgres::PgPoolOptions;
use tracing::warn;

/// Fast-fail budget for readiness probes.
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// `SELECT 1` against PostgreSQL. False on any failure or empty DSN.
pub async fn check_postgres(dsn: &str) -> bool {
    if dsn.is_empty() {
        return false;
    }
    let connect = PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(PROBE_TIMEOUT)
        .connect(dsn);
    match tokio::time::timeout(PROBE_TIMEOUT, connect).await {
        Ok(Ok(pool)) => {
            let ok = sqlx::query("SELECT 1").execute(&pool).await.is_ok();
            pool.close().await;
            ok
        }
        Ok(Err(err)) => {
            warn!(error = %err, "postgres health-check failed");
            false
        }
        Err(_) => {
            warn!("postgres health-check timed out");
            false
        }
    }
}

/// `PING` the Redis instance. False on any failure or empty URL.
pub async fn check_redis(url: &str) -> bool {
    if url.is_empty() {
        return false;
    }
    let client = match redis::Client::open(url) {
        Ok(client) => client,
        Err(err) => {
            warn!(error = %err, "redis health-check failed");
            return false;
        }
    };
    let probe = async {
        let mut conn = client.get_async_connection().await?;
        redis::cmd("PING").query_async::<_, String>(&mut conn).await
    };
    match tokio::time::timeout(PROBE_TIMEOUT, probe).await {
        Ok(Ok(_)) => true,
        Ok(Err(err)) => {
            warn!(error = %err, "redis health-check failed");
            false
        }
        Err(_) => {
            warn!("redis health-check timed out");
            false
        }
    }
}

/// POST a minimal query to OPA. False on any failure or empty URL.
pub async fn check_opa(url: &str) -> bool {
    if url.is_empty() {
        return false;
    }
    let request = reqwest::Client::new()
        .post(format!("{}/v1/data/health", url.trim_end_matches('/')))
        .timeout(PROBE_TIMEOUT)
        .json(&json!({ "input": {} }))
        .send();
    match request.await {
        Ok(response) => response.status().as_u16() == 200,
        Err(err) => {
            warn!(error = %err, "OPA health-check failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_targets_are_not_ready() {
        assert!(!check_postgres("").await);
        assert!(!check_redis("").await);
        assert!(!check_opa("").await);
    }

    #[tokio::test]
    async fn unreachable_targets_are_not_ready() {
        assert!(!check_redis("redis://127.0.0.1:1/0").await);
        assert!(!check_opa("http://127.0.0.1:1").await);
    }
}
