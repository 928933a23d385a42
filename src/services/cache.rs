//! Redis client used as the published-event idempotency guard.
//!
//! Connection pooling via ConnectionManager. Keys are claimed with SET NX EX
//! so a given domain event is handed to the delivery path at most once per
//! TTL window; a failed delivery releases its key so a later attempt can
//! re-claim it.

use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;
use tracing::{debug, instrument};

#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
}

impl RedisCache {
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).context("Failed to create Redis client")?;

        let conn = ConnectionManager::new(client)
            .await
            .context("Failed to connect to Redis")?;

        tracing::info!("Redis connected");

        Ok(Self { conn })
    }

    /// Claim `key` for `ttl`. Returns true when this caller won the claim,
    /// false when the key was already held.
    #[instrument(skip(self))]
    pub async fn set_nx(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();

        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs())
            .query_async(&mut conn)
            .await
            .context("Failed to claim idempotency key")?;
        let claimed = reply.is_some();

        debug!(key = key, claimed = claimed, "Idempotency claim");
        Ok(claimed)
    }

    /// Release a claimed key.
    #[instrument(skip(self))]
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();

        let deleted: i32 = conn.del(key).await.context("Failed to delete key")?;

        debug!(key = key, deleted = deleted > 0, "Key released");
        Ok(deleted > 0)
    }

    /// Check if Redis is healthy.
    pub async fn health_check(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .context("Redis health check failed")?;
        Ok(())
    }
}
