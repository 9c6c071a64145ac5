//! Redis Manager - Centralized Redis connection and operations
//!
//! This module handles all Redis-related operations including:
//! - Job queue operations (BLPOP)
//! - Result storage and publishing

use std::time::Duration;

use anyhow::{Context, Result};
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tracing::{info, warn};

use crate::jobs::CaseJob;
use crate::report::ResultRecord;

/// Redis key constants
pub mod keys {
    /// Case job queue key
    pub const CASE_QUEUE: &str = "case:queue";

    /// Case result key prefix (for polling)
    pub const CASE_RESULT_PREFIX: &str = "case:result:";

    /// Case result channel (for pub/sub)
    pub const CASE_RESULT_CHANNEL: &str = "case:results";

    /// Result key of one round: `case:result:{taskId}:{testCaseId}:{round}`
    pub fn result_key(task_id: &str, test_case_id: i64, round: u32) -> String {
        format!("{}{}:{}:{}", CASE_RESULT_PREFIX, task_id, test_case_id, round)
    }
}

const RESULT_EXPIRY_SECS: u64 = 3600; // 1 hour
const RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Centralized Redis manager for all Redis operations
pub struct RedisManager {
    client: redis::Client,
    conn: MultiplexedConnection,
}

impl RedisManager {
    async fn with_url(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).context("Failed to create Redis client")?;

        let conn = get_connection_with_retry(&client).await?;
        info!("Connected to Redis at {}", redis_url);

        Ok(Self { client, conn })
    }

    /// Create a new RedisManager using the REDIS_URL environment variable.
    /// Defaults to "redis://localhost:6379" if not set.
    pub async fn from_env() -> Result<Self> {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".into());
        Self::with_url(&url).await
    }

    /// Block and wait for the next job from the queue.
    ///
    /// Malformed payloads are logged and skipped. Automatically reconnects
    /// on connection failure.
    pub async fn pop_job(&mut self) -> Result<CaseJob> {
        loop {
            let result: Option<(String, String)> =
                match self.conn.blpop(keys::CASE_QUEUE, 0.0).await {
                    Ok(res) => res,
                    Err(e) => {
                        warn!("Redis BLPOP failed: {}. Reconnecting...", e);
                        self.reconnect().await?;
                        continue;
                    }
                };

            if let Some((_, job_data)) = result {
                match serde_json::from_str::<CaseJob>(&job_data) {
                    Ok(job) => return Ok(job),
                    Err(e) => {
                        warn!("Failed to parse job data: {}. Data: {}", e, job_data);
                        continue;
                    }
                }
            }
        }
    }

    /// Store a case result in Redis.
    ///
    /// The result is stored with a 1-hour expiration and also published
    /// to a channel for real-time subscribers.
    pub async fn store_result(&mut self, record: &ResultRecord) -> Result<()> {
        let key = keys::result_key(record.task_id(), record.test_case_id(), record.round());
        let json = record.to_json()?;

        // Try to store, reconnect on failure
        if let Err(e) = self
            .conn
            .set_ex::<_, _, ()>(&key, &json, RESULT_EXPIRY_SECS)
            .await
        {
            warn!("Failed to store result: {}. Reconnecting...", e);
            self.reconnect().await?;
            self.conn
                .set_ex::<_, _, ()>(&key, &json, RESULT_EXPIRY_SECS)
                .await?;
        }

        // Publish to channel (ignore errors as there may be no subscribers)
        let _ = self
            .conn
            .publish::<_, _, ()>(keys::CASE_RESULT_CHANNEL, &json)
            .await;

        Ok(())
    }

    /// Reconnect to Redis
    async fn reconnect(&mut self) -> Result<()> {
        self.conn = get_connection_with_retry(&self.client).await?;
        Ok(())
    }
}

/// Get a Redis connection with retry logic
async fn get_connection_with_retry(client: &redis::Client) -> Result<MultiplexedConnection> {
    loop {
        match client.get_multiplexed_async_connection().await {
            Ok(conn) => return Ok(conn),
            Err(e) => {
                warn!(
                    "Failed to connect to Redis: {}. Retrying in {} seconds...",
                    e,
                    RECONNECT_DELAY.as_secs()
                );
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
}
