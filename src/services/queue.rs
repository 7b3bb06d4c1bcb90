use redis::AsyncCommands;
use serde::{Deserialize, Serialize};

const DEFAULT_NAMESPACE: &str = "rider_seal";

/// Hand-off payload pushed to Redis when a job is created.
///
/// The database row is authoritative; a worker that pops this still has to
/// claim the job there, so duplicates and lost entries are harmless.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedJob {
    pub job_uid: String,
}

/// Redis list used to wake workers without waiting for a backlog scan.
pub struct JobQueue {
    client: redis::Client,
    queue_key: String,
    processing_key: String,
}

impl JobQueue {
    pub fn new(redis_url: &str) -> Result<Self, QueueError> {
        Self::namespaced(redis_url, DEFAULT_NAMESPACE)
    }

    /// Queue whose lists live under `{namespace}:analysis`.
    pub fn namespaced(redis_url: &str, namespace: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client,
            queue_key: format!("{namespace}:analysis"),
            processing_key: format!("{namespace}:analysis:processing"),
        })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, QueueError> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    pub async fn push(&self, job: &QueuedJob) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(job)?;
        conn.lpush::<_, _, ()>(&self.queue_key, &payload).await?;
        Ok(())
    }

    /// Pop the oldest hand-off, parking it in the processing list.
    pub async fn pop(&self) -> Result<Option<QueuedJob>, QueueError> {
        let mut conn = self.connection().await?;
        let payload: Option<String> = conn
            .rpoplpush(&self.queue_key, &self.processing_key)
            .await?;
        match payload {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    /// Drop a hand-off from the processing list once its claim was decided.
    pub async fn ack(&self, job: &QueuedJob) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(job)?;
        conn.lrem::<_, _, ()>(&self.processing_key, 1, &payload).await?;
        Ok(())
    }

    /// Move every parked hand-off back onto the queue. Run at worker start:
    /// entries parked by a worker that died are otherwise never popped again.
    /// Returns how many were moved.
    pub async fn requeue_processing(&self) -> Result<u64, QueueError> {
        let mut conn = self.connection().await?;
        let mut moved = 0;
        loop {
            let payload: Option<String> = conn
                .rpoplpush(&self.processing_key, &self.queue_key)
                .await?;
            if payload.is_none() {
                return Ok(moved);
            }
            moved += 1;
        }
    }

    /// Check Redis connectivity (for health checks).
    pub async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }

    /// Hand-offs waiting to be popped.
    pub async fn depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.connection().await?;
        Ok(conn.llen(&self.queue_key).await?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
