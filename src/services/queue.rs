use async_trait::async_trait;
use redis::{AsyncCommands, Direction};
use std::time::Duration;
use uuid::Uuid;

/// Ordered hand-off of task identifiers from the API to the worker.
///
/// Delivery is at-least-once: an entry stays in a processing list from
/// [`WorkQueue::dequeue`] until [`WorkQueue::ack`], and entries left there by
/// a crashed consumer come back through [`WorkQueue::recover_in_flight`].
#[async_trait]
pub trait WorkQueue: Send + Sync {
    async fn enqueue(&self, task_id: Uuid) -> Result<(), QueueError>;

    /// Block up to `timeout` for the next entry. `None` on timeout.
    ///
    /// Entries are returned raw; the consumer decides what a malformed one means.
    async fn dequeue(&self, timeout: Duration) -> Result<Option<String>, QueueError>;

    /// Forget a dequeued entry once it has been handled.
    async fn ack(&self, entry: &str) -> Result<(), QueueError>;

    /// Hand a dequeued entry back to the end of the pending list.
    async fn release(&self, entry: &str) -> Result<(), QueueError>;

    /// Return every unacknowledged entry to the front of the pending list,
    /// oldest first. Returns how many were moved.
    async fn recover_in_flight(&self) -> Result<u64, QueueError>;

    /// Number of pending (not yet dequeued) entries.
    async fn depth(&self) -> Result<u64, QueueError>;

    async fn health_check(&self) -> Result<(), QueueError>;
}

/// Redis-backed reliable queue.
///
/// Producers `LPUSH` onto the pending list; the consumer `BRPOPLPUSH`es into
/// `<queue>:processing`, which makes the pending list FIFO.
pub struct RedisQueue {
    client: redis::Client,
    queue_key: String,
    processing_key: String,
}

impl RedisQueue {
    pub fn new(redis_url: &str, queue_name: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        Ok(Self {
            client,
            queue_key: queue_name.to_string(),
            processing_key: format!("{queue_name}:processing"),
        })
    }

    pub fn queue_key(&self) -> &str {
        &self.queue_key
    }

    pub fn processing_key(&self) -> &str {
        &self.processing_key
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, QueueError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::Unavailable(e.to_string()))
    }
}

#[async_trait]
impl WorkQueue for RedisQueue {
    async fn enqueue(&self, task_id: Uuid) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        conn.lpush::<_, _, ()>(&self.queue_key, task_id.to_string())
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    async fn dequeue(&self, timeout: Duration) -> Result<Option<String>, QueueError> {
        let mut conn = self.connection().await?;
        let entry: Option<String> = conn
            .brpoplpush(&self.queue_key, &self.processing_key, timeout.as_secs_f64())
            .await
            .map_err(QueueError::Redis)?;
        Ok(entry)
    }

    async fn ack(&self, entry: &str) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        conn.lrem::<_, _, ()>(&self.processing_key, 1, entry)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    async fn release(&self, entry: &str) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        redis::pipe()
            .atomic()
            .lrem(&self.processing_key, 1, entry)
            .ignore()
            .lpush(&self.queue_key, entry)
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    async fn recover_in_flight(&self) -> Result<u64, QueueError> {
        let mut conn = self.connection().await?;
        let mut moved = 0;
        // Newest in-flight entry sits at the left of the processing list;
        // pushing each onto the consumer end leaves the oldest to be served first.
        loop {
            let entry: Option<String> = conn
                .lmove(
                    &self.processing_key,
                    &self.queue_key,
                    Direction::Left,
                    Direction::Right,
                )
                .await
                .map_err(QueueError::Redis)?;
            match entry {
                Some(_) => moved += 1,
                None => return Ok(moved),
            }
        }
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.connection().await?;
        let depth: u64 = conn.llen(&self.queue_key).await.map_err(QueueError::Redis)?;
        Ok(depth)
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// No connection to Redis could be established.
    #[error("Queue unavailable: {0}")]
    Unavailable(String),
}
