use futures::StreamExt;
use redis::AsyncCommands;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::models::job::JobId;

const QUEUED_CHANNEL: &str = "genjobs:queued";

/// Redis pub/sub wake-ups between API and worker processes.
///
/// The job table stays authoritative; a lost message only delays a worker
/// until its next poll.
pub struct QueueSignal {
    client: redis::Client,
}

impl QueueSignal {
    pub fn new(redis_url: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        Ok(Self { client })
    }

    /// Announce that `job_id` is ready for dispatch.
    pub async fn publish(&self, job_id: JobId) -> Result<(), QueueError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)?;
        conn.publish::<_, _, ()>(QUEUED_CHANNEL, job_id.to_string())
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    /// Wake one idle local slot per announcement until `cancel` fires.
    pub async fn forward_to(
        &self,
        wake: Arc<Notify>,
        cancel: CancellationToken,
    ) -> Result<(), QueueError> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(QueueError::Redis)?;
        pubsub
            .subscribe(QUEUED_CHANNEL)
            .await
            .map_err(QueueError::Redis)?;
        let mut messages = pubsub.on_message();

        tracing::info!(channel = QUEUED_CHANNEL, "Listening for queue announcements");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                message = messages.next() => match message {
                    Some(message) => {
                        let payload: String = message.get_payload().unwrap_or_default();
                        tracing::trace!(job_id = %payload, "Queue announcement received");
                        wake.notify_one();
                    }
                    None => return Err(QueueError::Closed),
                },
            }
        }
    }

    /// Check Redis connectivity (for health checks).
    pub async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)?;
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

    #[error("Redis subscription closed")]
    Closed,
}
