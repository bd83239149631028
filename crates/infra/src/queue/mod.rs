//! Durable work queue with consumer groups and pending reclaim.
//!
//! Two logical streams exist (`compute` and `paygate`), each bound to one
//! consumer group. Delivery is at-least-once: a message stays on the group's
//! pending entries list until acknowledged, and messages idle past
//! `claim_min_idle` are reassigned to a live consumer.

mod consumer;
mod memory;
mod redis;

pub use consumer::{Consumer, ConsumerConfig, JobHandler};
pub use memory::InMemoryJobQueue;
pub use redis::RedisStreamQueue;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

/// Error a worker handler surfaces across the queue boundary.
///
/// Terminal means the business outcome is already persisted on the job
/// record and the message must be acknowledged. Transient leaves the message
/// pending for reclaim.
#[derive(Debug, thiserror::Error)]
pub enum WorkError {
    #[error("terminal: {0}")]
    Terminal(String),
    #[error("transient: {0}")]
    Transient(String),
}

impl WorkError {
    pub fn terminal(msg: impl Into<String>) -> Self {
        Self::Terminal(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue connection error: {0}")]
    Connection(String),

    #[error("queue command error: {0}")]
    Command(String),
}

/// A delivered stream entry: the opaque queue-assigned id plus the job id
/// payload.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub id: String,
    pub job_id: String,
}

/// One stream + one consumer group, fixed at construction.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Append `{jobId}` with an approximate max-length cap (oldest entries
    /// trimmed when exceeded). At-least-once; fails only on transport errors.
    async fn enqueue(&self, job_id: &str) -> Result<(), QueueError>;

    /// Create stream and group if absent (cursor at `0`). Idempotent.
    async fn ensure_group(&self) -> Result<(), QueueError>;

    /// Block up to `block` for new (undelivered) messages addressed to this
    /// consumer. An empty vec means the block timed out.
    async fn read_new(
        &self,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError>;

    /// Reassign ownership of pending messages idle at least `min_idle` to
    /// this consumer and return them for redelivery.
    async fn claim_idle(
        &self,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<QueueMessage>, QueueError>;

    /// Acknowledge a delivered message, removing it from the pending list.
    async fn ack(&self, message_id: &str) -> Result<(), QueueError>;
}

#[async_trait]
impl<Q> JobQueue for Arc<Q>
where
    Q: JobQueue + ?Sized,
{
    async fn enqueue(&self, job_id: &str) -> Result<(), QueueError> {
        (**self).enqueue(job_id).await
    }

    async fn ensure_group(&self) -> Result<(), QueueError> {
        (**self).ensure_group().await
    }

    async fn read_new(
        &self,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        (**self).read_new(consumer, count, block).await
    }

    async fn claim_idle(
        &self,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        (**self).claim_idle(consumer, min_idle, count).await
    }

    async fn ack(&self, message_id: &str) -> Result<(), QueueError> {
        (**self).ack(message_id).await
    }
}
