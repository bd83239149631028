//! Consumer loop: blocking group reads, periodic pending reclaim, bounded
//! fan-out, panic containment.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::{JobQueue, QueueError, QueueMessage, WorkError};

/// Processes one job id. Implementations persist business failures to the
/// job store themselves; the returned [`WorkError`] only drives the ack
/// decision.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn handle(&self, job_id: String) -> Result<(), WorkError>;
}

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Consumer name within the group (defaults to hostname-style id).
    pub consumer: String,
    /// Max messages per read.
    pub read_count: usize,
    /// Blocking read timeout.
    pub block: Duration,
    /// Max concurrent in-flight handlers.
    pub fan_out: usize,
    /// Reassign pending messages idle at least this long.
    pub claim_min_idle: Duration,
    /// How often to scan the pending list.
    pub claim_every: Duration,
    /// Max messages per reclaim scan.
    pub claim_count: usize,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            consumer: format!("c-{}", std::process::id()),
            read_count: 10,
            block: Duration::from_secs(10),
            fan_out: 4,
            claim_min_idle: Duration::from_secs(30),
            claim_every: Duration::from_secs(3),
            claim_count: 50,
        }
    }
}

impl ConsumerConfig {
    pub fn with_consumer(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !name.trim().is_empty() {
            self.consumer = name.trim().to_string();
        }
        self
    }

    pub fn with_fan_out(mut self, n: usize) -> Self {
        self.fan_out = n.max(1);
        self
    }
}

/// Drives a [`JobHandler`] from one stream's consumer group until cancelled.
pub struct Consumer<Q> {
    queue: Arc<Q>,
    config: ConsumerConfig,
    slots: Arc<Semaphore>,
}

impl<Q: JobQueue + 'static> Consumer<Q> {
    pub fn new(queue: Arc<Q>, config: ConsumerConfig) -> Self {
        let slots = Arc::new(Semaphore::new(config.fan_out.max(1)));
        Self {
            queue,
            config,
            slots,
        }
    }

    /// Consume forever. Returns when `cancel` fires; in-flight handlers keep
    /// their semaphore permits until they finish.
    pub async fn run<H: JobHandler>(
        &self,
        handler: Arc<H>,
        cancel: CancellationToken,
    ) -> Result<(), QueueError> {
        let mut last_claim = Instant::now()
            .checked_sub(self.config.claim_every)
            .unwrap_or_else(Instant::now);

        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            // Best-effort reclaim of messages stranded by crashed consumers.
            if last_claim.elapsed() >= self.config.claim_every {
                last_claim = Instant::now();
                match self
                    .queue
                    .claim_idle(
                        &self.config.consumer,
                        self.config.claim_min_idle,
                        self.config.claim_count,
                    )
                    .await
                {
                    Ok(messages) => {
                        for msg in messages {
                            debug!(message_id = %msg.id, job_id = %msg.job_id, "reclaimed pending message");
                            self.dispatch(handler.clone(), msg).await;
                        }
                    }
                    Err(e) => warn!(error = %e, "pending reclaim failed"),
                }
            }

            let read = tokio::select! {
                r = self.queue.read_new(
                    &self.config.consumer,
                    self.config.read_count,
                    self.config.block.min(self.config.claim_every),
                ) => r,
                _ = cancel.cancelled() => return Ok(()),
            };
            match read {
                Ok(messages) => {
                    for msg in messages {
                        self.dispatch(handler.clone(), msg).await;
                    }
                }
                Err(e) => {
                    // Transient transport blip: keep looping.
                    warn!(error = %e, "stream read failed");
                    tokio::time::sleep(Duration::from_millis(500)).await;
                }
            }
        }
    }

    async fn dispatch<H: JobHandler>(&self, handler: Arc<H>, msg: QueueMessage) {
        let permit = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .expect("consumer semaphore closed");
        let queue = self.queue.clone();
        tokio::spawn(async move {
            let _permit = permit;
            handle_one(queue, handler, msg).await;
        });
    }
}

async fn handle_one<Q: JobQueue, H: JobHandler>(queue: Arc<Q>, handler: Arc<H>, msg: QueueMessage) {
    let job_id = msg.job_id.trim().to_string();
    if job_id.is_empty() {
        let _ = queue.ack(&msg.id).await;
        return;
    }

    // Run the handler in its own task so an unwind is contained and converted
    // to a terminal ack instead of poisoning the reclaim loop.
    let outcome = match tokio::spawn({
        let handler = handler.clone();
        let job_id = job_id.clone();
        async move { handler.handle(job_id).await }
    })
    .await
    {
        Ok(result) => result,
        Err(join_err) if join_err.is_panic() => {
            error!(message_id = %msg.id, job_id = %job_id, "handler panicked");
            Err(WorkError::terminal("handler panic"))
        }
        Err(_) => Err(WorkError::terminal("handler task aborted")),
    };

    match outcome {
        Ok(()) => {
            if let Err(e) = queue.ack(&msg.id).await {
                warn!(message_id = %msg.id, error = %e, "ack failed");
            }
        }
        Err(WorkError::Terminal(reason)) => {
            debug!(message_id = %msg.id, job_id = %job_id, %reason, "terminal; acking");
            if let Err(e) = queue.ack(&msg.id).await {
                warn!(message_id = %msg.id, error = %e, "ack failed");
            }
        }
        Err(WorkError::Transient(reason)) => {
            warn!(message_id = %msg.id, job_id = %job_id, %reason, "transient; keeping pending");
        }
    }
}
