//! In-memory stream queue with consumer-group semantics.
//!
//! Backs dev mode and the property tests: undelivered entries live in an
//! ordered log, delivered-but-unacked entries move to a pending entries list
//! keyed by message id, and `claim_idle` reassigns stale PEL entries exactly
//! like the Redis implementation.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::{JobQueue, QueueError, QueueMessage};

#[derive(Debug)]
struct PelEntry {
    job_id: String,
    consumer: String,
    delivered_at: Instant,
    deliveries: u32,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: u64,
    undelivered: VecDeque<(u64, String)>,
    pel: HashMap<u64, PelEntry>,
}

pub struct InMemoryJobQueue {
    inner: Mutex<Inner>,
    notify: Notify,
    max_len: usize,
}

impl InMemoryJobQueue {
    pub fn new(max_len: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            notify: Notify::new(),
            max_len: max_len.max(1),
        }
    }

    /// Delivered-but-unacknowledged message count (test hook).
    pub fn pending_len(&self) -> usize {
        self.inner.lock().pel.len()
    }

    /// Undelivered message count (test hook).
    pub fn undelivered_len(&self) -> usize {
        self.inner.lock().undelivered.len()
    }

    /// Delivery count of a pending message (test hook).
    pub fn delivery_count(&self, message_id: &str) -> Option<u32> {
        let id: u64 = message_id.parse().ok()?;
        self.inner.lock().pel.get(&id).map(|e| e.deliveries)
    }

    fn try_read(&self, consumer: &str, count: usize) -> Vec<QueueMessage> {
        let mut inner = self.inner.lock();
        let mut out = Vec::new();
        while out.len() < count {
            let Some((id, job_id)) = inner.undelivered.pop_front() else {
                break;
            };
            inner.pel.insert(
                id,
                PelEntry {
                    job_id: job_id.clone(),
                    consumer: consumer.to_string(),
                    delivered_at: Instant::now(),
                    deliveries: 1,
                },
            );
            out.push(QueueMessage {
                id: id.to_string(),
                job_id,
            });
        }
        out
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, job_id: &str) -> Result<(), QueueError> {
        {
            let mut inner = self.inner.lock();
            let id = inner.next_id;
            inner.next_id += 1;
            inner.undelivered.push_back((id, job_id.to_string()));
            // Approximate cap: drop the oldest undelivered entries.
            while inner.undelivered.len() > self.max_len {
                inner.undelivered.pop_front();
            }
        }
        self.notify.notify_waiters();
        Ok(())
    }

    async fn ensure_group(&self) -> Result<(), QueueError> {
        Ok(())
    }

    async fn read_new(
        &self,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        let deadline = Instant::now() + block;
        loop {
            // Register for wakeups before checking, so an enqueue landing
            // between the check and the wait is not missed.
            let notified = self.notify.notified();
            let msgs = self.try_read(consumer, count);
            if !msgs.is_empty() {
                return Ok(msgs);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep(deadline - now) => return Ok(Vec::new()),
            }
        }
    }

    async fn claim_idle(
        &self,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        let mut ids: Vec<u64> = inner
            .pel
            .iter()
            .filter(|(_, e)| now.duration_since(e.delivered_at) >= min_idle)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids.truncate(count);

        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(entry) = inner.pel.get_mut(&id) {
                entry.consumer = consumer.to_string();
                entry.delivered_at = now;
                entry.deliveries += 1;
                out.push(QueueMessage {
                    id: id.to_string(),
                    job_id: entry.job_id.clone(),
                });
            }
        }
        Ok(out)
    }

    async fn ack(&self, message_id: &str) -> Result<(), QueueError> {
        let id: u64 = message_id
            .parse()
            .map_err(|_| QueueError::Command(format!("bad message id: {message_id}")))?;
        self.inner.lock().pel.remove(&id);
        Ok(())
    }
}
