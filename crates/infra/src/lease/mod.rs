//! Keyed lease: single-writer exclusion per stage + job.
//!
//! A lease is a transient key holding an opaque owner token. `acquire` only
//! succeeds when the key is absent; `refresh`/`release` only act when the
//! stored token matches. Losing ownership on release is not an error — it
//! means the lease expired and was reacquired elsewhere, and job-state
//! invariants make the replayed work converge.

mod memory;
mod redis;

pub use memory::InMemoryLeaseStore;
pub use redis::RedisLeaseStore;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::RngCore;
use tokio::task::JoinHandle;
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum LeaseError {
    #[error("lease backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Atomic set-if-absent with TTL. `Ok(false)` means another owner holds
    /// the lease.
    async fn try_acquire(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, LeaseError>;

    /// Extend the TTL when the stored token matches. `Ok(false)` means
    /// ownership was lost.
    async fn refresh(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, LeaseError>;

    /// Delete when the stored token matches. `Ok(false)` is benign.
    async fn release(&self, key: &str, token: &str) -> Result<bool, LeaseError>;
}

/// 128-bit random token, minted per acquisition attempt.
pub fn mint_token() -> String {
    let mut buf = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

/// A held lease with a background refresher.
///
/// The refresher renews at the configured cadence (well under the TTL) and
/// stops by itself when ownership is lost. Call [`HeldLease::release`] on
/// every exit path; if the holder is dropped instead, the refresher is
/// aborted and the key expires naturally.
pub struct HeldLease {
    store: Arc<dyn LeaseStore>,
    key: String,
    token: String,
    refresher: JoinHandle<()>,
}

impl HeldLease {
    /// Try to take the lease; `None` when another owner holds it.
    pub async fn acquire(
        store: Arc<dyn LeaseStore>,
        key: impl Into<String>,
        ttl: Duration,
        refresh_every: Duration,
    ) -> Result<Option<HeldLease>, LeaseError> {
        let key = key.into();
        let token = mint_token();
        if !store.try_acquire(&key, &token, ttl).await? {
            return Ok(None);
        }

        let refresher = tokio::spawn({
            let store = store.clone();
            let key = key.clone();
            let token = token.clone();
            async move {
                let mut tick = tokio::time::interval(refresh_every);
                tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                tick.tick().await; // first tick fires immediately
                loop {
                    tick.tick().await;
                    match store.refresh(&key, &token, ttl).await {
                        Ok(true) => {}
                        Ok(false) => {
                            warn!(%key, "lease ownership lost; stopping refresher");
                            return;
                        }
                        // Best-effort: the TTL is long relative to one blip.
                        Err(e) => warn!(%key, error = %e, "lease refresh failed"),
                    }
                }
            }
        });

        Ok(Some(HeldLease {
            store,
            key,
            token,
            refresher,
        }))
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Stop refreshing and delete the key if still owned.
    pub async fn release(self) {
        self.refresher.abort();
        if let Err(e) = self.store.release(&self.key, &self.token).await {
            warn!(key = %self.key, error = %e, "lease release failed");
        }
    }
}

impl Drop for HeldLease {
    fn drop(&mut self) {
        self.refresher.abort();
    }
}
