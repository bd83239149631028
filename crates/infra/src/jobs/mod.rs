//! Authoritative job store: read-modify-write with conflict detection.
//!
//! The mutator passed to [`CompareJobStore::update`] is the sole place state
//! transitions happen; it must stay idempotent because conflicting writers
//! cause it to re-run against a fresh copy of the record.

mod memory;
mod redis;

pub use memory::InMemoryCompareJobStore;
pub use redis::RedisCompareJobStore;

use std::sync::Arc;

use async_trait::async_trait;

use sheetgate_core::CompareJob;

/// Mutator applied inside the store's atomic update.
pub type JobMutator<'a> = &'a (dyn Fn(&mut CompareJob) + Send + Sync);

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("job already exists: {0}")]
    Exists(String),

    /// Optimistic update lost against concurrent writers too many times;
    /// callers treat this as transient.
    #[error("job update conflict: retries exceeded")]
    Conflict,

    #[error("job store error: {0}")]
    Storage(String),
}

#[async_trait]
pub trait CompareJobStore: Send + Sync {
    /// Insert only if absent.
    async fn create(&self, job: &CompareJob) -> Result<(), StoreError>;

    /// Fetch a copy of the record; callers never observe shared state.
    async fn get(&self, id: &str) -> Result<Option<CompareJob>, StoreError>;

    /// Load, apply `mutate`, write back atomically with respect to
    /// concurrent writers. `Ok(None)` when the id does not exist (or its TTL
    /// expired). Returns the post-mutation record.
    async fn update(&self, id: &str, mutate: JobMutator<'_>)
        -> Result<Option<CompareJob>, StoreError>;
}

#[async_trait]
impl<S> CompareJobStore for Arc<S>
where
    S: CompareJobStore + ?Sized,
{
    async fn create(&self, job: &CompareJob) -> Result<(), StoreError> {
        (**self).create(job).await
    }

    async fn get(&self, id: &str) -> Result<Option<CompareJob>, StoreError> {
        (**self).get(id).await
    }

    async fn update(
        &self,
        id: &str,
        mutate: JobMutator<'_>,
    ) -> Result<Option<CompareJob>, StoreError> {
        (**self).update(id, mutate).await
    }
}
