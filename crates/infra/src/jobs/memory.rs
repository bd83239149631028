//! In-memory job store for dev/tests.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use sheetgate_core::CompareJob;

use super::{CompareJobStore, JobMutator, StoreError};

#[derive(Default)]
pub struct InMemoryCompareJobStore {
    jobs: Mutex<HashMap<String, CompareJob>>,
}

impl InMemoryCompareJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CompareJobStore for InMemoryCompareJobStore {
    async fn create(&self, job: &CompareJob) -> Result<(), StoreError> {
        let id = job.id.as_str().to_string();
        if id.is_empty() {
            return Err(StoreError::Storage("empty job id".to_string()));
        }
        let mut jobs = self.jobs.lock();
        if jobs.contains_key(&id) {
            return Err(StoreError::Exists(id));
        }
        jobs.insert(id, job.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<CompareJob>, StoreError> {
        Ok(self.jobs.lock().get(id.trim()).cloned())
    }

    async fn update(
        &self,
        id: &str,
        mutate: JobMutator<'_>,
    ) -> Result<Option<CompareJob>, StoreError> {
        let mut jobs = self.jobs.lock();
        match jobs.get_mut(id.trim()) {
            Some(job) => {
                mutate(job);
                Ok(Some(job.clone()))
            }
            None => Ok(None),
        }
    }
}
