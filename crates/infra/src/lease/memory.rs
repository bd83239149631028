//! In-memory lease store for dev/tests.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{LeaseError, LeaseStore};

#[derive(Default)]
pub struct InMemoryLeaseStore {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl InMemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn purge(entries: &mut HashMap<String, (String, Instant)>) {
        let now = Instant::now();
        entries.retain(|_, (_, expires)| *expires > now);
    }
}

#[async_trait]
impl LeaseStore for InMemoryLeaseStore {
    async fn try_acquire(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, LeaseError> {
        let mut entries = self.entries.lock();
        Self::purge(&mut entries);
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(key.to_string(), (token.to_string(), Instant::now() + ttl));
        Ok(true)
    }

    async fn refresh(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, LeaseError> {
        let mut entries = self.entries.lock();
        Self::purge(&mut entries);
        match entries.get_mut(key) {
            Some((owner, expires)) if owner == token => {
                *expires = Instant::now() + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, key: &str, token: &str) -> Result<bool, LeaseError> {
        let mut entries = self.entries.lock();
        Self::purge(&mut entries);
        match entries.get(key) {
            Some((owner, _)) if owner == token => {
                entries.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
