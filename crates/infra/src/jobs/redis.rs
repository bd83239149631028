//! Redis job store: JSON record per key, optimistic Lua compare-and-swap.
//!
//! Every write refreshes the record TTL; an expired id reads as nonexistent.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Script, Value};
use tracing::debug;

use sheetgate_core::CompareJob;

use super::{CompareJobStore, JobMutator, StoreError};

const UPDATE_RETRIES: usize = 8;
/// Deadline for single reads/creates.
const OP_TIMEOUT: Duration = Duration::from_secs(2);
/// Deadline for the whole optimistic-update loop.
const UPDATE_TIMEOUT: Duration = Duration::from_secs(4);

/// Swap the record only if it is unchanged since the read, refreshing the TTL.
const CAS_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
  redis.call("SET", KEYS[1], ARGV[2], "PX", ARGV[3])
  return 1
else
  return 0
end
"#;

pub struct RedisCompareJobStore {
    conn: ConnectionManager,
    key_prefix: String,
    ttl: Duration,
    cas: Script,
}

impl RedisCompareJobStore {
    pub fn new(conn: ConnectionManager, key_prefix: impl Into<String>, ttl: Duration) -> Self {
        Self {
            conn,
            key_prefix: key_prefix.into(),
            ttl,
            cas: Script::new(CAS_SCRIPT),
        }
    }

    fn key(&self, id: &str) -> String {
        format!("{}{}", self.key_prefix, id.trim())
    }

    fn storage_err(e: impl std::fmt::Display) -> StoreError {
        StoreError::Storage(e.to_string())
    }
}

#[async_trait]
impl CompareJobStore for RedisCompareJobStore {
    async fn create(&self, job: &CompareJob) -> Result<(), StoreError> {
        let id = job.id.as_str();
        if id.is_empty() {
            return Err(StoreError::Storage("empty job id".to_string()));
        }
        let raw = serde_json::to_string(job).map_err(Self::storage_err)?;
        let mut conn = self.conn.clone();
        let reply: Value = tokio::time::timeout(
            OP_TIMEOUT,
            redis::cmd("SET")
                .arg(self.key(id))
                .arg(raw)
                .arg("NX")
                .arg("PX")
                .arg(self.ttl.as_millis() as u64)
                .query_async(&mut conn),
        )
        .await
        .map_err(|_| StoreError::Storage("create timed out".to_string()))?
        .map_err(Self::storage_err)?;
        if matches!(reply, Value::Nil) {
            return Err(StoreError::Exists(id.to_string()));
        }
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<CompareJob>, StoreError> {
        let id = id.trim();
        if id.is_empty() {
            return Ok(None);
        }
        let mut conn = self.conn.clone();
        let raw: Option<String> = tokio::time::timeout(
            OP_TIMEOUT,
            redis::cmd("GET").arg(self.key(id)).query_async(&mut conn),
        )
        .await
        .map_err(|_| StoreError::Storage("get timed out".to_string()))?
        .map_err(Self::storage_err)?;
        match raw {
            Some(raw) => {
                let job = serde_json::from_str(&raw).map_err(Self::storage_err)?;
                Ok(Some(job))
            }
            None => Ok(None),
        }
    }

    async fn update(
        &self,
        id: &str,
        mutate: JobMutator<'_>,
    ) -> Result<Option<CompareJob>, StoreError> {
        let id = id.trim();
        if id.is_empty() {
            return Ok(None);
        }
        let key = self.key(id);

        let attempt_loop = async {
            for attempt in 0..UPDATE_RETRIES {
                let mut conn = self.conn.clone();
                let old_raw: Option<String> = redis::cmd("GET")
                    .arg(&key)
                    .query_async(&mut conn)
                    .await
                    .map_err(Self::storage_err)?;
                let Some(old_raw) = old_raw else {
                    return Ok(None);
                };

                let mut job: CompareJob =
                    serde_json::from_str(&old_raw).map_err(Self::storage_err)?;
                mutate(&mut job);
                let new_raw = serde_json::to_string(&job).map_err(Self::storage_err)?;

                let swapped: i64 = self
                    .cas
                    .key(&key)
                    .arg(&old_raw)
                    .arg(&new_raw)
                    .arg(self.ttl.as_millis() as u64)
                    .invoke_async(&mut conn)
                    .await
                    .map_err(Self::storage_err)?;
                if swapped == 1 {
                    return Ok(Some(job));
                }
                debug!(%id, attempt, "job update lost CAS; retrying");
            }
            Err(StoreError::Conflict)
        };

        tokio::time::timeout(UPDATE_TIMEOUT, attempt_loop)
            .await
            .map_err(|_| StoreError::Storage("update timed out".to_string()))?
    }
}
