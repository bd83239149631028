//! Redis lease: `SET NX PX` acquire plus Lua-scripted safe refresh/release.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Script, Value};

use super::{LeaseError, LeaseStore};

const REFRESH_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
  return redis.call("PEXPIRE", KEYS[1], ARGV[2])
else
  return 0
end
"#;

const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
  return redis.call("DEL", KEYS[1])
else
  return 0
end
"#;

pub struct RedisLeaseStore {
    conn: ConnectionManager,
    refresh: Script,
    release: Script,
}

impl RedisLeaseStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            refresh: Script::new(REFRESH_SCRIPT),
            release: Script::new(RELEASE_SCRIPT),
        }
    }

    fn backend_err(e: redis::RedisError) -> LeaseError {
        LeaseError::Backend(e.to_string())
    }
}

#[async_trait]
impl LeaseStore for RedisLeaseStore {
    async fn try_acquire(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, LeaseError> {
        let mut conn = self.conn.clone();
        let reply: Value = redis::cmd("SET")
            .arg(key)
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await
            .map_err(Self::backend_err)?;
        Ok(!matches!(reply, Value::Nil))
    }

    async fn refresh(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, LeaseError> {
        let mut conn = self.conn.clone();
        let n: i64 = self
            .refresh
            .key(key)
            .arg(token)
            .arg(ttl.as_millis() as u64)
            .invoke_async(&mut conn)
            .await
            .map_err(Self::backend_err)?;
        Ok(n == 1)
    }

    async fn release(&self, key: &str, token: &str) -> Result<bool, LeaseError> {
        let mut conn = self.conn.clone();
        let n: i64 = self
            .release
            .key(key)
            .arg(token)
            .invoke_async(&mut conn)
            .await
            .map_err(Self::backend_err)?;
        Ok(n == 1)
    }
}
