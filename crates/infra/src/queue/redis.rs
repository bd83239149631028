//! Redis Streams implementation (XADD / XREADGROUP / XAUTOCLAIM / XACK).

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use redis::Value;

use super::{JobQueue, QueueError, QueueMessage};

const JOB_ID_FIELD: &str = "jobId";

pub struct RedisStreamQueue {
    conn: ConnectionManager,
    stream: String,
    group: String,
    max_len: usize,
    /// XAUTOCLAIM scan cursor, advanced from each reply.
    claim_cursor: Mutex<String>,
}

impl RedisStreamQueue {
    pub fn new(
        conn: ConnectionManager,
        stream: impl Into<String>,
        group: impl Into<String>,
        max_len: usize,
    ) -> Self {
        Self {
            conn,
            stream: stream.into().trim().to_string(),
            group: group.into().trim().to_string(),
            max_len: if max_len == 0 { 100_000 } else { max_len },
            claim_cursor: Mutex::new("0-0".to_string()),
        }
    }

    fn command_err(e: redis::RedisError) -> QueueError {
        if e.is_connection_refusal() || e.is_io_error() {
            QueueError::Connection(e.to_string())
        } else {
            QueueError::Command(e.to_string())
        }
    }
}

#[async_trait]
impl JobQueue for RedisStreamQueue {
    async fn enqueue(&self, job_id: &str) -> Result<(), QueueError> {
        let job_id = job_id.trim();
        if job_id.is_empty() {
            return Err(QueueError::Command("empty job id".to_string()));
        }
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("XADD")
            .arg(&self.stream)
            .arg("MAXLEN")
            .arg("~")
            .arg(self.max_len)
            .arg("*")
            .arg(JOB_ID_FIELD)
            .arg(job_id)
            .query_async(&mut conn)
            .await
            .map_err(Self::command_err)?;
        Ok(())
    }

    async fn ensure_group(&self) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        // MKSTREAM creates the stream if absent; BUSYGROUP means the group
        // already exists, which is success for us.
        let result: Result<String, redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.stream)
            .arg(&self.group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(e) if e.to_string().to_lowercase().contains("busygroup") => Ok(()),
            Err(e) => Err(Self::command_err(e)),
        }
    }

    async fn read_new(
        &self,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        let mut conn = self.conn.clone();
        let reply: Value = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.group)
            .arg(consumer)
            .arg("COUNT")
            .arg(count)
            .arg("BLOCK")
            .arg(block.as_millis() as u64)
            .arg("STREAMS")
            .arg(&self.stream)
            .arg(">")
            .query_async(&mut conn)
            .await
            .map_err(Self::command_err)?;

        // Nil reply: the block timed out without new messages.
        let streams = match reply {
            Value::Nil => return Ok(Vec::new()),
            Value::Bulk(streams) => streams,
            other => {
                return Err(QueueError::Command(format!(
                    "unexpected XREADGROUP reply: {other:?}"
                )))
            }
        };

        let mut out = Vec::new();
        for stream in streams {
            // Each element: [stream_key, [[id, [field, value, ...]], ...]]
            if let Value::Bulk(pair) = stream {
                if let Some(Value::Bulk(entries)) = pair.into_iter().nth(1) {
                    parse_entries(entries, &mut out);
                }
            }
        }
        Ok(out)
    }

    async fn claim_idle(
        &self,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        let start = self.claim_cursor.lock().clone();
        let mut conn = self.conn.clone();
        let reply: Value = redis::cmd("XAUTOCLAIM")
            .arg(&self.stream)
            .arg(&self.group)
            .arg(consumer)
            .arg(min_idle.as_millis() as u64)
            .arg(&start)
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await
            .map_err(Self::command_err)?;

        // Reply: [next_cursor, entries, (deleted ids on 7.x)]
        let mut parts = match reply {
            Value::Bulk(parts) => parts.into_iter(),
            other => {
                return Err(QueueError::Command(format!(
                    "unexpected XAUTOCLAIM reply: {other:?}"
                )))
            }
        };
        if let Some(cursor) = parts.next().and_then(value_to_string) {
            if !cursor.trim().is_empty() {
                *self.claim_cursor.lock() = cursor;
            }
        }
        let mut out = Vec::new();
        if let Some(Value::Bulk(entries)) = parts.next() {
            parse_entries(entries, &mut out);
        }
        Ok(out)
    }

    async fn ack(&self, message_id: &str) -> Result<(), QueueError> {
        if message_id.trim().is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let _: u64 = redis::cmd("XACK")
            .arg(&self.stream)
            .arg(&self.group)
            .arg(message_id)
            .query_async(&mut conn)
            .await
            .map_err(Self::command_err)?;
        Ok(())
    }
}

/// Parse `[[id, [field, value, ...]], ...]` entries, keeping the `jobId`
/// field. Malformed entries are skipped rather than failing the batch.
fn parse_entries(entries: Vec<Value>, out: &mut Vec<QueueMessage>) {
    for entry in entries {
        let Value::Bulk(pair) = entry else { continue };
        let mut pair = pair.into_iter();
        let Some(id) = pair.next().and_then(value_to_string) else {
            continue;
        };
        let Some(Value::Bulk(fields)) = pair.next() else {
            continue;
        };
        let mut job_id = None;
        let mut fields = fields.into_iter();
        while let (Some(k), Some(v)) = (fields.next(), fields.next()) {
            if value_to_string(k).as_deref() == Some(JOB_ID_FIELD) {
                job_id = value_to_string(v);
                break;
            }
        }
        if let Some(job_id) = job_id {
            out.push(QueueMessage { id, job_id });
        }
    }
}

fn value_to_string(v: Value) -> Option<String> {
    match v {
        Value::Data(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        Value::Status(s) => Some(s),
        _ => None,
    }
}
