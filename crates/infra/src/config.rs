//! Environment-driven configuration.
//!
//! Every knob has a trimmed default so a bare dev environment boots; the
//! defaults match the persistent-state namespace documented in the README
//! (`gy:` prefix).

use std::time::Duration;

pub fn env_string(key: &str, default: &str) -> String {
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => default.to_string(),
    }
}

pub fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|n| *n > 0)
        .unwrap_or(default)
}

pub fn env_i64(key: &str, default: i64) -> i64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<i64>().ok())
        .unwrap_or(default)
}

pub fn env_duration_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|n| *n > 0)
        .map(Duration::from_secs)
        .unwrap_or(default)
}

pub fn env_flag(key: &str) -> bool {
    matches!(
        std::env::var(key).unwrap_or_default().trim(),
        "1" | "true" | "TRUE" | "True"
    )
}

/// One stream + consumer group.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub stream: String,
    pub group: String,
    pub max_len: usize,
}

impl StreamConfig {
    pub fn compute_from_env() -> Self {
        Self {
            stream: env_string("COMPARE_STREAM_KEY", "gy:comparejobs:stream"),
            group: env_string("COMPARE_STREAM_GROUP", "gy-compare"),
            max_len: env_usize("COMPARE_STREAM_MAXLEN", 100_000),
        }
    }

    pub fn paygate_from_env() -> Self {
        Self {
            stream: env_string("COMPARE_PAYGATE_STREAM_KEY", "gy:comparejobs:paygate"),
            group: env_string("COMPARE_PAYGATE_STREAM_GROUP", "gy-paygate"),
            max_len: env_usize("COMPARE_PAYGATE_STREAM_MAXLEN", 100_000),
        }
    }
}

/// Per-stage lease TTLs and refresh cadences.
#[derive(Debug, Clone)]
pub struct LeaseConfig {
    pub key_prefix: String,
    pub compute_ttl: Duration,
    pub compute_refresh: Duration,
    pub paygate_ttl: Duration,
    pub paygate_refresh: Duration,
}

impl LeaseConfig {
    pub fn from_env() -> Self {
        Self {
            key_prefix: env_string("COMPARE_JOB_LOCK_PREFIX", "gy:lock:comparejob:"),
            compute_ttl: env_duration_secs(
                "COMPARE_JOB_LOCK_TTL_SECONDS",
                Duration::from_secs(2 * 60 * 60),
            ),
            compute_refresh: env_duration_secs(
                "COMPARE_JOB_LOCK_REFRESH_SECONDS",
                Duration::from_secs(30),
            ),
            paygate_ttl: env_duration_secs(
                "COMPARE_PAYGATE_LOCK_TTL_SECONDS",
                Duration::from_secs(15 * 60),
            ),
            paygate_refresh: env_duration_secs(
                "COMPARE_PAYGATE_LOCK_REFRESH_SECONDS",
                Duration::from_secs(10),
            ),
        }
    }

    pub fn compute_key(&self, job_id: &str) -> String {
        format!("{}{}", self.key_prefix, job_id.trim())
    }

    pub fn paygate_key(&self, job_id: &str) -> String {
        format!("{}paygate:{}", self.key_prefix, job_id.trim())
    }
}

/// Job record namespace and TTL.
#[derive(Debug, Clone)]
pub struct JobStoreConfig {
    pub key_prefix: String,
    pub ttl: Duration,
}

impl JobStoreConfig {
    pub fn from_env() -> Self {
        Self {
            key_prefix: env_string("COMPARE_JOB_KEY_PREFIX", "gy:comparejob:"),
            ttl: env_duration_secs(
                "COMPARE_JOB_TTL_SECONDS",
                Duration::from_secs(7 * 24 * 60 * 60),
            ),
        }
    }
}

/// Fee gate: zero or negative means the free path.
pub fn fee_minor_from_env() -> i64 {
    env_i64("COMPARE_JOB_FEE_FEN", 0).max(0)
}

pub fn tmp_root_from_env() -> String {
    env_string("TMP_ROOT", "./tmp")
}

pub fn max_upload_bytes_from_env() -> usize {
    env_usize("COMPARE_MAX_UPLOAD_MB", 128) << 20
}

pub fn worker_fan_out_from_env() -> usize {
    env_usize("STREAM_CONCURRENCY", 4)
}

pub fn compute_max_inflight_from_env() -> usize {
    env_usize("COMPARE_MAX_INFLIGHT", 4)
}
