//! Opaque job identifiers.

use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Short opaque job id (`job_` + 24 hex chars).
///
/// Doubles as the payment provider's `out_trade_no`, so it must stay short
/// and URL-safe.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn mint() -> Self {
        let mut buf = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut buf);
        Self(format!("job_{}", hex::encode(buf)))
    }

    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}
