//! External payment: provider contract, notify envelope types, crypto.

pub mod crypto;
pub mod verify;
pub mod wechat;

pub use verify::{
    InsecureAcceptAllVerifier, MissingMaterialVerifier, NotifySignature, NotifyVerifier,
    RsaNotifyVerifier,
};
pub use wechat::WechatPayClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum PayError {
    #[error("payment config error: {0}")]
    Config(String),

    #[error("payment provider error: {0}")]
    Provider(String),

    #[error("notify signature invalid: {0}")]
    Signature(String),

    #[error("notify decrypt failed: {0}")]
    Crypto(String),
}

/// Creates and closes external payment orders. The job id doubles as the
/// provider's order reference (`out_trade_no`).
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Create a scan-to-pay order for `total_minor` (minor units) and return
    /// the scannable code URL.
    async fn create_native_order(
        &self,
        out_trade_no: &str,
        total_minor: i64,
    ) -> Result<String, PayError>;

    /// Close an unpaid order (used by user cancellation).
    async fn close_order(&self, out_trade_no: &str) -> Result<(), PayError>;
}

/// Stand-in provider for dev and tests: a deterministic placeholder code URL
/// is enough for QR rendering, and close is a no-op.
#[derive(Debug, Default)]
pub struct MockPayClient;

#[async_trait]
impl PaymentProvider for MockPayClient {
    async fn create_native_order(
        &self,
        out_trade_no: &str,
        total_minor: i64,
    ) -> Result<String, PayError> {
        if out_trade_no.trim().is_empty() {
            return Err(PayError::Config("out_trade_no 为空".to_string()));
        }
        if total_minor <= 0 {
            return Err(PayError::Config("金额必须为正数(分)".to_string()));
        }
        Ok(format!("weixin://wxpay/bizpayurl?pr={out_trade_no}"))
    }

    async fn close_order(&self, _out_trade_no: &str) -> Result<(), PayError> {
        Ok(())
    }
}

/// Outer notify envelope: the interesting part is the encrypted resource.
#[derive(Debug, Deserialize)]
pub struct NotifyEnvelope {
    pub resource: NotifyResource,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NotifyResource {
    #[serde(default)]
    pub algorithm: String,
    pub ciphertext: String,
    #[serde(default)]
    pub associated_data: String,
    pub nonce: String,
    #[serde(default)]
    pub original_type: String,
}

/// Decrypted transaction resource.
#[derive(Debug, Serialize, Deserialize)]
pub struct NotifyTransaction {
    pub out_trade_no: String,
    pub trade_state: String,
    #[serde(default)]
    pub success_time: String,
    pub amount: NotifyAmount,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NotifyAmount {
    pub total: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_provider_mints_placeholder_code_urls() {
        let client = MockPayClient;
        let url = client.create_native_order("job_x", 100).await.unwrap();
        assert_eq!(url, "weixin://wxpay/bizpayurl?pr=job_x");
        client.close_order("job_x").await.unwrap();
        assert!(client.create_native_order("job_x", 0).await.is_err());
    }

    #[test]
    fn envelope_parses_provider_json() {
        let raw = r#"{
            "id": "evt",
            "resource": {
                "algorithm": "AEAD_AES_256_GCM",
                "ciphertext": "YmFzZTY0",
                "associated_data": "transaction",
                "nonce": "abcdefghijkl",
                "original_type": "transaction"
            }
        }"#;
        let env: NotifyEnvelope = serde_json::from_str(raw).unwrap();
        assert_eq!(env.resource.nonce, "abcdefghijkl");
    }
}
