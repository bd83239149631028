//! WeChat Pay v3 merchant client: Native (scan-to-pay) prepay and close.
//!
//! Requests are signed PKCS#1 v1.5 / SHA-256 over
//! `method\ncanonical_url\ntimestamp\nnonce\nbody\n` with the merchant
//! private key.

use async_trait::async_trait;
use base64::Engine;
use rand::RngCore;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs1v15::SigningKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::sha2::Sha256;
use rsa::signature::{SignatureEncoding, Signer};
use rsa::RsaPrivateKey;
use serde_json::json;
use tracing::info;

use super::{PayError, PaymentProvider};

const DEFAULT_API_BASE: &str = "https://api.mch.weixin.qq.com";
const ORDER_DESCRIPTION: &str = "Excel 对比导出";

#[derive(Debug, Clone)]
pub struct WechatPayConfig {
    pub mchid: String,
    pub appid: String,
    pub notify_url: String,
    /// Merchant certificate serial (uppercase hex).
    pub merchant_serial: String,
    /// Merchant private key, PKCS#8 or PKCS#1 PEM.
    pub private_key_pem: String,
    /// Override for tests; defaults to the production endpoint.
    pub api_base: Option<String>,
}

pub struct WechatPayClient {
    cfg: WechatPayConfig,
    api_base: String,
    signing_key: SigningKey<Sha256>,
    http: reqwest::Client,
}

impl WechatPayClient {
    pub fn new(cfg: WechatPayConfig) -> Result<Self, PayError> {
        if cfg.mchid.trim().is_empty() {
            return Err(PayError::Config("缺少商户号 mchid".to_string()));
        }
        if !is_valid_mchid(&cfg.mchid) {
            return Err(PayError::Config(format!(
                "mchid 非法：{:?}（必须是纯数字直连商户号）",
                cfg.mchid
            )));
        }
        if cfg.appid.trim().is_empty() {
            return Err(PayError::Config("缺少 appid".to_string()));
        }
        if cfg.notify_url.trim().is_empty() {
            return Err(PayError::Config("缺少 notify_url".to_string()));
        }
        if cfg.merchant_serial.trim().is_empty() {
            return Err(PayError::Config("缺少商户证书序列号".to_string()));
        }

        let key = parse_private_key(&cfg.private_key_pem)?;
        let api_base = cfg
            .api_base
            .clone()
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(20))
            .build()
            .map_err(|e| PayError::Config(e.to_string()))?;

        Ok(Self {
            cfg,
            api_base,
            signing_key: SigningKey::new(key),
            http,
        })
    }

    fn auth_header(&self, method: &str, canonical_url: &str, body: &str) -> Result<String, PayError> {
        let ts = chrono::Utc::now().timestamp().to_string();
        let nonce = mint_nonce();
        let message = format!("{method}\n{canonical_url}\n{ts}\n{nonce}\n{body}\n");
        let signature = self
            .signing_key
            .try_sign(message.as_bytes())
            .map_err(|e| PayError::Signature(e.to_string()))?;
        let sig_b64 = base64::engine::general_purpose::STANDARD.encode(signature.to_vec());
        Ok(format!(
            "WECHATPAY2-SHA256-RSA2048 mchid=\"{}\",nonce_str=\"{}\",timestamp=\"{}\",serial_no=\"{}\",signature=\"{}\"",
            self.cfg.mchid, nonce, ts, self.cfg.merchant_serial, sig_b64
        ))
    }

    async fn post(&self, canonical_url: &str, body: String) -> Result<String, PayError> {
        let auth = self.auth_header("POST", canonical_url, &body)?;
        let url = format!("{}{}", self.api_base, canonical_url);
        let resp = self
            .http
            .post(&url)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .header("Authorization", auth)
            .body(body)
            .send()
            .await
            .map_err(|e| PayError::Provider(e.to_string()))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| PayError::Provider(e.to_string()))?;
        if !status.is_success() {
            let msg = if text.trim().is_empty() {
                status.to_string()
            } else {
                text.chars().take(512).collect()
            };
            return Err(PayError::Provider(msg));
        }
        Ok(text)
    }
}

#[async_trait]
impl PaymentProvider for WechatPayClient {
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

        let body = json!({
            "appid": self.cfg.appid,
            "mchid": self.cfg.mchid,
            "description": ORDER_DESCRIPTION,
            "out_trade_no": out_trade_no,
            "notify_url": self.cfg.notify_url,
            "amount": { "total": total_minor, "currency": "CNY" },
        })
        .to_string();

        let text = self.post("/v3/pay/transactions/native", body).await?;
        let parsed: serde_json::Value =
            serde_json::from_str(&text).map_err(|e| PayError::Provider(e.to_string()))?;
        let code_url = parsed
            .get("code_url")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .unwrap_or_default();
        if code_url.is_empty() {
            return Err(PayError::Provider("预下单未返回 code_url".to_string()));
        }
        info!(%out_trade_no, total_minor, "payment order created");
        Ok(code_url.to_string())
    }

    async fn close_order(&self, out_trade_no: &str) -> Result<(), PayError> {
        if out_trade_no.trim().is_empty() {
            return Err(PayError::Config("out_trade_no 为空".to_string()));
        }
        let canonical = format!("/v3/pay/transactions/out-trade-no/{out_trade_no}/close");
        let body = json!({ "mchid": self.cfg.mchid }).to_string();
        self.post(&canonical, body).await?;
        info!(%out_trade_no, "payment order closed");
        Ok(())
    }
}

fn parse_private_key(pem: &str) -> Result<RsaPrivateKey, PayError> {
    let pem = pem.trim();
    RsaPrivateKey::from_pkcs8_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
        .map_err(|e| PayError::Config(format!("加载商户私钥失败: {e}")))
}

fn is_valid_mchid(mchid: &str) -> bool {
    let m = mchid.trim();
    !m.is_empty() && m.bytes().all(|b| b.is_ascii_digit()) && !m.starts_with('0')
}

fn mint_nonce() -> String {
    let mut buf = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}
