//! Payment notify handler (provider-driven, out-of-band).
//!
//! Verifies the envelope signature, decrypts the transaction resource, and
//! idempotently settles payment on the job record. Replies follow the
//! provider contract: `SUCCESS` stops retries, `FAIL` requests another
//! delivery.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use sheetgate_infra::jobs::CompareJobStore;
use sheetgate_infra::payment::crypto::decrypt_resource;
use sheetgate_infra::payment::{NotifyEnvelope, NotifySignature, NotifyTransaction, NotifyVerifier};

/// Reply to the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyAck {
    Success,
    Fail { status: u16, message: String },
}

impl NotifyAck {
    fn bad_request(message: impl Into<String>) -> Self {
        Self::Fail {
            status: 400,
            message: message.into(),
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            Self::Success => 200,
            Self::Fail { status, .. } => *status,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Fail { .. } => "FAIL",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Success => "OK",
            Self::Fail { message, .. } => message,
        }
    }
}

pub struct NotifyService<S: ?Sized> {
    store: Arc<S>,
    verifier: Arc<dyn NotifyVerifier>,
    /// Shared 32-byte APIv3 key for resource decryption.
    api_key: String,
}

impl<S> NotifyService<S>
where
    S: CompareJobStore + ?Sized,
{
    pub fn new(store: Arc<S>, verifier: Arc<dyn NotifyVerifier>, api_key: impl Into<String>) -> Self {
        Self {
            store,
            verifier,
            api_key: api_key.into(),
        }
    }

    pub async fn handle(&self, sig: &NotifySignature, body: &[u8]) -> NotifyAck {
        if let Err(e) = self.verifier.verify(sig, body) {
            warn!(error = %e, "notify signature rejected");
            // Missing verification material is our misconfiguration, not a
            // bad request.
            if matches!(e, sheetgate_infra::payment::PayError::Config(_)) {
                return NotifyAck::Fail {
                    status: 500,
                    message: "server config error".to_string(),
                };
            }
            return NotifyAck::bad_request("invalid signature");
        }

        let envelope: NotifyEnvelope = match serde_json::from_slice(body) {
            Ok(env) => env,
            Err(_) => return NotifyAck::bad_request("invalid json"),
        };
        let plain = match decrypt_resource(
            &self.api_key,
            &envelope.resource.associated_data,
            &envelope.resource.nonce,
            &envelope.resource.ciphertext,
        ) {
            Ok(plain) => plain,
            Err(e) => {
                warn!(error = %e, "notify decrypt failed");
                return NotifyAck::bad_request("decrypt failed");
            }
        };
        let tx: NotifyTransaction = match serde_json::from_slice(&plain) {
            Ok(tx) => tx,
            Err(_) => return NotifyAck::bad_request("invalid payload"),
        };

        let job_id = tx.out_trade_no.trim().to_string();
        if job_id.is_empty() {
            return NotifyAck::bad_request("missing out_trade_no");
        }

        // Non-success states still get SUCCESS so the provider stops
        // retrying; the merchant side can query the order if needed.
        if !tx.trade_state.eq_ignore_ascii_case("SUCCESS") {
            return NotifyAck::Success;
        }

        // Amount check against the recorded fee; fall back to one minor unit
        // when the fee was never recorded (racing replays of old records).
        if let Ok(Some(job)) = self.store.get(&job_id).await {
            let expected = if job.fee_minor > 0 { job.fee_minor } else { 1 };
            if tx.amount.total != expected {
                warn!(
                    %job_id,
                    expected,
                    got = tx.amount.total,
                    "notify amount mismatch"
                );
                return NotifyAck::bad_request("amount mismatch");
            }
        }

        let now = Utc::now();
        match self
            .store
            .update(&job_id, &|j| j.settle_payment(now))
            .await
        {
            Ok(Some(_)) => info!(%job_id, "payment settled"),
            Ok(None) => warn!(%job_id, "notify for unknown job"),
            Err(e) => warn!(%job_id, error = %e, "notify update failed"),
        }

        NotifyAck::Success
    }
}
