//! Response DTOs.

use chrono::{DateTime, Utc};
use serde::Serialize;

use sheetgate_core::{CompareJob, JobStatus};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub job_id: String,
    pub status: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub job_id: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub paid: bool,
    /// Billed amount in major units, present while awaiting payment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(rename = "code_url", skip_serializing_if = "Option::is_none")]
    pub code_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paid_at: Option<DateTime<Utc>>,
}

impl StatusResponse {
    pub fn from_job(job: &CompareJob) -> Self {
        let status = job.effective_status();
        let awaiting = status == JobStatus::AwaitingPayment;
        Self {
            job_id: job.id.as_str().to_string(),
            status: status.as_str().to_string(),
            created_at: job.created_at,
            paid: job.paid,
            amount: awaiting.then(|| job.fee_minor as f64 / 100.0),
            code_url: (awaiting && !job.code_url.is_empty()).then(|| job.code_url.clone()),
            error: (job.status == JobStatus::Failed && !job.error.is_empty())
                .then(|| job.error.clone()),
            cancelled_at: job.cancelled_at,
            paid_at: job.paid_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelResponse {
    pub job_id: String,
    pub status: String,
    pub cancelled: bool,
}

#[derive(Debug, Serialize)]
pub struct ExportUrlResponse {
    pub url: String,
    pub filename: String,
}
