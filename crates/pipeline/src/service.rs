//! Query-boundary operations: cancel and download.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use sheetgate_core::{CompareJob, JobStatus};
use sheetgate_infra::blob::{BlobError, BlobStore};
use sheetgate_infra::jobs::CompareJobStore;
use sheetgate_infra::payment::PaymentProvider;

pub const DOWNLOAD_DISPLAY_NAME: &str = "比对结果.xlsx";

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("not found")]
    NotFound,

    /// Download target was cancelled (HTTP 410).
    #[error("订单已取消")]
    Cancelled,

    /// Not paid / not ready yet (HTTP 402).
    #[error("请先完成支付后再下载结果")]
    PaymentRequired,

    /// Cancel refused: already paid or released (HTTP 409).
    #[error("订单已支付或已放行，无法取消")]
    Conflict,

    /// Artifact vanished (HTTP 410).
    #[error("结果文件不存在或已过期")]
    ArtifactGone,

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("store error: {0}")]
    Store(String),
}

pub enum ExportOutcome {
    /// Short-lived signed URL (cross-replica safe).
    SignedUrl(String),
    /// Direct artifact bytes; used when the backend cannot sign.
    Bytes(Vec<u8>),
}

pub struct JobService<S: ?Sized, B: ?Sized> {
    store: Arc<S>,
    blob: Arc<B>,
    provider: Arc<dyn PaymentProvider>,
}

impl<S, B> JobService<S, B>
where
    S: CompareJobStore + ?Sized,
    B: BlobStore + ?Sized,
{
    pub fn new(store: Arc<S>, blob: Arc<B>, provider: Arc<dyn PaymentProvider>) -> Self {
        Self {
            store,
            blob,
            provider,
        }
    }

    pub async fn get(&self, job_id: &str) -> Result<Option<CompareJob>, ServiceError> {
        self.store
            .get(job_id)
            .await
            .map_err(|e| ServiceError::Store(e.to_string()))
    }

    /// User cancel: idempotent on `cancelled`, refused once paid/released.
    /// From `awaiting_payment` the external order is closed first; a payment
    /// landing concurrently wins.
    pub async fn cancel(&self, job_id: &str) -> Result<CompareJob, ServiceError> {
        let job = self.get(job_id).await?.ok_or(ServiceError::NotFound)?;

        if job.status == JobStatus::Cancelled {
            return Ok(job);
        }
        if job.paid || job.status == JobStatus::Ready {
            return Err(ServiceError::Conflict);
        }

        if job.status == JobStatus::AwaitingPayment {
            self.provider
                .close_order(job_id)
                .await
                .map_err(|e| ServiceError::Upstream(format!("关闭支付订单失败: {e}")))?;
        }

        let now = Utc::now();
        let updated = self
            .store
            .update(job_id, &|j| j.cancel(now))
            .await
            .map_err(|e| ServiceError::Store(e.to_string()))?
            .ok_or(ServiceError::NotFound)?;
        info!(%job_id, status = updated.status.as_str(), "cancel applied");
        Ok(updated)
    }

    /// Download: only for paid, ready jobs with an artifact. Prefers a
    /// signed URL; falls back to the raw bytes.
    pub async fn export(&self, job_id: &str) -> Result<ExportOutcome, ServiceError> {
        let job = self.get(job_id).await?.ok_or(ServiceError::NotFound)?;

        if job.status == JobStatus::Cancelled {
            return Err(ServiceError::Cancelled);
        }
        if !job.paid || job.effective_status() != JobStatus::Ready || !job.has_artifact() {
            return Err(ServiceError::PaymentRequired);
        }

        match self
            .blob
            .sign_download_url(&job.artifact_key, DOWNLOAD_DISPLAY_NAME)
            .await
        {
            Ok(Some(url)) => Ok(ExportOutcome::SignedUrl(url)),
            Ok(None) => match self.blob.read(&job.artifact_key).await {
                Ok(bytes) => Ok(ExportOutcome::Bytes(bytes)),
                Err(BlobError::NotFound(_)) => Err(ServiceError::ArtifactGone),
                Err(e) => Err(ServiceError::Upstream(e.to_string())),
            },
            Err(e) => Err(ServiceError::Upstream(e.to_string())),
        }
    }
}
