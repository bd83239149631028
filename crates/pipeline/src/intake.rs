//! Intake: persist inputs, create the job record, enqueue compute.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use sheetgate_core::{CompareJob, JobId};
use sheetgate_infra::blob::{spreadsheet_content_type, BlobStore};
use sheetgate_infra::jobs::CompareJobStore;
use sheetgate_infra::queue::JobQueue;

use crate::ENQUEUE_TIMEOUT;

#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    #[error("对象存储未启用")]
    BlobDisabled,

    #[error("上传对象存储失败: {0}")]
    Upload(String),

    #[error("job store error: {0}")]
    Store(String),

    #[error("投递任务失败: {0}")]
    Enqueue(String),
}

/// A file part already streamed to temporary storage by the transport layer.
pub struct UploadedPart {
    pub path: PathBuf,
    pub original_name: String,
}

pub struct IntakeService<S: ?Sized, B: ?Sized, Q: ?Sized> {
    store: Arc<S>,
    blob: Arc<B>,
    compute_queue: Arc<Q>,
}

impl<S, B, Q> IntakeService<S, B, Q>
where
    S: CompareJobStore + ?Sized,
    B: BlobStore + ?Sized,
    Q: JobQueue + ?Sized,
{
    pub fn new(store: Arc<S>, blob: Arc<B>, compute_queue: Arc<Q>) -> Self {
        Self {
            store,
            blob,
            compute_queue,
        }
    }

    /// Upload both inputs, create the record in `processing`, and enqueue the
    /// job on the compute stream. Local temp files are removed on success.
    pub async fn submit(
        &self,
        file1: UploadedPart,
        file2: UploadedPart,
    ) -> Result<CompareJob, IntakeError> {
        if !self.blob.enabled() {
            return Err(IntakeError::BlobDisabled);
        }

        let job_id = JobId::mint();
        let key1 = self
            .blob
            .input_key(job_id.as_str(), "file1", &file1.original_name);
        let key2 = self
            .blob
            .input_key(job_id.as_str(), "file2", &file2.original_name);

        self.blob
            .put_file(
                &key1,
                &file1.path,
                spreadsheet_content_type(&file1.original_name),
            )
            .await
            .map_err(|e| IntakeError::Upload(e.to_string()))?;
        self.blob
            .put_file(
                &key2,
                &file2.path,
                spreadsheet_content_type(&file2.original_name),
            )
            .await
            .map_err(|e| IntakeError::Upload(e.to_string()))?;

        for part in [&file1, &file2] {
            if let Err(e) = tokio::fs::remove_file(&part.path).await {
                warn!(path = %part.path.display(), error = %e, "temp cleanup failed");
            }
        }

        let job = CompareJob::new(
            job_id.clone(),
            key1,
            key2,
            file1.original_name,
            file2.original_name,
        );
        self.store
            .create(&job)
            .await
            .map_err(|e| IntakeError::Store(e.to_string()))?;

        let enqueued = tokio::time::timeout(
            ENQUEUE_TIMEOUT,
            self.compute_queue.enqueue(job_id.as_str()),
        )
        .await;
        let enqueue_err = match enqueued {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some("enqueue timed out".to_string()),
        };
        if let Some(msg) = enqueue_err {
            let _ = self
                .store
                .update(job_id.as_str(), &|j| {
                    j.mark_failed(format!("投递任务失败: {msg}"))
                })
                .await;
            return Err(IntakeError::Enqueue(msg));
        }

        info!(job_id = %job_id, "compare job submitted");
        Ok(job)
    }
}
