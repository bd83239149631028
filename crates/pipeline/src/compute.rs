//! Compute worker: downloads inputs, runs the diff engine, uploads the
//! artifact, and hands the job to the paygate stream.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use sheetgate_core::JobStatus;
use sheetgate_diff::{convert_legacy_if_needed, generate_compare_workbook, ConverterConfig};
use sheetgate_infra::blob::{sanitize_object_name, BlobStore};
use sheetgate_infra::config::LeaseConfig;
use sheetgate_infra::jobs::CompareJobStore;
use sheetgate_infra::lease::{HeldLease, LeaseStore};
use sheetgate_infra::queue::{JobHandler, JobQueue, WorkError};

use crate::ENQUEUE_TIMEOUT;

const RESULT_FILE: &str = "comparison_result.xlsx";

pub struct ComputeWorker<S: ?Sized, B: ?Sized, Q: ?Sized> {
    store: Arc<S>,
    blob: Arc<B>,
    paygate_queue: Arc<Q>,
    leases: Arc<dyn LeaseStore>,
    lease_cfg: LeaseConfig,
    converter: ConverterConfig,
    tmp_root: PathBuf,
    /// In-process cap independent of the queue's fan-out.
    inflight: Arc<Semaphore>,
}

impl<S, B, Q> ComputeWorker<S, B, Q>
where
    S: CompareJobStore + ?Sized + 'static,
    B: BlobStore + ?Sized + 'static,
    Q: JobQueue + ?Sized + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<S>,
        blob: Arc<B>,
        paygate_queue: Arc<Q>,
        leases: Arc<dyn LeaseStore>,
        lease_cfg: LeaseConfig,
        converter: ConverterConfig,
        tmp_root: impl Into<PathBuf>,
        max_inflight: usize,
    ) -> Self {
        Self {
            store,
            blob,
            paygate_queue,
            leases,
            lease_cfg,
            converter,
            tmp_root: tmp_root.into(),
            inflight: Arc::new(Semaphore::new(max_inflight.max(1))),
        }
    }

    /// Persist a business failure and convert it into a terminal ack.
    async fn fail(&self, job_id: &str, msg: String) -> WorkError {
        warn!(%job_id, error = %msg, "compute failed");
        let _ = self
            .store
            .update(job_id, &|j| j.mark_failed(msg.clone()))
            .await;
        WorkError::Terminal(msg)
    }

    async fn enqueue_paygate(&self, job_id: &str) -> Result<(), WorkError> {
        match tokio::time::timeout(ENQUEUE_TIMEOUT, self.paygate_queue.enqueue(job_id)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(WorkError::transient(format!("paygate enqueue: {e}"))),
            Err(_) => Err(WorkError::transient("paygate enqueue timed out")),
        }
    }

    async fn process(&self, job_id: &str) -> Result<(), WorkError> {
        let job = self
            .store
            .get(job_id)
            .await
            .map_err(|e| WorkError::transient(e.to_string()))?;
        let Some(job) = job else {
            // Expired or unknown id: nothing to do.
            return Ok(());
        };
        if job.status.is_settled() {
            return Ok(());
        }

        // Short-circuit replays: the artifact exists, only the paygate
        // handoff is missing.
        if job.has_artifact()
            && matches!(
                job.status,
                JobStatus::AwaitingPayment | JobStatus::Processing
            )
        {
            self.enqueue_paygate(job_id).await?;
            return Ok(());
        }

        if !self.blob.enabled() {
            return Err(self.fail(job_id, "对象存储未启用".to_string()).await);
        }
        if job.file1_key.trim().is_empty() || job.file2_key.trim().is_empty() {
            return Err(self.fail(job_id, "输入文件存储键为空".to_string()).await);
        }

        let _ = self.store.update(job_id, &|j| j.mark_processing()).await;

        let job_dir = self.tmp_root.join("compare_jobs").join(job_id);
        if let Err(e) = tokio::fs::create_dir_all(&job_dir).await {
            return Err(self.fail(job_id, format!("创建临时目录失败: {e}")).await);
        }

        let local1 = job_dir.join(format!("file1_{}", sanitize_object_name(&job.file1_name)));
        let local2 = job_dir.join(format!("file2_{}", sanitize_object_name(&job.file2_name)));
        if let Err(e) = self.blob.get_to_file(&job.file1_key, &local1).await {
            return Err(self.fail(job_id, format!("下载输入文件1失败: {e}")).await);
        }
        if let Err(e) = self.blob.get_to_file(&job.file2_key, &local2).await {
            return Err(self.fail(job_id, format!("下载输入文件2失败: {e}")).await);
        }

        let local1 = match convert_legacy_if_needed(&local1, &self.converter).await {
            Ok(p) => p,
            Err(e) => return Err(self.fail(job_id, e.to_string()).await),
        };
        let local2 = match convert_legacy_if_needed(&local2, &self.converter).await {
            Ok(p) => p,
            Err(e) => return Err(self.fail(job_id, e.to_string()).await),
        };

        let result_path = job_dir.join(RESULT_FILE);
        let diff_result = tokio::task::spawn_blocking({
            let (f1, f2, out) = (local1.clone(), local2.clone(), result_path.clone());
            let (n1, n2) = (job.file1_name.clone(), job.file2_name.clone());
            move || generate_compare_workbook(&f1, &f2, &n1, &n2, &out)
        })
        .await;
        match diff_result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(self.fail(job_id, e.to_string()).await),
            Err(join_err) => {
                return Err(self.fail(job_id, format!("比对引擎异常: {join_err}")).await)
            }
        }

        let artifact_key = self.blob.result_key(job_id);
        if let Err(e) = self
            .blob
            .put_file(
                &artifact_key,
                &result_path,
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            )
            .await
        {
            return Err(self.fail(job_id, format!("上传结果失败: {e}")).await);
        }
        let _ = tokio::fs::remove_file(&result_path).await;

        // Persist the artifact location before the paygate handoff so notify
        // and replays can observe it.
        let _ = self
            .store
            .update(job_id, &|j| j.set_artifact(artifact_key.clone()))
            .await;

        let refreshed = self
            .store
            .get(job_id)
            .await
            .map_err(|e| WorkError::transient(e.to_string()))?;
        match refreshed {
            None => return Ok(()),
            Some(j) if j.status == JobStatus::Cancelled => return Ok(()),
            Some(_) => {}
        }

        // Transient enqueue failure keeps the message pending; on replay the
        // artifact short-circuit retries only this step.
        self.enqueue_paygate(job_id).await?;

        let _ = tokio::fs::remove_dir_all(&job_dir).await;
        info!(%job_id, artifact = %self.blob.result_key(job_id), "compute finished");
        Ok(())
    }
}

#[async_trait]
impl<S, B, Q> JobHandler for ComputeWorker<S, B, Q>
where
    S: CompareJobStore + ?Sized + 'static,
    B: BlobStore + ?Sized + 'static,
    Q: JobQueue + ?Sized + 'static,
{
    async fn handle(&self, job_id: String) -> Result<(), WorkError> {
        let _slot = self
            .inflight
            .clone()
            .acquire_owned()
            .await
            .expect("inflight semaphore closed");

        let lease = HeldLease::acquire(
            self.leases.clone(),
            self.lease_cfg.compute_key(&job_id),
            self.lease_cfg.compute_ttl,
            self.lease_cfg.compute_refresh,
        )
        .await
        .map_err(|e| WorkError::transient(e.to_string()))?;
        let Some(lease) = lease else {
            // Duplicate delivery: another worker owns the job.
            return Err(WorkError::terminal(format!("job locked: {job_id}")));
        };

        let result = self.process(&job_id).await;
        lease.release().await;
        result
    }
}
