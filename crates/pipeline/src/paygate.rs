//! Paygate worker: releases free/paid jobs or creates an external payment
//! order and parks the job in `awaiting_payment`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};

use sheetgate_core::JobStatus;
use sheetgate_infra::config::LeaseConfig;
use sheetgate_infra::jobs::CompareJobStore;
use sheetgate_infra::lease::{HeldLease, LeaseStore};
use sheetgate_infra::payment::PaymentProvider;
use sheetgate_infra::queue::{JobHandler, WorkError};

pub struct PaygateWorker<S: ?Sized> {
    store: Arc<S>,
    provider: Arc<dyn PaymentProvider>,
    leases: Arc<dyn LeaseStore>,
    lease_cfg: LeaseConfig,
    /// Billed amount in minor units; zero or below takes the free path.
    fee_minor: i64,
}

impl<S> PaygateWorker<S>
where
    S: CompareJobStore + ?Sized + 'static,
{
    pub fn new(
        store: Arc<S>,
        provider: Arc<dyn PaymentProvider>,
        leases: Arc<dyn LeaseStore>,
        lease_cfg: LeaseConfig,
        fee_minor: i64,
    ) -> Self {
        Self {
            store,
            provider,
            leases,
            lease_cfg,
            fee_minor,
        }
    }

    async fn fail(&self, job_id: &str, msg: String) -> WorkError {
        warn!(%job_id, error = %msg, "paygate failed");
        let _ = self
            .store
            .update(job_id, &|j| j.mark_failed(msg.clone()))
            .await;
        WorkError::Terminal(msg)
    }

    async fn process(&self, job_id: &str) -> Result<(), WorkError> {
        let job = self
            .store
            .get(job_id)
            .await
            .map_err(|e| WorkError::transient(e.to_string()))?;
        let Some(job) = job else {
            return Ok(());
        };
        if job.status.is_settled() {
            return Ok(());
        }

        if !job.has_artifact() {
            // Compute stage not yet persisted; reclaim will retry.
            return Err(WorkError::transient("result not ready (artifact empty)"));
        }

        if job.paid {
            let _ = self.store.update(job_id, &|j| j.release()).await;
            info!(%job_id, "paid job released");
            return Ok(());
        }

        if self.fee_minor <= 0 {
            let now = Utc::now();
            let _ = self
                .store
                .update(job_id, &|j| {
                    if j.status == JobStatus::Cancelled {
                        return;
                    }
                    j.mark_paid(now);
                    j.release();
                })
                .await;
            info!(%job_id, "free job released");
            return Ok(());
        }

        // Idempotent replay: the order already exists.
        if job.status == JobStatus::AwaitingPayment && !job.code_url.trim().is_empty() {
            return Ok(());
        }

        let code_url = match self
            .provider
            .create_native_order(job_id, self.fee_minor)
            .await
        {
            Ok(url) => url,
            // No retry: the user can re-submit.
            Err(e) => {
                return Err(self
                    .fail(job_id, format!("创建支付订单失败: {e}"))
                    .await)
            }
        };

        let fee = self.fee_minor;
        let _ = self
            .store
            .update(job_id, &|j| j.begin_awaiting_payment(fee, code_url.clone()))
            .await;
        info!(%job_id, fee_minor = fee, "job awaiting payment");
        Ok(())
    }
}

#[async_trait]
impl<S> JobHandler for PaygateWorker<S>
where
    S: CompareJobStore + ?Sized + 'static,
{
    async fn handle(&self, job_id: String) -> Result<(), WorkError> {
        if job_id.trim().is_empty() {
            return Err(WorkError::terminal("empty job id"));
        }

        let lease = HeldLease::acquire(
            self.leases.clone(),
            self.lease_cfg.paygate_key(&job_id),
            self.lease_cfg.paygate_ttl,
            self.lease_cfg.paygate_refresh,
        )
        .await
        .map_err(|e| WorkError::transient(e.to_string()))?;
        let Some(lease) = lease else {
            return Err(WorkError::terminal(format!("paygate locked: {job_id}")));
        };

        let result = self.process(&job_id).await;
        lease.release().await;
        result
    }
}
