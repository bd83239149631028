//! The compare-job record and its state machine.
//!
//! Every state transition is expressed as a method on [`CompareJob`] so that
//! callers can pass it through the store's read-modify-write mutator. The
//! methods are idempotent and preserve the record invariants:
//!
//! 1. `Ready` implies artifact present and `paid`.
//! 2. `AwaitingPayment` implies artifact present, unpaid, and a non-empty
//!    order code.
//! 3. `Cancelled` and `Ready` are terminal: transitions observing them are
//!    no-ops on the terminal fields.
//! 4. `paid` is monotone.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::JobId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Processing,
    AwaitingPayment,
    Ready,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Terminal for the record's payment/cancellation fields (invariant 3).
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Ready | JobStatus::Cancelled)
    }

    /// States a pipeline worker acks without doing any further work.
    pub fn is_settled(self) -> bool {
        matches!(
            self,
            JobStatus::Ready | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Processing => "processing",
            JobStatus::AwaitingPayment => "awaiting_payment",
            JobStatus::Ready => "ready",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

/// Authoritative job record.
///
/// Stored as JSON under `<jobPrefix>:<id>` with a rolling TTL; mutated only
/// through the job store's atomic `update`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompareJob {
    pub id: JobId,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,

    /// Blob keys of the two uploaded inputs.
    pub file1_key: String,
    pub file2_key: String,
    /// Original upload filenames (drive export sheet naming).
    pub file1_name: String,
    pub file2_name: String,

    /// Blob key of the produced workbook; empty until the compute stage
    /// persists it.
    #[serde(default)]
    pub artifact_key: String,

    /// Billed amount in the provider's minor unit; set at paygate time.
    #[serde(default)]
    pub fee_minor: i64,
    /// Payment order reference (the scannable code URL) returned by the
    /// provider.
    #[serde(default)]
    pub code_url: String,
    pub paid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paid_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,

    /// Single-line human-readable diagnostic for failed jobs.
    #[serde(default)]
    pub error: String,
}

impl CompareJob {
    pub fn new(
        id: JobId,
        file1_key: impl Into<String>,
        file2_key: impl Into<String>,
        file1_name: impl Into<String>,
        file2_name: impl Into<String>,
    ) -> Self {
        Self {
            id,
            status: JobStatus::Processing,
            created_at: Utc::now(),
            file1_key: file1_key.into(),
            file2_key: file2_key.into(),
            file1_name: file1_name.into(),
            file2_name: file2_name.into(),
            artifact_key: String::new(),
            fee_minor: 0,
            code_url: String::new(),
            paid: false,
            paid_at: None,
            cancelled_at: None,
            error: String::new(),
        }
    }

    pub fn has_artifact(&self) -> bool {
        !self.artifact_key.trim().is_empty()
    }

    /// Status as reported at the query boundary: a paid job with an artifact
    /// that is still parked in `AwaitingPayment` is healed to `Ready` on read
    /// (storage is not rewritten).
    pub fn effective_status(&self) -> JobStatus {
        if self.status == JobStatus::AwaitingPayment && self.paid && self.has_artifact() {
            return JobStatus::Ready;
        }
        self.status
    }

    /// Re-enter `Processing` (compute stage restart). No-op on terminal
    /// states.
    pub fn mark_processing(&mut self) {
        if self.status.is_terminal() {
            return;
        }
        self.status = JobStatus::Processing;
        self.error.clear();
    }

    /// Record the produced artifact location. No-op once cancelled.
    pub fn set_artifact(&mut self, key: impl Into<String>) {
        if self.status == JobStatus::Cancelled {
            return;
        }
        self.artifact_key = key.into();
    }

    /// Business failure: persist the diagnostic and park the job. No-op on
    /// terminal states.
    pub fn mark_failed(&mut self, msg: impl Into<String>) {
        if self.status.is_terminal() {
            return;
        }
        self.status = JobStatus::Failed;
        self.error = msg.into();
    }

    /// Monotone payment flag (invariant 4).
    pub fn mark_paid(&mut self, now: DateTime<Utc>) {
        if self.paid {
            return;
        }
        self.paid = true;
        self.paid_at = Some(now);
    }

    /// Release the artifact to the user: `Ready`, fee and order cleared.
    /// No-op once cancelled.
    pub fn release(&mut self) {
        if self.status == JobStatus::Cancelled {
            return;
        }
        self.status = JobStatus::Ready;
        self.fee_minor = 0;
        self.code_url.clear();
        self.error.clear();
    }

    /// Gate the artifact behind an external payment order. No-op if the job
    /// was cancelled or paid concurrently.
    pub fn begin_awaiting_payment(&mut self, fee_minor: i64, code_url: impl Into<String>) {
        if self.status == JobStatus::Cancelled || self.paid {
            return;
        }
        self.status = JobStatus::AwaitingPayment;
        self.fee_minor = fee_minor;
        self.code_url = code_url.into();
        self.error.clear();
    }

    /// Apply a confirmed payment notification. Idempotent: once paid this is
    /// a no-op. If the artifact already exists the job is released directly;
    /// otherwise an `AwaitingPayment` job steps back to `Processing` so a
    /// later paygate replay can finish the release.
    pub fn settle_payment(&mut self, now: DateTime<Utc>) {
        if self.paid {
            return;
        }
        self.paid = true;
        self.paid_at = Some(now);
        if self.has_artifact()
            && matches!(
                self.status,
                JobStatus::AwaitingPayment | JobStatus::Processing
            )
        {
            self.status = JobStatus::Ready;
            self.fee_minor = 0;
            self.code_url.clear();
            return;
        }
        if self.status == JobStatus::AwaitingPayment {
            self.status = JobStatus::Processing;
        }
    }

    /// User-initiated cancellation. Paid-concurrently wins: a paid job is
    /// never cancelled.
    pub fn cancel(&mut self, now: DateTime<Utc>) {
        if self.paid || self.status == JobStatus::Cancelled {
            return;
        }
        self.status = JobStatus::Cancelled;
        self.cancelled_at = Some(now);
    }

    /// Check the record invariants; used by tests and debug assertions.
    pub fn invariants_hold(&self) -> bool {
        match self.status {
            JobStatus::Ready => self.has_artifact() && self.paid,
            JobStatus::AwaitingPayment => {
                self.has_artifact() && !self.paid && !self.code_url.is_empty()
            }
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> CompareJob {
        CompareJob::new(
            JobId::mint(),
            "in/j/file1_a.xlsx",
            "in/j/file2_b.xlsx",
            "a.xlsx",
            "b.xlsx",
        )
    }

    #[test]
    fn free_path_release() {
        let mut j = job();
        j.set_artifact("out/j/compare.xlsx");
        j.mark_paid(Utc::now());
        j.release();
        assert_eq!(j.status, JobStatus::Ready);
        assert!(j.invariants_hold());
    }

    #[test]
    fn awaiting_payment_holds_invariants() {
        let mut j = job();
        j.set_artifact("out/j/compare.xlsx");
        j.begin_awaiting_payment(100, "weixin://wxpay/bizpayurl?pr=x");
        assert_eq!(j.status, JobStatus::AwaitingPayment);
        assert!(j.invariants_hold());
    }

    #[test]
    fn paid_is_monotone() {
        let mut j = job();
        let t1 = Utc::now();
        j.mark_paid(t1);
        let first = j.paid_at;
        j.mark_paid(Utc::now());
        assert!(j.paid);
        assert_eq!(j.paid_at, first);
    }

    #[test]
    fn cancel_is_idempotent_and_loses_to_payment() {
        let mut j = job();
        j.cancel(Utc::now());
        let at = j.cancelled_at;
        j.cancel(Utc::now());
        assert_eq!(j.cancelled_at, at);

        let mut paid = job();
        paid.set_artifact("out/j/compare.xlsx");
        paid.settle_payment(Utc::now());
        paid.cancel(Utc::now());
        assert_eq!(paid.status, JobStatus::Ready);
        assert!(paid.cancelled_at.is_none());
    }

    #[test]
    fn settle_payment_without_artifact_steps_back_to_processing() {
        let mut j = job();
        j.status = JobStatus::AwaitingPayment;
        j.code_url = "weixin://x".into();
        j.settle_payment(Utc::now());
        assert_eq!(j.status, JobStatus::Processing);
        assert!(j.paid);
    }

    #[test]
    fn settle_payment_is_idempotent() {
        let mut j = job();
        j.set_artifact("out/j/compare.xlsx");
        j.begin_awaiting_payment(1, "weixin://x");
        j.settle_payment(Utc::now());
        let snapshot = j.clone();
        j.settle_payment(Utc::now());
        assert_eq!(j, snapshot);
        assert_eq!(j.status, JobStatus::Ready);
    }

    #[test]
    fn terminal_states_reject_failure() {
        let mut j = job();
        j.set_artifact("out/j/compare.xlsx");
        j.mark_paid(Utc::now());
        j.release();
        j.mark_failed("boom");
        assert_eq!(j.status, JobStatus::Ready);
        assert!(j.error.is_empty());
    }

    #[test]
    fn effective_status_heals_paid_awaiting() {
        let mut j = job();
        j.set_artifact("out/j/compare.xlsx");
        j.begin_awaiting_payment(1, "weixin://x");
        j.paid = true;
        assert_eq!(j.effective_status(), JobStatus::Ready);
        assert_eq!(j.status, JobStatus::AwaitingPayment);
    }

    #[test]
    fn record_roundtrips_through_json() {
        let mut j = job();
        j.set_artifact("out/j/compare.xlsx");
        let raw = serde_json::to_string(&j).unwrap();
        let back: CompareJob = serde_json::from_str(&raw).unwrap();
        assert_eq!(j, back);
    }
}
