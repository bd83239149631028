//! Orchestrator: routes a compare job through intake, compute, payment
//! gating, and release.

pub mod compute;
pub mod intake;
pub mod notify;
pub mod paygate;
pub mod service;

pub use compute::ComputeWorker;
pub use intake::{IntakeError, IntakeService, UploadedPart};
pub use notify::{NotifyAck, NotifyService};
pub use paygate::PaygateWorker;
pub use service::{ExportOutcome, JobService, ServiceError};

/// Deadline for queue enqueues along the pipeline.
pub(crate) const ENQUEUE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(2);
