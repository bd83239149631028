//! Prometheus metrics for the job pipeline.

use std::sync::Arc;

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

/// Pipeline metrics, registered on an owned registry so the scrape endpoint
/// only exposes what we emit.
pub struct PipelineMetrics {
    registry: Registry,

    /// Worker job outcomes per stage (`compute`/`paygate`) and outcome
    /// (`ok`/`terminal`/`transient`).
    pub worker_jobs_total: IntCounterVec,
    /// Worker job wall time per stage.
    pub worker_job_duration_seconds: HistogramVec,
    /// Jobs submitted through intake.
    pub jobs_submitted_total: IntCounterVec,
    /// Payment notifications per ack code.
    pub notify_total: IntCounterVec,
    /// In-flight handler count.
    pub inflight_jobs: IntGauge,
}

impl PipelineMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let worker_jobs_total = IntCounterVec::new(
            Opts::new("sheetgate_worker_jobs_total", "Worker job outcomes"),
            &["stage", "outcome"],
        )?;
        let worker_job_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "sheetgate_worker_job_duration_seconds",
                "Worker job wall time",
            )
            .buckets(vec![0.05, 0.2, 0.5, 1.0, 2.5, 5.0, 15.0, 60.0, 300.0]),
            &["stage"],
        )?;
        let jobs_submitted_total = IntCounterVec::new(
            Opts::new("sheetgate_jobs_submitted_total", "Jobs accepted by intake"),
            &["outcome"],
        )?;
        let notify_total = IntCounterVec::new(
            Opts::new("sheetgate_notify_total", "Payment notifications"),
            &["code"],
        )?;
        let inflight_jobs = IntGauge::new("sheetgate_inflight_jobs", "In-flight handlers")?;

        registry.register(Box::new(worker_jobs_total.clone()))?;
        registry.register(Box::new(worker_job_duration_seconds.clone()))?;
        registry.register(Box::new(jobs_submitted_total.clone()))?;
        registry.register(Box::new(notify_total.clone()))?;
        registry.register(Box::new(inflight_jobs.clone()))?;

        Ok(Self {
            registry,
            worker_jobs_total,
            worker_job_duration_seconds,
            jobs_submitted_total,
            notify_total,
            inflight_jobs,
        })
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new().expect("pipeline metrics registration"))
    }

    /// Render the registry in the Prometheus text exposition format.
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buf = Vec::new();
        if encoder.encode(&self.registry.gather(), &mut buf).is_err() {
            return String::new();
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_register_and_render() {
        let m = PipelineMetrics::new().unwrap();
        m.worker_jobs_total
            .with_label_values(&["compute", "ok"])
            .inc();
        m.worker_job_duration_seconds
            .with_label_values(&["compute"])
            .observe(0.3);
        m.notify_total.with_label_values(&["SUCCESS"]).inc();

        let rendered = m.render();
        assert!(rendered.contains("sheetgate_worker_jobs_total"));
        assert!(rendered.contains("stage=\"compute\""));
    }
}
