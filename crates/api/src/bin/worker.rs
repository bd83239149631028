//! Stream worker process: consumes the compute and paygate streams.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use axum::routing::get;
use tokio_util::sync::CancellationToken;
use tracing::info;

use sheetgate_api::bootstrap::{self, InstrumentedHandler};
use sheetgate_infra::blob::BlobStore;
use sheetgate_infra::config::{self, env_string, JobStoreConfig, LeaseConfig, StreamConfig};
use sheetgate_infra::jobs::{CompareJobStore, RedisCompareJobStore};
use sheetgate_infra::lease::{LeaseStore, RedisLeaseStore};
use sheetgate_infra::queue::{Consumer, ConsumerConfig, JobQueue, RedisStreamQueue};
use sheetgate_observability::metrics::PipelineMetrics;
use sheetgate_pipeline::{ComputeWorker, PaygateWorker};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    sheetgate_observability::init();

    let conn = bootstrap::redis_from_env()
        .await?
        .context("REDIS_ADDR is required for the stream worker")?;

    let store_cfg = JobStoreConfig::from_env();
    let store: Arc<dyn CompareJobStore> = Arc::new(RedisCompareJobStore::new(
        conn.clone(),
        store_cfg.key_prefix,
        store_cfg.ttl,
    ));

    let compute_cfg = StreamConfig::compute_from_env();
    let paygate_cfg = StreamConfig::paygate_from_env();
    let compute_q = Arc::new(RedisStreamQueue::new(
        conn.clone(),
        compute_cfg.stream.clone(),
        compute_cfg.group.clone(),
        compute_cfg.max_len,
    ));
    let paygate_q = Arc::new(RedisStreamQueue::new(
        conn.clone(),
        paygate_cfg.stream.clone(),
        paygate_cfg.group.clone(),
        paygate_cfg.max_len,
    ));
    compute_q.ensure_group().await.context("ensure compute group")?;
    paygate_q.ensure_group().await.context("ensure paygate group")?;

    let tmp_root = PathBuf::from(config::tmp_root_from_env());
    let blob: Arc<dyn BlobStore> = Arc::new(bootstrap::blob_from_env(&tmp_root));
    let leases: Arc<dyn LeaseStore> = Arc::new(RedisLeaseStore::new(conn));
    let lease_cfg = LeaseConfig::from_env();
    let pay = bootstrap::payment_from_env()?;
    let metrics = PipelineMetrics::shared();

    let compute = Arc::new(InstrumentedHandler::new(
        Arc::new(ComputeWorker::new(
            store.clone(),
            blob.clone(),
            paygate_q.clone() as Arc<dyn JobQueue>,
            leases.clone(),
            lease_cfg.clone(),
            bootstrap::converter_from_env(),
            tmp_root,
            config::compute_max_inflight_from_env(),
        )),
        "compute",
        metrics.clone(),
    ));
    let paygate = Arc::new(InstrumentedHandler::new(
        Arc::new(PaygateWorker::new(
            store,
            pay.provider,
            leases,
            lease_cfg,
            config::fee_minor_from_env(),
        )),
        "paygate",
        metrics.clone(),
    ));

    let consumer_name = {
        let name = env_string("WORKER_CONSUMER_NAME", "");
        if name.is_empty() {
            env_string("HOSTNAME", "")
        } else {
            name
        }
    };
    let fan_out = config::worker_fan_out_from_env();
    let cancel = CancellationToken::new();

    tokio::spawn(serve_metrics(metrics));
    tokio::spawn(bootstrap::shutdown_signal(cancel.clone()));

    info!(
        compute_stream = %compute_cfg.stream,
        paygate_stream = %paygate_cfg.stream,
        consumer = %consumer_name,
        fan_out,
        "stream worker starting"
    );

    let compute_task = {
        let cancel = cancel.clone();
        let config = ConsumerConfig::default()
            .with_consumer(consumer_name.clone())
            .with_fan_out(fan_out);
        tokio::spawn(async move {
            Consumer::new(compute_q, config).run(compute, cancel).await
        })
    };
    let paygate_task = {
        let cancel = cancel.clone();
        let config = ConsumerConfig::default()
            .with_consumer(consumer_name)
            .with_fan_out(fan_out);
        tokio::spawn(async move {
            Consumer::new(paygate_q, config).run(paygate, cancel).await
        })
    };

    compute_task.await?.context("compute consume loop")?;
    paygate_task.await?.context("paygate consume loop")?;
    info!("stream worker stopped");
    Ok(())
}

/// Liveness + scrape endpoint on a side port.
async fn serve_metrics(metrics: Arc<PipelineMetrics>) {
    let addr = env_string("METRICS_ADDR", "0.0.0.0:9090");
    let router = axum::Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route(
            "/metrics",
            get(move || {
                let metrics = metrics.clone();
                async move { metrics.render() }
            }),
        );
    let Ok(listener) = tokio::net::TcpListener::bind(&addr).await else {
        tracing::warn!(%addr, "metrics listener bind failed");
        return;
    };
    let _ = axum::serve(listener, router).await;
}
