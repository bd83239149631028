//! Router assembly and application state.

pub mod dto;
pub mod errors;
pub mod routes;

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::warn;

use sheetgate_infra::blob::{BlobStore, LocalFsBlobStore};
use sheetgate_infra::config::LeaseConfig;
use sheetgate_infra::jobs::{CompareJobStore, InMemoryCompareJobStore};
use sheetgate_infra::lease::{InMemoryLeaseStore, LeaseStore};
use sheetgate_infra::payment::{InsecureAcceptAllVerifier, MockPayClient};
use sheetgate_infra::queue::{Consumer, ConsumerConfig, InMemoryJobQueue, JobQueue};
use sheetgate_observability::metrics::PipelineMetrics;
use sheetgate_pipeline::{
    ComputeWorker, IntakeService, JobService, NotifyService, PaygateWorker,
};

/// Shared 32-byte APIv3 key used by dev/mock mode.
pub const DEV_API_V3_KEY: &str = "0123456789abcdef0123456789abcdef";

pub struct AppState {
    pub store: Arc<dyn CompareJobStore>,
    pub intake: IntakeService<dyn CompareJobStore, dyn BlobStore, dyn JobQueue>,
    pub jobs: JobService<dyn CompareJobStore, dyn BlobStore>,
    pub notify: NotifyService<dyn CompareJobStore>,
    pub metrics: Arc<PipelineMetrics>,
    pub tmp_root: PathBuf,
}

pub fn build_router(state: Arc<AppState>, cors_origin: &str, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/compare/jobs", post(routes::jobs::create_job))
        .route("/compare/jobs/:id", get(routes::jobs::get_job))
        .route("/compare/jobs/:id/export", get(routes::jobs::export_job))
        .route("/compare/jobs/:id/cancel", post(routes::jobs::cancel_job))
        // Keep the trailing-slash twin: some providers are configured with it.
        .route("/wechatpay/notify", post(routes::notify::notify))
        .route("/wechatpay/notify/", post(routes::notify::notify))
        .route("/healthz", get(routes::system::health))
        .route("/metrics", get(routes::system::metrics))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(cors_layer(cors_origin))
        .with_state(state)
}

fn cors_layer(origin: &str) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true);
    match origin.parse::<HeaderValue>() {
        Ok(value) => layer.allow_origin(value),
        Err(_) => {
            warn!(%origin, "invalid CORS origin; denying cross-origin requests");
            layer
        }
    }
}

/// Single-process wiring on in-memory infrastructure with in-process
/// workers and the mock payment provider. Used by dev mode (no Redis) and
/// the black-box tests.
pub fn build_in_memory_app(
    tmp_root: PathBuf,
    fee_minor: i64,
    max_upload_bytes: usize,
    cors_origin: &str,
) -> (Router, CancellationToken) {
    let store: Arc<dyn CompareJobStore> = Arc::new(InMemoryCompareJobStore::new());
    let blob: Arc<dyn BlobStore> = Arc::new(LocalFsBlobStore::new(
        tmp_root.join("blob"),
        "compare-inputs",
        "compare-results",
    ));
    let compute_q = Arc::new(InMemoryJobQueue::new(100_000));
    let paygate_q = Arc::new(InMemoryJobQueue::new(100_000));
    let leases: Arc<dyn LeaseStore> = Arc::new(InMemoryLeaseStore::new());
    let lease_cfg = LeaseConfig::from_env();
    let metrics = PipelineMetrics::shared();

    let cancel = CancellationToken::new();

    let compute = Arc::new(ComputeWorker::new(
        store.clone(),
        blob.clone(),
        paygate_q.clone() as Arc<dyn JobQueue>,
        leases.clone(),
        lease_cfg.clone(),
        Default::default(),
        tmp_root.clone(),
        sheetgate_infra::config::compute_max_inflight_from_env(),
    ));
    let paygate = Arc::new(PaygateWorker::new(
        store.clone(),
        Arc::new(MockPayClient),
        leases.clone(),
        lease_cfg,
        fee_minor,
    ));

    {
        let queue = compute_q.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let consumer = Consumer::new(queue, ConsumerConfig::default().with_consumer("inproc-compute"));
            let _ = consumer.run(compute, cancel).await;
        });
    }
    {
        let queue = paygate_q.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let consumer = Consumer::new(queue, ConsumerConfig::default().with_consumer("inproc-paygate"));
            let _ = consumer.run(paygate, cancel).await;
        });
    }

    let compute_q: Arc<dyn JobQueue> = compute_q;
    let state = Arc::new(AppState {
        intake: IntakeService::new(store.clone(), blob.clone(), compute_q),
        jobs: JobService::new(store.clone(), blob.clone(), Arc::new(MockPayClient)),
        notify: NotifyService::new(store.clone(), Arc::new(InsecureAcceptAllVerifier), DEV_API_V3_KEY),
        store,
        metrics,
        tmp_root,
    });

    (build_router(state, cors_origin, max_upload_bytes), cancel)
}
