use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use sheetgate_api::app::{self, AppState};
use sheetgate_api::bootstrap;
use sheetgate_infra::blob::BlobStore;
use sheetgate_infra::config::{self, env_string, JobStoreConfig, StreamConfig};
use sheetgate_infra::jobs::{CompareJobStore, RedisCompareJobStore};
use sheetgate_infra::queue::{JobQueue, RedisStreamQueue};
use sheetgate_observability::metrics::PipelineMetrics;
use sheetgate_pipeline::{IntakeService, JobService, NotifyService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    sheetgate_observability::init();

    let tmp_root = PathBuf::from(config::tmp_root_from_env());
    let max_upload = config::max_upload_bytes_from_env();
    let cors_origin = env_string("CORS_ALLOW_ORIGIN", "http://localhost:5173");

    let (router, cancel) = match bootstrap::redis_from_env().await? {
        Some(conn) => {
            let store_cfg = JobStoreConfig::from_env();
            let store: Arc<dyn CompareJobStore> = Arc::new(RedisCompareJobStore::new(
                conn.clone(),
                store_cfg.key_prefix,
                store_cfg.ttl,
            ));
            let compute_cfg = StreamConfig::compute_from_env();
            let compute_q: Arc<dyn JobQueue> = Arc::new(RedisStreamQueue::new(
                conn,
                compute_cfg.stream,
                compute_cfg.group,
                compute_cfg.max_len,
            ));
            let blob: Arc<dyn BlobStore> = Arc::new(bootstrap::blob_from_env(&tmp_root));
            let pay = bootstrap::payment_from_env()?;

            let state = Arc::new(AppState {
                intake: IntakeService::new(store.clone(), blob.clone(), compute_q),
                jobs: JobService::new(store.clone(), blob.clone(), pay.provider.clone()),
                notify: NotifyService::new(store.clone(), pay.verifier, pay.api_v3_key),
                store,
                metrics: PipelineMetrics::shared(),
                tmp_root: tmp_root.clone(),
            });
            (
                app::build_router(state, &cors_origin, max_upload),
                CancellationToken::new(),
            )
        }
        None => {
            warn!("REDIS_ADDR not set; single-process in-memory dev mode");
            app::build_in_memory_app(
                tmp_root.clone(),
                config::fee_minor_from_env(),
                max_upload,
                &cors_origin,
            )
        }
    };

    let addr = format!("0.0.0.0:{}", env_string("PORT", "8080"));
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, router)
        .with_graceful_shutdown(bootstrap::shutdown_signal(cancel.clone()))
        .await?;
    cancel.cancel();
    Ok(())
}
