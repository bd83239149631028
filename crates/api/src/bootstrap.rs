//! Process wiring shared by the server and worker binaries.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tracing::{info, warn};

use sheetgate_diff::ConverterConfig;
use sheetgate_infra::config::{env_flag, env_string, env_usize};
use sheetgate_infra::payment::{
    InsecureAcceptAllVerifier, MissingMaterialVerifier, MockPayClient, NotifyVerifier,
    PaymentProvider, RsaNotifyVerifier, WechatPayClient,
};
use sheetgate_infra::payment::wechat::WechatPayConfig;
use sheetgate_infra::queue::{JobHandler, WorkError};
use sheetgate_observability::metrics::PipelineMetrics;

use crate::app::DEV_API_V3_KEY;

/// Connect to Redis when `REDIS_ADDR` is set; `None` selects in-memory dev
/// mode.
pub async fn redis_from_env() -> anyhow::Result<Option<ConnectionManager>> {
    let addr = env_string("REDIS_ADDR", "");
    if addr.is_empty() {
        return Ok(None);
    }
    let password = env_string("REDIS_PASSWORD", "");
    let db: u32 = std::env::var("REDIS_DB")
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0);
    let url = if password.is_empty() {
        format!("redis://{addr}/{db}")
    } else {
        format!("redis://:{password}@{addr}/{db}")
    };
    let client = redis::Client::open(url).context("invalid REDIS_ADDR")?;
    let conn = client
        .get_connection_manager()
        .await
        .context("redis connect failed")?;
    info!(%addr, db, "redis connected");
    Ok(Some(conn))
}

pub fn converter_from_env() -> ConverterConfig {
    ConverterConfig {
        host: env_string("XLSCONVERT_HOST", "xlsconvert"),
        port: env_usize("XLSCONVERT_PORT", 2003) as u16,
        protocol: env_string("XLSCONVERT_PROTOCOL", "http"),
        bin: env_string("XLSCONVERT_BIN", "unoconvert"),
        timeout: Duration::from_secs(env_usize("XLSCONVERT_TIMEOUT_SECONDS", 60) as u64),
        keep_original: env_flag("XLSCONVERT_KEEP_ORIGINAL"),
    }
}

pub struct PaymentWiring {
    pub provider: Arc<dyn PaymentProvider>,
    pub verifier: Arc<dyn NotifyVerifier>,
    pub api_v3_key: String,
}

/// Build the payment provider and notify verifier from the environment.
///
/// `WECHAT_MOCK=1` selects the mock provider with unverified notifies (dev
/// only). Otherwise the real client is built and missing platform material
/// leaves a verifier that refuses every notification.
pub fn payment_from_env() -> anyhow::Result<PaymentWiring> {
    if env_flag("WECHAT_MOCK") {
        warn!("WECHAT_MOCK=1: mock payment provider, notify verification disabled");
        return Ok(PaymentWiring {
            provider: Arc::new(MockPayClient),
            verifier: Arc::new(InsecureAcceptAllVerifier),
            api_v3_key: env_string("WECHAT_API_V3_KEY", DEV_API_V3_KEY),
        });
    }

    let api_v3_key = env_string("WECHAT_API_V3_KEY", "");
    anyhow::ensure!(!api_v3_key.is_empty(), "WECHAT_API_V3_KEY is required");

    let private_key_pem = match env_string("WECHAT_MCH_PRIVATE_KEY", "") {
        pem if !pem.is_empty() => pem,
        _ => {
            let path = env_string("WECHAT_MCH_PRIVATE_KEY_PATH", "");
            anyhow::ensure!(
                !path.is_empty(),
                "WECHAT_MCH_PRIVATE_KEY or WECHAT_MCH_PRIVATE_KEY_PATH is required"
            );
            std::fs::read_to_string(&path)
                .with_context(|| format!("read merchant key {path}"))?
        }
    };

    let client = WechatPayClient::new(WechatPayConfig {
        mchid: env_string("WECHAT_MCHID", ""),
        appid: {
            let appid = env_string("WECHAT_PAY_APPID", "");
            if appid.is_empty() {
                env_string("WECHAT_APPID", "")
            } else {
                appid
            }
        },
        notify_url: env_string("WECHAT_NOTIFY_URL", ""),
        merchant_serial: env_string("WECHAT_MCH_SERIAL", ""),
        private_key_pem,
        api_base: None,
    })
    .map_err(|e| anyhow::anyhow!("payment client: {e}"))?;

    let platform_pem = match env_string("WECHAT_PLATFORM_PUBLIC_KEY", "") {
        pem if !pem.is_empty() => Some(pem),
        _ => {
            let path = env_string("WECHAT_PLATFORM_PUBLIC_KEY_PATH", "");
            if path.is_empty() {
                None
            } else {
                Some(
                    std::fs::read_to_string(&path)
                        .with_context(|| format!("read platform key {path}"))?,
                )
            }
        }
    };
    let verifier: Arc<dyn NotifyVerifier> = match platform_pem {
        Some(pem) => Arc::new(
            RsaNotifyVerifier::from_public_key_pem(&pem)
                .map_err(|e| anyhow::anyhow!("platform key: {e}"))?,
        ),
        None => {
            warn!("no platform public key configured; payment notifies will be refused");
            Arc::new(MissingMaterialVerifier)
        }
    };

    Ok(PaymentWiring {
        provider: Arc::new(client),
        verifier,
        api_v3_key,
    })
}

/// Filesystem-rooted blob store with the configured object prefixes.
///
/// The object-store SDK proper is an external collaborator; deployments
/// mount the shared volume (or a FUSE bucket mount) at `BLOB_ROOT`.
pub fn blob_from_env(tmp_root: &std::path::Path) -> sheetgate_infra::blob::LocalFsBlobStore {
    let root = env_string("BLOB_ROOT", "");
    let root = if root.is_empty() {
        tmp_root.join("blob")
    } else {
        root.into()
    };
    sheetgate_infra::blob::LocalFsBlobStore::new(
        root,
        env_string("OSS_INPUT_PREFIX", "compare-inputs"),
        env_string("OSS_PREFIX", "compare-results"),
    )
}

/// Resolve the first termination signal, cancel `cancel`, and force-exit if
/// a second signal arrives within 5 seconds.
pub async fn shutdown_signal(cancel: tokio_util::sync::CancellationToken) {
    wait_for_signal().await;
    info!("shutdown signal received");
    cancel.cancel();
    tokio::spawn(async {
        tokio::select! {
            _ = wait_for_signal() => std::process::exit(1),
            _ = tokio::time::sleep(Duration::from_secs(5)) => {}
        }
    });
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// Wraps a worker handler with per-stage metrics.
pub struct InstrumentedHandler<H> {
    inner: Arc<H>,
    stage: &'static str,
    metrics: Arc<PipelineMetrics>,
}

impl<H> InstrumentedHandler<H> {
    pub fn new(inner: Arc<H>, stage: &'static str, metrics: Arc<PipelineMetrics>) -> Self {
        Self {
            inner,
            stage,
            metrics,
        }
    }
}

#[async_trait]
impl<H: JobHandler> JobHandler for InstrumentedHandler<H> {
    async fn handle(&self, job_id: String) -> Result<(), WorkError> {
        let start = Instant::now();
        self.metrics.inflight_jobs.inc();
        let result = self.inner.handle(job_id).await;
        self.metrics.inflight_jobs.dec();

        self.metrics
            .worker_job_duration_seconds
            .with_label_values(&[self.stage])
            .observe(start.elapsed().as_secs_f64());
        let outcome = match &result {
            Ok(()) => "ok",
            Err(WorkError::Terminal(_)) => "terminal",
            Err(WorkError::Transient(_)) => "transient",
        };
        self.metrics
            .worker_jobs_total
            .with_label_values(&[self.stage, outcome])
            .inc();
        result
    }
}
