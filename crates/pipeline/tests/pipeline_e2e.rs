//! End-to-end pipeline scenarios on the in-memory infrastructure with the
//! real diff engine and a mock payment provider.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use rsa::pkcs1v15::SigningKey;
use rsa::sha2::Sha256;
use rsa::signature::{SignatureEncoding, Signer};
use rsa::RsaPrivateKey;
use tokio_util::sync::CancellationToken;

use sheetgate_core::{CompareJob, JobStatus};
use sheetgate_infra::blob::{BlobStore, LocalFsBlobStore};
use sheetgate_infra::config::LeaseConfig;
use sheetgate_infra::jobs::{CompareJobStore, InMemoryCompareJobStore};
use sheetgate_infra::lease::{InMemoryLeaseStore, LeaseStore};
use sheetgate_infra::payment::crypto::encrypt_resource;
use sheetgate_infra::payment::{
    MockPayClient, NotifyAmount, NotifySignature, NotifyTransaction, NotifyVerifier, PayError,
    RsaNotifyVerifier,
};
use sheetgate_infra::queue::{Consumer, ConsumerConfig, InMemoryJobQueue, JobQueue};
use sheetgate_pipeline::{
    ComputeWorker, ExportOutcome, IntakeService, JobService, NotifyAck, NotifyService,
    PaygateWorker, ServiceError, UploadedPart,
};

const API_KEY: &str = "0123456789abcdef0123456789abcdef";
const NONCE: &str = "abcdefghijkl";

struct AcceptAll;

impl NotifyVerifier for AcceptAll {
    fn verify(&self, _sig: &NotifySignature, _body: &[u8]) -> Result<(), PayError> {
        Ok(())
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    tmp_root: PathBuf,
    store: Arc<InMemoryCompareJobStore>,
    blob: Arc<LocalFsBlobStore>,
    compute_q: Arc<InMemoryJobQueue>,
    paygate_q: Arc<InMemoryJobQueue>,
    leases: Arc<InMemoryLeaseStore>,
    lease_cfg: LeaseConfig,
    cancel: CancellationToken,
}

impl Harness {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let tmp_root = dir.path().join("tmp");
        let blob = Arc::new(LocalFsBlobStore::new(
            dir.path().join("blob"),
            "compare-inputs",
            "compare-results",
        ));
        Self {
            tmp_root,
            _dir: dir,
            store: Arc::new(InMemoryCompareJobStore::new()),
            blob,
            compute_q: Arc::new(InMemoryJobQueue::new(1000)),
            paygate_q: Arc::new(InMemoryJobQueue::new(1000)),
            leases: Arc::new(InMemoryLeaseStore::new()),
            lease_cfg: LeaseConfig {
                key_prefix: "gy:lock:comparejob:".to_string(),
                compute_ttl: Duration::from_secs(30),
                compute_refresh: Duration::from_secs(5),
                paygate_ttl: Duration::from_secs(30),
                paygate_refresh: Duration::from_secs(5),
            },
            cancel: CancellationToken::new(),
        }
    }

    fn consumer_config(name: &str) -> ConsumerConfig {
        ConsumerConfig {
            consumer: name.to_string(),
            read_count: 10,
            block: Duration::from_millis(20),
            fan_out: 4,
            claim_min_idle: Duration::from_millis(60),
            claim_every: Duration::from_millis(20),
            claim_count: 20,
        }
    }

    /// Spawn compute + paygate consumers; they stop when the harness token
    /// is cancelled.
    fn start_workers(&self, fee_minor: i64) {
        let compute = Arc::new(ComputeWorker::new(
            self.store.clone(),
            self.blob.clone(),
            self.paygate_q.clone(),
            self.leases.clone() as Arc<dyn LeaseStore>,
            self.lease_cfg.clone(),
            Default::default(),
            self.tmp_root.clone(),
            4,
        ));
        let paygate = Arc::new(PaygateWorker::new(
            self.store.clone(),
            Arc::new(MockPayClient),
            self.leases.clone() as Arc<dyn LeaseStore>,
            self.lease_cfg.clone(),
            fee_minor,
        ));

        let compute_q = self.compute_q.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let consumer = Consumer::new(compute_q, Self::consumer_config("compute-1"));
            let _ = consumer.run(compute, cancel).await;
        });

        let paygate_q = self.paygate_q.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let consumer = Consumer::new(paygate_q, Self::consumer_config("paygate-1"));
            let _ = consumer.run(paygate, cancel).await;
        });
    }

    fn intake(&self) -> IntakeService<InMemoryCompareJobStore, LocalFsBlobStore, InMemoryJobQueue> {
        IntakeService::new(self.store.clone(), self.blob.clone(), self.compute_q.clone())
    }

    fn job_service(&self) -> JobService<InMemoryCompareJobStore, LocalFsBlobStore> {
        JobService::new(self.store.clone(), self.blob.clone(), Arc::new(MockPayClient))
    }

    fn notify_service(&self) -> NotifyService<InMemoryCompareJobStore> {
        NotifyService::new(self.store.clone(), Arc::new(AcceptAll), API_KEY)
    }

    async fn submit_default(&self) -> CompareJob {
        let f1 = write_xlsx(
            self.tmp_root.as_path(),
            "up1.xlsx",
            &[
                &["编号", "名称", "数量"],
                &["001", "甲", "1"],
                &["002", "乙", "2"],
                &["003", "丙", "3"],
            ],
        )
        .await;
        let f2 = write_xlsx(
            self.tmp_root.as_path(),
            "up2.xlsx",
            &[
                &["编号", "名称", "数量"],
                &["001", "甲", "1"],
                &["002", "乙", "2.0"],
                &["003", "丙改", "3"],
            ],
        )
        .await;
        self.intake()
            .submit(
                UploadedPart {
                    path: f1,
                    original_name: "旧表.xlsx".to_string(),
                },
                UploadedPart {
                    path: f2,
                    original_name: "新表.xlsx".to_string(),
                },
            )
            .await
            .unwrap()
    }

    async fn wait_until(
        &self,
        job_id: &str,
        pred: impl Fn(&CompareJob) -> bool,
    ) -> CompareJob {
        for _ in 0..500 {
            if let Some(job) = self.store.get(job_id).await.unwrap() {
                if pred(&job) {
                    return job;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let last = self.store.get(job_id).await.unwrap();
        panic!("condition not reached in time; last state: {last:?}");
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn write_xlsx(dir: &Path, name: &str, rows: &[&[&str]]) -> PathBuf {
    tokio::fs::create_dir_all(dir).await.unwrap();
    let path = dir.join(name);
    let mut workbook = rust_xlsxwriter::Workbook::new();
    let ws = workbook.add_worksheet();
    for (r, row) in rows.iter().enumerate() {
        for (c, cell) in row.iter().enumerate() {
            ws.write_string(r as u32, c as u16, *cell).unwrap();
        }
    }
    workbook.save(&path).unwrap();
    path
}

fn forge_notify_body(job_id: &str, amount_minor: i64, trade_state: &str) -> Vec<u8> {
    let tx = NotifyTransaction {
        out_trade_no: job_id.to_string(),
        trade_state: trade_state.to_string(),
        success_time: "2026-08-02T12:00:00+08:00".to_string(),
        amount: NotifyAmount {
            total: amount_minor,
        },
    };
    let plain = serde_json::to_vec(&tx).unwrap();
    let ciphertext = encrypt_resource(API_KEY, "transaction", NONCE, &plain).unwrap();
    serde_json::to_vec(&serde_json::json!({
        "resource": {
            "algorithm": "AEAD_AES_256_GCM",
            "ciphertext": ciphertext,
            "associated_data": "transaction",
            "nonce": NONCE,
            "original_type": "transaction",
        }
    }))
    .unwrap()
}

fn dummy_signature() -> NotifySignature {
    NotifySignature {
        timestamp: "1".to_string(),
        nonce: "n".to_string(),
        signature: "sig".to_string(),
        serial: "serial".to_string(),
    }
}

#[tokio::test]
async fn happy_free_path_reaches_ready_without_awaiting_payment() {
    let h = Harness::new();
    h.start_workers(0);

    let job = h.submit_default().await;
    let done = h
        .wait_until(job.id.as_str(), |j| j.status == JobStatus::Ready)
        .await;

    assert!(done.paid);
    assert!(done.paid_at.is_some());
    assert!(done.has_artifact());
    assert!(done.code_url.is_empty());
    assert_eq!(done.fee_minor, 0);
    assert!(done.invariants_hold());

    // Artifact is a real workbook in the blob store.
    let bytes = h.blob.read(&done.artifact_key).await.unwrap();
    assert_eq!(&bytes[..2], b"PK");

    match h.job_service().export(job.id.as_str()).await.unwrap() {
        ExportOutcome::Bytes(b) => assert_eq!(b, bytes),
        ExportOutcome::SignedUrl(_) => panic!("local blob cannot sign"),
    }
}

#[tokio::test]
async fn happy_paid_path_gates_then_releases_on_notify() {
    let h = Harness::new();
    h.start_workers(1);

    let job = h.submit_default().await;
    let awaiting = h
        .wait_until(job.id.as_str(), |j| j.status == JobStatus::AwaitingPayment)
        .await;
    assert!(!awaiting.paid);
    assert!(!awaiting.code_url.is_empty());
    assert_eq!(awaiting.fee_minor, 1);
    assert!(awaiting.invariants_hold());

    // Download is refused while unpaid.
    assert!(matches!(
        h.job_service().export(job.id.as_str()).await,
        Err(ServiceError::PaymentRequired)
    ));

    let ack = h
        .notify_service()
        .handle(&dummy_signature(), &forge_notify_body(job.id.as_str(), 1, "SUCCESS"))
        .await;
    assert_eq!(ack, NotifyAck::Success);

    let done = h
        .wait_until(job.id.as_str(), |j| j.status == JobStatus::Ready)
        .await;
    assert!(done.paid);
    assert!(done.code_url.is_empty());
    assert_eq!(done.fee_minor, 0);
}

#[tokio::test]
async fn notify_amount_mismatch_is_rejected() {
    let h = Harness::new();
    h.start_workers(1);

    let job = h.submit_default().await;
    h.wait_until(job.id.as_str(), |j| j.status == JobStatus::AwaitingPayment)
        .await;

    let ack = h
        .notify_service()
        .handle(
            &dummy_signature(),
            &forge_notify_body(job.id.as_str(), 999, "SUCCESS"),
        )
        .await;
    assert_eq!(ack.http_status(), 400);
    assert_eq!(ack.code(), "FAIL");

    let job = h.store.get(job.id.as_str()).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::AwaitingPayment);
    assert!(!job.paid);
}

#[tokio::test]
async fn non_success_trade_state_acks_without_mutation() {
    let h = Harness::new();
    h.start_workers(1);

    let job = h.submit_default().await;
    let before = h
        .wait_until(job.id.as_str(), |j| j.status == JobStatus::AwaitingPayment)
        .await;

    let ack = h
        .notify_service()
        .handle(
            &dummy_signature(),
            &forge_notify_body(job.id.as_str(), 1, "PAYERROR"),
        )
        .await;
    assert_eq!(ack, NotifyAck::Success);
    let after = h.store.get(job.id.as_str()).await.unwrap().unwrap();
    assert_eq!(after, before);
}

#[tokio::test]
async fn notify_is_idempotent_under_replays() {
    let h = Harness::new();
    h.start_workers(1);

    let job = h.submit_default().await;
    h.wait_until(job.id.as_str(), |j| j.status == JobStatus::AwaitingPayment)
        .await;

    let body = forge_notify_body(job.id.as_str(), 1, "SUCCESS");
    let svc = h.notify_service();
    assert_eq!(svc.handle(&dummy_signature(), &body).await, NotifyAck::Success);
    let once = h
        .wait_until(job.id.as_str(), |j| j.status == JobStatus::Ready)
        .await;

    for _ in 0..3 {
        assert_eq!(svc.handle(&dummy_signature(), &body).await, NotifyAck::Success);
    }
    let thrice = h.store.get(job.id.as_str()).await.unwrap().unwrap();
    assert_eq!(once, thrice);
}

#[tokio::test]
async fn duplicate_delivery_converges_via_lease() {
    let h = Harness::new();
    h.start_workers(0);

    let job = h.submit_default().await;
    // A second delivery of the same job id (at-least-once queue).
    h.compute_q.enqueue(job.id.as_str()).await.unwrap();

    let done = h
        .wait_until(job.id.as_str(), |j| j.status == JobStatus::Ready)
        .await;
    assert!(done.invariants_hold());

    // Both deliveries end up acknowledged.
    for _ in 0..500 {
        if h.compute_q.pending_len() == 0 && h.compute_q.undelivered_len() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(h.compute_q.pending_len(), 0);
    assert_eq!(h.compute_q.undelivered_len(), 0);
}

#[tokio::test]
async fn crashed_worker_replay_short_circuits_to_paygate() {
    let h = Harness::new();

    // Simulate a worker that died after uploading the artifact but before
    // the paygate enqueue: artifact persisted, no paygate message.
    let job = h.submit_default().await;
    let artifact_key = h.blob.result_key(job.id.as_str());
    let marker = h.tmp_root.join("marker.bin");
    tokio::fs::create_dir_all(&h.tmp_root).await.unwrap();
    tokio::fs::write(&marker, b"ARTIFACT-FROM-CRASHED-WORKER")
        .await
        .unwrap();
    h.blob
        .put_file(&artifact_key, &marker, "application/octet-stream")
        .await
        .unwrap();
    h.store
        .update(job.id.as_str(), &|j| j.set_artifact(artifact_key.clone()))
        .await
        .unwrap();

    // The message is redelivered (auto-claim on a real crash); the replay
    // must only enqueue paygate, not recompute.
    h.start_workers(0);
    let done = h
        .wait_until(job.id.as_str(), |j| j.status == JobStatus::Ready)
        .await;

    let bytes = h.blob.read(&done.artifact_key).await.unwrap();
    assert_eq!(bytes, b"ARTIFACT-FROM-CRASHED-WORKER");
}

#[tokio::test]
async fn cancel_in_awaiting_payment_sticks_against_late_notify() {
    let h = Harness::new();
    h.start_workers(1);

    let job = h.submit_default().await;
    h.wait_until(job.id.as_str(), |j| j.status == JobStatus::AwaitingPayment)
        .await;

    let cancelled = h.job_service().cancel(job.id.as_str()).await.unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);
    assert!(cancelled.cancelled_at.is_some());

    // Cancel is idempotent.
    let again = h.job_service().cancel(job.id.as_str()).await.unwrap();
    assert_eq!(again.status, JobStatus::Cancelled);

    // A late notify never flips the record out of cancelled.
    let ack = h
        .notify_service()
        .handle(&dummy_signature(), &forge_notify_body(job.id.as_str(), 1, "SUCCESS"))
        .await;
    assert_eq!(ack, NotifyAck::Success);
    let after = h.store.get(job.id.as_str()).await.unwrap().unwrap();
    assert_eq!(after.status, JobStatus::Cancelled);

    assert!(matches!(
        h.job_service().export(job.id.as_str()).await,
        Err(ServiceError::Cancelled)
    ));
}

#[tokio::test]
async fn cancel_is_refused_once_paid() {
    let h = Harness::new();
    h.start_workers(0);

    let job = h.submit_default().await;
    h.wait_until(job.id.as_str(), |j| j.status == JobStatus::Ready)
        .await;

    assert!(matches!(
        h.job_service().cancel(job.id.as_str()).await,
        Err(ServiceError::Conflict)
    ));
}

#[tokio::test]
async fn paygate_before_artifact_is_transient_until_compute_lands() {
    let h = Harness::new();

    // Paygate message arrives while the artifact is still missing: the
    // handler reports transient, reclaim redelivers, and once the artifact
    // exists the job is released.
    let job = h.submit_default().await;
    h.paygate_q.enqueue(job.id.as_str()).await.unwrap();
    h.start_workers(0);

    let done = h
        .wait_until(job.id.as_str(), |j| j.status == JobStatus::Ready)
        .await;
    assert!(done.invariants_hold());
    for _ in 0..500 {
        if h.paygate_q.pending_len() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(h.paygate_q.pending_len(), 0);
}

#[tokio::test]
async fn notify_with_real_signature_verification() {
    let h = Harness::new();
    h.start_workers(1);

    let job = h.submit_default().await;
    h.wait_until(job.id.as_str(), |j| j.status == JobStatus::AwaitingPayment)
        .await;

    let mut rng = rand::thread_rng();
    let private = RsaPrivateKey::new(&mut rng, 1024).unwrap();
    let verifier = RsaNotifyVerifier::from_public_key(private.to_public_key());
    let signer = SigningKey::<Sha256>::new(private);

    let body = forge_notify_body(job.id.as_str(), 1, "SUCCESS");
    let (timestamp, nonce) = ("1722600000".to_string(), "noncenonce".to_string());
    let mut message = Vec::new();
    message.extend_from_slice(timestamp.as_bytes());
    message.push(b'\n');
    message.extend_from_slice(nonce.as_bytes());
    message.push(b'\n');
    message.extend_from_slice(&body);
    message.push(b'\n');
    let signature = signer.sign(&message);

    let sig = NotifySignature {
        timestamp,
        nonce,
        signature: base64::engine::general_purpose::STANDARD.encode(signature.to_vec()),
        serial: "PLATFORM-SERIAL".to_string(),
    };

    let svc = NotifyService::new(h.store.clone(), Arc::new(verifier), API_KEY);
    assert_eq!(svc.handle(&sig, &body).await, NotifyAck::Success);
    h.wait_until(job.id.as_str(), |j| j.status == JobStatus::Ready)
        .await;

    // Same service rejects a tampered body.
    let mut tampered = body.clone();
    let last = tampered.len() - 2;
    tampered[last] ^= 1;
    let ack = svc.handle(&sig, &tampered).await;
    assert_eq!(ack.code(), "FAIL");
}
