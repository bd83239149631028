//! Black-box API tests: the real router on an ephemeral port, in-memory
//! infrastructure with in-process workers, driven over HTTP.

use std::time::Duration;

use reqwest::StatusCode;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use sheetgate_api::app::{build_in_memory_app, DEV_API_V3_KEY};
use sheetgate_infra::payment::crypto::encrypt_resource;

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
    cancel: CancellationToken,
    _dir: tempfile::TempDir,
}

impl TestServer {
    async fn spawn(fee_minor: i64) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let (app, cancel) = build_in_memory_app(
            dir.path().join("root"),
            fee_minor,
            128 << 20,
            "http://localhost:5173",
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            handle,
            cancel,
            _dir: dir,
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.handle.abort();
    }
}

fn xlsx_bytes(rows: &[&[&str]]) -> Vec<u8> {
    let mut workbook = rust_xlsxwriter::Workbook::new();
    let ws = workbook.add_worksheet();
    for (r, row) in rows.iter().enumerate() {
        for (c, cell) in row.iter().enumerate() {
            ws.write_string(r as u32, c as u16, *cell).unwrap();
        }
    }
    workbook.save_to_buffer().unwrap()
}

async fn submit_pair(client: &reqwest::Client, base_url: &str) -> String {
    let f1 = xlsx_bytes(&[
        &["编号", "名称"],
        &["001", "甲"],
        &["002", "乙"],
        &["003", "丙"],
    ]);
    let f2 = xlsx_bytes(&[
        &["编号", "名称"],
        &["001", "甲"],
        &["002", "乙改"],
        &["004", "丁"],
    ]);

    let form = reqwest::multipart::Form::new()
        .part(
            "file1",
            reqwest::multipart::Part::bytes(f1).file_name("旧表.xlsx"),
        )
        .part(
            "file2",
            reqwest::multipart::Part::bytes(f2).file_name("新表.xlsx"),
        );

    let res = client
        .post(format!("{base_url}/compare/jobs"))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["status"], "processing");
    body["jobId"].as_str().unwrap().to_string()
}

async fn poll_status(
    client: &reqwest::Client,
    base_url: &str,
    job_id: &str,
    wanted: &str,
) -> Value {
    for _ in 0..500 {
        let res = client
            .get(format!("{base_url}/compare/jobs/{job_id}"))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body: Value = res.json().await.unwrap();
        if body["status"] == wanted {
            return body;
        }
        assert_ne!(body["status"], "failed", "job failed: {body}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {job_id} never reached {wanted}");
}

fn forged_notify_body(job_id: &str, amount_minor: i64) -> Vec<u8> {
    let plain = serde_json::json!({
        "out_trade_no": job_id,
        "trade_state": "SUCCESS",
        "success_time": "2026-08-02T12:00:00+08:00",
        "amount": { "total": amount_minor },
    });
    let ciphertext = encrypt_resource(
        DEV_API_V3_KEY,
        "transaction",
        "abcdefghijkl",
        plain.to_string().as_bytes(),
    )
    .unwrap();
    serde_json::json!({
        "resource": {
            "algorithm": "AEAD_AES_256_GCM",
            "ciphertext": ciphertext,
            "associated_data": "transaction",
            "nonce": "abcdefghijkl",
            "original_type": "transaction",
        }
    })
    .to_string()
    .into_bytes()
}

#[tokio::test]
async fn free_path_submit_poll_export() {
    let srv = TestServer::spawn(0).await;
    let client = reqwest::Client::new();

    let job_id = submit_pair(&client, &srv.base_url).await;
    let ready = poll_status(&client, &srv.base_url, &job_id, "ready").await;
    assert_eq!(ready["paid"], true);
    assert!(ready.get("code_url").is_none());

    // JSON mode hands back a fetchable URL.
    let res = client
        .get(format!(
            "{}/compare/jobs/{}/export?format=json",
            srv.base_url, job_id
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["filename"], "比对结果.xlsx");
    assert_eq!(body["url"], format!("/compare/jobs/{job_id}/export"));

    // Direct mode streams the workbook with a download disposition.
    let res = client
        .get(format!("{}/compare/jobs/{}/export", srv.base_url, job_id))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let disposition = res
        .headers()
        .get("content-disposition")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(disposition.contains("compare.xlsx"));
    let bytes = res.bytes().await.unwrap();
    assert_eq!(&bytes[..2], b"PK");

    // Released jobs cannot be cancelled.
    let res = client
        .post(format!("{}/compare/jobs/{}/cancel", srv.base_url, job_id))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn paid_path_notify_releases_job() {
    let srv = TestServer::spawn(1).await;
    let client = reqwest::Client::new();

    let job_id = submit_pair(&client, &srv.base_url).await;
    let awaiting = poll_status(&client, &srv.base_url, &job_id, "awaiting_payment").await;
    assert_eq!(awaiting["paid"], false);
    assert_eq!(awaiting["amount"], 0.01);
    assert!(awaiting["code_url"].as_str().unwrap().starts_with("weixin://"));

    // Export is payment-gated while awaiting.
    let res = client
        .get(format!("{}/compare/jobs/{}/export", srv.base_url, job_id))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::PAYMENT_REQUIRED);

    // Provider callback with the matching amount flips the job to ready.
    let res = client
        .post(format!("{}/wechatpay/notify", srv.base_url))
        .header("Wechatpay-Timestamp", "1")
        .header("Wechatpay-Nonce", "n")
        .header("Wechatpay-Signature", "sig")
        .header("Wechatpay-Serial", "serial")
        .body(forged_notify_body(&job_id, 1))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let ack: Value = res.json().await.unwrap();
    assert_eq!(ack["code"], "SUCCESS");

    poll_status(&client, &srv.base_url, &job_id, "ready").await;

    // Wrong amount on a replay is refused.
    let res = client
        .post(format!("{}/wechatpay/notify", srv.base_url))
        .header("Wechatpay-Timestamp", "1")
        .header("Wechatpay-Nonce", "n")
        .header("Wechatpay-Signature", "sig")
        .header("Wechatpay-Serial", "serial")
        .body(forged_notify_body(&job_id, 999))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn cancel_in_awaiting_payment_gives_410_download() {
    let srv = TestServer::spawn(1).await;
    let client = reqwest::Client::new();

    let job_id = submit_pair(&client, &srv.base_url).await;
    poll_status(&client, &srv.base_url, &job_id, "awaiting_payment").await;

    let res = client
        .post(format!("{}/compare/jobs/{}/cancel", srv.base_url, job_id))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["status"], "cancelled");
    assert_eq!(body["cancelled"], true);

    let res = client
        .get(format!("{}/compare/jobs/{}/export", srv.base_url, job_id))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::GONE);
}

#[tokio::test]
async fn bad_requests_are_rejected() {
    let srv = TestServer::spawn(0).await;
    let client = reqwest::Client::new();

    // Missing file2.
    let form = reqwest::multipart::Form::new().part(
        "file1",
        reqwest::multipart::Part::bytes(xlsx_bytes(&[&["id"], &["1"]])).file_name("a.xlsx"),
    );
    let res = client
        .post(format!("{}/compare/jobs", srv.base_url))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    // Unknown job id.
    let res = client
        .get(format!("{}/compare/jobs/job_missing", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn system_endpoints_respond() {
    let srv = TestServer::spawn(0).await;
    let client = reqwest::Client::new();

    let res = client
        .get(format!("{}/healthz", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = client
        .get(format!("{}/metrics", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}
