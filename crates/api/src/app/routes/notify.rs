//! Payment provider callback.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

use sheetgate_infra::payment::NotifySignature;

use crate::app::AppState;

pub async fn notify(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let sig = NotifySignature {
        timestamp: header_string(&headers, "Wechatpay-Timestamp"),
        nonce: header_string(&headers, "Wechatpay-Nonce"),
        signature: header_string(&headers, "Wechatpay-Signature"),
        serial: header_string(&headers, "Wechatpay-Serial"),
    };

    let ack = state.notify.handle(&sig, &body).await;
    state
        .metrics
        .notify_total
        .with_label_values(&[ack.code()])
        .inc();

    let status = StatusCode::from_u16(ack.http_status()).unwrap_or(StatusCode::BAD_REQUEST);
    (
        status,
        Json(serde_json::json!({
            "code": ack.code(),
            "message": ack.message(),
        })),
    )
        .into_response()
}

fn header_string(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .trim()
        .to_string()
}
