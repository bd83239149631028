//! Compare-job routes: intake, status, export, cancel.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use rand::RngCore;
use tokio::io::AsyncWriteExt;
use tracing::warn;

use sheetgate_infra::blob::sanitize_object_name;
use sheetgate_pipeline::{service::DOWNLOAD_DISPLAY_NAME, ExportOutcome, UploadedPart};

use crate::app::errors::{intake_error_to_response, json_error, service_error_to_response};
use crate::app::{dto, AppState};

const XLSX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
// RFC 5987 encoding of the localized display name (比对结果.xlsx).
const DOWNLOAD_NAME_RFC5987: &str = "%E6%AF%94%E5%AF%B9%E7%BB%93%E6%9E%9C.xlsx";

pub async fn create_job(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Response {
    let mut upload_id = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut upload_id);
    let upload_dir = state.tmp_root.join("uploads").join(hex::encode(upload_id));
    if tokio::fs::create_dir_all(&upload_dir).await.is_err() {
        return json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "io_error",
            "failed to create upload dir",
        );
    }

    let mut file1: Option<UploadedPart> = None;
    let mut file2: Option<UploadedPart> = None;
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(_) => {
                return json_error(
                    StatusCode::BAD_REQUEST,
                    "bad_multipart",
                    "invalid multipart stream",
                )
            }
        };
        let part_name = field.name().unwrap_or_default().to_string();
        if part_name != "file1" && part_name != "file2" {
            continue;
        }

        let original_name = sanitize_object_name(field.file_name().unwrap_or_default());
        let dst_path = upload_dir.join(format!("{part_name}_{original_name}"));
        let mut dst = match tokio::fs::File::create(&dst_path).await {
            Ok(f) => f,
            Err(_) => {
                return json_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "io_error",
                    format!("failed to save {part_name}"),
                )
            }
        };

        // Stream the part to disk; the body limit layer enforces the cap.
        let mut field = field;
        loop {
            match field.chunk().await {
                Ok(Some(chunk)) => {
                    if dst.write_all(&chunk).await.is_err() {
                        return json_error(
                            StatusCode::INTERNAL_SERVER_ERROR,
                            "io_error",
                            format!("failed to save {part_name}"),
                        );
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    return json_error(
                        StatusCode::BAD_REQUEST,
                        "bad_multipart",
                        "invalid multipart stream",
                    )
                }
            }
        }
        let _ = dst.flush().await;

        let part = UploadedPart {
            path: dst_path,
            original_name,
        };
        if part_name == "file1" {
            file1 = Some(part);
        } else {
            file2 = Some(part);
        }
    }

    let (Some(file1), Some(file2)) = (file1, file2) else {
        let _ = tokio::fs::remove_dir_all(&upload_dir).await;
        return json_error(
            StatusCode::BAD_REQUEST,
            "missing_part",
            "missing file1 or file2",
        );
    };

    let result = state.intake.submit(file1, file2).await;
    let _ = tokio::fs::remove_dir_all(&upload_dir).await;
    match result {
        Ok(job) => {
            state
                .metrics
                .jobs_submitted_total
                .with_label_values(&["ok"])
                .inc();
            Json(dto::SubmitResponse {
                job_id: job.id.as_str().to_string(),
                status: job.status.as_str().to_string(),
            })
            .into_response()
        }
        Err(err) => {
            state
                .metrics
                .jobs_submitted_total
                .with_label_values(&["error"])
                .inc();
            warn!(error = %err, "intake failed");
            intake_error_to_response(err)
        }
    }
}

pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    match state.store.get(&id).await {
        Ok(Some(job)) => Json(dto::StatusResponse::from_job(&job)).into_response(),
        Ok(None) => json_error(StatusCode::NOT_FOUND, "not_found", "job not found"),
        Err(e) => json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", e.to_string()),
    }
}

pub async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    match state.jobs.cancel(&id).await {
        Ok(job) => Json(dto::CancelResponse {
            job_id: job.id.as_str().to_string(),
            status: job.status.as_str().to_string(),
            cancelled: true,
        })
        .into_response(),
        Err(err) => service_error_to_response(err),
    }
}

pub async fn export_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let outcome = match state.jobs.export(&id).await {
        Ok(outcome) => outcome,
        Err(err) => return service_error_to_response(err),
    };

    let json_mode = wants_json(&query, &headers);
    match outcome {
        ExportOutcome::SignedUrl(url) => {
            if json_mode {
                Json(dto::ExportUrlResponse {
                    url,
                    filename: DOWNLOAD_DISPLAY_NAME.to_string(),
                })
                .into_response()
            } else {
                (StatusCode::FOUND, [(header::LOCATION, url)]).into_response()
            }
        }
        ExportOutcome::Bytes(bytes) => {
            if json_mode {
                // No signable backend: hand back this endpoint so the client
                // can fetch the bytes directly.
                Json(dto::ExportUrlResponse {
                    url: format!("/compare/jobs/{id}/export"),
                    filename: DOWNLOAD_DISPLAY_NAME.to_string(),
                })
                .into_response()
            } else {
                (
                    [
                        (header::CONTENT_TYPE, XLSX_CONTENT_TYPE.to_string()),
                        (
                            header::CONTENT_DISPOSITION,
                            format!(
                                "attachment; filename=\"compare.xlsx\"; filename*=UTF-8''{DOWNLOAD_NAME_RFC5987}"
                            ),
                        ),
                    ],
                    bytes,
                )
                    .into_response()
            }
        }
    }
}

fn wants_json(query: &HashMap<String, String>, headers: &HeaderMap) -> bool {
    if query
        .get("format")
        .map(|v| v.trim().eq_ignore_ascii_case("json"))
        .unwrap_or(false)
    {
        return true;
    }
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_lowercase().contains("application/json"))
        .unwrap_or(false)
}
