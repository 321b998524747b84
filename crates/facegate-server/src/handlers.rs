use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use facegate_core::storage::write_object;
use facegate_core::{
    parse_body, run_enrollment_with, run_presign_with, run_verification_with, AppError,
    AppResult, EnrollmentRequest, ImageLocation, RequestBody, UploadRequest, VerificationRequest,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, warn};

use crate::response::{
    error_response, format_response, preflight_response, CorsPolicy, INTERNAL_ERROR,
};
use crate::state::AppState;

pub async fn enroll(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    dispatch(state, body, "enroll", |state, body| {
        let request = EnrollmentRequest::from_body(body)?;
        let outcome = run_enrollment_with(
            &request,
            &state.config,
            state.provider.as_ref(),
            state.audit.as_ref(),
            state.clock.as_ref(),
        )?;
        Ok(outcome.receipt)
    })
    .await
}

pub async fn verify(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    dispatch(state, body, "verify", |state, body| {
        let request = VerificationRequest::from_body(body)?;
        let outcome = run_verification_with(
            &request,
            &state.config,
            state.provider.as_ref(),
            state.audit.as_ref(),
            state.clock.as_ref(),
        )?;
        Ok(outcome.result)
    })
    .await
}

pub async fn presign_upload(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    dispatch(state, body, "presign-upload", |state, body| {
        let request = UploadRequest::from_body(body)?;
        run_presign_with(
            &request,
            &state.config,
            state.uploads.as_ref(),
            state.clock.as_ref(),
        )
    })
    .await
}

pub async fn preflight(State(state): State<Arc<AppState>>) -> Response {
    preflight_response(&state.cors)
}

pub async fn upload_preflight(State(state): State<Arc<AppState>>) -> Response {
    preflight_response(&state.cors.for_uploads())
}

pub async fn health(State(state): State<Arc<AppState>>) -> Response {
    format_response(StatusCode::OK, &json!({"status": "ok"}), &state.cors)
}

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    pub expires: i64,
    #[serde(rename = "contentType")]
    pub content_type: String,
    pub signature: String,
}

#[derive(Debug, Serialize)]
struct StoredObject {
    bucket: String,
    #[serde(rename = "objectKey")]
    object_key: String,
    size: usize,
}

/// Target of the URLs handed out by `/presign-upload`.
pub async fn put_object(
    State(state): State<Arc<AppState>>,
    Path((bucket, key)): Path<(String, String)>,
    query: Result<Query<UploadQuery>, QueryRejection>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let cors = state.cors.for_uploads();
    if bucket != state.config.bucket {
        return format_response(
            StatusCode::NOT_FOUND,
            &json!({"message": format!("bucket {bucket} does not exist")}),
            &cors,
        );
    }
    let Ok(Query(query)) = query else {
        return forbidden("upload URL is missing its expiry, content type or signature", &cors);
    };
    let location = ImageLocation::new(bucket, key);
    if !state.upload_signer.verify(
        &location,
        &query.content_type,
        query.expires,
        &query.signature,
    ) {
        warn!(
            target: "upload",
            bucket = %location.bucket,
            object_key = %location.key,
            "rejected upload with a bad signature"
        );
        return forbidden("upload URL signature does not match", &cors);
    }
    if state.clock.now().timestamp() > query.expires {
        return forbidden("upload URL has expired", &cors);
    }
    let sent_type = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::trim);
    if sent_type != Some(query.content_type.as_str()) {
        return forbidden(
            &format!("Content-Type must be {}", query.content_type),
            &cors,
        );
    }

    let size = body.len();
    let root = state.storage_root.clone();
    let stored = tokio::task::spawn_blocking(move || {
        write_object(&root, &location, &body).map(|_| location)
    })
    .await;

    match stored {
        Ok(Ok(location)) => {
            info!(
                target: "upload",
                bucket = %location.bucket,
                object_key = %location.key,
                size,
                content_type = %query.content_type,
                "stored object"
            );
            format_response(
                StatusCode::OK,
                &StoredObject {
                    bucket: location.bucket,
                    object_key: location.key,
                    size,
                },
                &cors,
            )
        }
        Ok(Err(err)) => failure("put-object", &err, &cors),
        Err(join_err) => join_failure("put-object", join_err, &cors),
    }
}

fn forbidden(message: &str, cors: &CorsPolicy) -> Response {
    format_response(StatusCode::FORBIDDEN, &json!({"message": message}), cors)
}

/// Parses the body and runs `operation` on the blocking pool.
async fn dispatch<T, F>(state: Arc<AppState>, body: Bytes, route: &'static str, operation: F) -> Response
where
    T: Serialize + Send + 'static,
    F: FnOnce(&AppState, &RequestBody) -> AppResult<T> + Send + 'static,
{
    let cors = state.cors.clone();
    let joined = tokio::task::spawn_blocking(move || {
        let parsed = parse_body(&body)?;
        operation(state.as_ref(), &parsed)
    })
    .await;

    match joined {
        Ok(Ok(payload)) => format_response(StatusCode::OK, &payload, &cors),
        Ok(Err(err)) => failure(route, &err, &cors),
        Err(join_err) => join_failure(route, join_err, &cors),
    }
}

fn failure(route: &'static str, err: &AppError, cors: &CorsPolicy) -> Response {
    if err.is_client_error() {
        info!(target: "http", route, "rejected: {err}");
    } else {
        error!(target: "http", route, "failed: {err}");
    }
    error_response(err, cors)
}

fn join_failure(
    route: &'static str,
    err: tokio::task::JoinError,
    cors: &CorsPolicy,
) -> Response {
    warn!(target: "http", route, "worker task did not complete: {err}");
    format_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        &json!({"message": INTERNAL_ERROR, "detail": err.to_string()}),
        cors,
    )
}
