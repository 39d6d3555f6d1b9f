// SPDX-License-Identifier: MIT OR Apache-2.0
//! The HTTP ingestion surface: accepts scan requests, lists scans by image,
//! and exposes a liveness check.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use axum::body::Bytes;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use base64::Engine as _;
use cst_core::Scan;
use cst_error::{CstError, ErrorCode};
use cst_scheduler::{ScheduleError, Scheduler};
use cst_store::Store;
use percent_encoding::percent_decode_str;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

/// Requests are rejected before parsing once the body exceeds this size.
const MAX_BODY_BYTES: usize = 16 * 1024;

/// Shared handles injected into every request handler.
#[derive(Clone)]
pub struct AppState {
    /// Durable scan persistence.
    pub store: Arc<dyn Store>,
    /// Scan scheduling.
    pub scheduler: Arc<Scheduler>,
}

/// Build the Axum router for the Container Scan Tracker's HTTP surface.
pub fn build_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/container/scan", get(list_scans).post(create_scan))
        .route("/v1/container/scan/{*image}", get(list_scans))
        .route("/healthcheck", get(healthcheck))
        .layer(axum::middleware::from_fn(request_logger))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn request_logger(req: Request, next: axum::middleware::Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_owned();
    let start = std::time::Instant::now();
    let resp = next.run(req).await;
    info!(
        http.method = %method,
        http.path = %path,
        http.status = resp.status().as_u16(),
        http.duration_ms = start.elapsed().as_millis() as u64,
        "request completed"
    );
    resp
}

/// A structured error returned by any handler in this crate.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    inner: CstError,
}

impl ApiError {
    fn new(status: StatusCode, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            status,
            inner: CstError::new(code, message),
        }
    }

    fn bad_request(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, message)
    }

    fn store_unavailable(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            inner: CstError::store_unavailable(message),
        }
    }

    fn queue_unavailable(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            inner: CstError::queue_unavailable(message),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({
                "error": self.inner.message,
                "code": self.inner.code,
                "category": self.inner.code.category(),
            })),
        )
            .into_response()
    }
}

#[derive(Debug, Deserialize, Default)]
struct ScanRequest {
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    endcustomdata: Option<String>,
}

/// Resolve the canonical image reference from a decoded request body,
/// following the two normalization rules: a present, non-empty `image`
/// field wins outright; otherwise the image is recovered from a
/// base64-encoded BSON document carried in `endcustomdata`.
fn resolve_image(req: &ScanRequest) -> Result<String, ApiError> {
    if let Some(image) = req.image.as_deref() {
        if let Some(normalized) = cst_core::normalize_image(image) {
            return Ok(normalized);
        }
    }

    let encoded = req.endcustomdata.as_deref().ok_or_else(|| {
        ApiError::bad_request(
            ErrorCode::BadRequest,
            "neither image nor endcustomdata yielded an image",
        )
    })?;

    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| ApiError::bad_request(ErrorCode::InvalidBase64, format!("invalid base64 endcustomdata: {e}")))?;

    let document = bson::Document::from_reader(&mut decoded.as_slice())
        .map_err(|e| ApiError::bad_request(ErrorCode::InvalidBson, format!("invalid bson endcustomdata: {e}")))?;

    let image = document.get_str("image").map_err(|_| {
        ApiError::bad_request(
            ErrorCode::InvalidBson,
            "endcustomdata document has no string image field",
        )
    })?;

    cst_core::normalize_image(image).ok_or_else(|| {
        ApiError::bad_request(ErrorCode::InvalidBson, "endcustomdata image field is empty")
    })
}

/// `percent_decode_str` passes a structurally malformed escape (`%ZZ`, a
/// trailing `%`, `%G1`) through literally rather than erroring, so a raw
/// path segment must be validated before decoding: every `%` must be
/// followed by exactly two hex digits.
fn has_well_formed_percent_encoding(raw: &str) -> bool {
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            continue;
        }
        let hi = chars.next();
        let lo = chars.next();
        match (hi, lo) {
            (Some(hi), Some(lo)) if hi.is_ascii_hexdigit() && lo.is_ascii_hexdigit() => {}
            _ => return false,
        }
    }
    true
}

async fn create_scan(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Response, ApiError> {
    if body.len() > MAX_BODY_BYTES {
        return Err(ApiError::bad_request(ErrorCode::BadRequest, "request body too large"));
    }

    let value: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError::bad_request(ErrorCode::BadRequest, format!("invalid json: {e}")))?;
    if !value.is_object() {
        return Err(ApiError::bad_request(
            ErrorCode::BadRequest,
            "request body must be a json object",
        ));
    }
    let request: ScanRequest = serde_json::from_value(value)
        .map_err(|e| ApiError::bad_request(ErrorCode::BadRequest, format!("invalid request shape: {e}")))?;

    let image = resolve_image(&request)?;

    match state.scheduler.schedule(&image).await {
        Ok(scan) => Ok((StatusCode::CREATED, Json(scan)).into_response()),
        Err(ScheduleError::AlreadyScheduled) => Ok(StatusCode::NO_CONTENT.into_response()),
        Err(ScheduleError::EmptyImage) => {
            Err(ApiError::bad_request(ErrorCode::BadRequest, "image is empty"))
        }
        Err(ScheduleError::Store(e)) => {
            warn!(error = %e, "scheduler failed to schedule scan");
            Err(ApiError::store_unavailable(e.to_string()))
        }
        Err(ScheduleError::Queue(e)) => {
            warn!(error = %e, "scheduler failed to schedule scan");
            Err(ApiError::queue_unavailable(e.to_string()))
        }
    }
}

async fn list_scans(
    State(state): State<Arc<AppState>>,
    req: Request,
) -> Result<Json<Vec<Scan>>, ApiError> {
    let raw = req
        .uri()
        .path()
        .trim_start_matches("/v1/container/scan/")
        .to_string();

    if !has_well_formed_percent_encoding(&raw) {
        return Err(ApiError::bad_request(
            ErrorCode::InvalidPathEncoding,
            "malformed percent-encoded image",
        ));
    }

    let image = percent_decode_str(&raw)
        .decode_utf8()
        .map_err(|_| {
            ApiError::bad_request(ErrorCode::InvalidPathEncoding, "malformed percent-encoded image")
        })?
        .into_owned();

    if image.is_empty() {
        return Err(ApiError::bad_request(
            ErrorCode::BadRequest,
            "image path parameter is required",
        ));
    }

    let mut scans = state
        .store
        .get_scans_by_image(&image)
        .await
        .map_err(|e| ApiError::store_unavailable(e.to_string()))?;
    scans.sort_by_key(|s| s.created_at);

    Ok(Json(scans))
}

async fn healthcheck(State(state): State<Arc<AppState>>) -> Response {
    if state.store.ping().await {
        (StatusCode::OK, "WORKING").into_response()
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, "DOWN").into_response()
    }
}
