use std::sync::Arc;
use std::time::Instant;

use axum::extract::multipart::MultipartError;
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use docvl_core::{render_markdown, ErrorKind, NormalizedResult, OcrError};
use docvl_pipeline::{AppConfig, OcrService};

/// Shared application state.
pub struct AppState {
    pub service: OcrService,
    pub config: AppConfig,
    /// Bounds how many requests are inside inference at once.
    pub inference_slots: Arc<Semaphore>,
    pub start_time: Instant,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(service: OcrService, config: AppConfig, metrics: Option<PrometheusHandle>) -> Self {
        Self {
            inference_slots: Arc::new(Semaphore::new(config.max_concurrent_requests.max(1))),
            service,
            config,
            start_time: Instant::now(),
            metrics,
        }
    }
}

/// POST /ocr/extract-document/json request body.
#[derive(Deserialize)]
pub struct OcrJsonRequest {
    /// Base64-encoded file data.
    pub file: String,
    /// Original filename, used for validation and the staged extension.
    pub filename: Option<String>,
}

/// POST /ocr/extract-document response.
#[derive(Serialize)]
pub struct OcrResponse {
    pub success: bool,
    pub message: String,
    /// Seconds spent on the request, staging and inference included.
    pub processing_time: f64,
    pub results: Vec<NormalizedResult>,
    pub markdown: String,
    pub timestamp: DateTime<Utc>,
}

/// GET /health response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: String,
    pub version: &'static str,
    pub pipeline_ready: bool,
    pub gpu_enabled: bool,
    pub device: String,
    pub uptime_secs: f64,
    pub timestamp: DateTime<Utc>,
}

/// Error response body.
#[derive(Serialize)]
pub struct ErrorResponse {
    success: bool,
    message: String,
    error_type: &'static str,
    timestamp: DateTime<Utc>,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

pub fn create_router(state: Arc<AppState>) -> Router {
    let body_limit = request_body_limit(state.config.max_upload_size);

    let ocr = Router::new()
        .route("/ocr/extract-document", post(extract_document))
        .route("/ocr/extract-document/json", post(extract_document_json))
        .layer(DefaultBodyLimit::max(body_limit));

    let prefix = state.config.api_prefix.trim_end_matches('/');
    let ocr = if prefix.is_empty() {
        ocr
    } else {
        Router::new().nest(prefix, ocr)
    };

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .merge(ocr)
        .with_state(state)
}

/// Room for base64 inflation and multipart framing on top of the upload cap.
fn request_body_limit(max_upload_size: usize) -> usize {
    max_upload_size / 3 * 4 + 1024 * 1024
}

/// POST /ocr/extract-document: multipart/form-data with a `file` field.
async fn extract_document(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<OcrResponse>, ApiError> {
    let start = Instant::now();
    let mut upload: Option<(Option<String>, Vec<u8>)> = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() == Some("file") {
            let filename = field.file_name().map(str::to_string);
            let data = field.bytes().await.map_err(multipart_error)?;
            upload = Some((filename, data.to_vec()));
        }
    }

    let (filename, data) =
        upload.ok_or_else(|| bad_request("missing 'file' field".to_string()))?;

    process_upload(state, filename, data, start).await
}

/// POST /ocr/extract-document/json: JSON with a base64-encoded file.
async fn extract_document_json(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<OcrJsonRequest>, JsonRejection>,
) -> Result<Json<OcrResponse>, ApiError> {
    let start = Instant::now();
    let Json(req) = payload.map_err(|e| bad_request(format!("invalid request body: {}", e.body_text())))?;
    let data = base64::engine::general_purpose::STANDARD
        .decode(&req.file)
        .map_err(|e| bad_request(format!("invalid base64: {e}")))?;

    process_upload(state, req.filename, data, start).await
}

/// Counts every upload that reaches processing, and every one that fails.
async fn process_upload(
    state: Arc<AppState>,
    filename: Option<String>,
    data: Vec<u8>,
    start: Instant,
) -> Result<Json<OcrResponse>, ApiError> {
    metrics::counter!("ocr_requests_total").increment(1);
    let outcome = run_upload(state, filename, data, start).await;
    if outcome.is_err() {
        metrics::counter!("ocr_request_failures_total").increment(1);
    }
    outcome
}

async fn run_upload(
    state: Arc<AppState>,
    filename: Option<String>,
    data: Vec<u8>,
    start: Instant,
) -> Result<Json<OcrResponse>, ApiError> {
    validate_upload(&state.config, filename.as_deref(), data.len()).map_err(|e| error_response(&e))?;

    tracing::info!(
        filename = filename.as_deref().unwrap_or(""),
        bytes = data.len(),
        "processing upload"
    );

    // The permit moves into the blocking task so it outlives a dropped request.
    let permit = state
        .inference_slots
        .clone()
        .acquire_owned()
        .await
        .map_err(|e| internal_error(format!("inference slots closed: {e}")))?;

    let worker_state = state.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        let _permit = permit;
        worker_state
            .service
            .process_bytes(&data, filename.as_deref())
    })
    .await
    .map_err(|e| internal_error(format!("inference worker failed: {e}")))?;

    let output = outcome.map_err(|e| error_response(&e))?;

    let processing_time = start.elapsed().as_secs_f64();
    metrics::histogram!("ocr_latency_ms").record(processing_time * 1000.0);

    tracing::info!(
        elements = output.results.len(),
        fallbacks = output.report.fallbacks,
        processing_time,
        "document processed"
    );

    let markdown = render_markdown(&output.results);
    Ok(Json(OcrResponse {
        success: true,
        message: format!(
            "Document processed successfully. Found {} results.",
            output.results.len()
        ),
        processing_time,
        results: output.results,
        markdown,
        timestamp: Utc::now(),
    }))
}

/// Extension, emptiness and size checks, in that order.
fn validate_upload(config: &AppConfig, filename: Option<&str>, size: usize) -> Result<(), OcrError> {
    if !filename.is_some_and(|name| config.is_allowed_filename(name)) {
        return Err(OcrError::InvalidInput(format!(
            "Invalid file format '{}'. Allowed: {}",
            filename.unwrap_or(""),
            config.allowed_extensions.join(", ")
        )));
    }
    if size == 0 {
        return Err(OcrError::InvalidInput("Empty file uploaded".to_string()));
    }
    if size > config.max_upload_size {
        return Err(OcrError::PayloadTooLarge {
            size,
            limit: config.max_upload_size,
        });
    }
    Ok(())
}

/// GET /health: liveness plus pipeline readiness. Never loads the pipeline.
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let status = state.service.status();
    Json(HealthResponse {
        status: "healthy",
        service: state.config.name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        pipeline_ready: status.initialized,
        gpu_enabled: status.gpu_enabled,
        device: status.device,
        uptime_secs: state.start_time.elapsed().as_secs_f64(),
        timestamp: Utc::now(),
    })
}

/// GET /: service info.
async fn root(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let prefix = state.config.api_prefix.trim_end_matches('/');
    Json(serde_json::json!({
        "service": state.config.name,
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
        "extract": format!("{prefix}/ocr/extract-document"),
        "health": "/health",
    }))
}

/// GET /metrics: Prometheus exposition.
async fn metrics_endpoint(State(state): State<Arc<AppState>>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

fn error_response(err: &OcrError) -> ApiError {
    let kind = err.kind();
    let status = match kind {
        ErrorKind::Initialization => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Processing => StatusCode::INTERNAL_SERVER_ERROR,
        ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
        ErrorKind::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
    };

    if status.is_server_error() {
        tracing::error!(error = %err, kind = kind.as_str(), "request failed");
    } else {
        tracing::warn!(error = %err, kind = kind.as_str(), "request rejected");
    }

    error_body(status, err.to_string(), kind.as_str())
}

fn multipart_error(e: MultipartError) -> ApiError {
    let status = e.status();
    let error_type = if status == StatusCode::PAYLOAD_TOO_LARGE {
        ErrorKind::PayloadTooLarge.as_str()
    } else {
        ErrorKind::InvalidInput.as_str()
    };
    error_body(status, format!("multipart error: {}", e.body_text()), error_type)
}

fn bad_request(msg: String) -> ApiError {
    error_body(StatusCode::BAD_REQUEST, msg, ErrorKind::InvalidInput.as_str())
}

fn internal_error(msg: String) -> ApiError {
    tracing::error!(error = %msg, "internal error");
    error_body(StatusCode::INTERNAL_SERVER_ERROR, msg, "InternalError")
}

fn error_body(status: StatusCode, message: String, error_type: &'static str) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            success: false,
            message,
            error_type,
            timestamp: Utc::now(),
        }),
    )
}
