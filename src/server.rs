//! HTTP API.
//!
//! Thin handlers over the shared [`Services`]: the query orchestrator, the
//! ingestion pipeline, and the document registry.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`    | `/health` | Status, version, counts, backend availability |
//! | `POST`   | `/query` | Answer a question |
//! | `POST`   | `/upload` | Ingest one file (multipart field `file`) |
//! | `POST`   | `/upload-batch` | Ingest several files (repeated `file` fields) |
//! | `GET`    | `/documents` | List ingested documents, newest first |
//! | `DELETE` | `/documents/{id}` | Delete a document and its chunks |
//! | `GET`    | `/api/stats` | Index and generation overview |
//! | `POST`   | `/api/index/clear` | Remove every document and chunk |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "question must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `unsupported_file_type` (400),
//! `not_found` (404), `payload_too_large` (413), `internal` (500).

use axum::{
    extract::{
        multipart::MultipartError, rejection::JsonRejection, DefaultBodyLimit, Multipart, Path,
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use knowledgeops_core::orchestrator::{QueryOutcome, QueryRequest};

use crate::config::Config;
use crate::documents::{self, DocumentRecord};
use crate::extract::ExtractError;
use crate::ingest::{ingest_bytes, IngestError, IngestReport};
use crate::services::Services;
use crate::stats::{collect_stats, Stats};

/// Room for multipart boundaries and headers on top of the file itself.
const MULTIPART_OVERHEAD: usize = 64 * 1024;
const MAX_BATCH_FILES: usize = 20;

#[derive(Clone)]
struct AppState {
    services: Arc<Services>,
}

/// Build services from the config and serve until the process exits.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let services = Services::build(config.clone()).await?;
    run_server_with_services(Arc::new(services)).await
}

/// Serve already-built services on `[server].bind`.
pub async fn run_server_with_services(services: Arc<Services>) -> anyhow::Result<()> {
    let bind_addr = services.config.server.bind.clone();
    let app = router(services);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    println!("KnowledgeOps server listening on http://{}", bind_addr);
    tracing::info!(bind = %bind_addr, "server started");
    axum::serve(listener, app).await?;

    Ok(())
}

pub fn router(services: Arc<Services>) -> Router {
    let upload_limit = services.config.server.max_upload_bytes.saturating_add(MULTIPART_OVERHEAD);
    let batch_limit = services
        .config
        .server
        .max_upload_bytes
        .saturating_mul(MAX_BATCH_FILES)
        .saturating_add(MULTIPART_OVERHEAD);
    let state = AppState { services };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/query", post(handle_query))
        .route(
            "/upload",
            post(handle_upload).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route(
            "/upload-batch",
            post(handle_upload_batch).layer(DefaultBodyLimit::max(batch_limit)),
        )
        .route("/documents", get(handle_list_documents))
        .route("/documents/{id}", delete(handle_delete_document))
        .route("/api/stats", get(handle_stats))
        .route("/api/index/clear", post(handle_clear))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g., `"bad_request"`, `"not_found"`).
    code: String,
    message: String,
}

/// Error type that converts into an Axum HTTP response.
#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        internal(format!("{:#}", err))
    }
}

fn app_error(status: StatusCode, code: &str, message: impl Into<String>) -> AppError {
    AppError {
        status,
        code: code.to_string(),
        message: message.into(),
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    app_error(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn not_found(message: impl Into<String>) -> AppError {
    app_error(StatusCode::NOT_FOUND, "not_found", message)
}

fn payload_too_large(message: impl Into<String>) -> AppError {
    app_error(StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large", message)
}

fn internal(message: impl Into<String>) -> AppError {
    let message = message.into();
    tracing::error!("request failed: {}", message);
    app_error(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
}

fn ingest_error(err: IngestError) -> AppError {
    let message = err.to_string();
    match err {
        IngestError::TooLarge { .. } => payload_too_large(message),
        IngestError::Extract(ExtractError::UnsupportedFileType(_)) => app_error(
            StatusCode::BAD_REQUEST,
            "unsupported_file_type",
            format!("{}. Supported: pdf, docx, txt, md", message),
        ),
        IngestError::Extract(ExtractError::Io { .. }) => internal(message),
        IngestError::Extract(_) => bad_request(message),
        IngestError::Chunk(_)
        | IngestError::Worker(_)
        | IngestError::Index(_)
        | IngestError::Storage(_) => internal(message),
    }
}

fn multipart_error(err: MultipartError) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        payload_too_large(err.body_text())
    } else {
        bad_request(err.body_text())
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    documents_count: i64,
    vectors_count: usize,
    services: ServiceAvailability,
}

#[derive(Serialize)]
struct ServiceAvailability {
    embedding: &'static str,
    generation: &'static str,
}

fn availability(configured: bool) -> &'static str {
    if configured {
        "configured"
    } else {
        "unconfigured"
    }
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let services = &state.services;
    let documents_count = documents::count_documents(&services.pool)
        .await
        .unwrap_or_else(|e| {
            tracing::warn!("health: failed to count documents: {:#}", e);
            0
        });
    let vectors_count = services.retriever.stats().await.total_chunks;

    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        documents_count,
        vectors_count,
        services: ServiceAvailability {
            embedding: availability(services.retriever.is_configured()),
            generation: availability(services.generator.is_configured()),
        },
    })
}

// ============ POST /query ============

async fn handle_query(
    State(state): State<AppState>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<QueryOutcome>, AppError> {
    let Json(request) = payload.map_err(|e| bad_request(e.body_text()))?;
    let outcome = state
        .services
        .orchestrator
        .answer(&request)
        .await
        .map_err(|e| bad_request(e.to_string()))?;
    Ok(Json(outcome))
}

// ============ POST /upload ============

#[derive(Serialize)]
struct UploadResponse {
    #[serde(flatten)]
    report: IngestReport,
    status: &'static str,
}

async fn handle_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| bad_request("multipart field 'file' has no filename"))?;
        let bytes = field.bytes().await.map_err(multipart_error)?;

        let report = ingest_bytes(&state.services, &filename, &bytes)
            .await
            .map_err(ingest_error)?;
        return Ok(Json(UploadResponse {
            report,
            status: "processed_and_indexed",
        }));
    }
    Err(bad_request("missing multipart field 'file'"))
}

// ============ POST /upload-batch ============

#[derive(Serialize)]
struct BatchItem {
    filename: String,
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    document_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    chunks_indexed: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize)]
struct BatchResponse {
    results: Vec<BatchItem>,
    total: usize,
    succeeded: usize,
}

async fn handle_upload_batch(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<BatchResponse>, AppError> {
    let mut results = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some("file") {
            continue;
        }
        if results.len() >= MAX_BATCH_FILES {
            return Err(bad_request(format!(
                "at most {} files per batch",
                MAX_BATCH_FILES
            )));
        }
        let filename = field.file_name().unwrap_or("upload").to_string();
        let bytes = field.bytes().await.map_err(multipart_error)?;

        let item = match ingest_bytes(&state.services, &filename, &bytes).await {
            Ok(report) => BatchItem {
                filename: report.filename,
                success: true,
                document_id: Some(report.document_id),
                chunks_indexed: Some(report.chunks_indexed),
                error: None,
            },
            Err(e) => BatchItem {
                filename,
                success: false,
                document_id: None,
                chunks_indexed: None,
                error: Some(e.to_string()),
            },
        };
        results.push(item);
    }

    if results.is_empty() {
        return Err(bad_request("missing multipart field 'file'"));
    }
    let succeeded = results.iter().filter(|r| r.success).count();
    Ok(Json(BatchResponse {
        total: results.len(),
        succeeded,
        results,
    }))
}

// ============ GET /documents ============

#[derive(Serialize)]
struct DocumentsResponse {
    total: usize,
    documents: Vec<DocumentRecord>,
}

async fn handle_list_documents(
    State(state): State<AppState>,
) -> Result<Json<DocumentsResponse>, AppError> {
    let documents = documents::list_documents(&state.services.pool).await?;
    Ok(Json(DocumentsResponse {
        total: documents.len(),
        documents,
    }))
}

// ============ DELETE /documents/{id} ============

#[derive(Serialize)]
struct DeleteResponse {
    deleted: bool,
    id: String,
}

async fn handle_delete_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>, AppError> {
    if !documents::delete_document(&state.services, &id).await? {
        return Err(not_found(format!("document not found: {}", id)));
    }
    Ok(Json(DeleteResponse { deleted: true, id }))
}

// ============ GET /api/stats ============

async fn handle_stats(State(state): State<AppState>) -> Result<Json<Stats>, AppError> {
    Ok(Json(collect_stats(&state.services).await?))
}

// ============ POST /api/index/clear ============

#[derive(Serialize)]
struct ClearResponse {
    cleared: bool,
}

async fn handle_clear(State(state): State<AppState>) -> Result<Json<ClearResponse>, AppError> {
    let cleared = documents::clear_all(&state.services).await?;
    Ok(Json(ClearResponse { cleared }))
}
