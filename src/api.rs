//! HTTP surface for the rulebook ingestion server.
//!
//! This module exposes an Axum router with the following endpoints:
//!
//! - `POST /rulebooks/create-upload` – Create a `pending_ingest` rulebook and return
//!   `{ rulebookId, slug, uploadUrl }` for the raw PDF.
//! - `POST /rulebooks/process-page` – Extract one single-page PDF (`{ pageNumber,
//!   pageDocumentBase64 }`) into structured text.
//! - `POST /rulebooks/ingest-batch` – Upload a batch of page texts as documents, attach them to
//!   the rulebook's index, and advance its progress counters.
//! - `POST /rulebooks/upload-assets` – Multipart `rulebookId` + `thumbnail`; stores the image and
//!   writes public URLs back to the rulebook.
//! - `POST /rulebooks/mark-error` – Record a failure reported by the upload client.
//! - `POST /rulebooks/ask` – Answer a question against a `ready` rulebook with page citations.
//! - `POST /rulebooks/delete` – Delete rulebooks and, best-effort, their external resources.
//! - `GET /rulebooks/:slug` – Status view including the `stale` flag.
//! - `GET /metrics` – Ingestion counters.
//! - `GET /commands` – Machine-readable command catalog for quick discovery by tools.
//!
//! Every failure is returned as `{ "error": message }`. Bodies that are not valid JSON or lack a
//! required field are rejected with `400` before the service sees them.

use crate::ingest::{
    AskRequest, AskResponse, AssetsResponse, CreateUploadRequest, CreateUploadResponse,
    DeleteRequest, DeleteResponse, IngestApi, IngestBatchRequest, IngestBatchResponse,
    IngestError, MarkErrorRequest, MarkErrorResponse, ProcessPageRequest, ProcessPageResponse,
    RulebookView, ThumbnailUpload,
};
use crate::metrics::MetricsSnapshot;
use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

/// Largest accepted request body; covers base64 pages and thumbnails.
const MAX_REQUEST_BYTES: usize = 16 * 1024 * 1024;

/// Build the HTTP router exposing the ingestion API surface.
pub fn create_router<S>(service: Arc<S>) -> Router
where
    S: IngestApi + 'static,
{
    Router::new()
        .route("/rulebooks/create-upload", post(create_upload::<S>))
        .route("/rulebooks/process-page", post(process_page::<S>))
        .route("/rulebooks/ingest-batch", post(ingest_batch::<S>))
        .route("/rulebooks/upload-assets", post(upload_assets::<S>))
        .route("/rulebooks/mark-error", post(mark_error::<S>))
        .route("/rulebooks/ask", post(ask::<S>))
        .route("/rulebooks/delete", post(delete_rulebooks::<S>))
        .route("/rulebooks/:slug", get(rulebook_status::<S>))
        .route("/metrics", get(get_metrics::<S>))
        .route("/commands", get(get_commands))
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BYTES))
        .with_state(service)
}

/// Allocate a rulebook row and a signed upload URL.
async fn create_upload<S>(
    State(service): State<Arc<S>>,
    payload: Result<Json<CreateUploadRequest>, JsonRejection>,
) -> Result<Json<CreateUploadResponse>, AppError>
where
    S: IngestApi,
{
    let Json(request) = payload?;
    Ok(Json(service.create_upload(request).await?))
}

/// Run one page through the extraction model.
async fn process_page<S>(
    State(service): State<Arc<S>>,
    payload: Result<Json<ProcessPageRequest>, JsonRejection>,
) -> Result<Json<ProcessPageResponse>, AppError>
where
    S: IngestApi,
{
    let Json(request) = payload?;
    Ok(Json(service.process_page(request).await?))
}

/// Apply one ingestion batch.
///
/// Batch `0` creates the rulebook's index. The request blocks until the index reports the
/// batch's documents as processed or the attach timeout elapses (`504`).
async fn ingest_batch<S>(
    State(service): State<Arc<S>>,
    payload: Result<Json<IngestBatchRequest>, JsonRejection>,
) -> Result<Json<IngestBatchResponse>, AppError>
where
    S: IngestApi,
{
    let Json(request) = payload?;
    Ok(Json(service.ingest_batch(request).await?))
}

/// Accept the multipart thumbnail upload.
async fn upload_assets<S>(
    State(service): State<Arc<S>>,
    mut multipart: Multipart,
) -> Result<Json<AssetsResponse>, AppError>
where
    S: IngestApi,
{
    let mut rulebook_id = String::new();
    let mut thumbnail = ThumbnailUpload::default();
    while let Some(field) = multipart.next_field().await.map_err(invalid_multipart)? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("rulebookId") => {
                rulebook_id = field.text().await.map_err(invalid_multipart)?;
            }
            Some("thumbnail") => {
                thumbnail.content_type = field.content_type().map(str::to_string);
                thumbnail.bytes = field.bytes().await.map_err(invalid_multipart)?.to_vec();
            }
            _ => {}
        }
    }
    Ok(Json(
        service
            .finalize_assets(rulebook_id.trim(), thumbnail)
            .await?,
    ))
}

fn invalid_multipart(error: axum::extract::multipart::MultipartError) -> AppError {
    AppError(IngestError::Validation(format!("Invalid form data: {error}")))
}

/// Record a client-reported failure.
async fn mark_error<S>(
    State(service): State<Arc<S>>,
    payload: Result<Json<MarkErrorRequest>, JsonRejection>,
) -> Result<Json<MarkErrorResponse>, AppError>
where
    S: IngestApi,
{
    let Json(request) = payload?;
    Ok(Json(service.mark_error(request).await?))
}

/// Answer a question with page citations.
async fn ask<S>(
    State(service): State<Arc<S>>,
    payload: Result<Json<AskRequest>, JsonRejection>,
) -> Result<Json<AskResponse>, AppError>
where
    S: IngestApi,
{
    let Json(request) = payload?;
    Ok(Json(service.ask(request).await?))
}

/// Delete rulebooks by id.
async fn delete_rulebooks<S>(
    State(service): State<Arc<S>>,
    payload: Result<Json<DeleteRequest>, JsonRejection>,
) -> Result<Json<DeleteResponse>, AppError>
where
    S: IngestApi,
{
    let Json(request) = payload?;
    Ok(Json(service.delete(request).await?))
}

/// Status view for the rulebook page.
async fn rulebook_status<S>(
    State(service): State<Arc<S>>,
    Path(slug): Path<String>,
) -> Result<Json<RulebookView>, AppError>
where
    S: IngestApi,
{
    Ok(Json(service.status(&slug).await?))
}

/// Return the ingestion counters.
async fn get_metrics<S>(State(service): State<Arc<S>>) -> Json<MetricsSnapshot>
where
    S: IngestApi,
{
    Json(service.metrics_snapshot())
}

/// Descriptor for a single command in the discovery catalog.
#[derive(Serialize)]
struct CommandDescriptor {
    name: &'static str,
    method: &'static str,
    path: &'static str,
    description: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_example: Option<serde_json::Value>,
}

/// Response body for `GET /commands`.
#[derive(Serialize)]
struct CommandsResponse {
    commands: Vec<CommandDescriptor>,
}

/// Enumerate supported HTTP commands for discovery by hosts and tools.
async fn get_commands() -> Json<CommandsResponse> {
    Json(CommandsResponse {
        commands: vec![
            CommandDescriptor {
                name: "create_upload",
                method: "POST",
                path: "/rulebooks/create-upload",
                description: "Create a pending rulebook and a signed URL for the raw PDF. Response returns { \"rulebookId\", \"slug\", \"uploadUrl\" }.",
                request_example: Some(json!({ "title": "Catan", "year": 1995 })),
            },
            CommandDescriptor {
                name: "process_page",
                method: "POST",
                path: "/rulebooks/process-page",
                description: "Extract structured text from one single-page PDF.",
                request_example: Some(json!({
                    "pageNumber": 1,
                    "pageDocumentBase64": "JVBERi0xLjcK..."
                })),
            },
            CommandDescriptor {
                name: "ingest_batch",
                method: "POST",
                path: "/rulebooks/ingest-batch",
                description: "Upload page texts as documents, attach them to the rulebook index, and advance progress. Batch 0 creates the index; the last batch marks the rulebook ready.",
                request_example: Some(json!({
                    "rulebookId": "00000000-0000-0000-0000-000000000000",
                    "batchIndex": 0,
                    "pages": [{ "pageNumber": 1, "text": "PAGE_INDEX: 1\n[SECTION: SETUP]\n..." }],
                    "isLastBatch": true,
                    "totalPages": 1
                })),
            },
            CommandDescriptor {
                name: "upload_assets",
                method: "POST",
                path: "/rulebooks/upload-assets",
                description: "Multipart form with `rulebookId` and `thumbnail`; stores the thumbnail and records public asset URLs.",
                request_example: None,
            },
            CommandDescriptor {
                name: "mark_error",
                method: "POST",
                path: "/rulebooks/mark-error",
                description: "Flag an unfinished rulebook as failed with a message.",
                request_example: Some(json!({
                    "rulebookId": "00000000-0000-0000-0000-000000000000",
                    "message": "Failed to ingest batch"
                })),
            },
            CommandDescriptor {
                name: "ask",
                method: "POST",
                path: "/rulebooks/ask",
                description: "Answer a question from a ready rulebook. Response returns { \"answer\", \"citations\": [{ \"pageNumber\", \"documentRef\" }] }.",
                request_example: Some(json!({
                    "rulebookId": "00000000-0000-0000-0000-000000000000",
                    "question": "How many cards do players start with?"
                })),
            },
            CommandDescriptor {
                name: "delete",
                method: "POST",
                path: "/rulebooks/delete",
                description: "Delete rulebooks with their index, page documents, and stored files.",
                request_example: Some(json!({ "ids": ["00000000-0000-0000-0000-000000000000"] })),
            },
            CommandDescriptor {
                name: "rulebook_status",
                method: "GET",
                path: "/rulebooks/:slug",
                description: "Return lifecycle status, progress counters, and whether an unfinished ingestion is stale.",
                request_example: None,
            },
            CommandDescriptor {
                name: "metrics",
                method: "GET",
                path: "/metrics",
                description: "Return ingestion counters useful for observability dashboards.",
                request_example: None,
            },
        ],
    })
}

struct AppError(IngestError);

impl AppError {
    fn status(&self) -> StatusCode {
        match self.0 {
            IngestError::Validation(_) | IngestError::Precondition(_) => StatusCode::BAD_REQUEST,
            IngestError::NotFound(_) => StatusCode::NOT_FOUND,
            IngestError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            IngestError::Upstream(_) | IngestError::PageFailed(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(%status, error = %self.0, "Request failed");
        } else {
            tracing::debug!(%status, error = %self.0, "Request rejected");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

impl From<IngestError> for AppError {
    fn from(inner: IngestError) -> Self {
        Self(inner)
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self(IngestError::Validation(rejection.body_text()))
    }
}
