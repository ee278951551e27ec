//! Request, response, and error types for the ingestion operations.

use crate::assets::StorageError;
use crate::extraction::ExtractionError;
use crate::index::IndexError;
use crate::runner::{ItemFailed, PageLabel};
use crate::store::{RulebookStatus, StoreError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

/// Failures surfaced by [`crate::ingest::IngestApi`] operations.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Missing or invalid request fields; nothing was mutated.
    #[error("{0}")]
    Validation(String),
    /// Referenced rulebook does not exist.
    #[error("{0}")]
    NotFound(String),
    /// Rulebook is not in a state that allows the operation.
    #[error("{0}")]
    Precondition(String),
    /// Extraction, index, storage, or row store call failed.
    #[error("{0}")]
    Upstream(String),
    /// Index attachment outlasted its bound; documents exist but may not be searchable.
    #[error("{0}")]
    Timeout(String),
    /// A page document could not be uploaded within the retry ceiling.
    #[error(transparent)]
    PageFailed(#[from] ItemFailed<IndexError>),
}

impl From<StoreError> for IngestError {
    fn from(error: StoreError) -> Self {
        IngestError::Upstream(format!("row store: {error}"))
    }
}

impl From<IndexError> for IngestError {
    fn from(error: IndexError) -> Self {
        match error {
            IndexError::AttachTimeout { .. } => IngestError::Timeout(error.to_string()),
            other => IngestError::Upstream(format!("index service: {other}")),
        }
    }
}

impl From<StorageError> for IngestError {
    fn from(error: StorageError) -> Self {
        IngestError::Upstream(format!("asset storage: {error}"))
    }
}

impl From<ExtractionError> for IngestError {
    fn from(error: ExtractionError) -> Self {
        IngestError::Upstream(error.to_string())
    }
}

/// Body of `create-upload`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUploadRequest {
    /// Game title; required.
    #[serde(default)]
    pub title: String,
    /// Optional publication year.
    #[serde(default)]
    pub year: Option<i32>,
}

/// Allocated upload slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUploadResponse {
    /// New rulebook id.
    pub rulebook_id: String,
    /// Unique slug for the rulebook page.
    pub slug: String,
    /// Time-limited URL accepting a `PUT` of the raw document.
    pub upload_url: String,
}

/// Body of `process-page`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessPageRequest {
    /// 1-based page number.
    #[serde(default)]
    pub page_number: u32,
    /// Single-page PDF, base64 encoded.
    #[serde(default, alias = "pdfBase64")]
    pub page_document_base64: String,
}

/// Extracted text of one page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessPageResponse {
    /// Page the text belongs to.
    pub page_number: u32,
    /// Structured plain text with inline section tags.
    pub processed_text: String,
}

/// One page of extracted text inside a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageText {
    /// 1-based page number.
    pub page_number: u32,
    /// Extracted text.
    pub text: String,
}

impl PageLabel for PageText {
    fn page_number(&self) -> u32 {
        self.page_number
    }
}

/// Body of `ingest-batch`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestBatchRequest {
    /// Target rulebook.
    #[serde(default)]
    pub rulebook_id: String,
    /// Ordinal of the batch within this run; `0` creates the index. Required.
    pub batch_index: u32,
    /// Pages in this batch.
    #[serde(default)]
    pub pages: Vec<PageText>,
    /// Whether this batch completes the rulebook. Required.
    pub is_last_batch: bool,
    /// Total page count; only trusted on the last batch. Required.
    pub total_pages: u32,
}

/// Result of an applied batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestBatchResponse {
    /// Always `true`; failures are reported as errors.
    pub success: bool,
    /// Counter after this batch.
    pub ingested_pages: u32,
    /// `ingesting`, or `ready` after the last batch.
    pub status: RulebookStatus,
}

/// Thumbnail image received by the asset finalize call.
#[derive(Debug, Clone, Default)]
pub struct ThumbnailUpload {
    /// Image bytes.
    pub bytes: Vec<u8>,
    /// MIME type reported by the client, if any.
    pub content_type: Option<String>,
}

/// Public URLs written back to the rulebook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetsResponse {
    /// Thumbnail URL.
    pub thumbnail_url: String,
    /// Raw document URL.
    pub pdf_url: String,
}

/// Body of `mark-error`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkErrorRequest {
    /// Rulebook whose run failed.
    #[serde(default)]
    pub rulebook_id: String,
    /// Failure message shown on the status page.
    #[serde(default)]
    pub message: String,
}

/// Acknowledgement of a recorded failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkErrorResponse {
    /// Rulebook that was flagged.
    pub rulebook_id: String,
    /// Status after the write (`error`).
    pub status: RulebookStatus,
}

/// Body of `ask`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AskRequest {
    /// Rulebook to query.
    #[serde(default)]
    pub rulebook_id: String,
    /// Natural-language question.
    #[serde(default)]
    pub question: String,
}

/// Page supporting a quoted passage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Citation {
    /// 1-based page number.
    pub page_number: u32,
    /// Page document the answer cited.
    pub document_ref: String,
}

/// Answer with citations sorted by page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AskResponse {
    /// Answer text.
    pub answer: String,
    /// Citations in ascending page order.
    pub citations: Vec<Citation>,
}

/// Body of `delete`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteRequest {
    /// Rulebook ids to delete.
    #[serde(default)]
    pub ids: Vec<String>,
}

/// Number of rulebooks deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResponse {
    /// Rows removed; unknown ids do not count.
    pub deleted_count: u64,
}

/// Status page view of a rulebook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RulebookView {
    /// Rulebook id.
    pub id: String,
    /// URL slug.
    pub slug: String,
    /// Game title.
    pub title: String,
    /// Optional publication year.
    pub year: Option<i32>,
    /// Lifecycle status.
    pub status: RulebookStatus,
    /// Pages attached so far.
    pub ingested_pages: u32,
    /// Final page total; zero until known.
    pub page_count: u32,
    /// Failure message when `status` is `error`.
    pub error_message: Option<String>,
    /// Raw document URL.
    pub pdf_url: Option<String>,
    /// Thumbnail URL.
    pub thumbnail_url: Option<String>,
    /// Last write to the row.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    /// Unfinished ingestion that has not been touched within the staleness window.
    pub stale: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn batch_request_reads_camel_case_fields() {
        let request: IngestBatchRequest = serde_json::from_value(json!({
            "rulebookId": "rb-1",
            "batchIndex": 2,
            "pages": [{ "pageNumber": 51, "text": "[SECTION: END]" }],
            "isLastBatch": true,
            "totalPages": 51
        }))
        .unwrap();
        assert_eq!(request.batch_index, 2);
        assert!(request.is_last_batch);
        assert_eq!(request.pages[0].page_number, 51);
    }

    #[test]
    fn batch_request_without_batch_index_is_rejected() {
        let error = serde_json::from_value::<IngestBatchRequest>(json!({
            "rulebookId": "rb-1",
            "pages": [{ "pageNumber": 2, "text": "PAGE_INDEX: 2" }],
            "isLastBatch": false,
            "totalPages": 2
        }))
        .unwrap_err();
        assert!(error.to_string().contains("batchIndex"), "{error}");
    }

    #[test]
    fn process_page_accepts_legacy_field_name() {
        let request: ProcessPageRequest =
            serde_json::from_value(json!({ "pageNumber": 3, "pdfBase64": "JVBERi0=" })).unwrap();
        assert_eq!(request.page_document_base64, "JVBERi0=");
    }

    #[test]
    fn attach_timeouts_stay_distinct() {
        let timeout: IngestError = IndexError::AttachTimeout {
            index_id: "vs_1".into(),
            waited: Duration::from_secs(120),
        }
        .into();
        assert!(matches!(timeout, IngestError::Timeout(_)));

        let upstream: IngestError = IndexError::InvalidUrl("bad".into()).into();
        assert!(matches!(upstream, IngestError::Upstream(message) if message.contains("index service")));
    }
}
