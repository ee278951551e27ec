//! Server-side ingestion operations: upload slots, page extraction, batch ingestion, assets,
//! failure reports, questions, deletion, and status views.
//!
//! A rulebook moves through `pending_ingest → ingesting → ready`, or to `error` when a step
//! fails. Batches are applied one request at a time by the client orchestrator; batch `0`
//! creates the rulebook's index and every batch uploads its pages as standalone documents,
//! attaches them, records page rows, and advances the counter.

pub mod service;
pub mod slug;
pub mod types;

pub use service::{IngestApi, IngestService, IngestSettings};
pub use types::{
    AskRequest, AskResponse, AssetsResponse, Citation, CreateUploadRequest, CreateUploadResponse,
    DeleteRequest, DeleteResponse, IngestBatchRequest, IngestBatchResponse, IngestError,
    MarkErrorRequest, MarkErrorResponse, PageText, ProcessPageRequest, ProcessPageResponse,
    RulebookView, ThumbnailUpload,
};
