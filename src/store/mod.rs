//! Persisted rulebook lifecycle rows and their page documents.

pub mod memory;
pub mod postgrest;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use time::OffsetDateTime;

pub use memory::MemoryRulebookStore;
pub use postgrest::{PostgrestRulebookStore, PostgrestSettings};

/// Lifecycle stage of a rulebook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RulebookStatus {
    /// Row exists; no batch has been ingested yet.
    PendingIngest,
    /// At least one batch has been processed.
    Ingesting,
    /// Every page is attached to the index.
    Ready,
    /// Ingestion stopped; see `error_message`.
    Error,
}

impl RulebookStatus {
    /// Wire representation of the status.
    pub fn as_str(self) -> &'static str {
        match self {
            RulebookStatus::PendingIngest => "pending_ingest",
            RulebookStatus::Ingesting => "ingesting",
            RulebookStatus::Ready => "ready",
            RulebookStatus::Error => "error",
        }
    }

    /// Whether ingestion for this status is still expected to advance.
    pub fn is_in_flight(self) -> bool {
        matches!(
            self,
            RulebookStatus::PendingIngest | RulebookStatus::Ingesting
        )
    }
}

impl fmt::Display for RulebookStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One uploaded rulebook row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rulebook {
    /// Opaque identifier.
    pub id: String,
    /// Unique URL slug.
    pub slug: String,
    /// Game title.
    pub title: String,
    /// Optional publication year.
    #[serde(default)]
    pub year: Option<i32>,
    /// Lifecycle status.
    pub status: RulebookStatus,
    /// Pages attached to the index so far.
    #[serde(default)]
    pub ingested_pages: u32,
    /// Final page total; zero until the last batch lands.
    #[serde(default)]
    pub page_count: u32,
    /// Backing index reference, set by the first batch.
    #[serde(default, rename = "openai_vector_store_id")]
    pub index_id: Option<String>,
    /// Failure message when `status` is `error`.
    #[serde(default)]
    pub error_message: Option<String>,
    /// Public URL of the raw document.
    #[serde(default)]
    pub pdf_url: Option<String>,
    /// Public URL of the thumbnail.
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    /// Row creation time.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Last write time.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Fields supplied when creating a rulebook row.
#[derive(Debug, Clone, Serialize)]
pub struct NewRulebook {
    /// Unique URL slug.
    pub slug: String,
    /// Game title.
    pub title: String,
    /// Optional publication year.
    pub year: Option<i32>,
}

/// Partial update applied to a rulebook row; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RulebookUpdate {
    /// New lifecycle status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<RulebookStatus>,
    /// New ingested-page counter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ingested_pages: Option<u32>,
    /// Final page total.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_count: Option<u32>,
    /// Backing index reference.
    #[serde(
        rename = "openai_vector_store_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub index_id: Option<String>,
    /// Failure message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Public URL of the raw document.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pdf_url: Option<String>,
    /// Public URL of the thumbnail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
}

impl RulebookUpdate {
    /// Update that moves a rulebook to `error` with the given message.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: Some(RulebookStatus::Error),
            error_message: Some(message.into()),
            ..Self::default()
        }
    }

    /// Apply the update to an in-memory row.
    pub fn apply_to(&self, rulebook: &mut Rulebook) {
        if let Some(status) = self.status {
            rulebook.status = status;
        }
        if let Some(ingested) = self.ingested_pages {
            rulebook.ingested_pages = ingested;
        }
        if let Some(page_count) = self.page_count {
            rulebook.page_count = page_count;
        }
        if let Some(index_id) = &self.index_id {
            rulebook.index_id = Some(index_id.clone());
        }
        if let Some(message) = &self.error_message {
            rulebook.error_message = Some(message.clone());
        }
        if let Some(url) = &self.pdf_url {
            rulebook.pdf_url = Some(url.clone());
        }
        if let Some(url) = &self.thumbnail_url {
            rulebook.thumbnail_url = Some(url.clone());
        }
    }
}

/// Row linking a rulebook page to its uploaded document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageDocument {
    /// Owning rulebook.
    pub rulebook_id: String,
    /// 1-based page number, unique per rulebook.
    pub page_number: u32,
    /// External document reference.
    #[serde(rename = "openai_file_id")]
    pub document_id: String,
    /// Extracted text length in characters.
    #[serde(default)]
    pub text_length: Option<u32>,
}

/// Errors surfaced by row stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Base URL failed to parse or normalize.
    #[error("Invalid store URL: {0}")]
    InvalidUrl(String),
    /// HTTP layer failed before receiving a response.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Store responded with an unexpected status code.
    #[error("Unexpected store response ({status}): {body}")]
    UnexpectedStatus {
        /// HTTP status returned by the store.
        status: reqwest::StatusCode,
        /// Body payload associated with the failing response.
        body: String,
    },
    /// Targeted row does not exist.
    #[error("Rulebook {0} not found")]
    NotFound(String),
    /// Unique constraint rejected the write.
    #[error("Conflicting row: {0}")]
    Conflict(String),
    /// Foreign key rejected the write.
    #[error("Missing referenced rulebook: {0}")]
    MissingReference(String),
}

/// Row store holding rulebooks and their page documents.
///
/// Page rows reference their rulebook and are removed together with it.
#[async_trait]
pub trait RulebookStore: Send + Sync {
    /// Whether any rulebook already uses `slug`.
    async fn slug_exists(&self, slug: &str) -> Result<bool, StoreError>;

    /// Insert a `pending_ingest` row and return it with its assigned id.
    async fn insert_rulebook(&self, rulebook: NewRulebook) -> Result<Rulebook, StoreError>;

    /// Fetch a rulebook by id.
    async fn get_rulebook(&self, id: &str) -> Result<Option<Rulebook>, StoreError>;

    /// Fetch a rulebook by slug.
    async fn get_rulebook_by_slug(&self, slug: &str) -> Result<Option<Rulebook>, StoreError>;

    /// Apply a partial update and bump `updated_at`. Fails with [`StoreError::NotFound`].
    async fn update_rulebook(&self, id: &str, update: RulebookUpdate) -> Result<(), StoreError>;

    /// Fetch every existing rulebook among `ids`.
    async fn list_rulebooks(&self, ids: &[String]) -> Result<Vec<Rulebook>, StoreError>;

    /// Delete rulebooks and their page rows, returning the number of rulebooks removed.
    async fn delete_rulebooks(&self, ids: &[String]) -> Result<u64, StoreError>;

    /// Insert page rows in one write; the whole write fails on a duplicate page number.
    async fn insert_pages(&self, pages: Vec<PageDocument>) -> Result<(), StoreError>;

    /// Page rows owned by any of `rulebook_ids`, ordered by rulebook then page.
    async fn list_pages(&self, rulebook_ids: &[String]) -> Result<Vec<PageDocument>, StoreError>;

    /// Page rows of one rulebook whose document reference is in `document_ids`.
    async fn pages_by_document(
        &self,
        rulebook_id: &str,
        document_ids: &[String],
    ) -> Result<Vec<PageDocument>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rulebook_rows_use_column_names() {
        let row: Rulebook = serde_json::from_value(json!({
            "id": "rb-1",
            "slug": "catan-abc123",
            "title": "Catan",
            "year": 1995,
            "status": "pending_ingest",
            "ingested_pages": 0,
            "page_count": 0,
            "openai_vector_store_id": null,
            "error_message": null,
            "pdf_url": "",
            "thumbnail_url": null,
            "created_at": "2025-01-01T10:00:00.123456+00:00",
            "updated_at": "2025-01-01T10:00:00+00:00"
        }))
        .unwrap();

        assert_eq!(row.status, RulebookStatus::PendingIngest);
        assert_eq!(row.year, Some(1995));
        assert!(row.index_id.is_none());
    }

    #[test]
    fn updates_serialize_only_set_fields() {
        let update = RulebookUpdate {
            index_id: Some("vs_1".into()),
            status: Some(RulebookStatus::Ingesting),
            ..RulebookUpdate::default()
        };
        assert_eq!(
            serde_json::to_value(&update).unwrap(),
            json!({ "status": "ingesting", "openai_vector_store_id": "vs_1" })
        );
    }
}
