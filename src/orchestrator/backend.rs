//! Server calls made by the orchestrator.

use crate::http::{build_client, format_endpoint, normalize_base_url};
use crate::ingest::{
    AssetsResponse, CreateUploadRequest, CreateUploadResponse, IngestBatchRequest,
    IngestBatchResponse, MarkErrorRequest, ProcessPageRequest, ProcessPageResponse,
};
use crate::orchestrator::form::FileInput;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Failures talking to the ingestion server or the raw document upload URL.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Base URL failed to parse or normalize.
    #[error("Invalid server URL: {0}")]
    InvalidUrl(String),
    /// HTTP layer failed before receiving a response.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Server rejected the call with an `{ "error": ... }` body.
    #[error("{message} ({status})")]
    Api {
        /// HTTP status returned by the server.
        status: StatusCode,
        /// Error message from the response body.
        message: String,
    },
    /// Raw document transfer was rejected by storage.
    #[error("Failed to upload PDF to storage ({status})")]
    Transfer {
        /// HTTP status returned by storage.
        status: StatusCode,
    },
}

/// Operations the orchestrator needs from the server side.
#[async_trait]
pub trait IngestionBackend: Send + Sync {
    /// Allocate a rulebook and an upload URL.
    async fn create_upload(
        &self,
        request: &CreateUploadRequest,
    ) -> Result<CreateUploadResponse, BackendError>;

    /// `PUT` the raw document to the signed upload URL.
    async fn transfer_document(
        &self,
        upload_url: &str,
        document: &FileInput,
    ) -> Result<(), BackendError>;

    /// Extract one page.
    async fn process_page(
        &self,
        request: ProcessPageRequest,
    ) -> Result<ProcessPageResponse, BackendError>;

    /// Submit one ingestion batch.
    async fn ingest_batch(
        &self,
        request: &IngestBatchRequest,
    ) -> Result<IngestBatchResponse, BackendError>;

    /// Upload the thumbnail and write asset URLs back.
    async fn finalize_assets(
        &self,
        rulebook_id: &str,
        thumbnail: &FileInput,
    ) -> Result<AssetsResponse, BackendError>;

    /// Record a failed run against the rulebook.
    async fn report_failure(&self, rulebook_id: &str, message: &str) -> Result<(), BackendError>;
}

/// [`IngestionBackend`] calling the server's HTTP routes.
pub struct HttpBackend {
    client: Client,
    base_url: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

impl HttpBackend {
    /// Create a backend for the server at `base_url`.
    pub fn new(base_url: &str) -> Result<Self, BackendError> {
        let client = build_client()?;
        let base_url = normalize_base_url(base_url).map_err(BackendError::InvalidUrl)?;
        tracing::debug!(url = %base_url, "Initialized ingestion backend client");
        Ok(Self { client, base_url })
    }

    async fn parse<T: DeserializeOwned>(
        response: reqwest::Response,
        route: &'static str,
    ) -> Result<T, BackendError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .map(|parsed| parsed.error)
            .unwrap_or(body);
        tracing::error!(route, %status, message = %message, "Server call failed");
        Err(BackendError::Api { status, message })
    }

    async fn post_json<B, T>(&self, route: &'static str, body: &B) -> Result<T, BackendError>
    where
        B: serde::Serialize + Sync,
        T: DeserializeOwned,
    {
        let response = self
            .client
            .post(format_endpoint(&self.base_url, route))
            .json(body)
            .send()
            .await?;
        Self::parse(response, route).await
    }
}

#[async_trait]
impl IngestionBackend for HttpBackend {
    async fn create_upload(
        &self,
        request: &CreateUploadRequest,
    ) -> Result<CreateUploadResponse, BackendError> {
        self.post_json("rulebooks/create-upload", request).await
    }

    async fn transfer_document(
        &self,
        upload_url: &str,
        document: &FileInput,
    ) -> Result<(), BackendError> {
        let response = self
            .client
            .put(upload_url)
            .header(reqwest::header::CONTENT_TYPE, &document.content_type)
            .body(document.bytes.clone())
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(BackendError::Transfer {
                status: response.status(),
            });
        }
        Ok(())
    }

    async fn process_page(
        &self,
        request: ProcessPageRequest,
    ) -> Result<ProcessPageResponse, BackendError> {
        self.post_json("rulebooks/process-page", &request).await
    }

    async fn ingest_batch(
        &self,
        request: &IngestBatchRequest,
    ) -> Result<IngestBatchResponse, BackendError> {
        self.post_json("rulebooks/ingest-batch", request).await
    }

    async fn finalize_assets(
        &self,
        rulebook_id: &str,
        thumbnail: &FileInput,
    ) -> Result<AssetsResponse, BackendError> {
        let part = Part::bytes(thumbnail.bytes.clone())
            .file_name(thumbnail.file_name.clone())
            .mime_str(&thumbnail.content_type)?;
        let form = Form::new()
            .text("rulebookId", rulebook_id.to_string())
            .part("thumbnail", part);
        let response = self
            .client
            .post(format_endpoint(&self.base_url, "rulebooks/upload-assets"))
            .multipart(form)
            .send()
            .await?;
        Self::parse(response, "rulebooks/upload-assets").await
    }

    async fn report_failure(&self, rulebook_id: &str, message: &str) -> Result<(), BackendError> {
        let request = MarkErrorRequest {
            rulebook_id: rulebook_id.to_string(),
            message: message.to_string(),
        };
        let _: serde_json::Value = self.post_json("rulebooks/mark-error", &request).await?;
        Ok(())
    }
}
