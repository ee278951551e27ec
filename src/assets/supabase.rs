//! Supabase Storage (`storage/v1`) client.

use super::{AssetStorage, StorageError};
use crate::http::{build_client, format_endpoint, normalize_base_url};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde_json::json;

/// Connection settings for [`SupabaseStorage`].
#[derive(Debug, Clone)]
pub struct SupabaseStorageSettings {
    /// Project URL; `/storage/v1` is appended.
    pub project_url: String,
    /// Service key sent as `apikey` and bearer token.
    pub service_key: String,
    /// Bucket every path is resolved against.
    pub bucket: String,
}

/// [`AssetStorage`] backed by one Supabase storage bucket.
pub struct SupabaseStorage {
    pub(crate) client: Client,
    pub(crate) base_url: String,
    pub(crate) service_key: String,
    pub(crate) bucket: String,
}

#[derive(Deserialize)]
struct SignedUpload {
    url: String,
}

impl SupabaseStorage {
    /// Construct a client from explicit settings.
    pub fn new(settings: SupabaseStorageSettings) -> Result<Self, StorageError> {
        let client = build_client()?;
        let project =
            normalize_base_url(&settings.project_url).map_err(StorageError::InvalidUrl)?;
        let base_url = format_endpoint(&project, "storage/v1");
        tracing::debug!(url = %base_url, bucket = %settings.bucket, "Initialized storage client");
        Ok(Self {
            client,
            base_url,
            service_key: settings.service_key,
            bucket: settings.bucket,
        })
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format_endpoint(&self.base_url, path))
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
    }

    async fn ensure_success(
        response: reqwest::Response,
        operation: &'static str,
    ) -> Result<reqwest::Response, StorageError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let error = StorageError::UnexpectedStatus { status, body };
        tracing::error!(operation, error = %error, "Storage request failed");
        Err(error)
    }
}

#[async_trait]
impl AssetStorage for SupabaseStorage {
    async fn create_signed_upload_url(&self, path: &str) -> Result<String, StorageError> {
        let response = self
            .request(
                Method::POST,
                &format!("object/upload/sign/{}/{path}", self.bucket),
            )
            .json(&json!({}))
            .send()
            .await?;
        let signed: SignedUpload = Self::ensure_success(response, "create_signed_upload_url")
            .await?
            .json()
            .await?;
        // The service returns a path relative to `storage/v1`.
        Ok(format_endpoint(&self.base_url, &signed.url))
    }

    async fn upload(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
        upsert: bool,
    ) -> Result<(), StorageError> {
        let response = self
            .request(Method::POST, &format!("object/{}/{path}", self.bucket))
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .header("x-upsert", if upsert { "true" } else { "false" })
            .body(bytes)
            .send()
            .await?;
        if response.status() == StatusCode::CONFLICT {
            return Err(StorageError::AlreadyExists(path.to_string()));
        }
        Self::ensure_success(response, "upload").await?;
        tracing::debug!(path, content_type, "Object uploaded");
        Ok(())
    }

    fn public_url(&self, path: &str) -> String {
        format_endpoint(
            &self.base_url,
            &format!("object/public/{}/{path}", self.bucket),
        )
    }

    async fn remove(&self, paths: &[String]) -> Result<(), StorageError> {
        if paths.is_empty() {
            return Ok(());
        }
        let response = self
            .request(Method::DELETE, &format!("object/{}", self.bucket))
            .json(&json!({ "prefixes": paths }))
            .send()
            .await?;
        Self::ensure_success(response, "remove").await?;
        Ok(())
    }
}
