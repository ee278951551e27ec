//! Object storage for raw rulebook documents and thumbnails.

pub mod memory;
pub mod supabase;

use async_trait::async_trait;
use thiserror::Error;

pub use memory::MemoryAssetStorage;
pub use supabase::{SupabaseStorage, SupabaseStorageSettings};

/// Errors surfaced by asset storage backends.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Base URL failed to parse or normalize.
    #[error("Invalid storage URL: {0}")]
    InvalidUrl(String),
    /// HTTP layer failed before receiving a response.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Storage responded with an unexpected status code.
    #[error("Unexpected storage response ({status}): {body}")]
    UnexpectedStatus {
        /// HTTP status returned by storage.
        status: reqwest::StatusCode,
        /// Body payload associated with the failing response.
        body: String,
    },
    /// Object already exists and overwriting was not requested.
    #[error("Object already exists: {0}")]
    AlreadyExists(String),
}

/// Object path of a rulebook's raw document.
pub fn document_path(rulebook_id: &str) -> String {
    format!("pdfs/{rulebook_id}.pdf")
}

/// Thumbnail file extensions by accepted MIME type.
pub const THUMBNAIL_EXTENSIONS: [(&str, &str); 4] = [
    ("image/png", "png"),
    ("image/jpeg", "jpg"),
    ("image/webp", "webp"),
    ("image/gif", "gif"),
];

/// Extension for a thumbnail content type, falling back to `png`.
pub fn thumbnail_extension(content_type: &str) -> &'static str {
    THUMBNAIL_EXTENSIONS
        .iter()
        .find(|(mime, _)| *mime == content_type)
        .map(|(_, ext)| *ext)
        .unwrap_or("png")
}

/// Object path of a rulebook's thumbnail for a given extension.
pub fn thumbnail_path(rulebook_id: &str, extension: &str) -> String {
    format!("thumbnails/{rulebook_id}.{extension}")
}

/// Bucket-scoped object storage.
#[async_trait]
pub trait AssetStorage: Send + Sync {
    /// Create a time-limited URL the client can `PUT` the object to.
    async fn create_signed_upload_url(&self, path: &str) -> Result<String, StorageError>;

    /// Store an object, replacing any existing one when `upsert` is set.
    async fn upload(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
        upsert: bool,
    ) -> Result<(), StorageError>;

    /// Public URL for an object path. Does not check existence.
    fn public_url(&self, path: &str) -> String;

    /// Remove objects; missing paths are ignored.
    async fn remove(&self, paths: &[String]) -> Result<(), StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thumbnail_extension_defaults_to_png() {
        assert_eq!(thumbnail_extension("image/jpeg"), "jpg");
        assert_eq!(thumbnail_extension("image/webp"), "webp");
        assert_eq!(thumbnail_extension("application/octet-stream"), "png");
        assert_eq!(thumbnail_path("rb-1", "gif"), "thumbnails/rb-1.gif");
        assert_eq!(document_path("rb-1"), "pdfs/rb-1.pdf");
    }
}
