//! Upload form input and its validation.

use std::path::Path;
use thiserror::Error;

/// Largest accepted rulebook document.
pub const MAX_DOCUMENT_BYTES: usize = 50 * 1024 * 1024;
/// Largest accepted thumbnail image.
pub const MAX_THUMBNAIL_BYTES: usize = 5 * 1024 * 1024;
/// Accepted thumbnail MIME types.
pub const THUMBNAIL_TYPES: [&str; 4] = ["image/png", "image/jpeg", "image/webp", "image/gif"];
const PDF_TYPE: &str = "application/pdf";
const EARLIEST_YEAR: i32 = 1900;

/// Reasons the form cannot be submitted.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormError {
    /// Title is blank.
    #[error("Please enter a game title")]
    MissingTitle,
    /// Year outside the accepted range.
    #[error("Publication year must be between {min} and {max}")]
    InvalidYear {
        /// Earliest accepted year.
        min: i32,
        /// Latest accepted year.
        max: i32,
    },
    /// Document is not a PDF.
    #[error("Please select a PDF file")]
    NotPdf,
    /// Document exceeds the size ceiling.
    #[error("File size must be under {limit_mb}MB")]
    DocumentTooLarge {
        /// Ceiling in megabytes.
        limit_mb: usize,
    },
    /// Thumbnail has an unsupported type.
    #[error("Thumbnail must be PNG, JPEG, WebP or GIF (got {0})")]
    UnsupportedThumbnail(String),
    /// Thumbnail exceeds the size ceiling.
    #[error("Thumbnail size must be under {limit_mb}MB")]
    ThumbnailTooLarge {
        /// Ceiling in megabytes.
        limit_mb: usize,
    },
}

/// A file picked by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInput {
    /// Original file name.
    pub file_name: String,
    /// MIME type.
    pub content_type: String,
    /// Raw bytes.
    pub bytes: Vec<u8>,
}

impl FileInput {
    /// Read a file from disk, inferring its MIME type from the extension.
    pub async fn read(path: &Path) -> std::io::Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self {
            content_type: content_type_for(path).to_string(),
            file_name,
            bytes,
        })
    }
}

/// MIME type for a path's extension.
pub fn content_type_for(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "pdf" => PDF_TYPE,
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        _ => "application/octet-stream",
    }
}

/// Everything needed to start an upload run.
#[derive(Debug, Clone)]
pub struct UploadForm {
    /// Game title.
    pub title: String,
    /// Optional publication year.
    pub year: Option<i32>,
    /// Rulebook PDF.
    pub document: FileInput,
    /// Cover image shown on the rulebook tile.
    pub thumbnail: FileInput,
}

impl UploadForm {
    /// Check the form against the accepted types and size ceilings.
    pub fn validate(&self, current_year: i32) -> Result<(), FormError> {
        if self.title.trim().is_empty() {
            return Err(FormError::MissingTitle);
        }
        if let Some(year) = self.year {
            let max = current_year + 1;
            if !(EARLIEST_YEAR..=max).contains(&year) {
                return Err(FormError::InvalidYear {
                    min: EARLIEST_YEAR,
                    max,
                });
            }
        }
        if self.document.content_type != PDF_TYPE || !self.document.bytes.starts_with(b"%PDF-") {
            return Err(FormError::NotPdf);
        }
        if self.document.bytes.len() > MAX_DOCUMENT_BYTES {
            return Err(FormError::DocumentTooLarge {
                limit_mb: MAX_DOCUMENT_BYTES / (1024 * 1024),
            });
        }
        if !THUMBNAIL_TYPES.contains(&self.thumbnail.content_type.as_str()) {
            return Err(FormError::UnsupportedThumbnail(
                self.thumbnail.content_type.clone(),
            ));
        }
        if self.thumbnail.bytes.len() > MAX_THUMBNAIL_BYTES {
            return Err(FormError::ThumbnailTooLarge {
                limit_mb: MAX_THUMBNAIL_BYTES / (1024 * 1024),
            });
        }
        Ok(())
    }
}
