//! Page extraction through an external document-understanding model.

pub mod gemini;
pub mod prompt;

use async_trait::async_trait;
use thiserror::Error;

pub use gemini::{GeminiExtractor, GeminiSettings};

/// Errors raised by page extractors. Both variants are safe for callers to retry.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// Network failure or error response from the extraction service.
    #[error("Extraction failed: {0}")]
    Failed(String),
    /// Service answered but the text was empty or violated the output contract.
    #[error("Extraction returned malformed output: {0}")]
    Malformed(String),
}

/// Converts one single-page PDF into structured plain text with inline section tags.
#[async_trait]
pub trait PageExtractor: Send + Sync {
    /// Extract the page. `page_number` is 1-based and must be echoed by the model.
    async fn extract_page(&self, page_number: u32, page_pdf: &[u8])
    -> Result<String, ExtractionError>;
}

/// Enforce the output contract shared by every extractor.
pub(crate) fn validate_extraction(
    page_number: u32,
    text: String,
) -> Result<String, ExtractionError> {
    if text.trim().is_empty() {
        return Err(ExtractionError::Malformed(format!(
            "empty output for page {page_number}"
        )));
    }
    match prompt::echoed_page_index(&text) {
        Some(Ok(echoed)) if echoed == page_number => Ok(text),
        Some(Ok(echoed)) => Err(ExtractionError::Malformed(format!(
            "page index mismatch: requested {page_number}, model echoed {echoed}"
        ))),
        Some(Err(raw)) => Err(ExtractionError::Malformed(format!(
            "unparseable PAGE_INDEX `{raw}` for page {page_number}"
        ))),
        None => {
            tracing::warn!(page = page_number, "Extraction output lacks PAGE_INDEX header");
            Ok(text)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_output_is_malformed() {
        let error = validate_extraction(2, "   \n".into()).unwrap_err();
        assert!(matches!(error, ExtractionError::Malformed(_)));
    }

    #[test]
    fn mismatched_echo_is_malformed() {
        let error = validate_extraction(2, "PAGE_INDEX: 3\n[SECTION: SETUP]\nText".into())
            .unwrap_err();
        assert!(error.to_string().contains("requested 2"));
    }

    #[test]
    fn matching_or_missing_echo_passes() {
        let text = "PAGE_INDEX: 2\n[SECTION: SETUP]\nText".to_string();
        assert_eq!(validate_extraction(2, text.clone()).unwrap(), text);
        assert!(validate_extraction(2, "[SECTION: UNKNOWN]\nText".into()).is_ok());
    }
}
