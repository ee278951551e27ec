//! Managed retrieval index and page document store.

pub mod openai;
pub mod types;

use async_trait::async_trait;
use std::time::Duration;

pub use openai::{OpenAiIndex, OpenAiSettings};
pub use types::{Answer, IndexError};

/// External service that stores page documents and makes them searchable.
///
/// Each rulebook gets its own index; every page is uploaded as a standalone document and then
/// attached to that index.
#[async_trait]
pub trait RetrievalIndex: Send + Sync {
    /// Create a new empty index and return its identifier.
    async fn create_index(&self, name: &str) -> Result<String, IndexError>;

    /// Upload one document as plain text and return its reference.
    async fn upload_document(&self, file_name: &str, text: &str) -> Result<String, IndexError>;

    /// Attach documents to an index and wait until the index has processed all of them.
    ///
    /// Fails with [`IndexError::AttachTimeout`] when processing outlasts `timeout`; the
    /// documents stay uploaded in that case.
    async fn attach_documents(
        &self,
        index_id: &str,
        document_ids: &[String],
        timeout: Duration,
    ) -> Result<(), IndexError>;

    /// Delete an uploaded document.
    async fn delete_document(&self, document_id: &str) -> Result<(), IndexError>;

    /// Delete an index.
    async fn delete_index(&self, index_id: &str) -> Result<(), IndexError>;

    /// Answer a question using only documents attached to `index_id`.
    async fn answer(
        &self,
        index_id: &str,
        question: &str,
        instructions: &str,
    ) -> Result<Answer, IndexError>;
}
