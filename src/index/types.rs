//! Shared types for the retrieval index client.

use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Errors returned while interacting with the retrieval index service.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Base URL failed to parse or normalize.
    #[error("Invalid index service URL: {0}")]
    InvalidUrl(String),
    /// HTTP layer failed before receiving a response.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Service responded with an unexpected status code.
    #[error("Unexpected index service response ({status}): {body}")]
    UnexpectedStatus {
        /// HTTP status returned by the service.
        status: StatusCode,
        /// Body payload associated with the failing response.
        body: String,
    },
    /// Attachment did not finish processing within the allotted time.
    #[error("Index {index_id} did not finish attaching documents within {waited:?}")]
    AttachTimeout {
        /// Index the documents were being attached to.
        index_id: String,
        /// Time spent waiting.
        waited: Duration,
    },
    /// Service reported a terminal failure for the attachment.
    #[error("Attachment batch {batch_id} ended with status `{status}`")]
    AttachFailed {
        /// Identifier of the attachment batch.
        batch_id: String,
        /// Terminal status reported by the service.
        status: String,
    },
}

/// Answer produced by the hosted answering service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Answer {
    /// Concatenated answer text.
    pub text: String,
    /// Distinct document references cited by the answer, in first-seen order.
    pub cited_document_ids: Vec<String>,
}

#[derive(Deserialize)]
pub(crate) struct CreatedObject {
    pub(crate) id: String,
}

#[derive(Deserialize)]
pub(crate) struct FileBatch {
    pub(crate) id: String,
    pub(crate) status: String,
}

#[derive(Deserialize)]
pub(crate) struct ResponsesPayload {
    #[serde(default)]
    pub(crate) output: Vec<OutputItem>,
}

#[derive(Deserialize)]
pub(crate) struct OutputItem {
    #[serde(rename = "type")]
    pub(crate) kind: String,
    #[serde(default)]
    pub(crate) content: Vec<OutputContent>,
}

#[derive(Deserialize)]
pub(crate) struct OutputContent {
    #[serde(rename = "type")]
    pub(crate) kind: String,
    #[serde(default)]
    pub(crate) text: String,
    #[serde(default)]
    pub(crate) annotations: Vec<Annotation>,
}

#[derive(Deserialize)]
pub(crate) struct Annotation {
    #[serde(rename = "type")]
    pub(crate) kind: String,
    #[serde(default)]
    pub(crate) file_id: Option<String>,
}

impl ResponsesPayload {
    /// Collect message text and `file_citation` annotations; tool-call results are ignored.
    pub(crate) fn into_answer(self) -> Answer {
        let mut answer = Answer::default();
        for item in self.output.into_iter().filter(|item| item.kind == "message") {
            for content in item
                .content
                .into_iter()
                .filter(|content| content.kind == "output_text")
            {
                answer.text.push_str(&content.text);
                for annotation in content.annotations {
                    if annotation.kind != "file_citation" {
                        continue;
                    }
                    if let Some(file_id) = annotation.file_id.filter(|id| !id.is_empty())
                        && !answer.cited_document_ids.contains(&file_id)
                    {
                        answer.cited_document_ids.push(file_id);
                    }
                }
            }
        }
        answer
    }
}
