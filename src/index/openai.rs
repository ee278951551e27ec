//! OpenAI vector stores, files, and Responses API behind [`RetrievalIndex`].

use crate::http::{build_client, format_endpoint, normalize_base_url};
use crate::index::RetrievalIndex;
use crate::index::types::{CreatedObject, FileBatch, IndexError, ResponsesPayload};
use crate::index::Answer;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method};
use serde_json::json;
use std::time::Duration;

/// Connection settings for [`OpenAiIndex`].
#[derive(Debug, Clone)]
pub struct OpenAiSettings {
    /// Base URL including the API version segment, e.g. `https://api.openai.com/v1`.
    pub base_url: String,
    /// Bearer token for the API.
    pub api_key: String,
    /// Model used by [`RetrievalIndex::answer`].
    pub answer_model: String,
    /// Interval between attachment status polls.
    pub attach_poll: Duration,
}

/// Lightweight HTTP client for the hosted index.
pub struct OpenAiIndex {
    pub(crate) client: Client,
    pub(crate) base_url: String,
    pub(crate) api_key: String,
    pub(crate) answer_model: String,
    pub(crate) attach_poll: Duration,
}

impl OpenAiIndex {
    /// Construct a client from explicit settings.
    pub fn new(settings: OpenAiSettings) -> Result<Self, IndexError> {
        let client = build_client()?;
        let base_url = normalize_base_url(&settings.base_url).map_err(IndexError::InvalidUrl)?;
        tracing::debug!(
            url = %base_url,
            answer_model = %settings.answer_model,
            has_api_key = !settings.api_key.is_empty(),
            "Initialized index HTTP client"
        );
        Ok(Self {
            client,
            base_url,
            api_key: settings.api_key,
            answer_model: settings.answer_model,
            attach_poll: settings.attach_poll,
        })
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format_endpoint(&self.base_url, path))
            .bearer_auth(&self.api_key)
            .header("OpenAI-Beta", "assistants=v2")
    }

    async fn parse_success<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
        operation: &'static str,
    ) -> Result<T, IndexError> {
        if response.status().is_success() {
            Ok(response.json().await?)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = IndexError::UnexpectedStatus { status, body };
            tracing::error!(operation, error = %error, "Index request failed");
            Err(error)
        }
    }

    async fn ensure_deleted(
        response: reqwest::Response,
        operation: &'static str,
    ) -> Result<(), IndexError> {
        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = IndexError::UnexpectedStatus { status, body };
            tracing::warn!(operation, error = %error, "Index delete failed");
            Err(error)
        }
    }

    async fn poll_batch(&self, index_id: &str, mut batch: FileBatch) -> Result<(), IndexError> {
        loop {
            match batch.status.as_str() {
                "completed" => return Ok(()),
                "in_progress" => {
                    tokio::time::sleep(self.attach_poll).await;
                    let response = self
                        .request(
                            Method::GET,
                            &format!("vector_stores/{index_id}/file_batches/{}", batch.id),
                        )
                        .send()
                        .await?;
                    batch = Self::parse_success(response, "poll_file_batch").await?;
                    tracing::trace!(index = index_id, batch = %batch.id, status = %batch.status, "Polled attachment");
                }
                other => {
                    return Err(IndexError::AttachFailed {
                        batch_id: batch.id.clone(),
                        status: other.to_string(),
                    });
                }
            }
        }
    }
}

#[async_trait]
impl RetrievalIndex for OpenAiIndex {
    async fn create_index(&self, name: &str) -> Result<String, IndexError> {
        let response = self
            .request(Method::POST, "vector_stores")
            .json(&json!({ "name": name }))
            .send()
            .await?;
        let created: CreatedObject = Self::parse_success(response, "create_index").await?;
        tracing::info!(index = %created.id, name, "Index created");
        Ok(created.id)
    }

    async fn upload_document(&self, file_name: &str, text: &str) -> Result<String, IndexError> {
        // Multipart bodies are consumed by `send`, so each call builds its own.
        let part = Part::bytes(text.as_bytes().to_vec())
            .file_name(file_name.to_string())
            .mime_str("text/plain")?;
        let form = Form::new().text("purpose", "assistants").part("file", part);

        let response = self
            .request(Method::POST, "files")
            .multipart(form)
            .send()
            .await?;
        let created: CreatedObject = Self::parse_success(response, "upload_document").await?;
        tracing::debug!(document = %created.id, file_name, "Document uploaded");
        Ok(created.id)
    }

    async fn attach_documents(
        &self,
        index_id: &str,
        document_ids: &[String],
        timeout: Duration,
    ) -> Result<(), IndexError> {
        let attach = async {
            let response = self
                .request(Method::POST, &format!("vector_stores/{index_id}/file_batches"))
                .json(&json!({ "file_ids": document_ids }))
                .send()
                .await?;
            let batch: FileBatch = Self::parse_success(response, "attach_documents").await?;
            self.poll_batch(index_id, batch).await
        };

        match tokio::time::timeout(timeout, attach).await {
            Ok(result) => {
                if result.is_ok() {
                    tracing::debug!(
                        index = index_id,
                        documents = document_ids.len(),
                        "Documents attached"
                    );
                }
                result
            }
            Err(_) => Err(IndexError::AttachTimeout {
                index_id: index_id.to_string(),
                waited: timeout,
            }),
        }
    }

    async fn delete_document(&self, document_id: &str) -> Result<(), IndexError> {
        let response = self
            .request(Method::DELETE, &format!("files/{document_id}"))
            .send()
            .await?;
        Self::ensure_deleted(response, "delete_document").await
    }

    async fn delete_index(&self, index_id: &str) -> Result<(), IndexError> {
        let response = self
            .request(Method::DELETE, &format!("vector_stores/{index_id}"))
            .send()
            .await?;
        Self::ensure_deleted(response, "delete_index").await
    }

    async fn answer(
        &self,
        index_id: &str,
        question: &str,
        instructions: &str,
    ) -> Result<Answer, IndexError> {
        let body = json!({
            "model": self.answer_model,
            "input": question,
            "instructions": instructions,
            "tools": [{
                "type": "file_search",
                "vector_store_ids": [index_id],
            }],
        });
        let response = self
            .request(Method::POST, "responses")
            .json(&body)
            .send()
            .await?;
        let payload: ResponsesPayload = Self::parse_success(response, "answer").await?;
        let answer = payload.into_answer();
        tracing::debug!(
            index = index_id,
            citations = answer.cited_document_ids.len(),
            "Answer received"
        );
        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::DELETE, Method::GET, Method::POST, MockServer};

    fn index(server: &MockServer) -> OpenAiIndex {
        OpenAiIndex::new(OpenAiSettings {
            base_url: format!("{}/v1", server.base_url()),
            api_key: "sk-test".into(),
            answer_model: "gpt-test".into(),
            attach_poll: Duration::from_millis(5),
        })
        .expect("client")
    }

    #[tokio::test]
    async fn create_index_posts_name_with_bearer_auth() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/vector_stores")
                    .header("authorization", "Bearer sk-test")
                    .json_body(json!({ "name": "Catan Rulebook" }));
                then.status(200).json_body(json!({ "id": "vs_1", "object": "vector_store" }));
            })
            .await;

        let id = index(&server).create_index("Catan Rulebook").await.unwrap();
        mock.assert_async().await;
        assert_eq!(id, "vs_1");
    }

    #[tokio::test]
    async fn upload_document_sends_multipart_text_file() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/files")
                    .body_contains("name=\"purpose\"")
                    .body_contains("assistants")
                    .body_contains("filename=\"rulebook-rb1-page-2.txt\"")
                    .body_contains("[SECTION: SETUP]");
                then.status(200).json_body(json!({ "id": "file-2" }));
            })
            .await;

        let id = index(&server)
            .upload_document("rulebook-rb1-page-2.txt", "[SECTION: SETUP]\nShuffle.")
            .await
            .unwrap();
        mock.assert_async().await;
        assert_eq!(id, "file-2");
    }

    #[tokio::test]
    async fn attach_returns_when_batch_completes() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/vector_stores/vs_1/file_batches")
                    .json_body(json!({ "file_ids": ["file-1", "file-2"] }));
                then.status(200)
                    .json_body(json!({ "id": "vsfb_1", "status": "completed" }));
            })
            .await;

        index(&server)
            .attach_documents(
                "vs_1",
                &["file-1".to_string(), "file-2".to_string()],
                Duration::from_secs(5),
            )
            .await
            .expect("attached");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn attach_times_out_while_batch_stays_in_progress() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/vector_stores/vs_1/file_batches");
                then.status(200)
                    .json_body(json!({ "id": "vsfb_1", "status": "in_progress" }));
            })
            .await;
        let poll = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/v1/vector_stores/vs_1/file_batches/vsfb_1");
                then.status(200)
                    .json_body(json!({ "id": "vsfb_1", "status": "in_progress" }));
            })
            .await;

        let error = index(&server)
            .attach_documents("vs_1", &["file-1".to_string()], Duration::from_millis(60))
            .await
            .unwrap_err();
        assert!(matches!(error, IndexError::AttachTimeout { ref index_id, .. } if index_id == "vs_1"));
        assert!(poll.hits_async().await >= 1);
    }

    #[tokio::test]
    async fn attach_reports_failed_batches() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/vector_stores/vs_1/file_batches");
                then.status(200)
                    .json_body(json!({ "id": "vsfb_9", "status": "failed" }));
            })
            .await;

        let error = index(&server)
            .attach_documents("vs_1", &["file-1".to_string()], Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(error, IndexError::AttachFailed { ref status, .. } if status == "failed"));
    }

    #[tokio::test]
    async fn answer_uses_file_search_tool_and_collects_citations() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/responses")
                    .body_contains("\"vector_store_ids\":[\"vs_1\"]")
                    .body_contains("\"model\":\"gpt-test\"");
                then.status(200).json_body(json!({
                    "output": [{
                        "type": "message",
                        "content": [{
                            "type": "output_text",
                            "text": "Yes.",
                            "annotations": [{ "type": "file_citation", "file_id": "file-7" }]
                        }]
                    }]
                }));
            })
            .await;

        let answer = index(&server)
            .answer("vs_1", "Can I trade?", "Quote the rules.")
            .await
            .unwrap();
        mock.assert_async().await;
        assert_eq!(answer.text, "Yes.");
        assert_eq!(answer.cited_document_ids, vec!["file-7"]);
    }

    #[tokio::test]
    async fn delete_errors_surface_status() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(DELETE).path("/v1/files/file-404");
                then.status(404).body("missing");
            })
            .await;

        let error = index(&server).delete_document("file-404").await.unwrap_err();
        assert!(matches!(error, IndexError::UnexpectedStatus { status, .. } if status.as_u16() == 404));
    }
}
