//! Gemini `generateContent` client used for page extraction.

use crate::extraction::{ExtractionError, PageExtractor, prompt::build_page_prompt, validate_extraction};
use crate::http::{build_client, format_endpoint, normalize_base_url};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

/// Connection settings for [`GeminiExtractor`].
#[derive(Debug, Clone)]
pub struct GeminiSettings {
    /// Base URL of the generative language API.
    pub base_url: String,
    /// API key sent in the `x-goog-api-key` header.
    pub api_key: String,
    /// Model identifier, e.g. `gemini-2.5-flash`.
    pub model: String,
}

/// Page extractor backed by a Gemini multimodal model.
pub struct GeminiExtractor {
    pub(crate) client: Client,
    pub(crate) base_url: String,
    pub(crate) api_key: String,
    pub(crate) model: String,
}

impl GeminiExtractor {
    /// Construct a client from explicit settings.
    pub fn new(settings: GeminiSettings) -> Result<Self, ExtractionError> {
        let client = build_client().map_err(|err| ExtractionError::Failed(err.to_string()))?;
        let base_url =
            normalize_base_url(&settings.base_url).map_err(ExtractionError::Failed)?;
        tracing::debug!(url = %base_url, model = %settings.model, "Initialized Gemini client");
        Ok(Self {
            client,
            base_url,
            api_key: settings.api_key,
            model: settings.model,
        })
    }
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[async_trait]
impl PageExtractor for GeminiExtractor {
    async fn extract_page(
        &self,
        page_number: u32,
        page_pdf: &[u8],
    ) -> Result<String, ExtractionError> {
        let body = json!({
            "contents": [{
                "role": "user",
                "parts": [
                    {
                        "inline_data": {
                            "mime_type": "application/pdf",
                            "data": BASE64_STANDARD.encode(page_pdf),
                        }
                    },
                    { "text": build_page_prompt(page_number) }
                ]
            }]
        });

        let url = format_endpoint(
            &self.base_url,
            &format!("v1beta/models/{}:generateContent", self.model),
        );
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| ExtractionError::Failed(err.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(page = page_number, %status, "Extraction request failed");
            return Err(ExtractionError::Failed(format!(
                "unexpected response ({status}): {body}"
            )));
        }

        let payload: GenerateContentResponse = response
            .json()
            .await
            .map_err(|err| ExtractionError::Malformed(err.to_string()))?;
        let text: String = payload
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect()
            })
            .unwrap_or_default();

        tracing::debug!(page = page_number, chars = text.len(), "Page extracted");
        validate_extraction(page_number, text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};

    fn extractor(server: &MockServer) -> GeminiExtractor {
        GeminiExtractor::new(GeminiSettings {
            base_url: server.base_url(),
            api_key: "gm-test".into(),
            model: "gemini-2.5-flash".into(),
        })
        .expect("client")
    }

    #[tokio::test]
    async fn extract_page_sends_inline_pdf_and_joins_parts() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1beta/models/gemini-2.5-flash:generateContent")
                    .header("x-goog-api-key", "gm-test")
                    .body_contains("\"mime_type\":\"application/pdf\"")
                    .body_contains(&BASE64_STANDARD.encode(b"%PDF-page"))
                    .body_contains("PAGE_INDEX = 3");
                then.status(200).json_body(json!({
                    "candidates": [{
                        "content": {
                            "parts": [
                                { "text": "PAGE_INDEX: 3\n\n" },
                                { "text": "[SECTION: SETUP]\nPlace the board." }
                            ]
                        }
                    }]
                }));
            })
            .await;

        let text = extractor(&server)
            .extract_page(3, b"%PDF-page")
            .await
            .expect("extraction");

        mock.assert_async().await;
        assert_eq!(text, "PAGE_INDEX: 3\n\n[SECTION: SETUP]\nPlace the board.");
    }

    #[tokio::test]
    async fn service_errors_map_to_failed() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST);
                then.status(503).body("overloaded");
            })
            .await;

        let error = extractor(&server).extract_page(1, b"%PDF").await.unwrap_err();
        assert!(matches!(error, ExtractionError::Failed(message) if message.contains("overloaded")));
    }

    #[tokio::test]
    async fn missing_candidates_are_malformed() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST);
                then.status(200).json_body(json!({ "candidates": [] }));
            })
            .await;

        let error = extractor(&server).extract_page(1, b"%PDF").await.unwrap_err();
        assert!(matches!(error, ExtractionError::Malformed(_)));
    }
}
