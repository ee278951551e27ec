//! PostgREST-backed row store (Supabase `rest/v1`).

use super::{NewRulebook, PageDocument, Rulebook, RulebookStore, RulebookUpdate, StoreError};
use crate::http::{build_client, format_endpoint, normalize_base_url};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::Serialize;
use serde::de::IgnoredAny;
use time::OffsetDateTime;

const RULEBOOKS: &str = "rulebooks";
const PAGES: &str = "rulebook_pages";
const PAGE_COLUMNS: &str = "rulebook_id,page_number,openai_file_id,text_length";
/// Postgres SQLSTATE for foreign key violations.
const FOREIGN_KEY_VIOLATION: &str = "23503";

/// Connection settings for [`PostgrestRulebookStore`].
#[derive(Debug, Clone)]
pub struct PostgrestSettings {
    /// Project URL; `/rest/v1` is appended.
    pub project_url: String,
    /// Service key sent as `apikey` and bearer token.
    pub service_key: String,
}

/// [`RulebookStore`] talking to the `rulebooks` and `rulebook_pages` tables.
pub struct PostgrestRulebookStore {
    pub(crate) client: Client,
    pub(crate) base_url: String,
    pub(crate) service_key: String,
}

#[derive(Serialize)]
struct InsertRow<'a> {
    slug: &'a str,
    title: &'a str,
    year: Option<i32>,
    status: &'static str,
    pdf_url: &'static str,
    page_count: u32,
}

#[derive(Serialize)]
struct PatchRow<'a> {
    #[serde(flatten)]
    update: &'a RulebookUpdate,
    #[serde(with = "time::serde::rfc3339")]
    updated_at: OffsetDateTime,
}

/// Render a PostgREST `in.(...)` filter with quoted values.
fn in_list(values: &[String]) -> String {
    let quoted: Vec<String> = values
        .iter()
        .map(|value| format!("\"{}\"", value.replace('"', "\\\"")))
        .collect();
    format!("in.({})", quoted.join(","))
}

impl PostgrestRulebookStore {
    /// Construct a client from explicit settings.
    pub fn new(settings: PostgrestSettings) -> Result<Self, StoreError> {
        let client = build_client()?;
        let project = normalize_base_url(&settings.project_url).map_err(StoreError::InvalidUrl)?;
        let base_url = format_endpoint(&project, "rest/v1");
        tracing::debug!(url = %base_url, "Initialized row store client");
        Ok(Self {
            client,
            base_url,
            service_key: settings.service_key,
        })
    }

    fn request(&self, method: Method, table: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format_endpoint(&self.base_url, table))
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
    }

    async fn rows<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
        operation: &'static str,
    ) -> Result<Vec<T>, StoreError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }
        let body = response.text().await.unwrap_or_default();
        let error = match status {
            StatusCode::CONFLICT if body.contains(FOREIGN_KEY_VIOLATION) => {
                StoreError::MissingReference(body)
            }
            StatusCode::CONFLICT => StoreError::Conflict(body),
            _ => StoreError::UnexpectedStatus { status, body },
        };
        tracing::error!(operation, error = %error, "Row store request failed");
        Err(error)
    }

    async fn first_rulebook(
        &self,
        column: &str,
        value: &str,
    ) -> Result<Option<Rulebook>, StoreError> {
        let response = self
            .request(Method::GET, RULEBOOKS)
            .query(&[(column, format!("eq.{value}")), ("select", "*".to_string())])
            .send()
            .await?;
        let rows: Vec<Rulebook> = Self::rows(response, "get_rulebook").await?;
        Ok(rows.into_iter().next())
    }
}

#[async_trait]
impl RulebookStore for PostgrestRulebookStore {
    async fn slug_exists(&self, slug: &str) -> Result<bool, StoreError> {
        let response = self
            .request(Method::GET, RULEBOOKS)
            .query(&[("slug", format!("eq.{slug}")), ("select", "id".to_string())])
            .send()
            .await?;
        let rows: Vec<IgnoredAny> = Self::rows(response, "slug_exists").await?;
        Ok(!rows.is_empty())
    }

    async fn insert_rulebook(&self, rulebook: NewRulebook) -> Result<Rulebook, StoreError> {
        let row = InsertRow {
            slug: &rulebook.slug,
            title: &rulebook.title,
            year: rulebook.year,
            status: "pending_ingest",
            pdf_url: "",
            page_count: 0,
        };
        let response = self
            .request(Method::POST, RULEBOOKS)
            .header("Prefer", "return=representation")
            .json(&row)
            .send()
            .await?;
        let rows: Vec<Rulebook> = Self::rows(response, "insert_rulebook").await?;
        rows.into_iter().next().ok_or_else(|| StoreError::UnexpectedStatus {
            status: StatusCode::OK,
            body: "insert returned no row".into(),
        })
    }

    async fn get_rulebook(&self, id: &str) -> Result<Option<Rulebook>, StoreError> {
        self.first_rulebook("id", id).await
    }

    async fn get_rulebook_by_slug(&self, slug: &str) -> Result<Option<Rulebook>, StoreError> {
        self.first_rulebook("slug", slug).await
    }

    async fn update_rulebook(&self, id: &str, update: RulebookUpdate) -> Result<(), StoreError> {
        let patch = PatchRow {
            update: &update,
            updated_at: OffsetDateTime::now_utc(),
        };
        let response = self
            .request(Method::PATCH, RULEBOOKS)
            .query(&[("id", format!("eq.{id}")), ("select", "id".to_string())])
            .header("Prefer", "return=representation")
            .json(&patch)
            .send()
            .await?;
        let rows: Vec<IgnoredAny> = Self::rows(response, "update_rulebook").await?;
        if rows.is_empty() {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn list_rulebooks(&self, ids: &[String]) -> Result<Vec<Rulebook>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let response = self
            .request(Method::GET, RULEBOOKS)
            .query(&[("id", in_list(ids)), ("select", "*".to_string())])
            .send()
            .await?;
        Self::rows(response, "list_rulebooks").await
    }

    async fn delete_rulebooks(&self, ids: &[String]) -> Result<u64, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let response = self
            .request(Method::DELETE, RULEBOOKS)
            .query(&[("id", in_list(ids)), ("select", "id".to_string())])
            .header("Prefer", "return=representation")
            .send()
            .await?;
        let rows: Vec<IgnoredAny> = Self::rows(response, "delete_rulebooks").await?;
        Ok(rows.len() as u64)
    }

    async fn insert_pages(&self, pages: Vec<PageDocument>) -> Result<(), StoreError> {
        if pages.is_empty() {
            return Ok(());
        }
        let response = self
            .request(Method::POST, PAGES)
            .header("Prefer", "return=minimal")
            .json(&pages)
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        // Minimal returns carry no rows; reuse the error mapping only.
        Self::rows::<IgnoredAny>(response, "insert_pages").await.map(|_| ())
    }

    async fn list_pages(&self, rulebook_ids: &[String]) -> Result<Vec<PageDocument>, StoreError> {
        if rulebook_ids.is_empty() {
            return Ok(Vec::new());
        }
        let response = self
            .request(Method::GET, PAGES)
            .query(&[
                ("rulebook_id", in_list(rulebook_ids)),
                ("select", PAGE_COLUMNS.to_string()),
                ("order", "rulebook_id.asc,page_number.asc".to_string()),
            ])
            .send()
            .await?;
        Self::rows(response, "list_pages").await
    }

    async fn pages_by_document(
        &self,
        rulebook_id: &str,
        document_ids: &[String],
    ) -> Result<Vec<PageDocument>, StoreError> {
        if document_ids.is_empty() {
            return Ok(Vec::new());
        }
        let response = self
            .request(Method::GET, PAGES)
            .query(&[
                ("rulebook_id", format!("eq.{rulebook_id}")),
                ("openai_file_id", in_list(document_ids)),
                ("select", PAGE_COLUMNS.to_string()),
            ])
            .send()
            .await?;
        Self::rows(response, "pages_by_document").await
    }
}
