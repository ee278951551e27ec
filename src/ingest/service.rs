//! [`IngestService`] and the [`IngestApi`] trait the HTTP router is generic over.

use crate::assets::{AssetStorage, THUMBNAIL_EXTENSIONS, document_path, thumbnail_extension, thumbnail_path};
use crate::config::Config;
use crate::extraction::PageExtractor;
use crate::index::RetrievalIndex;
use crate::ingest::slug::generate_slug;
use crate::ingest::types::{
    AskRequest, AskResponse, AssetsResponse, Citation, CreateUploadRequest, CreateUploadResponse,
    DeleteRequest, DeleteResponse, IngestBatchRequest, IngestBatchResponse, IngestError,
    MarkErrorRequest, MarkErrorResponse, ProcessPageRequest, ProcessPageResponse, RulebookView,
    ThumbnailUpload,
};
use crate::metrics::{IngestMetrics, MetricsSnapshot};
use crate::runner::{BoundedRunner, RetryPolicy, Scheduling};
use crate::store::{
    NewRulebook, PageDocument, Rulebook, RulebookStatus, RulebookStore, RulebookUpdate,
};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use futures_util::{StreamExt, stream};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;

/// Candidate slugs tried before `create_upload` gives up.
pub const MAX_SLUG_ATTEMPTS: usize = 5;

/// Instructions sent with every question to the answering service.
pub const ANSWER_INSTRUCTIONS: &str = r#"You are a board game rules assistant. Answer using ONLY the provided rulebook files.

Instructions:
- Always use exact quotes as your main answer.
- When it makes sense, you may include a brief summary (1 sentence max), and/or a yes/no answer, before the quoted passage.
- Keep quotes as short as possible while fully answering the question.
- After each quoted passage, add: - from the section "SECTION NAME".
- Use the section name exactly as it appears in the file.
- Every answer MUST include at least one file citation.
- If the answer cannot be found, say: "I couldn't find this in the rulebook."

Cite the source file for every quoted passage."#;

/// Name of the uploaded document holding one page's text.
pub fn page_document_name(rulebook_id: &str, page_number: u32) -> String {
    format!("rulebook-{rulebook_id}-page-{page_number}.txt")
}

/// Name of the index created for a rulebook.
pub fn index_name(title: &str) -> String {
    format!("{title} Rulebook")
}

/// Whether an unfinished rulebook has gone without a write for longer than `stale_after`.
pub fn is_stale(rulebook: &Rulebook, now: OffsetDateTime, stale_after: Duration) -> bool {
    if !rulebook.status.is_in_flight() {
        return false;
    }
    let age = now - rulebook.updated_at;
    age.whole_milliseconds() > stale_after.as_millis() as i128
}

/// Server-side operations exposed over HTTP.
#[async_trait]
pub trait IngestApi: Send + Sync {
    /// Allocate a rulebook row and a signed upload URL for its raw document.
    async fn create_upload(
        &self,
        request: CreateUploadRequest,
    ) -> Result<CreateUploadResponse, IngestError>;

    /// Extract one page through the extraction model.
    async fn process_page(
        &self,
        request: ProcessPageRequest,
    ) -> Result<ProcessPageResponse, IngestError>;

    /// Apply one ingestion batch.
    async fn ingest_batch(
        &self,
        request: IngestBatchRequest,
    ) -> Result<IngestBatchResponse, IngestError>;

    /// Store the thumbnail and write public asset URLs back to the rulebook.
    async fn finalize_assets(
        &self,
        rulebook_id: &str,
        thumbnail: ThumbnailUpload,
    ) -> Result<AssetsResponse, IngestError>;

    /// Record a failure reported by the client orchestrator.
    async fn mark_error(&self, request: MarkErrorRequest)
    -> Result<MarkErrorResponse, IngestError>;

    /// Answer a question against a ready rulebook.
    async fn ask(&self, request: AskRequest) -> Result<AskResponse, IngestError>;

    /// Delete rulebooks and, best-effort, everything they own.
    async fn delete(&self, request: DeleteRequest) -> Result<DeleteResponse, IngestError>;

    /// Status view of a rulebook looked up by slug.
    async fn status(&self, slug: &str) -> Result<RulebookView, IngestError>;

    /// Current ingestion counters.
    fn metrics_snapshot(&self) -> MetricsSnapshot;
}

/// Tunables for [`IngestService`].
#[derive(Debug, Clone, Copy)]
pub struct IngestSettings {
    /// Runner used for page document uploads.
    pub upload_runner: BoundedRunner,
    /// Bound on waiting for the index to process a batch.
    pub attach_timeout: Duration,
    /// Age after which an unfinished rulebook is reported as stale.
    pub stale_after: Duration,
}

impl IngestSettings {
    /// Derive settings from the process configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            upload_runner: BoundedRunner::new(
                config.upload_concurrency,
                RetryPolicy {
                    max_attempts: config.upload_max_attempts,
                    base_delay: config.upload_backoff,
                },
                Scheduling::Windowed,
            ),
            attach_timeout: config.index_attach_timeout,
            stale_after: config.stale_ingest_after,
        }
    }
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            upload_runner: BoundedRunner::new(5, RetryPolicy::default(), Scheduling::Windowed),
            attach_timeout: Duration::from_secs(120),
            stale_after: Duration::from_secs(15 * 60),
        }
    }
}

/// Ingestion pipeline wired to its external collaborators.
pub struct IngestService {
    store: Arc<dyn RulebookStore>,
    index: Arc<dyn RetrievalIndex>,
    extractor: Arc<dyn PageExtractor>,
    assets: Arc<dyn AssetStorage>,
    settings: IngestSettings,
    metrics: IngestMetrics,
}

impl IngestService {
    /// Build a service from injected clients.
    pub fn new(
        store: Arc<dyn RulebookStore>,
        index: Arc<dyn RetrievalIndex>,
        extractor: Arc<dyn PageExtractor>,
        assets: Arc<dyn AssetStorage>,
        settings: IngestSettings,
    ) -> Self {
        Self {
            store,
            index,
            extractor,
            assets,
            settings,
            metrics: IngestMetrics::new(),
        }
    }

    async fn unique_slug(&self, title: &str) -> Result<String, IngestError> {
        for attempt in 1..=MAX_SLUG_ATTEMPTS {
            let candidate = generate_slug(title);
            if !self.store.slug_exists(&candidate).await? {
                return Ok(candidate);
            }
            tracing::debug!(slug = %candidate, attempt, "Slug already taken");
        }
        Err(IngestError::Upstream(
            "Failed to generate unique slug".to_string(),
        ))
    }

    async fn load_rulebook(&self, id: &str) -> Result<Rulebook, IngestError> {
        self.store
            .get_rulebook(id)
            .await?
            .ok_or_else(|| IngestError::NotFound(format!("Rulebook {id} not found")))
    }

    /// Checks that need no writes; failing them leaves the rulebook untouched.
    fn check_batch(rulebook: &Rulebook, request: &IngestBatchRequest) -> Result<(), IngestError> {
        if request.batch_index > 0 && rulebook.index_id.is_none() {
            return Err(IngestError::Precondition(format!(
                "Rulebook {} has no index; batch 0 must be ingested first",
                rulebook.id
            )));
        }
        if request.is_last_batch {
            let after = rulebook.ingested_pages + request.pages.len() as u32;
            if after != request.total_pages {
                return Err(IngestError::Precondition(format!(
                    "Last batch would leave {after} pages ingested but totalPages is {}",
                    request.total_pages
                )));
            }
        }
        Ok(())
    }

    async fn apply_batch(
        &self,
        rulebook: &Rulebook,
        request: &IngestBatchRequest,
    ) -> Result<IngestBatchResponse, IngestError> {
        let rulebook_id = rulebook.id.as_str();
        let index_id = match (&rulebook.index_id, request.batch_index) {
            (Some(existing), batch) if batch > 0 => existing.clone(),
            _ => {
                // A repeated batch 0 creates another index and overwrites the reference.
                let created = self.index.create_index(&index_name(&rulebook.title)).await?;
                self.store
                    .update_rulebook(
                        rulebook_id,
                        RulebookUpdate {
                            index_id: Some(created.clone()),
                            status: Some(RulebookStatus::Ingesting),
                            ..RulebookUpdate::default()
                        },
                    )
                    .await?;
                tracing::info!(rulebook = rulebook_id, index = %created, "Index created for rulebook");
                created
            }
        };

        let index = Arc::clone(&self.index);
        let uploaded = self
            .settings
            .upload_runner
            .run(&request.pages, |page| {
                let index = Arc::clone(&index);
                let name = page_document_name(rulebook_id, page.page_number);
                let text = page.text.clone();
                async move { index.upload_document(&name, &text).await }
            })
            .await?;

        let document_ids: Vec<String> = uploaded.iter().map(|doc| doc.value.clone()).collect();
        self.index
            .attach_documents(&index_id, &document_ids, self.settings.attach_timeout)
            .await?;

        let text_lengths: HashMap<u32, u32> = request
            .pages
            .iter()
            .map(|page| (page.page_number, page.text.chars().count() as u32))
            .collect();
        let rows = uploaded
            .into_iter()
            .map(|doc| PageDocument {
                rulebook_id: rulebook_id.to_string(),
                page_number: doc.page_number,
                text_length: text_lengths.get(&doc.page_number).copied(),
                document_id: doc.value,
            })
            .collect();
        self.store.insert_pages(rows).await?;

        let ingested_pages = rulebook.ingested_pages + request.pages.len() as u32;
        let (update, status) = if request.is_last_batch {
            (
                RulebookUpdate {
                    ingested_pages: Some(ingested_pages),
                    page_count: Some(request.total_pages),
                    status: Some(RulebookStatus::Ready),
                    ..RulebookUpdate::default()
                },
                RulebookStatus::Ready,
            )
        } else {
            (
                RulebookUpdate {
                    ingested_pages: Some(ingested_pages),
                    ..RulebookUpdate::default()
                },
                RulebookStatus::Ingesting,
            )
        };
        self.store.update_rulebook(rulebook_id, update).await?;

        Ok(IngestBatchResponse {
            success: true,
            ingested_pages,
            status,
        })
    }

    /// Best-effort `error` write; its own failure is only logged.
    async fn flag_failure(&self, rulebook_id: &str, error: &IngestError) {
        if let Err(write_error) = self
            .store
            .update_rulebook(rulebook_id, RulebookUpdate::failed(error.to_string()))
            .await
        {
            tracing::warn!(
                rulebook = rulebook_id,
                error = %write_error,
                "Failed to flag rulebook as errored"
            );
        }
    }
}

#[async_trait]
impl IngestApi for IngestService {
    async fn create_upload(
        &self,
        request: CreateUploadRequest,
    ) -> Result<CreateUploadResponse, IngestError> {
        let title = request.title.trim();
        if title.is_empty() {
            return Err(IngestError::Validation("Title is required".to_string()));
        }

        let slug = self.unique_slug(title).await?;
        let rulebook = self
            .store
            .insert_rulebook(NewRulebook {
                slug,
                title: title.to_string(),
                year: request.year,
            })
            .await?;

        let upload_url = match self
            .assets
            .create_signed_upload_url(&document_path(&rulebook.id))
            .await
        {
            Ok(url) => url,
            Err(error) => {
                if let Err(cleanup) = self.store.delete_rulebooks(&[rulebook.id.clone()]).await {
                    tracing::warn!(rulebook = %rulebook.id, error = %cleanup, "Failed to remove rulebook after upload URL failure");
                }
                return Err(error.into());
            }
        };

        tracing::info!(rulebook = %rulebook.id, slug = %rulebook.slug, "Upload slot created");
        Ok(CreateUploadResponse {
            rulebook_id: rulebook.id,
            slug: rulebook.slug,
            upload_url,
        })
    }

    async fn process_page(
        &self,
        request: ProcessPageRequest,
    ) -> Result<ProcessPageResponse, IngestError> {
        if request.page_number == 0 || request.page_document_base64.is_empty() {
            return Err(IngestError::Validation(
                "pageNumber and pageDocumentBase64 are required".to_string(),
            ));
        }
        let page_pdf = BASE64_STANDARD
            .decode(request.page_document_base64.as_bytes())
            .map_err(|err| IngestError::Validation(format!("pageDocumentBase64 is not base64: {err}")))?;

        let processed_text = self
            .extractor
            .extract_page(request.page_number, &page_pdf)
            .await?;
        self.metrics.record_page_extracted();
        tracing::debug!(page = request.page_number, chars = processed_text.len(), "Page processed");

        Ok(ProcessPageResponse {
            page_number: request.page_number,
            processed_text,
        })
    }

    async fn ingest_batch(
        &self,
        request: IngestBatchRequest,
    ) -> Result<IngestBatchResponse, IngestError> {
        if request.rulebook_id.trim().is_empty() || request.pages.is_empty() {
            return Err(IngestError::Validation(
                "rulebookId and pages are required".to_string(),
            ));
        }
        if request.pages.iter().any(|page| page.page_number == 0) {
            return Err(IngestError::Validation(
                "page numbers are 1-based".to_string(),
            ));
        }

        let rulebook = self.load_rulebook(&request.rulebook_id).await?;
        Self::check_batch(&rulebook, &request)?;

        tracing::info!(
            rulebook = %rulebook.id,
            batch = request.batch_index,
            pages = request.pages.len(),
            last = request.is_last_batch,
            "Ingesting batch"
        );
        match self.apply_batch(&rulebook, &request).await {
            Ok(response) => {
                self.metrics
                    .record_batch(request.pages.len() as u64, request.is_last_batch);
                tracing::info!(
                    rulebook = %rulebook.id,
                    batch = request.batch_index,
                    ingested_pages = response.ingested_pages,
                    status = %response.status,
                    "Batch ingested"
                );
                Ok(response)
            }
            Err(error) => {
                self.metrics.record_batch_failure();
                tracing::error!(
                    rulebook = %rulebook.id,
                    batch = request.batch_index,
                    error = %error,
                    "Batch ingestion failed"
                );
                self.flag_failure(&rulebook.id, &error).await;
                Err(error)
            }
        }
    }

    async fn finalize_assets(
        &self,
        rulebook_id: &str,
        thumbnail: ThumbnailUpload,
    ) -> Result<AssetsResponse, IngestError> {
        if rulebook_id.trim().is_empty() || thumbnail.bytes.is_empty() {
            return Err(IngestError::Validation(
                "Missing required fields".to_string(),
            ));
        }
        self.load_rulebook(rulebook_id).await?;

        let content_type = thumbnail
            .content_type
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| "image/png".to_string());
        let path = thumbnail_path(rulebook_id, thumbnail_extension(&content_type));
        self.assets
            .upload(&path, thumbnail.bytes, &content_type, true)
            .await?;

        let thumbnail_url = self.assets.public_url(&path);
        let pdf_url = self.assets.public_url(&document_path(rulebook_id));
        self.store
            .update_rulebook(
                rulebook_id,
                RulebookUpdate {
                    thumbnail_url: Some(thumbnail_url.clone()),
                    pdf_url: Some(pdf_url.clone()),
                    ..RulebookUpdate::default()
                },
            )
            .await?;

        tracing::info!(rulebook = rulebook_id, thumbnail = %path, "Assets finalized");
        Ok(AssetsResponse {
            thumbnail_url,
            pdf_url,
        })
    }

    async fn mark_error(
        &self,
        request: MarkErrorRequest,
    ) -> Result<MarkErrorResponse, IngestError> {
        if request.rulebook_id.trim().is_empty() {
            return Err(IngestError::Validation("rulebookId is required".to_string()));
        }
        let rulebook = self.load_rulebook(&request.rulebook_id).await?;
        if rulebook.status == RulebookStatus::Ready {
            return Err(IngestError::Precondition(format!(
                "Rulebook {} is already ready",
                rulebook.id
            )));
        }

        let message = match request.message.trim() {
            "" => "Ingestion failed".to_string(),
            message => message.to_string(),
        };
        self.store
            .update_rulebook(&rulebook.id, RulebookUpdate::failed(message.clone()))
            .await?;
        tracing::warn!(rulebook = %rulebook.id, message = %message, "Client reported ingestion failure");

        Ok(MarkErrorResponse {
            rulebook_id: rulebook.id,
            status: RulebookStatus::Error,
        })
    }

    async fn ask(&self, request: AskRequest) -> Result<AskResponse, IngestError> {
        let question = request.question.trim();
        if request.rulebook_id.trim().is_empty() || question.is_empty() {
            return Err(IngestError::Validation(
                "rulebookId and question are required".to_string(),
            ));
        }
        let rulebook = self.load_rulebook(&request.rulebook_id).await?;
        if rulebook.status != RulebookStatus::Ready {
            return Err(IngestError::Precondition(
                "Rulebook is not ready for queries".to_string(),
            ));
        }
        let Some(index_id) = rulebook.index_id.as_deref() else {
            return Err(IngestError::Precondition(
                "Rulebook has no index".to_string(),
            ));
        };

        let answer = self
            .index
            .answer(index_id, question, ANSWER_INSTRUCTIONS)
            .await?;
        if answer.text.trim().is_empty() {
            return Err(IngestError::Upstream(
                "No response from answering service".to_string(),
            ));
        }

        let mut citations: Vec<Citation> = self
            .store
            .pages_by_document(&rulebook.id, &answer.cited_document_ids)
            .await?
            .into_iter()
            .map(|page| Citation {
                page_number: page.page_number,
                document_ref: page.document_id,
            })
            .collect();
        citations.sort_by_key(|citation| citation.page_number);

        tracing::debug!(rulebook = %rulebook.id, citations = citations.len(), "Question answered");
        Ok(AskResponse {
            answer: answer.text,
            citations,
        })
    }

    async fn delete(&self, request: DeleteRequest) -> Result<DeleteResponse, IngestError> {
        if request.ids.is_empty() {
            return Err(IngestError::Validation(
                "No rulebook IDs provided".to_string(),
            ));
        }
        let rulebooks = self.store.list_rulebooks(&request.ids).await?;
        if rulebooks.is_empty() {
            return Ok(DeleteResponse { deleted_count: 0 });
        }
        let ids: Vec<String> = rulebooks.iter().map(|rulebook| rulebook.id.clone()).collect();

        let pages = match self.store.list_pages(&ids).await {
            Ok(pages) => pages,
            Err(error) => {
                tracing::warn!(error = %error, "Failed to list page documents; continuing delete");
                Vec::new()
            }
        };

        let limit = self.settings.upload_runner.concurrency();
        stream::iter(pages.iter())
            .for_each_concurrent(limit, |page| async move {
                if let Err(error) = self.index.delete_document(&page.document_id).await {
                    tracing::warn!(document = %page.document_id, error = %error, "Failed to delete page document");
                }
            })
            .await;
        stream::iter(rulebooks.iter().filter_map(|rulebook| rulebook.index_id.as_deref()))
            .for_each_concurrent(limit, |index_id| async move {
                if let Err(error) = self.index.delete_index(index_id).await {
                    tracing::warn!(index = index_id, error = %error, "Failed to delete index");
                }
            })
            .await;

        let mut paths: Vec<String> = ids.iter().map(|id| document_path(id)).collect();
        for id in &ids {
            paths.extend(
                THUMBNAIL_EXTENSIONS
                    .iter()
                    .map(|(_, ext)| thumbnail_path(id, ext)),
            );
        }
        if let Err(error) = self.assets.remove(&paths).await {
            tracing::warn!(error = %error, "Failed to remove stored assets");
        }

        let deleted_count = self.store.delete_rulebooks(&ids).await?;
        tracing::info!(deleted = deleted_count, documents = pages.len(), "Rulebooks deleted");
        Ok(DeleteResponse { deleted_count })
    }

    async fn status(&self, slug: &str) -> Result<RulebookView, IngestError> {
        let rulebook = self
            .store
            .get_rulebook_by_slug(slug)
            .await?
            .ok_or_else(|| IngestError::NotFound(format!("No rulebook with slug {slug}")))?;
        let stale = is_stale(&rulebook, OffsetDateTime::now_utc(), self.settings.stale_after);
        if stale {
            tracing::warn!(rulebook = %rulebook.id, status = %rulebook.status, "Rulebook ingestion is stale");
        }
        Ok(RulebookView {
            id: rulebook.id,
            slug: rulebook.slug,
            title: rulebook.title,
            year: rulebook.year,
            status: rulebook.status,
            ingested_pages: rulebook.ingested_pages,
            page_count: rulebook.page_count,
            error_message: rulebook.error_message,
            pdf_url: rulebook.pdf_url,
            thumbnail_url: rulebook.thumbnail_url,
            updated_at: rulebook.updated_at,
            stale,
        })
    }

    fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}
