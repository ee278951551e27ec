//! Client-side driver for one rulebook upload.
//!
//! The orchestrator walks `form → uploading → parsing → processing → ingesting → finalizing`
//! and ends in `done` or `error`. Each step is awaited before the next begins and batches are
//! sent strictly one at a time. Progress is published on a [`tokio::sync::watch`] channel.
//! A failed run is never resumed: after [`IngestionOrchestrator::reset`] the next run creates a
//! fresh rulebook.

pub mod backend;
pub mod batches;
pub mod form;
pub mod state;

pub use backend::{BackendError, HttpBackend, IngestionBackend};
pub use batches::{BatchPlan, DEFAULT_BATCH_SIZE, plan_batches};
pub use form::{FileInput, FormError, UploadForm};
pub use state::UploadState;

use crate::ingest::{CreateUploadRequest, IngestBatchRequest, PageText, ProcessPageRequest};
use crate::pdf::{PdfError, SinglePage, split_pdf};
use crate::runner::{BoundedRunner, ItemFailed, Labeled, RetryPolicy, Scheduling};
use std::sync::Arc;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::watch;

/// Reasons a run stopped.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Form input was rejected; the orchestrator stays in `form`.
    #[error(transparent)]
    Form(#[from] FormError),
    /// A run is already in progress or the last one has not been reset.
    #[error("An upload is already in progress")]
    Busy,
    /// The document could not be split.
    #[error(transparent)]
    Pdf(#[from] PdfError),
    /// The blocking split task panicked or was cancelled.
    #[error("PDF split task failed: {0}")]
    SplitTask(#[from] tokio::task::JoinError),
    /// A server or storage call failed.
    #[error(transparent)]
    Backend(#[from] BackendError),
    /// A page could not be extracted within the retry ceiling.
    #[error(transparent)]
    PageFailed(#[from] ItemFailed<BackendError>),
}

/// Run-level tunables.
#[derive(Debug, Clone, Copy)]
pub struct OrchestratorSettings {
    /// Runner driving page extraction.
    pub extraction_runner: BoundedRunner,
    /// Pages per ingestion request.
    pub batch_size: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            extraction_runner: BoundedRunner::new(5, RetryPolicy::default(), Scheduling::Windowed),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// Result of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    /// Created rulebook.
    pub rulebook_id: String,
    /// Slug of the rulebook page.
    pub slug: String,
    /// Pages ingested.
    pub page_count: u32,
}

/// State machine running one upload at a time against an [`IngestionBackend`].
pub struct IngestionOrchestrator {
    backend: Arc<dyn IngestionBackend>,
    settings: OrchestratorSettings,
    state: watch::Sender<UploadState>,
}

impl IngestionOrchestrator {
    /// Create an orchestrator in the `form` state.
    pub fn new(backend: Arc<dyn IngestionBackend>, settings: OrchestratorSettings) -> Self {
        let (state, _) = watch::channel(UploadState::Form);
        Self {
            backend,
            settings,
            state,
        }
    }

    /// Receiver observing every state change.
    pub fn subscribe(&self) -> watch::Receiver<UploadState> {
        self.state.subscribe()
    }

    /// Current state.
    pub fn state(&self) -> UploadState {
        self.state.borrow().clone()
    }

    /// Return to `form` after a finished or failed run ("try again"). Busy runs are left alone.
    pub fn reset(&self) -> bool {
        if self.state.borrow().is_busy() {
            return false;
        }
        self.state.send_replace(UploadState::Form);
        true
    }

    fn enter(&self, state: UploadState) {
        tracing::debug!(state = %state, "Upload state changed");
        self.state.send_replace(state);
    }

    /// Validate `form` and drive a complete run.
    ///
    /// On failure after the upload slot exists, the rulebook is reported as failed
    /// best-effort before the error is returned.
    pub async fn run(&self, form: &UploadForm) -> Result<UploadOutcome, OrchestratorError> {
        if *self.state.borrow() != UploadState::Form {
            return Err(OrchestratorError::Busy);
        }
        form.validate(OffsetDateTime::now_utc().year())?;

        let mut rulebook_id = None;
        match self.drive(form, &mut rulebook_id).await {
            Ok(outcome) => {
                tracing::info!(rulebook = %outcome.rulebook_id, slug = %outcome.slug, pages = outcome.page_count, "Upload complete");
                self.enter(UploadState::Done {
                    slug: outcome.slug.clone(),
                });
                Ok(outcome)
            }
            Err(error) => {
                let message = error.to_string();
                tracing::error!(error = %message, "Upload failed");
                if let Some(id) = rulebook_id.as_deref()
                    && let Err(report) = self.backend.report_failure(id, &message).await
                {
                    tracing::warn!(rulebook = id, error = %report, "Failed to report upload failure");
                }
                self.enter(UploadState::Error { message });
                Err(error)
            }
        }
    }

    async fn drive(
        &self,
        form: &UploadForm,
        rulebook_id: &mut Option<String>,
    ) -> Result<UploadOutcome, OrchestratorError> {
        self.enter(UploadState::Uploading {
            message: "Creating upload...".into(),
        });
        let slot = self
            .backend
            .create_upload(&CreateUploadRequest {
                title: form.title.trim().to_string(),
                year: form.year,
            })
            .await?;
        *rulebook_id = Some(slot.rulebook_id.clone());

        self.enter(UploadState::Uploading {
            message: "Uploading PDF...".into(),
        });
        self.backend
            .transfer_document(&slot.upload_url, &form.document)
            .await?;

        self.enter(UploadState::Parsing {
            message: "Splitting PDF into pages...".into(),
        });
        let document = form.document.bytes.clone();
        let split = tokio::task::spawn_blocking(move || split_pdf(&document)).await??;
        let total = split.page_count as usize;

        let extracted = self.extract_pages(&split.pages).await?;

        for plan in plan_batches(split.page_count, self.settings.batch_size) {
            self.enter(UploadState::Ingesting {
                current: (plan.first_page - 1) as usize,
                total,
            });
            let pages: Vec<PageText> = extracted
                .iter()
                .filter(|page| plan.contains(page.page_number))
                .map(|page| PageText {
                    page_number: page.page_number,
                    text: page.value.clone(),
                })
                .collect();
            let response = self
                .backend
                .ingest_batch(&IngestBatchRequest {
                    rulebook_id: slot.rulebook_id.clone(),
                    batch_index: plan.index,
                    pages,
                    is_last_batch: plan.is_last,
                    total_pages: split.page_count,
                })
                .await?;
            tracing::info!(
                rulebook = %slot.rulebook_id,
                batch = plan.index,
                ingested_pages = response.ingested_pages,
                status = %response.status,
                "Batch accepted"
            );
        }

        self.enter(UploadState::Finalizing {
            message: "Uploading thumbnail...".into(),
        });
        self.backend
            .finalize_assets(&slot.rulebook_id, &form.thumbnail)
            .await?;

        Ok(UploadOutcome {
            rulebook_id: slot.rulebook_id,
            slug: slot.slug,
            page_count: split.page_count,
        })
    }

    async fn extract_pages(
        &self,
        pages: &[SinglePage],
    ) -> Result<Vec<Labeled<String>>, OrchestratorError> {
        let backend = Arc::clone(&self.backend);
        let extracted = self
            .settings
            .extraction_runner
            .run_with_progress(
                pages,
                |page| {
                    let backend = Arc::clone(&backend);
                    let request = ProcessPageRequest {
                        page_number: page.page_number,
                        page_document_base64: page.base64.clone(),
                    };
                    async move {
                        backend
                            .process_page(request)
                            .await
                            .map(|response| response.processed_text)
                    }
                },
                |current, total| self.enter(UploadState::Processing { current, total }),
            )
            .await?;
        Ok(extracted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::{
        AssetsResponse, CreateUploadResponse, IngestBatchResponse, ProcessPageResponse,
    };
    use crate::store::RulebookStatus;
    use async_trait::async_trait;
    use crate::pdf::build_test_pdf;
    use reqwest::StatusCode;
    use std::sync::Mutex;
    use std::time::Duration;

    fn form(pages: u32) -> UploadForm {
        UploadForm {
            title: "Catan".into(),
            year: None,
            document: FileInput {
                file_name: "catan.pdf".into(),
                content_type: "application/pdf".into(),
                bytes: build_test_pdf(pages),
            },
            thumbnail: FileInput {
                file_name: "cover.png".into(),
                content_type: "image/png".into(),
                bytes: vec![1, 2, 3],
            },
        }
    }

    #[derive(Default)]
    struct ScriptedBackend {
        calls: Mutex<Vec<String>>,
        batches: Mutex<Vec<IngestBatchRequest>>,
        fail_batch: Option<u32>,
    }

    impl ScriptedBackend {
        fn log(&self, call: impl Into<String>) {
            self.calls.lock().unwrap().push(call.into());
        }
    }

    #[async_trait]
    impl IngestionBackend for ScriptedBackend {
        async fn create_upload(
            &self,
            request: &CreateUploadRequest,
        ) -> Result<CreateUploadResponse, BackendError> {
            self.log(format!("create:{}", request.title));
            Ok(CreateUploadResponse {
                rulebook_id: "rb-1".into(),
                slug: "catan-abc123".into(),
                upload_url: "memory://upload".into(),
            })
        }

        async fn transfer_document(
            &self,
            _upload_url: &str,
            document: &FileInput,
        ) -> Result<(), BackendError> {
            self.log(format!("transfer:{}", document.content_type));
            Ok(())
        }

        async fn process_page(
            &self,
            request: ProcessPageRequest,
        ) -> Result<ProcessPageResponse, BackendError> {
            Ok(ProcessPageResponse {
                page_number: request.page_number,
                processed_text: format!("PAGE_INDEX: {}\n[SECTION: RULES]", request.page_number),
            })
        }

        async fn ingest_batch(
            &self,
            request: &IngestBatchRequest,
        ) -> Result<IngestBatchResponse, BackendError> {
            self.log(format!("batch:{}", request.batch_index));
            if self.fail_batch == Some(request.batch_index) {
                return Err(BackendError::Api {
                    status: StatusCode::GATEWAY_TIMEOUT,
                    message: "index attach timed out".into(),
                });
            }
            self.batches.lock().unwrap().push(request.clone());
            let ingested: usize = self
                .batches
                .lock()
                .unwrap()
                .iter()
                .map(|batch| batch.pages.len())
                .sum();
            Ok(IngestBatchResponse {
                success: true,
                ingested_pages: ingested as u32,
                status: if request.is_last_batch {
                    RulebookStatus::Ready
                } else {
                    RulebookStatus::Ingesting
                },
            })
        }

        async fn finalize_assets(
            &self,
            rulebook_id: &str,
            _thumbnail: &FileInput,
        ) -> Result<AssetsResponse, BackendError> {
            self.log(format!("assets:{rulebook_id}"));
            Ok(AssetsResponse {
                thumbnail_url: "memory://thumb".into(),
                pdf_url: "memory://pdf".into(),
            })
        }

        async fn report_failure(
            &self,
            rulebook_id: &str,
            message: &str,
        ) -> Result<(), BackendError> {
            self.log(format!("failed:{rulebook_id}:{message}"));
            Ok(())
        }
    }

    fn settings(batch_size: usize) -> OrchestratorSettings {
        OrchestratorSettings {
            extraction_runner: BoundedRunner::new(
                5,
                RetryPolicy {
                    max_attempts: 2,
                    base_delay: Duration::from_millis(1),
                },
                Scheduling::Windowed,
            ),
            batch_size,
        }
    }

    #[tokio::test]
    async fn run_walks_every_step_and_sends_sequential_batches() {
        let backend = Arc::new(ScriptedBackend::default());
        let orchestrator = IngestionOrchestrator::new(backend.clone(), settings(5));
        let mut states = orchestrator.subscribe();
        let seen = tokio::spawn(async move {
            let mut seen = Vec::new();
            while states.changed().await.is_ok() {
                let state = states.borrow_and_update().clone();
                let finished = matches!(state, UploadState::Done { .. } | UploadState::Error { .. });
                seen.push(state);
                if finished {
                    break;
                }
            }
            seen
        });

        let outcome = orchestrator.run(&form(12)).await.unwrap();
        assert_eq!(outcome.slug, "catan-abc123");
        assert_eq!(outcome.page_count, 12);
        assert_eq!(
            orchestrator.state(),
            UploadState::Done {
                slug: "catan-abc123".into()
            }
        );

        let calls = backend.calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec![
                "create:Catan",
                "transfer:application/pdf",
                "batch:0",
                "batch:1",
                "batch:2",
                "assets:rb-1"
            ]
        );
        let batches = backend.batches.lock().unwrap().clone();
        let sizes: Vec<usize> = batches.iter().map(|batch| batch.pages.len()).collect();
        assert_eq!(sizes, vec![5, 5, 2]);
        assert!(batches.iter().all(|batch| batch.total_pages == 12));
        assert_eq!(
            batches.iter().map(|b| b.is_last_batch).collect::<Vec<_>>(),
            vec![false, false, true]
        );
        assert_eq!(batches[2].pages[0].page_number, 11);

        // Watch receivers may coalesce intermediate values; the last one is always seen.
        let seen = seen.await.unwrap();
        assert!(matches!(seen.last(), Some(UploadState::Done { .. })));
    }

    #[tokio::test]
    async fn failure_reports_rulebook_and_requires_reset() {
        let backend = Arc::new(ScriptedBackend {
            fail_batch: Some(1),
            ..ScriptedBackend::default()
        });
        let orchestrator = IngestionOrchestrator::new(backend.clone(), settings(5));

        let error = orchestrator.run(&form(12)).await.unwrap_err();
        assert!(matches!(error, OrchestratorError::Backend(_)));
        assert!(matches!(orchestrator.state(), UploadState::Error { ref message } if message.contains("index attach timed out")));

        let calls = backend.calls.lock().unwrap().clone();
        assert_eq!(calls[calls.len() - 2], "batch:1");
        assert!(calls.last().unwrap().starts_with("failed:rb-1:index attach timed out"));
        assert!(!calls.iter().any(|call| call == "batch:2"));

        assert!(matches!(
            orchestrator.run(&form(12)).await,
            Err(OrchestratorError::Busy)
        ));
        assert!(orchestrator.reset());
        assert_eq!(orchestrator.state(), UploadState::Form);
    }

    #[tokio::test]
    async fn invalid_forms_never_leave_the_form_state() {
        let backend = Arc::new(ScriptedBackend::default());
        let orchestrator = IngestionOrchestrator::new(backend.clone(), settings(25));
        let mut bad = form(1);
        bad.title = String::new();

        let error = orchestrator.run(&bad).await.unwrap_err();
        assert!(matches!(error, OrchestratorError::Form(FormError::MissingTitle)));
        assert_eq!(orchestrator.state(), UploadState::Form);
        assert!(backend.calls.lock().unwrap().is_empty());
    }
}
