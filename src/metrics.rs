use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing ingestion activity.
#[derive(Default)]
pub struct IngestMetrics {
    pages_extracted: AtomicU64,
    documents_uploaded: AtomicU64,
    batches_ingested: AtomicU64,
    batches_failed: AtomicU64,
    rulebooks_ready: AtomicU64,
}

impl IngestMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one page run through the extraction model.
    pub fn record_page_extracted(&self) {
        self.pages_extracted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successfully applied batch and the page documents it uploaded.
    pub fn record_batch(&self, documents: u64, completed_rulebook: bool) {
        self.batches_ingested.fetch_add(1, Ordering::Relaxed);
        self.documents_uploaded
            .fetch_add(documents, Ordering::Relaxed);
        if completed_rulebook {
            self.rulebooks_ready.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a batch that failed after loading its rulebook.
    pub fn record_batch_failure(&self) {
        self.batches_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            pages_extracted: self.pages_extracted.load(Ordering::Relaxed),
            documents_uploaded: self.documents_uploaded.load(Ordering::Relaxed),
            batches_ingested: self.batches_ingested.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            rulebooks_ready: self.rulebooks_ready.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of ingestion counters used for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    /// Pages processed by the extraction model since startup.
    pub pages_extracted: u64,
    /// Page documents uploaded and attached to an index.
    pub documents_uploaded: u64,
    /// Batches fully applied.
    pub batches_ingested: u64,
    /// Batches that failed and flagged their rulebook.
    pub batches_failed: u64,
    /// Rulebooks that reached `ready`.
    pub rulebooks_ready: u64,
}
