#![allow(dead_code)]

use async_trait::async_trait;
use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, Stream, dictionary};
use rulebook_ingest::{
    assets::MemoryAssetStorage,
    extraction::{ExtractionError, PageExtractor},
    index::{Answer, IndexError, RetrievalIndex},
    ingest::{IngestService, IngestSettings, PageText},
    runner::{BoundedRunner, RetryPolicy, Scheduling},
    store::MemoryRulebookStore,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

/// Retrieval index double that records every call.
#[derive(Default)]
pub struct FakeIndex {
    pub created: Mutex<Vec<String>>,
    pub documents: Mutex<HashMap<String, String>>,
    pub attached: Mutex<HashMap<String, Vec<String>>>,
    pub deleted_documents: Mutex<Vec<String>>,
    pub deleted_indexes: Mutex<Vec<String>>,
    /// Remaining forced failures per document name.
    pub upload_failures: Mutex<HashMap<String, u32>>,
    pub upload_attempts: Mutex<HashMap<String, u32>>,
    pub fail_deletes: bool,
    pub answer_text: Mutex<String>,
}

impl FakeIndex {
    pub fn failing_deletes() -> Self {
        Self {
            fail_deletes: true,
            ..Self::default()
        }
    }

    pub fn fail_upload(&self, file_name: &str, times: u32) {
        self.upload_failures
            .lock()
            .unwrap()
            .insert(file_name.to_string(), times);
    }

    pub fn created_count(&self) -> usize {
        self.created.lock().unwrap().len()
    }

    pub fn attempts(&self, file_name: &str) -> u32 {
        self.upload_attempts
            .lock()
            .unwrap()
            .get(file_name)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl RetrievalIndex for FakeIndex {
    async fn create_index(&self, name: &str) -> Result<String, IndexError> {
        let mut created = self.created.lock().unwrap();
        let id = format!("vs_{}", created.len() + 1);
        created.push(name.to_string());
        Ok(id)
    }

    async fn upload_document(&self, file_name: &str, text: &str) -> Result<String, IndexError> {
        *self
            .upload_attempts
            .lock()
            .unwrap()
            .entry(file_name.to_string())
            .or_default() += 1;
        if let Some(remaining) = self.upload_failures.lock().unwrap().get_mut(file_name)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(IndexError::InvalidUrl(format!("forced failure for {file_name}")));
        }
        let id = format!("file-{file_name}");
        self.documents
            .lock()
            .unwrap()
            .insert(id.clone(), text.to_string());
        Ok(id)
    }

    async fn attach_documents(
        &self,
        index_id: &str,
        document_ids: &[String],
        _timeout: Duration,
    ) -> Result<(), IndexError> {
        self.attached
            .lock()
            .unwrap()
            .entry(index_id.to_string())
            .or_default()
            .extend(document_ids.iter().cloned());
        Ok(())
    }

    async fn delete_document(&self, document_id: &str) -> Result<(), IndexError> {
        self.deleted_documents
            .lock()
            .unwrap()
            .push(document_id.to_string());
        if self.fail_deletes {
            return Err(IndexError::InvalidUrl("delete refused".into()));
        }
        Ok(())
    }

    async fn delete_index(&self, index_id: &str) -> Result<(), IndexError> {
        self.deleted_indexes
            .lock()
            .unwrap()
            .push(index_id.to_string());
        if self.fail_deletes {
            return Err(IndexError::InvalidUrl("delete refused".into()));
        }
        Ok(())
    }

    /// Cites every attached document in reverse attachment order.
    async fn answer(
        &self,
        index_id: &str,
        _question: &str,
        _instructions: &str,
    ) -> Result<Answer, IndexError> {
        let mut cited = self
            .attached
            .lock()
            .unwrap()
            .get(index_id)
            .cloned()
            .unwrap_or_default();
        cited.reverse();
        Ok(Answer {
            text: self.answer_text.lock().unwrap().clone(),
            cited_document_ids: cited,
        })
    }
}

/// Extractor returning a canned page with a matching header.
#[derive(Default)]
pub struct FakeExtractor;

#[async_trait]
impl PageExtractor for FakeExtractor {
    async fn extract_page(
        &self,
        page_number: u32,
        page_pdf: &[u8],
    ) -> Result<String, ExtractionError> {
        if !page_pdf.starts_with(b"%PDF-") {
            return Err(ExtractionError::Failed("not a PDF".into()));
        }
        Ok(page_text(page_number))
    }
}

pub fn page_text(page_number: u32) -> String {
    format!("PAGE_INDEX: {page_number}\n[SECTION: RULES]\nText of page {page_number}.")
}

pub fn pages(range: std::ops::RangeInclusive<u32>) -> Vec<PageText> {
    range
        .map(|page_number| PageText {
            page_number,
            text: page_text(page_number),
        })
        .collect()
}

pub struct Harness {
    pub service: Arc<IngestService>,
    pub store: Arc<MemoryRulebookStore>,
    pub index: Arc<FakeIndex>,
    pub assets: Arc<MemoryAssetStorage>,
}

pub fn test_settings() -> IngestSettings {
    IngestSettings {
        upload_runner: BoundedRunner::new(
            5,
            RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
            },
            Scheduling::Windowed,
        ),
        attach_timeout: Duration::from_secs(1),
        stale_after: Duration::from_secs(15 * 60),
    }
}

pub fn harness() -> Harness {
    harness_with(FakeIndex::default(), MemoryAssetStorage::new())
}

pub fn harness_with(index: FakeIndex, assets: MemoryAssetStorage) -> Harness {
    let store = Arc::new(MemoryRulebookStore::new());
    let index = Arc::new(index);
    let assets = Arc::new(assets);
    *index.answer_text.lock().unwrap() = "\"Each player starts with two settlements.\"".into();
    let service = Arc::new(IngestService::new(
        store.clone(),
        index.clone(),
        Arc::new(FakeExtractor),
        assets.clone(),
        test_settings(),
    ));
    Harness {
        service,
        store,
        index,
        assets,
    }
}

/// Build a PDF with `page_count` text pages.
pub fn sample_pdf(page_count: u32) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids = Vec::new();
    for number in 1..=page_count {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 18.into()]),
                Operation::new("Td", vec![72.into(), 700.into()]),
                Operation::new(
                    "Tj",
                    vec![Object::string_literal(format!("Rules page {number}"))],
                ),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => page_count as i64,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).unwrap();
    bytes
}
