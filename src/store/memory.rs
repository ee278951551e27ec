//! In-process row store used by tests and local runs.

use super::{NewRulebook, PageDocument, Rulebook, RulebookStatus, RulebookStore, RulebookUpdate, StoreError};
use async_trait::async_trait;
use std::collections::HashMap;
use time::OffsetDateTime;
use tokio::sync::RwLock;

#[derive(Default)]
struct Tables {
    rulebooks: HashMap<String, Rulebook>,
    pages: Vec<PageDocument>,
}

/// [`RulebookStore`] keeping rows behind an async lock.
#[derive(Default)]
pub struct MemoryRulebookStore {
    tables: RwLock<Tables>,
}

impl MemoryRulebookStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a row's `updated_at`, simulating an old write.
    pub async fn backdate(&self, id: &str, updated_at: OffsetDateTime) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let rulebook = tables
            .rulebooks
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        rulebook.updated_at = updated_at;
        Ok(())
    }
}

#[async_trait]
impl RulebookStore for MemoryRulebookStore {
    async fn slug_exists(&self, slug: &str) -> Result<bool, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.rulebooks.values().any(|row| row.slug == slug))
    }

    async fn insert_rulebook(&self, rulebook: NewRulebook) -> Result<Rulebook, StoreError> {
        let mut tables = self.tables.write().await;
        if tables.rulebooks.values().any(|row| row.slug == rulebook.slug) {
            return Err(StoreError::Conflict(format!("slug {}", rulebook.slug)));
        }
        let now = OffsetDateTime::now_utc();
        let row = Rulebook {
            id: uuid::Uuid::new_v4().to_string(),
            slug: rulebook.slug,
            title: rulebook.title,
            year: rulebook.year,
            status: RulebookStatus::PendingIngest,
            ingested_pages: 0,
            page_count: 0,
            index_id: None,
            error_message: None,
            pdf_url: None,
            thumbnail_url: None,
            created_at: now,
            updated_at: now,
        };
        tables.rulebooks.insert(row.id.clone(), row.clone());
        Ok(row)
    }

    async fn get_rulebook(&self, id: &str) -> Result<Option<Rulebook>, StoreError> {
        Ok(self.tables.read().await.rulebooks.get(id).cloned())
    }

    async fn get_rulebook_by_slug(&self, slug: &str) -> Result<Option<Rulebook>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.rulebooks.values().find(|row| row.slug == slug).cloned())
    }

    async fn update_rulebook(&self, id: &str, update: RulebookUpdate) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let rulebook = tables
            .rulebooks
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        update.apply_to(rulebook);
        rulebook.updated_at = OffsetDateTime::now_utc();
        Ok(())
    }

    async fn list_rulebooks(&self, ids: &[String]) -> Result<Vec<Rulebook>, StoreError> {
        let tables = self.tables.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| tables.rulebooks.get(id).cloned())
            .collect())
    }

    async fn delete_rulebooks(&self, ids: &[String]) -> Result<u64, StoreError> {
        let mut tables = self.tables.write().await;
        let mut removed = 0;
        for id in ids {
            if tables.rulebooks.remove(id).is_some() {
                removed += 1;
            }
        }
        tables
            .pages
            .retain(|page| !ids.iter().any(|id| *id == page.rulebook_id));
        Ok(removed)
    }

    async fn insert_pages(&self, pages: Vec<PageDocument>) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        for (index, page) in pages.iter().enumerate() {
            if !tables.rulebooks.contains_key(&page.rulebook_id) {
                return Err(StoreError::MissingReference(page.rulebook_id.clone()));
            }
            let duplicate = tables
                .pages
                .iter()
                .chain(pages[..index].iter())
                .any(|existing| {
                    existing.rulebook_id == page.rulebook_id
                        && existing.page_number == page.page_number
                });
            if duplicate {
                return Err(StoreError::Conflict(format!(
                    "page {} of rulebook {}",
                    page.page_number, page.rulebook_id
                )));
            }
        }
        tables.pages.extend(pages);
        Ok(())
    }

    async fn list_pages(&self, rulebook_ids: &[String]) -> Result<Vec<PageDocument>, StoreError> {
        let tables = self.tables.read().await;
        let mut pages: Vec<PageDocument> = tables
            .pages
            .iter()
            .filter(|page| rulebook_ids.contains(&page.rulebook_id))
            .cloned()
            .collect();
        pages.sort_by(|a, b| {
            a.rulebook_id
                .cmp(&b.rulebook_id)
                .then(a.page_number.cmp(&b.page_number))
        });
        Ok(pages)
    }

    async fn pages_by_document(
        &self,
        rulebook_id: &str,
        document_ids: &[String],
    ) -> Result<Vec<PageDocument>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .pages
            .iter()
            .filter(|page| page.rulebook_id == rulebook_id && document_ids.contains(&page.document_id))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(rulebook_id: &str, page_number: u32) -> PageDocument {
        PageDocument {
            rulebook_id: rulebook_id.to_string(),
            page_number,
            document_id: format!("file-{page_number}"),
            text_length: Some(10),
        }
    }

    async fn seeded() -> (MemoryRulebookStore, Rulebook) {
        let store = MemoryRulebookStore::new();
        let row = store
            .insert_rulebook(NewRulebook {
                slug: "catan-aaaaaa".into(),
                title: "Catan".into(),
                year: None,
            })
            .await
            .unwrap();
        (store, row)
    }

    #[tokio::test]
    async fn duplicate_page_numbers_reject_the_whole_write() {
        let (store, row) = seeded().await;
        store.insert_pages(vec![page(&row.id, 1)]).await.unwrap();

        let error = store
            .insert_pages(vec![page(&row.id, 2), page(&row.id, 1)])
            .await
            .unwrap_err();
        assert!(matches!(error, StoreError::Conflict(_)));
        assert_eq!(store.list_pages(&[row.id.clone()]).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn pages_require_an_existing_rulebook() {
        let store = MemoryRulebookStore::new();
        let error = store.insert_pages(vec![page("ghost", 1)]).await.unwrap_err();
        assert!(matches!(error, StoreError::MissingReference(id) if id == "ghost"));
    }

    #[tokio::test]
    async fn deleting_a_rulebook_cascades_to_pages() {
        let (store, row) = seeded().await;
        store
            .insert_pages(vec![page(&row.id, 1), page(&row.id, 2)])
            .await
            .unwrap();

        let removed = store
            .delete_rulebooks(&[row.id.clone(), "missing".into()])
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(store.list_pages(&[row.id.clone()]).await.unwrap().is_empty());
        assert!(store.get_rulebook(&row.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn updates_bump_timestamp_and_reject_unknown_ids() {
        let (store, row) = seeded().await;
        let past = OffsetDateTime::now_utc() - time::Duration::hours(1);
        store.backdate(&row.id, past).await.unwrap();

        store
            .update_rulebook(&row.id, RulebookUpdate::failed("boom"))
            .await
            .unwrap();
        let updated = store.get_rulebook(&row.id).await.unwrap().unwrap();
        assert_eq!(updated.status, RulebookStatus::Error);
        assert_eq!(updated.error_message.as_deref(), Some("boom"));
        assert!(updated.updated_at > past);

        let error = store
            .update_rulebook("missing", RulebookUpdate::default())
            .await
            .unwrap_err();
        assert!(matches!(error, StoreError::NotFound(_)));
    }
}
