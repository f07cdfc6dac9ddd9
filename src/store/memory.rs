use super::{IndexStore, StoreError, StoreResult};
use crate::models::IndexRecord;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Process-local index keyed by record identity
#[derive(Default)]
pub struct InMemoryIndexStore {
    records: RwLock<HashMap<Uuid, IndexRecord>>,
}

impl InMemoryIndexStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl IndexStore for InMemoryIndexStore {
    async fn get_by_slug(&self, slug: &str) -> StoreResult<Option<IndexRecord>> {
        let records = self.records.read().await;
        Ok(records.values().find(|r| r.session_slug == slug).cloned())
    }

    async fn create(&self, record: IndexRecord) -> StoreResult<IndexRecord> {
        let mut records = self.records.write().await;
        if records.values().any(|r| r.session_slug == record.session_slug) {
            return Err(StoreError::DuplicateSlug(record.session_slug));
        }
        records.insert(record.id, record.clone());
        Ok(record)
    }

    async fn update(&self, id: Uuid, mut record: IndexRecord) -> StoreResult<IndexRecord> {
        let mut records = self.records.write().await;
        let slot = records.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        record.id = id;
        *slot = record.clone();
        Ok(record)
    }

    async fn list(&self) -> StoreResult<Vec<IndexRecord>> {
        let mut all: Vec<IndexRecord> = self.records.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.session_slug.cmp(&b.session_slug));
        Ok(all)
    }
}
