//! In-memory [`TextStore`] implementation for tests.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;

use super::{DocumentTextKey, TextRecord, TextStore};

struct StoredText {
    project_id: Option<String>,
    record: TextRecord,
}

/// In-memory document text store.
#[derive(Default)]
pub struct MemoryTextStore {
    records: RwLock<HashMap<String, StoredText>>,
}

impl MemoryTextStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TextStore for MemoryTextStore {
    async fn put_document_text(&self, key: &DocumentTextKey, text: &str) -> Result<()> {
        self.records.write().unwrap().insert(
            key.storage_key(),
            StoredText {
                project_id: key.project_id.clone(),
                record: TextRecord {
                    text: text.to_string(),
                    updated_at: Utc::now(),
                },
            },
        );
        Ok(())
    }

    async fn get_document_text(&self, key: &DocumentTextKey) -> Result<Option<TextRecord>> {
        Ok(self
            .records
            .read()
            .unwrap()
            .get(&key.storage_key())
            .map(|s| s.record.clone()))
    }

    async fn delete_document_text(&self, key: &DocumentTextKey) -> Result<()> {
        self.records.write().unwrap().remove(&key.storage_key());
        Ok(())
    }

    async fn delete_project_texts(&self, project_id: &str) -> Result<u64> {
        let mut records = self.records.write().unwrap();
        let before = records.len();
        records.retain(|_, s| s.project_id.as_deref() != Some(project_id));
        Ok((before - records.len()) as u64)
    }
}
