//! In-memory [`KvStore`] implementation for tests and embedders without
//! durable storage.

use std::collections::BTreeMap;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;

use super::KvStore;

/// In-memory key-value store backed by a sorted map.
#[derive(Default)]
pub struct MemoryKv {
    entries: RwLock<BTreeMap<String, String>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().unwrap().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .write()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.write().unwrap().remove(key);
        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .entries
            .read()
            .unwrap()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn prefix_listing_is_bounded() {
        let kv = MemoryKv::new();
        kv.set("app-a-projects", "[]").await.unwrap();
        kv.set("app-a-settings", "{}").await.unwrap();
        kv.set("app-b-projects", "[]").await.unwrap();
        kv.set("other", "x").await.unwrap();

        let keys = kv.keys_with_prefix("app-a-").await.unwrap();
        assert_eq!(keys, vec!["app-a-projects", "app-a-settings"]);

        kv.remove("app-a-projects").await.unwrap();
        kv.remove("missing").await.unwrap();
        assert_eq!(kv.get("app-a-projects").await.unwrap(), None);
        assert_eq!(kv.len(), 3);
    }
}
