//! In-memory secret store for testing.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::store::{Record, SecretStore, Versioned, WriteGuard};
use keybundle_common::{Error, Result, StorePath};

/// In-memory secret store.
///
/// Useful for testing and development. Implements the full versioning,
/// soft-delete and destroy semantics; all data is lost on drop. Clones share
/// the same underlying map, so several clients can race against one store.
#[derive(Clone, Default)]
pub struct MemoryStore {
    records: Arc<RwLock<BTreeMap<String, Record>>>,
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys held, including soft-deleted ones.
    pub async fn key_count(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl SecretStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, path: &StorePath) -> Result<Versioned> {
        let records = self.records.read().await;
        records
            .get(&path.to_string())
            .ok_or_else(|| Error::NotFound(format!("Key not found: {}", path)))?
            .read(path)
    }

    async fn put(&self, path: &StorePath, data: Value, guard: WriteGuard) -> Result<u64> {
        let key = path.to_string();
        let mut records = self.records.write().await;

        let record = Record::put(records.get(&key), path, data, guard)?;
        let version = record.version;
        records.insert(key, record);
        Ok(version)
    }

    async fn delete(&self, path: &StorePath) -> Result<()> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&path.to_string())
            .ok_or_else(|| Error::NotFound(format!("Key not found: {}", path)))?;

        record.data = None;
        record.updated = Utc::now();
        Ok(())
    }

    async fn destroy(&self, path: &StorePath) -> Result<()> {
        match self.records.write().await.remove(&path.to_string()) {
            Some(_) => Ok(()),
            None => Err(Error::NotFound(format!("Key not found: {}", path))),
        }
    }

    async fn list(&self, prefix: &StorePath) -> Result<Vec<String>> {
        let records = self.records.read().await;
        let depth = prefix.components().len();

        let mut children = BTreeSet::new();
        for key in records.keys() {
            let components: Vec<&str> = key.split('/').collect();
            if components.len() <= depth
                || components[..depth]
                    .iter()
                    .zip(prefix.components())
                    .any(|(a, b)| *a != b.as_str())
            {
                continue;
            }
            if components.len() == depth + 1 {
                children.insert(components[depth].to_string());
            } else {
                children.insert(format!("{}/", components[depth]));
            }
        }

        Ok(children.into_iter().collect())
    }
}
