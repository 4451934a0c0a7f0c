//! Local filesystem secret store.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;

use crate::store::{Record, SecretStore, Versioned, WriteGuard};
use keybundle_common::{Error, Result, StorePath};

const RECORD_SUFFIX: &str = ".json";

/// Local filesystem secret store.
///
/// Each key is one JSON record file under the root directory, laid out by
/// path: `bundles/b1/metadata` lives at `<root>/bundles/b1/metadata.json`.
/// Writes go through a temporary file and a rename, serialized by an
/// in-process lock.
pub struct LocalStore {
    root: PathBuf,
    lock: Mutex<()>,
}

impl LocalStore {
    /// Create a new local store with the given root directory.
    ///
    /// # Postconditions
    /// - Root directory is created if it doesn't exist
    ///
    /// # Errors
    /// - Permission denied
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        if !root.exists() {
            std::fs::create_dir_all(&root)?;
        }

        Ok(Self {
            root,
            lock: Mutex::new(()),
        })
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn dir_path(&self, path: &StorePath) -> PathBuf {
        let mut fs_path = self.root.clone();
        for component in path.components() {
            fs_path.push(component);
        }
        fs_path
    }

    fn record_path(&self, path: &StorePath) -> PathBuf {
        let mut fs_path = self.root.clone();
        if let Some(parent) = path.parent() {
            for component in parent.components() {
                fs_path.push(component);
            }
        }
        fs_path.push(format!("{}{}", path.name(), RECORD_SUFFIX));
        fs_path
    }

    async fn read_record(&self, path: &StorePath) -> Result<Option<Record>> {
        let fs_path = self.record_path(path);
        let bytes = match fs::read(&fs_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| Error::Corrupt(format!("Unreadable record {}: {}", path, e)))
    }

    async fn write_record(&self, path: &StorePath, record: &Record) -> Result<()> {
        let fs_path = self.record_path(path);
        if let Some(parent) = fs_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let bytes = serde_json::to_vec_pretty(record)
            .map_err(|e| Error::Serialization(e.to_string()))?;
        let tmp = fs_path.with_extension("json.tmp");
        fs::write(&tmp, &bytes).await?;
        fs::rename(&tmp, &fs_path).await?;
        Ok(())
    }

    // Remove now-empty directories between the record and the root.
    async fn prune_empty_dirs(&self, path: &StorePath) {
        let mut current = path.parent();
        while let Some(dir) = current {
            if fs::remove_dir(self.dir_path(&dir)).await.is_err() {
                break;
            }
            current = dir.parent();
        }
    }
}

#[async_trait]
impl SecretStore for LocalStore {
    fn name(&self) -> &str {
        "local"
    }

    async fn get(&self, path: &StorePath) -> Result<Versioned> {
        self.read_record(path)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Key not found: {}", path)))?
            .read(path)
    }

    async fn put(&self, path: &StorePath, data: Value, guard: WriteGuard) -> Result<u64> {
        let _guard = self.lock.lock().await;

        let existing = self.read_record(path).await?;
        let record = Record::put(existing.as_ref(), path, data, guard)?;
        self.write_record(path, &record).await?;

        debug!(path = %path, version = record.version, "Wrote record");
        Ok(record.version)
    }

    async fn delete(&self, path: &StorePath) -> Result<()> {
        let _guard = self.lock.lock().await;

        let mut record = self
            .read_record(path)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Key not found: {}", path)))?;
        record.data = None;
        record.updated = Utc::now();
        self.write_record(path, &record).await
    }

    async fn destroy(&self, path: &StorePath) -> Result<()> {
        let _guard = self.lock.lock().await;

        match fs::remove_file(self.record_path(path)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(format!("Key not found: {}", path)));
            }
            Err(e) => return Err(e.into()),
        }
        self.prune_empty_dirs(path).await;
        Ok(())
    }

    async fn list(&self, prefix: &StorePath) -> Result<Vec<String>> {
        let dir = self.dir_path(prefix);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut results = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().await?.is_dir() {
                results.push(format!("{}/", name));
            } else if let Some(key) = name.strip_suffix(RECORD_SUFFIX) {
                results.push(key.to_string());
            }
        }

        results.sort();
        Ok(results)
    }
}
