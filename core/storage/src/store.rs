//! Secret store trait definition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use keybundle_common::{Error, Result, StorePath};

/// Write precondition for [`SecretStore::put`].
///
/// There is no unconditional write: every writer states what it expects to
/// find, and the store rejects the write with `Conflict` otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteGuard {
    /// Succeeds only if the key has never been written (or was destroyed).
    CreateOnly,
    /// Succeeds only if the key's current version equals this one.
    Version(u64),
}

impl WriteGuard {
    /// Guard for a document last read at `version`; `0` means never written.
    pub fn expecting(version: u64) -> Self {
        if version == 0 {
            WriteGuard::CreateOnly
        } else {
            WriteGuard::Version(version)
        }
    }

    /// The check-and-set token as sent to a KV v2 engine (`0` = create-only).
    pub fn cas(&self) -> u64 {
        match self {
            WriteGuard::CreateOnly => 0,
            WriteGuard::Version(v) => *v,
        }
    }

    /// Check the guard against the current version of a key (`None` if absent).
    ///
    /// # Errors
    /// - `Conflict` if the guard does not hold
    pub fn check(&self, path: &StorePath, current: Option<u64>) -> Result<()> {
        match (self, current) {
            (WriteGuard::CreateOnly, None) => Ok(()),
            (WriteGuard::Version(expected), Some(actual)) if *expected == actual => Ok(()),
            (WriteGuard::CreateOnly, Some(actual)) => Err(Error::Conflict(format!(
                "{} already exists at version {}",
                path, actual
            ))),
            (WriteGuard::Version(expected), actual) => Err(Error::Conflict(format!(
                "{} expected version {}, found {}",
                path,
                expected,
                actual.unwrap_or(0)
            ))),
        }
    }
}

/// A document read from the store together with its version.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned {
    /// The stored JSON document.
    pub data: Value,
    /// Store version of the document; the CAS token for the next write.
    pub version: u64,
}

/// Stored state of one key, shared by the memory and local stores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Record {
    /// Current version; bumped by every successful put.
    pub version: u64,
    /// Current document, `None` once soft-deleted.
    pub data: Option<Value>,
    /// Time of the last put or delete.
    pub updated: DateTime<Utc>,
}

impl Record {
    /// Apply a guarded put to an optional existing record.
    pub fn put(
        existing: Option<&Record>,
        path: &StorePath,
        data: Value,
        guard: WriteGuard,
    ) -> Result<Record> {
        guard.check(path, existing.map(|r| r.version))?;
        Ok(Record {
            version: existing.map_or(1, |r| r.version + 1),
            data: Some(data),
            updated: Utc::now(),
        })
    }

    /// The live document, or `NotFound` if soft-deleted.
    pub fn read(&self, path: &StorePath) -> Result<Versioned> {
        match &self.data {
            Some(data) => Ok(Versioned {
                data: data.clone(),
                version: self.version,
            }),
            None => Err(Error::NotFound(format!("{} is deleted", path))),
        }
    }
}

/// Remote versioned key-value store.
///
/// The store only ever sees ciphertext envelopes and non-secret records.
/// Implementations map their own failures onto the common error taxonomy:
/// a missing key is `NotFound`, a guard mismatch is `Conflict`, an outage is
/// `Transient`.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Get the store name (e.g., "memory", "local", "kv").
    fn name(&self) -> &str;

    /// Read the current version of a document.
    ///
    /// # Errors
    /// - `NotFound` if the key was never written, was soft-deleted or destroyed
    async fn get(&self, path: &StorePath) -> Result<Versioned>;

    /// Write a document under a guard.
    ///
    /// # Postconditions
    /// - Returns the new version; the first write of a key is version 1
    ///
    /// # Errors
    /// - `Conflict` if the guard does not hold
    async fn put(&self, path: &StorePath, data: Value, guard: WriteGuard) -> Result<u64>;

    /// Soft-delete the current version.
    ///
    /// The key keeps its version history, so a later `CreateOnly` write still
    /// conflicts.
    async fn delete(&self, path: &StorePath) -> Result<()>;

    /// Irreversibly remove every version and the key itself.
    async fn destroy(&self, path: &StorePath) -> Result<()>;

    /// List immediate children under a prefix. Folder names end with `/`.
    ///
    /// An empty or missing prefix lists as empty.
    async fn list(&self, prefix: &StorePath) -> Result<Vec<String>>;

    /// Like [`get`](Self::get), but a missing document is `None`.
    async fn try_get(&self, path: &StorePath) -> Result<Option<Versioned>> {
        match self.get(path).await {
            Ok(doc) => Ok(Some(doc)),
            Err(Error::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
