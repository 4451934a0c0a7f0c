//! Encrypted entries of one bundle.
//!
//! Entry blobs are immutable: every write goes to a fresh random object name
//! under `bundles/{bundleId}/entries/`, and the metadata document is the only
//! thing that moves. Writes run in a fixed order:
//!
//! 1. write the new blob (create-only)
//! 2. write the metadata under CAS
//! 3. reclaim the blob the metadata no longer points at
//!
//! Stopping after any step leaves at worst an unreferenced blob, never a
//! descriptor pointing at a missing one. A lost CAS race in step 2 re-runs
//! the metadata step against a freshly fetched document.
//!
//! A store handed to a bundle member only allows what the member's
//! capabilities grant; see [`EntryStore::with_capabilities`].

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bundle::Capability;
use crate::entry::Entry;
use crate::keys::BundleKeyManager;
use crate::metadata::{BundleMetadataDocument, EntryDescriptor};
use crate::retry::{RetryConfig, RetryExecutor};
use keybundle_common::{BundleId, EntryId, Error, IdentityId, Result, StorePath};
use keybundle_crypto::aead::Sealed;
use keybundle_crypto::{BundleKey, KeyPair};
use keybundle_storage::{SecretStore, WriteGuard};

/// Result of a successful [`EntryStore::put_entry`].
#[derive(Debug, Clone)]
pub struct PutOutcome {
    /// Descriptor now recorded for the entry.
    pub descriptor: EntryDescriptor,
    /// Metadata as written, carrying its new version.
    pub metadata: BundleMetadataDocument,
    /// False if the replaced blob could not be removed and was left orphaned.
    pub reclaimed: bool,
}

/// Result of a successful [`EntryStore::delete_entry`].
#[derive(Debug, Clone)]
pub struct DeleteOutcome {
    /// Descriptor that was removed; `None` if the id was not listed.
    pub removed: Option<EntryDescriptor>,
    /// False if the blob could not be destroyed and was left orphaned.
    pub reclaimed: bool,
    /// Current metadata after the delete.
    pub metadata: BundleMetadataDocument,
}

/// What a put is doing to the descriptor list.
#[derive(Debug, Clone, Copy)]
enum PutKind<'a> {
    Create(&'a EntryId),
    Update(&'a EntryId),
}

impl PutKind<'_> {
    fn id(&self) -> &EntryId {
        match self {
            PutKind::Create(id) | PutKind::Update(id) => id,
        }
    }
}

/// Entry and metadata operations on one bundle.
///
/// Holds no key: every call takes the bundle key by reference.
#[derive(Clone)]
pub struct EntryStore {
    store: Arc<dyn SecretStore>,
    bundle: BundleId,
    retry: RetryConfig,
    capabilities: Vec<Capability>,
}

impl EntryStore {
    /// Create an entry store for a bundle with every capability.
    pub fn new(store: Arc<dyn SecretStore>, bundle: BundleId, retry: RetryConfig) -> Self {
        Self {
            store,
            bundle,
            retry,
            capabilities: Capability::ALL.to_vec(),
        }
    }

    /// Restrict the store to a member's capabilities.
    pub fn with_capabilities(mut self, capabilities: &[Capability]) -> Self {
        self.capabilities = capabilities.to_vec();
        self
    }

    /// The bundle this store operates on.
    pub fn bundle(&self) -> &BundleId {
        &self.bundle
    }

    /// Whether the store allows `capability`.
    pub fn allows(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    fn require(&self, capability: Capability) -> Result<()> {
        if self.allows(capability) {
            Ok(())
        } else {
            Err(Error::NoAccess(format!(
                "Missing {} capability on bundle {}",
                capability, self.bundle
            )))
        }
    }

    /// Open the bundle for `identity`, initializing it if the owner is first.
    ///
    /// Recovers the identity's bundle key from its grant. When there is no
    /// grant and `is_owner` holds, a key is created; when there is no
    /// metadata and `is_owner` holds, an empty document is written. Two
    /// owners racing here both end up with the single winning key and
    /// document.
    ///
    /// # Errors
    /// - `NoAccess` if a non-owner has no grant, or the grant does not unwrap
    /// - `NotFound` if a non-owner opens a bundle whose metadata is missing
    pub async fn open_or_initialize(
        &self,
        keys: &BundleKeyManager,
        identity: &IdentityId,
        key_pair: &KeyPair,
        is_owner: bool,
        bundle_name: &str,
    ) -> Result<(BundleKey, BundleMetadataDocument)> {
        let key = match keys.fetch_grant(&self.bundle, identity).await? {
            Some(grant) => BundleKeyManager::unwrap(&grant, key_pair.private_key())?,
            None if is_owner => {
                match keys
                    .create_bundle_key(&self.bundle, identity, key_pair.public_key())
                    .await
                {
                    Ok((key, _)) => key,
                    Err(Error::AlreadyExists(_)) => {
                        debug!(bundle = %self.bundle, "Bundle key created concurrently, opening it");
                        keys.open(&self.bundle, identity, key_pair.private_key()).await?
                    }
                    Err(e) => return Err(e),
                }
            }
            None => {
                return Err(Error::NoAccess(format!(
                    "{} is not a member of bundle {}",
                    identity, self.bundle
                )))
            }
        };

        let metadata = match self.fetch_metadata(&key).await {
            Ok(metadata) => metadata,
            Err(Error::NotFound(_)) if is_owner => self.initialize(&key, bundle_name).await?,
            Err(e) => return Err(e),
        };

        Ok((key, metadata))
    }

    /// Write the empty metadata document of a new bundle.
    ///
    /// If another writer initialized the bundle first, its document is
    /// fetched and returned instead.
    pub async fn initialize(&self, key: &BundleKey, bundle_name: &str) -> Result<BundleMetadataDocument> {
        let mut metadata = BundleMetadataDocument::new(bundle_name);
        match self.write_metadata(key, &metadata).await {
            Ok(version) => {
                metadata.version = version;
                info!(bundle = %self.bundle, "Initialized bundle metadata");
                Ok(metadata)
            }
            Err(Error::Conflict(_)) => {
                debug!(bundle = %self.bundle, "Metadata initialized concurrently, fetching it");
                self.fetch_metadata(key).await
            }
            Err(e) => Err(e),
        }
    }

    /// Fetch and decrypt the bundle's metadata.
    ///
    /// # Errors
    /// - `NotFound` if the bundle was never initialized
    /// - `Corrupt` if the document fails to decrypt or parse
    /// - `NoAccess` without the `list` capability
    pub async fn get_metadata(&self, key: &BundleKey) -> Result<BundleMetadataDocument> {
        self.require(Capability::List)?;
        self.fetch_metadata(key).await
    }

    async fn fetch_metadata(&self, key: &BundleKey) -> Result<BundleMetadataDocument> {
        let doc = self.store.get(&StorePath::metadata(&self.bundle)).await?;
        BundleMetadataDocument::open(key, &sealed_from(&doc.data)?, doc.version)
    }

    /// Descriptors of every entry in the bundle.
    pub async fn list_entries(&self, key: &BundleKey) -> Result<Vec<EntryDescriptor>> {
        Ok(self.get_metadata(key).await?.entries)
    }

    /// Store an entry, retrying the metadata write on concurrent changes.
    ///
    /// With `id` of `None` a new entry is created; otherwise the entry with
    /// that id is replaced. `current` is the metadata the caller last saw; it
    /// is used for the first attempt and re-fetched for every later one.
    ///
    /// # Postconditions
    /// - The returned metadata holds exactly one descriptor for the entry,
    ///   pointing at a blob with the new contents
    /// - On update, the previous blob is deleted after the metadata write
    ///
    /// # Errors
    /// - `NoAccess` without the `create` (new entry) or `update` capability
    /// - `NotFound` if `id` is not in the metadata
    /// - `ConflictExhausted` if concurrent writers won every attempt
    pub async fn put_entry(
        &self,
        key: &BundleKey,
        id: Option<&EntryId>,
        entry: &Entry,
        current: &BundleMetadataDocument,
    ) -> Result<PutOutcome> {
        self.put(key, id, entry, current, true).await
    }

    /// Like [`put_entry`](Self::put_entry), but a lost race is returned as
    /// `Conflict` instead of being retried.
    pub async fn put_entry_once(
        &self,
        key: &BundleKey,
        id: Option<&EntryId>,
        entry: &Entry,
        current: &BundleMetadataDocument,
    ) -> Result<PutOutcome> {
        self.put(key, id, entry, current, false).await
    }

    async fn put(
        &self,
        key: &BundleKey,
        id: Option<&EntryId>,
        entry: &Entry,
        current: &BundleMetadataDocument,
        retry: bool,
    ) -> Result<PutOutcome> {
        self.require(if id.is_some() {
            Capability::Update
        } else {
            Capability::Create
        })?;
        entry.validate()?;

        let new_id;
        let kind = match id {
            Some(id) => PutKind::Update(id),
            None => {
                new_id = EntryId::generate();
                PutKind::Create(&new_id)
            }
        };

        let object = Uuid::new_v4().to_string();
        let blob_path = StorePath::entry(&self.bundle, &object)?;
        self.store
            .put(&blob_path, sealed_to(&entry.seal(key)?)?, WriteGuard::CreateOnly)
            .await?;

        let committed = if retry {
            RetryExecutor::new(self.retry.clone())
                .on_conflict(|attempt| {
                    let object = object.as_str();
                    async move {
                        let metadata = if attempt == 0 {
                            current.clone()
                        } else {
                            self.fetch_metadata(key).await?
                        };
                        self.commit_put(key, metadata, kind, entry, object).await
                    }
                })
                .await
        } else {
            self.commit_put(key, current.clone(), kind, entry, &object).await
        };

        let (descriptor, previous, metadata) = match committed {
            Ok(committed) => committed,
            // Only failures that prove the metadata was not written free the
            // blob; after any other error the metadata may already point at it.
            Err(e @ (Error::Conflict(_) | Error::ConflictExhausted { .. } | Error::NotFound(_))) => {
                self.discard(&blob_path).await;
                return Err(e);
            }
            Err(e) => {
                warn!(bundle = %self.bundle, path = %blob_path, "Entry write outcome unknown, keeping blob: {}", e);
                return Err(e);
            }
        };

        let mut reclaimed = true;
        if let Some(previous) = previous {
            let old_path = StorePath::entry(&self.bundle, &previous.path)?;
            if let Err(e) = self.store.delete(&old_path).await {
                warn!(bundle = %self.bundle, path = %old_path, "Failed to reclaim replaced entry: {}", e);
                reclaimed = false;
            }
        }

        info!(
            bundle = %self.bundle,
            entry = %descriptor.id,
            entry_version = descriptor.version,
            metadata_version = metadata.version,
            "Stored entry"
        );
        Ok(PutOutcome {
            descriptor,
            metadata,
            reclaimed,
        })
    }

    /// Point the metadata at a freshly written blob and write it under CAS.
    async fn commit_put(
        &self,
        key: &BundleKey,
        mut metadata: BundleMetadataDocument,
        kind: PutKind<'_>,
        entry: &Entry,
        object: &str,
    ) -> Result<(EntryDescriptor, Option<EntryDescriptor>, BundleMetadataDocument)> {
        let version = match kind {
            PutKind::Create(_) => 0,
            PutKind::Update(id) => {
                metadata
                    .find(id)
                    .ok_or_else(|| {
                        Error::NotFound(format!("Entry {} not in bundle {}", id, self.bundle))
                    })?
                    .version
                    + 1
            }
        };

        let descriptor = EntryDescriptor {
            id: kind.id().clone(),
            name: entry.name.clone(),
            entry_type: entry.entry_type.clone(),
            path: object.to_string(),
            version,
        };
        let previous = metadata.upsert(descriptor.clone());
        metadata.version = self.write_metadata(key, &metadata).await?;

        Ok((descriptor, previous, metadata))
    }

    /// Fetch and decrypt the entry a descriptor points at.
    ///
    /// # Errors
    /// - `NotFound` if the blob does not exist (or was reclaimed)
    /// - `Corrupt` if the blob fails to decrypt or parse
    pub async fn get_entry(&self, key: &BundleKey, descriptor: &EntryDescriptor) -> Result<Entry> {
        self.require(Capability::Read)?;
        let path = StorePath::entry(&self.bundle, &descriptor.path)?;
        let doc = self.store.get(&path).await?;
        Entry::open(key, &sealed_from(&doc.data)?)
    }

    /// Remove an entry from the metadata, then destroy its blob.
    ///
    /// Deleting an id that is not listed leaves the metadata untouched.
    ///
    /// # Errors
    /// - `ConflictExhausted` if concurrent writers won every attempt
    pub async fn delete_entry(&self, key: &BundleKey, id: &EntryId) -> Result<DeleteOutcome> {
        self.require(Capability::Delete)?;
        let (removed, metadata) = RetryExecutor::new(self.retry.clone())
            .on_conflict(|_| async move {
                let mut metadata = self.fetch_metadata(key).await?;
                let Some(removed) = metadata.remove(id) else {
                    return Ok((None, metadata));
                };
                metadata.version = self.write_metadata(key, &metadata).await?;
                Ok((Some(removed), metadata))
            })
            .await?;

        let Some(removed) = removed else {
            debug!(bundle = %self.bundle, entry = %id, "Entry already absent");
            return Ok(DeleteOutcome {
                removed: None,
                reclaimed: true,
                metadata,
            });
        };

        let blob_path = StorePath::entry(&self.bundle, &removed.path)?;
        let reclaimed = match self.store.destroy(&blob_path).await {
            Ok(()) => true,
            Err(e) => {
                warn!(bundle = %self.bundle, path = %blob_path, "Failed to destroy deleted entry: {}", e);
                false
            }
        };

        info!(bundle = %self.bundle, entry = %id, "Deleted entry");
        Ok(DeleteOutcome {
            removed: Some(removed),
            reclaimed,
            metadata,
        })
    }

    /// Write metadata guarded on the version it was read at.
    async fn write_metadata(&self, key: &BundleKey, metadata: &BundleMetadataDocument) -> Result<u64> {
        self.store
            .put(
                &StorePath::metadata(&self.bundle),
                sealed_to(&metadata.seal(key)?)?,
                WriteGuard::expecting(metadata.version),
            )
            .await
    }

    // Best effort: an unreferenced blob is harmless.
    async fn discard(&self, path: &StorePath) {
        if let Err(e) = self.store.destroy(path).await {
            warn!(bundle = %self.bundle, path = %path, "Failed to discard unreferenced entry: {}", e);
        }
    }
}

fn sealed_to(sealed: &Sealed) -> Result<Value> {
    serde_json::to_value(sealed).map_err(|e| Error::Serialization(e.to_string()))
}

fn sealed_from(value: &Value) -> Result<Sealed> {
    serde_json::from_value(value.clone())
        .map_err(|e| Error::Corrupt(format!("Malformed ciphertext envelope: {}", e)))
}
