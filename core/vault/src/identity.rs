//! Directory of registered identities.

use std::sync::Arc;
use tracing::info;

use crate::envelope::UnlockRecord;
use keybundle_common::case::{from_wire, to_wire};
use keybundle_common::{Error, IdentityId, Result, StorePath};
use keybundle_crypto::PublicKey;
use keybundle_storage::{SecretStore, WriteGuard};

/// Stores one [`UnlockRecord`] per identity at `users/{identityId}`.
///
/// Records cross the wire with snake_case field names.
#[derive(Clone)]
pub struct IdentityDirectory {
    store: Arc<dyn SecretStore>,
}

impl IdentityDirectory {
    /// Create a directory over a store.
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self { store }
    }

    /// Publish the record of a new identity.
    ///
    /// # Errors
    /// - `AlreadyExists` if the identity is already registered
    pub async fn register(&self, identity: &IdentityId, record: &UnlockRecord) -> Result<()> {
        let path = StorePath::user(identity);
        match self.store.put(&path, to_wire(record)?, WriteGuard::CreateOnly).await {
            Ok(_) => {
                info!(identity = %identity, "Registered identity");
                Ok(())
            }
            Err(Error::Conflict(_)) => Err(Error::AlreadyExists(format!(
                "Identity {} is already registered",
                identity
            ))),
            Err(e) => Err(e),
        }
    }

    /// Fetch the record of an identity.
    ///
    /// # Errors
    /// - `NotFound` if the identity never registered
    /// - `Corrupt` if the stored record does not parse
    pub async fn fetch(&self, identity: &IdentityId) -> Result<UnlockRecord> {
        let doc = self
            .store
            .get(&StorePath::user(identity))
            .await
            .map_err(|e| match e {
                Error::NotFound(_) => {
                    Error::NotFound(format!("Identity {} is not registered", identity))
                }
                other => other,
            })?;
        from_wire(&doc.data)
    }

    /// Whether an identity has registered.
    pub async fn is_registered(&self, identity: &IdentityId) -> Result<bool> {
        Ok(self.store.try_get(&StorePath::user(identity)).await?.is_some())
    }

    /// The public key other members wrap bundle keys to.
    pub async fn public_key(&self, identity: &IdentityId) -> Result<PublicKey> {
        self.fetch(identity).await?.public()
    }
}
