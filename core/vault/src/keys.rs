//! Bundle key lifecycle: generation, per-member wrapping, unwrapping.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use keybundle_common::case::{from_wire, to_wire};
use keybundle_common::{BundleId, Error, IdentityId, Result, StorePath};
use keybundle_crypto::asym::ALGORITHM;
use keybundle_crypto::{BundleKey, PrivateKey, PublicKey};
use keybundle_storage::{SecretStore, WriteGuard};

/// A bundle key wrapped to one member's public key.
///
/// Stored at `bundles/{bundleId}/keys/{memberId}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct BundleKeyGrant {
    /// Member the key is wrapped to.
    pub member_id: IdentityId,
    /// RSA-OAEP ciphertext of the bundle key.
    #[serde(with = "hex")]
    pub wrapped_key: Vec<u8>,
    /// Wrapping algorithm.
    pub alg: String,
}

impl BundleKeyGrant {
    /// Wrap `key` to `member`.
    pub fn wrap(key: &BundleKey, member: &IdentityId, public_key: &PublicKey) -> Result<Self> {
        Ok(Self {
            member_id: member.clone(),
            wrapped_key: public_key.encrypt(key.as_bytes())?,
            alg: ALGORITHM.to_string(),
        })
    }
}

/// Creates, shares and opens bundle keys.
///
/// Holds no key material itself: plaintext keys are returned to the caller,
/// who decides whether to cache them in a session.
#[derive(Clone)]
pub struct BundleKeyManager {
    store: Arc<dyn SecretStore>,
}

impl BundleKeyManager {
    /// Create a manager over a store.
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self { store }
    }

    /// Generate a bundle key and grant it to its owner.
    ///
    /// # Errors
    /// - `AlreadyExists` if the owner already holds a grant for this bundle
    pub async fn create_bundle_key(
        &self,
        bundle: &BundleId,
        owner: &IdentityId,
        owner_public_key: &PublicKey,
    ) -> Result<(BundleKey, BundleKeyGrant)> {
        let key = BundleKey::generate();
        let grant = BundleKeyGrant::wrap(&key, owner, owner_public_key)?;
        self.persist(bundle, &grant).await?;

        info!(bundle = %bundle, owner = %owner, "Created bundle key");
        Ok((key, grant))
    }

    /// Grant an already opened bundle key to another identity.
    ///
    /// Only a current member can call this, since it needs the plaintext key.
    ///
    /// # Errors
    /// - `AlreadyExists` if the recipient already holds a grant
    pub async fn share_with(
        &self,
        bundle: &BundleId,
        key: &BundleKey,
        recipient_public_key: &PublicKey,
        recipient: &IdentityId,
    ) -> Result<BundleKeyGrant> {
        let grant = BundleKeyGrant::wrap(key, recipient, recipient_public_key)?;
        self.persist(bundle, &grant).await?;

        info!(bundle = %bundle, recipient = %recipient, "Shared bundle key");
        Ok(grant)
    }

    /// Look up an identity's grant for a bundle.
    pub async fn fetch_grant(
        &self,
        bundle: &BundleId,
        member: &IdentityId,
    ) -> Result<Option<BundleKeyGrant>> {
        match self.store.try_get(&StorePath::grant(bundle, member)).await? {
            Some(doc) => Ok(Some(from_wire(&doc.data)?)),
            None => Ok(None),
        }
    }

    /// Recover the plaintext bundle key from a grant.
    ///
    /// # Errors
    /// - `NoAccess` if the grant was not wrapped to `private_key`
    pub fn unwrap(grant: &BundleKeyGrant, private_key: &PrivateKey) -> Result<BundleKey> {
        if grant.alg != ALGORITHM {
            return Err(Error::NoAccess(format!(
                "Unsupported grant algorithm: {}",
                grant.alg
            )));
        }
        let plaintext = private_key
            .decrypt(&grant.wrapped_key)
            .map_err(|_| Error::NoAccess("Grant cannot be unwrapped with this key".to_string()))?;
        BundleKey::from_slice(plaintext.as_bytes())
            .map_err(|_| Error::NoAccess("Grant holds a malformed key".to_string()))
    }

    /// Fetch and unwrap an identity's grant.
    ///
    /// # Errors
    /// - `NoAccess` if there is no grant or it cannot be unwrapped
    pub async fn open(
        &self,
        bundle: &BundleId,
        member: &IdentityId,
        private_key: &PrivateKey,
    ) -> Result<BundleKey> {
        let grant = self.fetch_grant(bundle, member).await?.ok_or_else(|| {
            Error::NoAccess(format!("{} holds no key for bundle {}", member, bundle))
        })?;
        debug!(bundle = %bundle, member = %member, "Unwrapping bundle key");
        Self::unwrap(&grant, private_key)
    }

    async fn persist(&self, bundle: &BundleId, grant: &BundleKeyGrant) -> Result<()> {
        let path = StorePath::grant(bundle, &grant.member_id);
        match self.store.put(&path, to_wire(grant)?, WriteGuard::CreateOnly).await {
            Ok(_) => Ok(()),
            Err(Error::Conflict(_)) => Err(Error::AlreadyExists(format!(
                "{} already holds a key for bundle {}",
                grant.member_id, bundle
            ))),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keybundle_crypto::KeyPair;
    use keybundle_storage::MemoryStore;

    fn setup() -> (BundleKeyManager, Arc<MemoryStore>, BundleId) {
        let store = Arc::new(MemoryStore::new());
        (
            BundleKeyManager::new(store.clone()),
            store,
            BundleId::new("b1").unwrap(),
        )
    }

    #[tokio::test]
    async fn test_create_and_open() {
        let (keys, _, bundle) = setup();
        let owner = IdentityId::new("owner").unwrap();
        let pair = KeyPair::generate(2048).unwrap();

        let (key, grant) = keys
            .create_bundle_key(&bundle, &owner, pair.public_key())
            .await
            .unwrap();
        assert_eq!(grant.member_id, owner);

        let opened = keys.open(&bundle, &owner, pair.private_key()).await.unwrap();
        assert_eq!(opened, key);
    }

    #[tokio::test]
    async fn test_grant_never_overwritten() {
        let (keys, _, bundle) = setup();
        let owner = IdentityId::new("owner").unwrap();
        let pair = KeyPair::generate(2048).unwrap();

        let (key, _) = keys
            .create_bundle_key(&bundle, &owner, pair.public_key())
            .await
            .unwrap();
        let err = keys
            .create_bundle_key(&bundle, &owner, pair.public_key())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));

        // The first key is still the one on record.
        assert_eq!(keys.open(&bundle, &owner, pair.private_key()).await.unwrap(), key);
    }

    #[tokio::test]
    async fn test_share_then_unwrap() {
        let (keys, _, bundle) = setup();
        let owner = IdentityId::new("owner").unwrap();
        let friend = IdentityId::new("friend").unwrap();
        let owner_pair = KeyPair::generate(2048).unwrap();
        let friend_pair = KeyPair::generate(2048).unwrap();

        let (key, _) = keys
            .create_bundle_key(&bundle, &owner, owner_pair.public_key())
            .await
            .unwrap();
        keys.share_with(&bundle, &key, friend_pair.public_key(), &friend)
            .await
            .unwrap();

        let grant = keys.fetch_grant(&bundle, &friend).await.unwrap().unwrap();
        let unwrapped = BundleKeyManager::unwrap(&grant, friend_pair.private_key()).unwrap();
        assert_eq!(unwrapped.as_bytes(), key.as_bytes());

        // The owner's private key does not open the friend's grant.
        assert!(matches!(
            BundleKeyManager::unwrap(&grant, owner_pair.private_key()),
            Err(Error::NoAccess(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_grant_is_no_access() {
        let (keys, _, bundle) = setup();
        let stranger = IdentityId::new("stranger").unwrap();
        let pair = KeyPair::generate(2048).unwrap();

        assert!(keys.fetch_grant(&bundle, &stranger).await.unwrap().is_none());
        assert!(matches!(
            keys.open(&bundle, &stranger, pair.private_key()).await,
            Err(Error::NoAccess(_))
        ));
    }

    #[tokio::test]
    async fn test_grant_wire_shape() {
        let (keys, store, bundle) = setup();
        let owner = IdentityId::new("owner").unwrap();
        let pair = KeyPair::generate(2048).unwrap();

        keys.create_bundle_key(&bundle, &owner, pair.public_key())
            .await
            .unwrap();

        let raw = store.get(&StorePath::grant(&bundle, &owner)).await.unwrap();
        assert_eq!(raw.data["member_id"], "owner");
        assert_eq!(raw.data["alg"], "RSA-OAEP-256");
        assert!(raw.data["wrapped_key"].is_string());
    }
}
