//! Client facade tying identities, bundles, keys and entries together.

use std::sync::Arc;
use tokio::task;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::bundle::{Bundle, BundleRegistry, Capability, Member};
use crate::config::ClientConfig;
use crate::entries::EntryStore;
use crate::envelope::UnlockRecord;
use crate::identity::IdentityDirectory;
use crate::keys::BundleKeyManager;
use crate::retry::RetryExecutor;
use crate::session::Session;
use keybundle_common::{BundleId, Error, IdentityId, Result};
use keybundle_crypto::{BundleKey, DeviceSecret};
use keybundle_storage::SecretStore;

/// Entry point for a client of one secret store.
///
/// Holds no secrets; all key material lives in the [`Session`] the caller
/// passes in.
#[derive(Clone)]
pub struct VaultClient {
    store: Arc<dyn SecretStore>,
    config: ClientConfig,
    identities: IdentityDirectory,
    bundles: BundleRegistry,
    keys: BundleKeyManager,
}

impl VaultClient {
    /// Create a client over a store.
    ///
    /// # Errors
    /// - `InvalidInput` if the configuration is invalid
    pub fn new(store: Arc<dyn SecretStore>, config: ClientConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            identities: IdentityDirectory::new(store.clone()),
            bundles: BundleRegistry::new(store.clone(), config.retry.clone()),
            keys: BundleKeyManager::new(store.clone()),
            store,
            config,
        })
    }

    /// Get the client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Get the identity directory.
    pub fn identities(&self) -> &IdentityDirectory {
        &self.identities
    }

    /// Get the bundle registry.
    pub fn bundle_registry(&self) -> &BundleRegistry {
        &self.bundles
    }

    /// Get the bundle key manager.
    pub fn keys(&self) -> &BundleKeyManager {
        &self.keys
    }

    /// Register a new identity.
    ///
    /// # Preconditions
    /// - Password must not be empty
    ///
    /// # Postconditions
    /// - A fresh unlock envelope is published under the identity
    ///
    /// # Errors
    /// - `AlreadyExists` if the identity is already registered
    /// - `InvalidInput` for an empty password
    pub async fn register(
        &self,
        identity: &IdentityId,
        password: &[u8],
        device_secret: &DeviceSecret,
    ) -> Result<UnlockRecord> {
        if self.identities.is_registered(identity).await? {
            return Err(Error::AlreadyExists(format!(
                "Identity {} is already registered",
                identity
            )));
        }

        let password = Zeroizing::new(password.to_vec());
        let device_secret = device_secret.clone();
        let scope = self.config.account_scope.clone();
        let id = identity.clone();
        let params = self.config.envelope;

        // PBKDF2 and RSA key generation.
        let record = task::spawn_blocking(move || {
            UnlockRecord::build(
                &password,
                device_secret.as_bytes(),
                scope.as_bytes(),
                id.as_bytes(),
                &params,
            )
        })
        .await
        .map_err(|e| Error::Crypto(format!("Envelope task failed: {}", e)))??;

        self.identities.register(identity, &record).await?;
        Ok(record)
    }

    /// Unlock an identity and start a session.
    ///
    /// # Errors
    /// - `NotFound` if the identity is not registered
    /// - `WrongCredentials` if the password or device secret is wrong
    pub async fn unlock(
        &self,
        identity: &IdentityId,
        password: &[u8],
        device_secret: &DeviceSecret,
    ) -> Result<Session> {
        let record = RetryExecutor::new(self.config.retry.clone())
            .execute(|| self.identities.fetch(identity))
            .await?;

        let password = Zeroizing::new(password.to_vec());
        let device_secret = device_secret.clone();
        let scope = self.config.account_scope.clone();
        let id = identity.clone();

        let session = task::spawn_blocking(move || {
            Session::unlock(&record, id, scope, &password, device_secret.as_bytes())
        })
        .await
        .map_err(|e| Error::Crypto(format!("Unlock task failed: {}", e)))??;

        info!(identity = %identity, session = %session.handle().as_str(), "Unlocked identity");
        Ok(session)
    }

    /// Create a bundle owned by the session's identity, with its key and
    /// empty metadata.
    pub async fn create_bundle(&self, session: &mut Session, name: &str) -> Result<Bundle> {
        let bundle = self.bundles.create(session.identity(), name).await?;
        self.open_bundle(session, &bundle.id).await?;
        Ok(bundle)
    }

    /// Bundles the session's identity owns or is a member of.
    pub async fn bundles(&self, session: &Session) -> Result<Vec<Bundle>> {
        session.key_pair()?;
        self.bundles.list_for(session.identity()).await
    }

    /// Recover the bundle key, caching it in the session.
    ///
    /// The owner opening a bundle for the first time initializes it.
    ///
    /// # Errors
    /// - `NoAccess` if the identity holds no usable grant
    /// - `NotFound` if the bundle does not exist
    pub async fn open_bundle(&self, session: &mut Session, bundle: &BundleId) -> Result<BundleKey> {
        if let Some(key) = session.bundle_key(bundle)? {
            return Ok(key.clone());
        }

        let record = self.bundles.get(bundle).await?;
        let (key, metadata) = self
            .entry_store(bundle)
            .open_or_initialize(
                &self.keys,
                session.identity(),
                session.key_pair()?,
                record.is_owner(session.identity()),
                &record.name,
            )
            .await?;

        debug!(bundle = %bundle, entries = metadata.len(), "Opened bundle");
        session.cache_bundle_key(bundle.clone(), key.clone())?;
        Ok(key)
    }

    /// Share a bundle with another registered identity.
    ///
    /// Wraps the bundle key to the recipient, then records the membership.
    /// A grant left behind by an interrupted share is reused.
    ///
    /// # Errors
    /// - `NoAccess` if the session's identity may not administer the bundle
    /// - `NotFound` if the recipient is not registered
    /// - `InvalidInput` if the recipient owns the bundle
    pub async fn share_bundle(
        &self,
        session: &mut Session,
        bundle: &BundleId,
        recipient: &IdentityId,
        capabilities: &[Capability],
        is_admin: bool,
    ) -> Result<Bundle> {
        let record = self.bundles.get(bundle).await?;
        if !record.can_administer(session.identity()) {
            return Err(Error::NoAccess(format!(
                "{} may not share bundle {}",
                session.identity(),
                bundle
            )));
        }
        if record.is_owner(recipient) {
            return Err(Error::InvalidInput(format!(
                "{} already owns bundle {}",
                recipient, bundle
            )));
        }

        let key = self.open_bundle(session, bundle).await?;
        let recipient_key = self.identities.public_key(recipient).await?;

        match self
            .keys
            .share_with(bundle, &key, &recipient_key, recipient)
            .await
        {
            Ok(_) => {}
            Err(Error::AlreadyExists(_)) => {
                debug!(bundle = %bundle, recipient = %recipient, "Recipient already holds a grant");
            }
            Err(e) => return Err(e),
        }

        self.bundles
            .upsert_member(
                bundle,
                session.identity(),
                Member::new(recipient.clone(), capabilities, is_admin),
            )
            .await
    }

    /// Entry operations on a bundle, limited to what the session's identity
    /// may do there.
    ///
    /// The owner gets every capability; a member gets the capabilities
    /// recorded when the bundle was shared.
    ///
    /// # Errors
    /// - `NoAccess` if the session is locked or the identity has no access
    /// - `NotFound` if the bundle does not exist
    pub async fn entries(&self, session: &Session, bundle: &BundleId) -> Result<EntryStore> {
        session.key_pair()?;
        let record = self.bundles.get(bundle).await?;
        let identity = session.identity();

        if record.is_owner(identity) {
            return Ok(self.entry_store(bundle));
        }
        match record.member(identity) {
            Some(member) => Ok(self.entry_store(bundle).with_capabilities(&member.capabilities)),
            None => Err(Error::NoAccess(format!(
                "{} is not a member of bundle {}",
                identity, bundle
            ))),
        }
    }

    fn entry_store(&self, bundle: &BundleId) -> EntryStore {
        EntryStore::new(self.store.clone(), bundle.clone(), self.config.retry.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnvelopeParams;
    use keybundle_storage::MemoryStore;

    fn client() -> VaultClient {
        let config = ClientConfig::default().with_envelope(EnvelopeParams {
            iterations: 100_000,
            rsa_bits: 2048,
        });
        VaultClient::new(Arc::new(MemoryStore::new()), config).unwrap()
    }

    #[tokio::test]
    async fn test_register_twice_rejected() {
        let client = client();
        let who = IdentityId::new("alice").unwrap();
        let secret = DeviceSecret::generate();

        client.register(&who, b"pw", &secret).await.unwrap();
        assert!(matches!(
            client.register(&who, b"pw", &secret).await,
            Err(Error::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_unlock_unknown_identity() {
        let client = client();
        let err = client
            .unlock(&IdentityId::new("ghost").unwrap(), b"pw", &DeviceSecret::generate())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_create_bundle_caches_key() {
        let client = client();
        let who = IdentityId::new("alice").unwrap();
        let secret = DeviceSecret::generate();
        client.register(&who, b"pw", &secret).await.unwrap();
        let mut session = client.unlock(&who, b"pw", &secret).await.unwrap();

        let bundle = client.create_bundle(&mut session, "Personal").await.unwrap();
        let cached = session.bundle_key(&bundle.id).unwrap().cloned().unwrap();

        let entries = client.entries(&session, &bundle.id).await.unwrap();
        assert!(entries.allows(Capability::Delete));
        let metadata = entries.get_metadata(&cached).await.unwrap();
        assert_eq!(metadata.bundle_name, "Personal");
        assert!(metadata.is_empty());

        session.lock();
        assert!(client.bundles(&session).await.is_err());
        assert!(matches!(
            client.entries(&session, &bundle.id).await,
            Err(Error::NoAccess(_))
        ));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = VaultClient::new(Arc::new(MemoryStore::new()), ClientConfig::new(""));
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }
}
