//! Unlocked session state.
//!
//! A session holds the identity's key pair and the bundle keys unwrapped so
//! far. It is owned by the caller and passed to every operation that needs
//! keys. Locking (or dropping) the session zeroizes all of them.

use std::collections::HashMap;
use uuid::Uuid;

use crate::envelope::UnlockRecord;
use keybundle_common::{BundleId, Error, IdentityId, Result};
use keybundle_crypto::{BundleKey, KeyPair, PrivateKey, PublicKey};

/// Session handle for tracking active sessions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionHandle(String);

impl SessionHandle {
    /// Generate a new unique session handle.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Get the handle string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// State of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Keys are available.
    Active,
    /// Keys have been cleared.
    Locked,
}

/// An unlocked identity.
pub struct Session {
    handle: SessionHandle,
    identity: IdentityId,
    account_scope: String,
    keys: Option<KeyPair>,
    bundle_keys: HashMap<BundleId, BundleKey>,
    state: SessionState,
}

impl Session {
    /// Start a session from an already recovered key pair.
    pub fn new(identity: IdentityId, account_scope: impl Into<String>, keys: KeyPair) -> Self {
        Self {
            handle: SessionHandle::new(),
            identity,
            account_scope: account_scope.into(),
            keys: Some(keys),
            bundle_keys: HashMap::new(),
            state: SessionState::Active,
        }
    }

    /// Open an identity's envelope and start a session.
    ///
    /// CPU-heavy: runs the full 2SKD derivation.
    ///
    /// # Errors
    /// - `WrongCredentials` if either secret is wrong
    /// - `InvalidInput` if the inputs are malformed
    pub fn unlock(
        record: &UnlockRecord,
        identity: IdentityId,
        account_scope: impl Into<String>,
        password: &[u8],
        device_secret: &[u8],
    ) -> Result<Self> {
        let account_scope = account_scope.into();
        let keys = record.open(
            password,
            device_secret,
            account_scope.as_bytes(),
            identity.as_bytes(),
        )?;
        Ok(Self::new(identity, account_scope, keys))
    }

    /// Get the session handle.
    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    /// The unlocked identity.
    pub fn identity(&self) -> &IdentityId {
        &self.identity
    }

    /// Account scope the session was unlocked under.
    pub fn account_scope(&self) -> &str {
        &self.account_scope
    }

    /// Get the current session state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Check if session is active.
    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    /// The identity's key pair.
    ///
    /// # Errors
    /// - `NoAccess` if the session is locked
    pub fn key_pair(&self) -> Result<&KeyPair> {
        match self.state {
            SessionState::Active => self
                .keys
                .as_ref()
                .ok_or_else(|| Error::NoAccess("Key pair not available".to_string())),
            SessionState::Locked => Err(Error::NoAccess("Session is locked".to_string())),
        }
    }

    /// The identity's private key.
    pub fn private_key(&self) -> Result<&PrivateKey> {
        Ok(self.key_pair()?.private_key())
    }

    /// The identity's public key.
    pub fn public_key(&self) -> Result<&PublicKey> {
        Ok(self.key_pair()?.public_key())
    }

    /// A cached bundle key, if this session has opened the bundle before.
    pub fn bundle_key(&self, bundle: &BundleId) -> Result<Option<&BundleKey>> {
        self.key_pair()?;
        Ok(self.bundle_keys.get(bundle))
    }

    /// Remember a bundle key for the rest of the session.
    pub fn cache_bundle_key(&mut self, bundle: BundleId, key: BundleKey) -> Result<()> {
        self.key_pair()?;
        self.bundle_keys.insert(bundle, key);
        Ok(())
    }

    /// Drop a cached bundle key.
    pub fn forget_bundle_key(&mut self, bundle: &BundleId) {
        self.bundle_keys.remove(bundle);
    }

    /// Lock the session, clearing all keys from memory.
    ///
    /// # Postconditions
    /// - Key pair and bundle keys are zeroized and removed
    /// - Every key accessor fails with `NoAccess`
    pub fn lock(&mut self) {
        // Key types zeroize on drop.
        self.keys = None;
        self.bundle_keys.clear();
        self.state = SessionState::Locked;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.lock();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("handle", &self.handle)
            .field("identity", &self.identity)
            .field("state", &self.state)
            .field("cached_bundles", &self.bundle_keys.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        let keys = KeyPair::generate(2048).unwrap();
        Session::new(IdentityId::new("u1").unwrap(), "pwmanager", keys)
    }

    #[test]
    fn test_session_creation() {
        let session = session();
        assert!(session.is_active());
        assert!(session.key_pair().is_ok());
        assert_eq!(session.identity().as_str(), "u1");
        assert_eq!(session.account_scope(), "pwmanager");
    }

    #[test]
    fn test_bundle_key_cache() {
        let mut session = session();
        let bundle = BundleId::new("b1").unwrap();
        let key = BundleKey::generate();

        assert!(session.bundle_key(&bundle).unwrap().is_none());
        session.cache_bundle_key(bundle.clone(), key.clone()).unwrap();
        assert_eq!(session.bundle_key(&bundle).unwrap(), Some(&key));

        session.forget_bundle_key(&bundle);
        assert!(session.bundle_key(&bundle).unwrap().is_none());
    }

    #[test]
    fn test_session_lock() {
        let mut session = session();
        let bundle = BundleId::new("b1").unwrap();
        session.cache_bundle_key(bundle.clone(), BundleKey::generate()).unwrap();

        session.lock();

        assert!(!session.is_active());
        assert_eq!(session.state(), SessionState::Locked);
        assert!(matches!(session.key_pair(), Err(Error::NoAccess(_))));
        assert!(session.bundle_key(&bundle).is_err());
        assert!(session
            .cache_bundle_key(bundle, BundleKey::generate())
            .is_err());
    }

    #[test]
    fn test_debug_shows_no_keys() {
        let session = session();
        let shown = format!("{:?}", session);
        assert!(shown.contains("u1"));
        assert!(!shown.contains("PrivateKey"));
    }
}
