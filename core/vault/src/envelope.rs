//! The unlock envelope ("UUK") of a registered identity.
//!
//! Three tiers, each sealed under the one above it:
//!
//! ```text
//! 2SKD(password, device secret)  ->  unlock key
//! unlock key                     ->  AES-GCM(vault key)         = EncVaultKey
//! vault key                      ->  AES-GCM(PKCS#8 private key) = EncPrivateKey
//! ```
//!
//! The public key travels in clear so others can wrap bundle keys to it.

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::config::EnvelopeParams;
use keybundle_common::{Error, Result};
use keybundle_crypto::aead::{self, Sealed, ALGORITHM, IV_SIZE};
use keybundle_crypto::kdf::{self, KdfParams, SCHEME};
use keybundle_crypto::{KeyPair, PrivateKey, PublicKey, VaultKey};

/// An AES-GCM ciphertext with its IV and algorithm tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct SealedKey {
    #[serde(with = "hex")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "hex")]
    pub iv: [u8; IV_SIZE],
    pub alg: String,
}

impl SealedKey {
    fn seal(key: &[u8], plaintext: &[u8]) -> Result<Self> {
        let sealed = aead::encrypt(key, plaintext)?;
        Ok(Self {
            ciphertext: sealed.ciphertext,
            iv: sealed.iv,
            alg: ALGORITHM.to_string(),
        })
    }

    fn open(&self, key: &[u8]) -> Result<Vec<u8>> {
        if self.alg != ALGORITHM {
            return Err(Error::Corrupt(format!("Unsupported algorithm: {}", self.alg)));
        }
        aead::decrypt(
            key,
            &Sealed {
                ciphertext: self.ciphertext.clone(),
                iv: self.iv,
            },
        )
    }
}

/// One identity's unlock envelope.
///
/// Created once at registration; opening it needs both the password and the
/// device secret used to build it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct UnlockRecord {
    /// Random record identifier.
    pub id: String,
    /// Public salt and iteration count of the password half.
    pub kdf_params: KdfParams,
    /// Vault key sealed under the unlock key.
    pub enc_vault_key: SealedKey,
    /// PKCS#8 private key sealed under the vault key.
    pub enc_private_key: SealedKey,
    /// Hex SPKI public key.
    pub public_key: String,
    /// Derivation scheme marker.
    pub bound_to: String,
}

impl UnlockRecord {
    /// Build a fresh envelope around a new key pair.
    ///
    /// CPU-heavy: runs PBKDF2 and generates an RSA key.
    ///
    /// # Errors
    /// - `InvalidInput` for an empty password, a device secret that is not
    ///   16 bytes, or parameters below the safety floors
    pub fn build(
        password: &[u8],
        device_secret: &[u8],
        account_scope: &[u8],
        identity_id: &[u8],
        params: &EnvelopeParams,
    ) -> Result<Self> {
        params.validate()?;
        let kdf_params = KdfParams::with_iterations(params.iterations)?;

        let unlock_key =
            kdf::derive_unlock_key(password, device_secret, account_scope, identity_id, &kdf_params)?;

        let vault_key = VaultKey::generate();
        let enc_vault_key = SealedKey::seal(unlock_key.as_bytes(), vault_key.as_bytes())?;

        let pair = KeyPair::generate(params.rsa_bits)?;
        let private_der = pair.private_key().to_pkcs8_der()?;
        let enc_private_key = SealedKey::seal(vault_key.as_bytes(), private_der.as_bytes())?;

        let record = Self {
            id: Uuid::new_v4().to_string(),
            kdf_params,
            enc_vault_key,
            enc_private_key,
            public_key: pair.public_key().to_hex()?,
            bound_to: SCHEME.to_string(),
        };
        debug!(record = %record.id, rsa_bits = params.rsa_bits, "Built unlock envelope");
        Ok(record)
    }

    /// Open the envelope and recover the identity's key pair.
    ///
    /// # Errors
    /// - `InvalidInput` if the inputs are malformed
    /// - `WrongCredentials` if the vault key fails authentication; never
    ///   says which secret was wrong
    /// - `Corrupt` if the record is damaged past the first tier
    pub fn open(
        &self,
        password: &[u8],
        device_secret: &[u8],
        account_scope: &[u8],
        identity_id: &[u8],
    ) -> Result<KeyPair> {
        if self.bound_to != SCHEME {
            return Err(Error::Corrupt(format!(
                "Unsupported derivation scheme: {}",
                self.bound_to
            )));
        }

        let unlock_key = kdf::derive_unlock_key(
            password,
            device_secret,
            account_scope,
            identity_id,
            &self.kdf_params,
        )?;

        let vault_key_bytes = Zeroizing::new(
            self.enc_vault_key
                .open(unlock_key.as_bytes())
                .map_err(|e| match e {
                    Error::Corrupt(_) => Error::WrongCredentials,
                    other => other,
                })?,
        );
        let vault_key = VaultKey::from_slice(&vault_key_bytes)
            .map_err(|_| Error::Corrupt("Vault key has wrong length".to_string()))?;

        let private_der = Zeroizing::new(self.enc_private_key.open(vault_key.as_bytes())?);
        let private_key = PrivateKey::from_pkcs8_der(&private_der)?;

        let pair = KeyPair::from(private_key);
        if *pair.public_key() != self.public()? {
            return Err(Error::Corrupt(
                "Private key does not match the published public key".to_string(),
            ));
        }
        Ok(pair)
    }

    /// The published public key.
    pub fn public(&self) -> Result<PublicKey> {
        PublicKey::from_hex(&self.public_key)
    }
}
