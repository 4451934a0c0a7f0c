//! Key wrapping using RSA-OAEP with SHA-256.
//!
//! Each identity holds one key pair. The public half is published in the
//! identity record; bundle keys shared with the identity are wrapped under it.

use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use std::fmt;

use crate::random::os_rng;
use keybundle_common::{Error, Result, SensitiveBytes};

/// Modulus size for new identities.
pub const DEFAULT_RSA_BITS: usize = 4096;

/// Smallest modulus accepted when generating keys.
pub const MIN_RSA_BITS: usize = 2048;

/// Algorithm tag recorded next to wrapped keys.
pub const ALGORITHM: &str = "RSA-OAEP-256";

/// An RSA key pair.
#[derive(Clone)]
pub struct KeyPair {
    private: PrivateKey,
    public: PublicKey,
}

impl KeyPair {
    /// Generate a fresh key pair.
    ///
    /// # Errors
    /// - `InvalidInput` if `bits` is below MIN_RSA_BITS
    /// - `Crypto` if generation fails
    pub fn generate(bits: usize) -> Result<Self> {
        if bits < MIN_RSA_BITS {
            return Err(Error::InvalidInput(format!(
                "RSA modulus {} below minimum {}",
                bits, MIN_RSA_BITS
            )));
        }
        let inner = RsaPrivateKey::new(&mut os_rng(), bits)
            .map_err(|e| Error::Crypto(format!("RSA key generation failed: {}", e)))?;
        Ok(PrivateKey { inner }.into())
    }

    /// The private half.
    pub fn private_key(&self) -> &PrivateKey {
        &self.private
    }

    /// The public half.
    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// Split into halves.
    pub fn into_parts(self) -> (PrivateKey, PublicKey) {
        (self.private, self.public)
    }
}

impl From<PrivateKey> for KeyPair {
    fn from(private: PrivateKey) -> Self {
        let public = private.public_key();
        Self { private, public }
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

/// RSA private key.
#[derive(Clone)]
pub struct PrivateKey {
    inner: RsaPrivateKey,
}

impl PrivateKey {
    /// Unwrap data encrypted under the matching public key.
    ///
    /// # Errors
    /// - `Corrupt` if the ciphertext was not produced for this key or was altered
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<SensitiveBytes> {
        self.inner
            .decrypt(Oaep::new::<Sha256>(), ciphertext)
            .map(SensitiveBytes::new)
            .map_err(|_| Error::Corrupt("RSA-OAEP decryption failed".to_string()))
    }

    /// PKCS#8 DER encoding.
    pub fn to_pkcs8_der(&self) -> Result<SensitiveBytes> {
        let doc = self
            .inner
            .to_pkcs8_der()
            .map_err(|e| Error::Crypto(format!("PKCS#8 encoding failed: {}", e)))?;
        Ok(SensitiveBytes::from(doc.as_bytes()))
    }

    /// Decode from PKCS#8 DER.
    ///
    /// # Errors
    /// - `Corrupt` if the bytes are not a valid RSA private key
    pub fn from_pkcs8_der(der: &[u8]) -> Result<Self> {
        let inner = RsaPrivateKey::from_pkcs8_der(der)
            .map_err(|e| Error::Corrupt(format!("Invalid private key: {}", e)))?;
        Ok(Self { inner })
    }

    /// Derive the public half.
    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            inner: RsaPublicKey::from(&self.inner),
        }
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivateKey([REDACTED])")
    }
}

/// RSA public key.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey {
    inner: RsaPublicKey,
}

impl PublicKey {
    /// Wrap data for the holder of the matching private key.
    ///
    /// # Errors
    /// - `InvalidInput` if `plaintext` is too long for one OAEP block
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        self.inner
            .encrypt(&mut os_rng(), Oaep::new::<Sha256>(), plaintext)
            .map_err(|e| Error::InvalidInput(format!("RSA-OAEP encryption failed: {}", e)))
    }

    /// SubjectPublicKeyInfo DER encoding.
    pub fn to_der(&self) -> Result<Vec<u8>> {
        self.inner
            .to_public_key_der()
            .map(|doc| doc.as_bytes().to_vec())
            .map_err(|e| Error::Crypto(format!("SPKI encoding failed: {}", e)))
    }

    /// Decode from SubjectPublicKeyInfo DER.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let inner = RsaPublicKey::from_public_key_der(der)
            .map_err(|e| Error::Corrupt(format!("Invalid public key: {}", e)))?;
        Ok(Self { inner })
    }

    /// Hex of the DER encoding, as published in identity records.
    pub fn to_hex(&self) -> Result<String> {
        Ok(hex::encode(self.to_der()?))
    }

    /// Parse the published hex form.
    pub fn from_hex(encoded: &str) -> Result<Self> {
        let der = hex::decode(encoded)
            .map_err(|_| Error::Corrupt("Public key is not valid hex".to_string()))?;
        Self::from_der(&der)
    }

    /// Modulus size in bits.
    pub fn bits(&self) -> usize {
        self.inner.size() * 8
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey(RSA-{})", self.bits())
    }
}
