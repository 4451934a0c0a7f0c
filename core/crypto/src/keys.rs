//! Key types with secure memory handling.
//!
//! All key types automatically zeroize their memory on drop to prevent
//! sensitive data from persisting in memory.

use serde::{Deserialize, Serialize};
use std::fmt;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::random::random_array;
use keybundle_common::{Error, Result};

/// Length of symmetric keys in bytes (256-bit).
pub const KEY_LENGTH: usize = 32;

/// Length of the KDF salt in bytes.
pub const SALT_LENGTH: usize = 16;

/// Length of the device secret in bytes.
pub const DEVICE_SECRET_LENGTH: usize = 16;

fn exact<const N: usize>(what: &str, bytes: &[u8]) -> Result<[u8; N]> {
    bytes.try_into().map_err(|_| {
        Error::InvalidInput(format!(
            "Invalid {} length: expected {}, got {}",
            what,
            N,
            bytes.len()
        ))
    })
}

/// Output of two-secret key derivation.
///
/// Only ever derived, never stored. Protects the vault key.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct UnlockKey {
    key: [u8; KEY_LENGTH],
}

impl UnlockKey {
    /// Create an unlock key from raw bytes.
    pub fn from_bytes(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Get the key bytes.
    ///
    /// # Security
    /// The returned slice should be used immediately and not stored.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }
}

impl PartialEq for UnlockKey {
    fn eq(&self, other: &Self) -> bool {
        self.key.ct_eq(&other.key).into()
    }
}

impl fmt::Debug for UnlockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UnlockKey([REDACTED])")
    }
}

/// Random key escrowed under the unlock key; encrypts the user's private key.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct VaultKey {
    key: [u8; KEY_LENGTH],
}

impl VaultKey {
    /// Generate a random vault key.
    pub fn generate() -> Self {
        Self {
            key: random_array(),
        }
    }

    /// Create from a decrypted byte slice.
    ///
    /// # Errors
    /// - Returns error if the slice is not KEY_LENGTH bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        Ok(Self {
            key: exact("vault key", bytes)?,
        })
    }

    /// Get the key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }
}

impl fmt::Debug for VaultKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VaultKey([REDACTED])")
    }
}

/// Symmetric key shared by all members of one bundle.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct BundleKey {
    key: [u8; KEY_LENGTH],
}

impl BundleKey {
    /// Generate a random bundle key.
    pub fn generate() -> Self {
        Self {
            key: random_array(),
        }
    }

    /// Create from an unwrapped byte slice.
    ///
    /// # Errors
    /// - Returns error if the slice is not KEY_LENGTH bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        Ok(Self {
            key: exact("bundle key", bytes)?,
        })
    }

    /// Get the key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }
}

impl PartialEq for BundleKey {
    fn eq(&self, other: &Self) -> bool {
        self.key.ct_eq(&other.key).into()
    }
}

impl fmt::Debug for BundleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BundleKey([REDACTED])")
    }
}

/// The second 2SKD secret, held on the user's devices and never sent anywhere.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DeviceSecret {
    secret: [u8; DEVICE_SECRET_LENGTH],
}

impl DeviceSecret {
    /// Generate a fresh random device secret.
    pub fn generate() -> Self {
        Self {
            secret: random_array(),
        }
    }

    /// Create from bytes.
    ///
    /// # Errors
    /// - `InvalidInput` unless exactly DEVICE_SECRET_LENGTH bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        Ok(Self {
            secret: exact("device secret", bytes)?,
        })
    }

    /// Parse from a hex string.
    pub fn from_hex(encoded: &str) -> Result<Self> {
        let bytes = zeroize::Zeroizing::new(
            hex::decode(encoded.trim())
                .map_err(|_| Error::InvalidInput("Device secret is not valid hex".to_string()))?,
        );
        Self::from_slice(&bytes)
    }

    /// Hex encoding, for showing the secret to its owner once.
    pub fn to_hex(&self) -> String {
        hex::encode(self.secret)
    }

    /// Get the secret bytes.
    pub fn as_bytes(&self) -> &[u8; DEVICE_SECRET_LENGTH] {
        &self.secret
    }
}

impl fmt::Debug for DeviceSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceSecret([REDACTED])")
    }
}

/// Public salt for the password half of 2SKD.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Salt(#[serde(with = "hex")] [u8; SALT_LENGTH]);

impl Salt {
    /// Generate a random salt.
    pub fn generate() -> Self {
        Self(random_array())
    }

    /// Create from bytes.
    pub fn from_bytes(bytes: [u8; SALT_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Get the salt bytes.
    pub fn as_bytes(&self) -> &[u8; SALT_LENGTH] {
        &self.0
    }
}
