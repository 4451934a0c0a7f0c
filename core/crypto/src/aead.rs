//! Authenticated encryption using AES-256-GCM.
//!
//! Every encryption draws a fresh random 96-bit IV; the IV travels next to the
//! ciphertext in a [`Sealed`] value, which is also the `{ ciphertext, iv }`
//! payload shape written to the remote store.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use serde::{Deserialize, Serialize};

use crate::keys::KEY_LENGTH;
use crate::random::random_array;
use keybundle_common::{Error, Result};

/// IV size for AES-GCM (12 bytes).
pub const IV_SIZE: usize = 12;

/// Authentication tag size (16 bytes).
pub const TAG_SIZE: usize = 16;

/// Algorithm tag recorded next to sealed keys.
pub const ALGORITHM: &str = "A256GCM";

/// Ciphertext (with appended tag) and the IV it was produced under.
///
/// Serializes as `{ "ciphertext": hex, "iv": hex }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Sealed {
    /// Encrypted data followed by the GCM tag.
    #[serde(with = "hex")]
    pub ciphertext: Vec<u8>,
    /// Initialization vector.
    #[serde(with = "hex")]
    pub iv: [u8; IV_SIZE],
}

fn cipher(key: &[u8]) -> Result<Aes256Gcm> {
    if key.len() != KEY_LENGTH {
        return Err(Error::InvalidInput(format!(
            "Invalid key length: expected {}, got {}",
            KEY_LENGTH,
            key.len()
        )));
    }
    Aes256Gcm::new_from_slice(key).map_err(|e| Error::Crypto(format!("Invalid key: {}", e)))
}

/// Encrypt plaintext using AES-256-GCM under a fresh random IV.
///
/// # Preconditions
/// - `key` must be exactly KEY_LENGTH bytes
///
/// # Postconditions
/// - `ciphertext.len() == plaintext.len() + TAG_SIZE`
///
/// # Errors
/// - `InvalidInput` if the key length is incorrect
pub fn encrypt(key: &[u8], plaintext: &[u8]) -> Result<Sealed> {
    let iv: [u8; IV_SIZE] = random_array();
    let ciphertext = encrypt_with_iv(key, &iv, plaintext)?;
    Ok(Sealed { ciphertext, iv })
}

/// Decrypt and authenticate a sealed value.
///
/// # Errors
/// - `InvalidInput` if the key length is incorrect
/// - `Corrupt` if the ciphertext is truncated, tampered with, or sealed under another key
pub fn decrypt(key: &[u8], sealed: &Sealed) -> Result<Vec<u8>> {
    decrypt_with_iv(key, &sealed.iv, &sealed.ciphertext)
}

/// Encrypt plaintext with a caller-chosen IV.
///
/// # Warning
/// Reusing an IV under the same key breaks GCM completely. Prefer [`encrypt`].
pub fn encrypt_with_iv(key: &[u8], iv: &[u8; IV_SIZE], plaintext: &[u8]) -> Result<Vec<u8>> {
    cipher(key)?
        .encrypt(Nonce::from_slice(iv), plaintext)
        .map_err(|e| Error::Crypto(format!("Encryption failed: {}", e)))
}

/// Decrypt ciphertext produced under a known IV.
pub fn decrypt_with_iv(key: &[u8], iv: &[u8; IV_SIZE], ciphertext: &[u8]) -> Result<Vec<u8>> {
    let cipher = cipher(key)?;

    if ciphertext.len() < TAG_SIZE {
        return Err(Error::Corrupt("Ciphertext too short".to_string()));
    }

    cipher
        .decrypt(Nonce::from_slice(iv), ciphertext)
        .map_err(|_| Error::Corrupt("Authentication failed".to_string()))
}
