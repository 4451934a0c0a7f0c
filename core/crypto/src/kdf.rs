//! Two-secret key derivation (2SKD).
//!
//! The unlock key is the XOR of two independently keyed derivations:
//!
//! 1. `salt_key = HKDF-SHA256(ikm = params.salt, salt = identity_id, info = "2SKD HKDF 1")`
//! 2. `password_key = PBKDF2-HMAC-SHA256(password, salt_key, params.iterations)`
//! 3. `secret_key = HKDF-SHA256(ikm = device_secret, salt = account_scope, info = "2SKD HKDF 2")`
//! 4. `unlock_key = password_key XOR secret_key`
//!
//! The iteration count is recorded at registration and must be reused verbatim
//! at every unlock.

use hkdf::Hkdf;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::keys::{Salt, UnlockKey, DEVICE_SECRET_LENGTH, KEY_LENGTH};
use keybundle_common::{Error, Result};

/// Default PBKDF2 iteration count.
pub const DEFAULT_ITERATIONS: u32 = 650_000;

/// Lowest PBKDF2 iteration count accepted.
pub const MIN_ITERATIONS: u32 = 100_000;

/// Name of the derivation scheme, recorded in unlock records.
pub const SCHEME: &str = "2SKD";

const INFO_SALT: &[u8] = b"2SKD HKDF 1";
const INFO_SECRET: &[u8] = b"2SKD HKDF 2";

/// Public tuning and salt for the password half of 2SKD.
///
/// Serialized with the record naming convention (`Iterations`, `Salt`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct KdfParams {
    /// PBKDF2 iteration count.
    pub iterations: u32,
    /// Random 16-byte salt.
    pub salt: Salt,
}

impl KdfParams {
    /// Fresh parameters for a new registration: random salt, default iterations.
    pub fn generate() -> Self {
        Self {
            iterations: DEFAULT_ITERATIONS,
            salt: Salt::generate(),
        }
    }

    /// Fresh parameters with an explicit iteration count.
    ///
    /// # Errors
    /// - `InvalidInput` if `iterations` is below MIN_ITERATIONS
    pub fn with_iterations(iterations: u32) -> Result<Self> {
        let params = Self {
            iterations,
            salt: Salt::generate(),
        };
        params.validate()?;
        Ok(params)
    }

    /// Check the parameters against the safety floor.
    pub fn validate(&self) -> Result<()> {
        if self.iterations < MIN_ITERATIONS {
            return Err(Error::InvalidInput(format!(
                "KDF iterations {} below minimum {}",
                self.iterations, MIN_ITERATIONS
            )));
        }
        Ok(())
    }
}

/// HKDF-SHA256 extract-and-expand to a 32-byte output.
pub fn hkdf_sha256(ikm: &[u8], salt: &[u8], info: &[u8]) -> Result<Zeroizing<[u8; KEY_LENGTH]>> {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
    let mut okm = Zeroizing::new([0u8; KEY_LENGTH]);
    hk.expand(info, okm.as_mut())
        .map_err(|e| Error::Crypto(format!("HKDF expand failed: {}", e)))?;
    Ok(okm)
}

/// PBKDF2-HMAC-SHA256 to a 32-byte output.
pub fn pbkdf2_sha256(password: &[u8], salt: &[u8], iterations: u32) -> Zeroizing<[u8; KEY_LENGTH]> {
    let mut out = Zeroizing::new([0u8; KEY_LENGTH]);
    pbkdf2::pbkdf2_hmac::<Sha256>(password, salt, iterations, out.as_mut());
    out
}

/// Derive the unlock key from a password and a device secret.
///
/// # Preconditions
/// - `password` must not be empty
/// - `device_secret` must be exactly DEVICE_SECRET_LENGTH bytes
/// - `params.iterations` must be at least MIN_ITERATIONS
///
/// # Postconditions
/// - Deterministic: the same five inputs always yield the same key
///
/// # Errors
/// - `InvalidInput` for any violated precondition, before any hashing is done
///
/// # Security
/// - Neither secret is stored or logged
/// - Intermediate keys are zeroized
pub fn derive_unlock_key(
    password: &[u8],
    device_secret: &[u8],
    account_scope: &[u8],
    identity_id: &[u8],
    params: &KdfParams,
) -> Result<UnlockKey> {
    if password.is_empty() {
        return Err(Error::InvalidInput("Password cannot be empty".to_string()));
    }
    if device_secret.len() != DEVICE_SECRET_LENGTH {
        return Err(Error::InvalidInput(format!(
            "Invalid device secret length: expected {}, got {}",
            DEVICE_SECRET_LENGTH,
            device_secret.len()
        )));
    }
    params.validate()?;

    let salt_key = hkdf_sha256(params.salt.as_bytes(), identity_id, INFO_SALT)?;
    let password_key = pbkdf2_sha256(password, salt_key.as_ref(), params.iterations);
    let secret_key = hkdf_sha256(device_secret, account_scope, INFO_SECRET)?;

    let mut unlock = [0u8; KEY_LENGTH];
    for (out, (p, s)) in unlock
        .iter_mut()
        .zip(password_key.iter().zip(secret_key.iter()))
    {
        *out = p ^ s;
    }

    Ok(UnlockKey::from_bytes(unlock))
}
