//! Cryptographic primitives for keybundle.
//!
//! This module provides:
//! - Authenticated encryption using AES-256-GCM
//! - Key wrapping using RSA-OAEP (SHA-256)
//! - Two-secret key derivation (2SKD) built from PBKDF2-HMAC-SHA256 and HKDF-SHA256
//! - Secure key types with automatic zeroization
//!
//! # Security Guarantees
//! - All symmetric key material is zeroized on drop
//! - No plaintext or key material is ever logged
//! - Key `Debug` output is redacted

pub mod aead;
pub mod asym;
pub mod kdf;
pub mod keys;
pub mod random;

pub use aead::{decrypt, encrypt, Sealed};
pub use asym::{KeyPair, PrivateKey, PublicKey};
pub use kdf::{derive_unlock_key, KdfParams};
pub use keys::{BundleKey, DeviceSecret, Salt, UnlockKey, VaultKey};
