//! Key hierarchy and entry engine for keybundle.
//!
//! This module provides:
//! - Unlock envelopes protecting each identity's key pair behind 2SKD
//! - Sessions holding unlocked keys with explicit lock semantics
//! - Bundle records, membership and per-member key grants
//! - Encrypted entries and the copy-on-write metadata protocol
//!
//! # Architecture
//! The vault crate sits between callers and a [`SecretStore`](keybundle_storage::SecretStore),
//! handling all encryption and decryption. The store only sees ciphertext,
//! wrapped keys and public records.

pub mod bundle;
pub mod client;
pub mod config;
pub mod entries;
pub mod entry;
pub mod envelope;
pub mod identity;
pub mod keys;
pub mod metadata;
pub mod retry;
pub mod session;

pub use bundle::{Bundle, BundleRegistry, Capability, Member};
pub use client::VaultClient;
pub use config::{ClientConfig, EnvelopeParams, DEFAULT_ACCOUNT_SCOPE};
pub use entries::{DeleteOutcome, EntryStore, PutOutcome};
pub use entry::{Entry, Field};
pub use envelope::{SealedKey, UnlockRecord};
pub use identity::IdentityDirectory;
pub use keys::{BundleKeyGrant, BundleKeyManager};
pub use metadata::{BundleMetadataDocument, EntryDescriptor};
pub use retry::{RetryConfig, RetryExecutor};
pub use session::{Session, SessionHandle, SessionState};
