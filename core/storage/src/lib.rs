//! Remote secret store abstraction for keybundle.
//!
//! This module provides a trait-based interface over a versioned key-value
//! store with check-and-set writes, plus in-memory, local filesystem and
//! KV-over-HTTP implementations and a registry for resolving them by name.
//!
//! # Design Principles
//! - Store isolation: no store-specific logic in the vault or crypto crates
//! - Async operations: all I/O is async
//! - Unified error semantics: every store reports through the common taxonomy
//! - The store is untrusted: it only ever receives ciphertext and public records

pub mod kv;
pub mod local;
pub mod memory;
pub mod registry;
pub mod store;

pub use kv::KvStore;
pub use local::LocalStore;
pub use memory::MemoryStore;
pub use registry::{create_default_registry, StoreConfig, StoreFactory, StoreRegistry};
pub use store::{SecretStore, Versioned, WriteGuard};
