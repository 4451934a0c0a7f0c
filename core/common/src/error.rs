//! Common error types for keybundle.

use thiserror::Error;

/// Top-level error type for keybundle operations.
///
/// Callers branch on the variant; the message carries context for logs.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed key sizes, bad parameters or invalid documents supplied by the caller.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The unlock envelope failed authentication.
    ///
    /// Never states which of the two secrets was wrong.
    #[error("Wrong credentials")]
    WrongCredentials,

    /// No usable key grant exists for this identity, or it is not allowed
    /// to perform the operation.
    #[error("No access: {0}")]
    NoAccess(String),

    /// A check-and-set write lost against a concurrent writer.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The check-and-set retry budget was used up.
    #[error("Conflict persisted after {attempts} attempts")]
    ConflictExhausted { attempts: u32 },

    /// Object or path missing.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A create-only write found an existing object.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Object present but decryption or parsing failed.
    #[error("Corrupt: {0}")]
    Corrupt(String),

    /// Network or store unavailable.
    #[error("Transient failure: {0}")]
    Transient(String),

    /// A cryptographic primitive failed for a reason other than authentication.
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// Encoding one of our own records failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the operation may succeed if simply tried again later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transient(_) | Error::Io(_))
    }

    /// Whether the operation must not be retried without new input.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::WrongCredentials | Error::InvalidInput(_))
    }

    /// Whether this is a lost check-and-set race.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
