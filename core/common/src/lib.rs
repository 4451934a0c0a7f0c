//! Common utilities and types shared across the keybundle crates.
//!
//! This module provides the error taxonomy every component reports through,
//! the identifier and store-path types used to address remote objects, and
//! the field-name codec used at the wire boundary.

pub mod case;
pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{BundleId, EntryId, IdentityId, SensitiveBytes, StorePath};
