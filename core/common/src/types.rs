//! Common types used throughout keybundle.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;
use zeroize::Zeroize;

fn validate_segment(kind: &str, value: &str) -> crate::Result<()> {
    if value.is_empty() {
        return Err(crate::Error::InvalidInput(format!("{} cannot be empty", kind)));
    }
    if value.contains('/') || value.contains('\\') {
        return Err(crate::Error::InvalidInput(format!(
            "{} cannot contain separators",
            kind
        )));
    }
    if value == "." || value == ".." {
        return Err(crate::Error::InvalidInput(format!(
            "{} cannot be a relative component",
            kind
        )));
    }
    Ok(())
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Create an identifier from a string.
            ///
            /// # Errors
            /// - Returns error if the id is empty or contains a path separator
            pub fn new(id: impl Into<String>) -> crate::Result<Self> {
                let id = id.into();
                validate_segment($label, &id)?;
                Ok(Self(id))
            }

            /// Generate a fresh random identifier.
            pub fn generate() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            /// Get the inner string value.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Get the identifier as bytes, as fed to key derivation.
            pub fn as_bytes(&self) -> &[u8] {
                self.0.as_bytes()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl TryFrom<String> for $name {
            type Error = crate::Error;

            fn try_from(value: String) -> crate::Result<Self> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> String {
                id.0
            }
        }
    };
}

string_id!(
    /// Identifier of a user identity (the owner of one `UnlockRecord`).
    IdentityId,
    "IdentityId"
);

string_id!(
    /// Identifier of a bundle.
    BundleId,
    "BundleId"
);

string_id!(
    /// Stable logical identifier of an entry. Survives updates; the storage
    /// path of the entry does not.
    EntryId,
    "EntryId"
);

/// A slash-separated path in the remote secret store.
///
/// Paths are relative to the store mount and never start with a separator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StorePath {
    components: Vec<String>,
}

/// Top-level namespace for bundles.
pub const BUNDLES_PREFIX: &str = "bundles";

/// Top-level namespace for identity records.
pub const USERS_PREFIX: &str = "users";

impl StorePath {
    /// Create a path from string components.
    ///
    /// # Errors
    /// - Returns error if there are no components
    /// - Returns error if any component is empty or contains a separator
    pub fn from_components(components: Vec<String>) -> crate::Result<Self> {
        if components.is_empty() {
            return Err(crate::Error::InvalidInput(
                "Store path cannot be empty".to_string(),
            ));
        }
        for comp in &components {
            validate_segment("Path component", comp)?;
        }
        Ok(Self { components })
    }

    /// Parse a path string, using '/' as separator.
    pub fn parse(path: &str) -> crate::Result<Self> {
        let path = path.trim_matches('/');
        if path.is_empty() {
            return Err(crate::Error::InvalidInput(
                "Store path cannot be empty".to_string(),
            ));
        }
        Self::from_components(path.split('/').map(String::from).collect())
    }

    /// Join this path with a child component.
    pub fn join(&self, child: &str) -> crate::Result<Self> {
        validate_segment("Child component", child)?;
        let mut components = self.components.clone();
        components.push(child.to_string());
        Ok(Self { components })
    }

    /// Get the parent path, if any.
    pub fn parent(&self) -> Option<Self> {
        if self.components.len() <= 1 {
            return None;
        }
        let mut components = self.components.clone();
        components.pop();
        Some(Self { components })
    }

    /// Get the last component.
    pub fn name(&self) -> &str {
        self.components.last().map(|s| s.as_str()).unwrap_or_default()
    }

    /// Get the path components.
    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// Whether `self` lies underneath `prefix`.
    pub fn starts_with(&self, prefix: &StorePath) -> bool {
        self.components.len() > prefix.components.len()
            && self.components[..prefix.components.len()] == prefix.components[..]
    }

    /// `users/{identityId}`
    pub fn user(identity: &IdentityId) -> Self {
        Self {
            components: vec![USERS_PREFIX.to_string(), identity.as_str().to_string()],
        }
    }

    /// `bundles`
    pub fn bundles() -> Self {
        Self {
            components: vec![BUNDLES_PREFIX.to_string()],
        }
    }

    /// `bundles/{bundleId}`
    pub fn bundle(bundle: &BundleId) -> Self {
        Self {
            components: vec![BUNDLES_PREFIX.to_string(), bundle.as_str().to_string()],
        }
    }

    /// `bundles/{bundleId}/info`
    pub fn bundle_info(bundle: &BundleId) -> Self {
        Self::bundle(bundle).child("info")
    }

    /// `bundles/{bundleId}/keys/{identityId}`
    pub fn grant(bundle: &BundleId, identity: &IdentityId) -> Self {
        Self::bundle(bundle).child("keys").child(identity.as_str())
    }

    /// `bundles/{bundleId}/metadata`
    pub fn metadata(bundle: &BundleId) -> Self {
        Self::bundle(bundle).child("metadata")
    }

    /// `bundles/{bundleId}/entries/{object}`
    ///
    /// # Errors
    /// - Returns error if `object` is not a single path component
    pub fn entry(bundle: &BundleId, object: &str) -> crate::Result<Self> {
        Self::bundle(bundle).child("entries").join(object)
    }

    // Only for components known to be valid.
    fn child(mut self, component: &str) -> Self {
        self.components.push(component.to_string());
        self
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.components.join("/"))
    }
}

/// Sensitive data wrapper that zeroizes on drop.
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct SensitiveBytes(Vec<u8>);

impl SensitiveBytes {
    /// Create new sensitive bytes.
    pub fn new(data: Vec<u8>) -> Self {
        Self(data)
    }

    /// Get a reference to the inner bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Get the length.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&[u8]> for SensitiveBytes {
    fn from(data: &[u8]) -> Self {
        Self(data.to_vec())
    }
}

impl fmt::Debug for SensitiveBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SensitiveBytes([REDACTED; {} bytes])", self.0.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_id_creation() {
        let id = IdentityId::new("3f1c-entity").unwrap();
        assert_eq!(id.as_str(), "3f1c-entity");
    }

    #[test]
    fn test_ids_reject_empty_and_separators() {
        assert!(IdentityId::new("").is_err());
        assert!(BundleId::new("a/b").is_err());
        assert!(EntryId::new("..").is_err());
    }

    #[test]
    fn test_generated_ids_differ() {
        assert_ne!(BundleId::generate(), BundleId::generate());
    }

    #[test]
    fn test_id_serde_validates() {
        let ok: BundleId = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(ok.as_str(), "abc");
        assert!(serde_json::from_str::<BundleId>("\"a/b\"").is_err());
    }

    #[test]
    fn test_store_path_parse() {
        let path = StorePath::parse("/bundles/b1/metadata/").unwrap();
        assert_eq!(path.components(), &["bundles", "b1", "metadata"]);
        assert_eq!(path.to_string(), "bundles/b1/metadata");
        assert!(StorePath::parse("/").is_err());
        assert!(StorePath::parse("a//b").is_err());
    }

    #[test]
    fn test_store_layout() {
        let bundle = BundleId::new("b1").unwrap();
        let who = IdentityId::new("u1").unwrap();

        assert_eq!(StorePath::grant(&bundle, &who).to_string(), "bundles/b1/keys/u1");
        assert_eq!(StorePath::metadata(&bundle).to_string(), "bundles/b1/metadata");
        assert_eq!(
            StorePath::entry(&bundle, "e9").unwrap().to_string(),
            "bundles/b1/entries/e9"
        );
        assert_eq!(StorePath::bundle_info(&bundle).to_string(), "bundles/b1/info");
        assert_eq!(StorePath::user(&who).to_string(), "users/u1");
        assert!(StorePath::entry(&bundle, "../keys").is_err());
    }

    #[test]
    fn test_store_path_parent_and_prefix() {
        let bundle = BundleId::new("b1").unwrap();
        let entry = StorePath::entry(&bundle, "e9").unwrap();
        assert_eq!(entry.parent().unwrap().to_string(), "bundles/b1/entries");
        assert_eq!(entry.name(), "e9");
        assert!(entry.starts_with(&StorePath::bundle(&bundle)));
        assert!(!StorePath::bundle(&bundle).starts_with(&StorePath::bundle(&bundle)));
        assert!(StorePath::bundles().parent().is_none());
    }

    #[test]
    fn test_sensitive_bytes_debug_redacted() {
        let secret = SensitiveBytes::new(b"typingcats".to_vec());
        assert_eq!(format!("{:?}", secret), "SensitiveBytes([REDACTED; 10 bytes])");
    }
}
