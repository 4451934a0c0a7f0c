//! The encrypted metadata document of a bundle.
//!
//! One document per bundle lists every logical entry and where its current
//! ciphertext lives. The document is sealed under the bundle key and stored
//! at `bundles/{bundleId}/metadata`; its version is the store's CAS token.

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use keybundle_common::{EntryId, Error, Result};
use keybundle_crypto::aead::{self, Sealed};
use keybundle_crypto::BundleKey;

/// Non-secret description of one entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EntryDescriptor {
    /// Stable logical identifier, kept across updates.
    pub id: EntryId,
    pub name: String,
    #[serde(rename = "type")]
    pub entry_type: String,
    /// Object name of the current ciphertext under `bundles/{bundleId}/entries/`.
    /// Replaced on every update.
    pub path: String,
    /// Starts at 0, bumped by each update.
    pub version: u64,
}

/// Decrypted metadata of a bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BundleMetadataDocument {
    /// Store version this document was read at; 0 if never written.
    #[serde(skip)]
    pub version: u64,
    pub bundle_name: String,
    pub entries: Vec<EntryDescriptor>,
}

impl BundleMetadataDocument {
    /// An empty document, not yet written.
    pub fn new(bundle_name: impl Into<String>) -> Self {
        Self {
            version: 0,
            bundle_name: bundle_name.into(),
            entries: Vec::new(),
        }
    }

    /// Descriptor of an entry.
    pub fn find(&self, id: &EntryId) -> Option<&EntryDescriptor> {
        self.entries.iter().find(|d| &d.id == id)
    }

    /// Replace the descriptor with the same id, or append it.
    ///
    /// Returns the replaced descriptor.
    pub fn upsert(&mut self, descriptor: EntryDescriptor) -> Option<EntryDescriptor> {
        match self.entries.iter_mut().find(|d| d.id == descriptor.id) {
            Some(existing) => Some(std::mem::replace(existing, descriptor)),
            None => {
                self.entries.push(descriptor);
                None
            }
        }
    }

    /// Remove a descriptor, returning it.
    pub fn remove(&mut self, id: &EntryId) -> Option<EntryDescriptor> {
        let index = self.entries.iter().position(|d| &d.id == id)?;
        Some(self.entries.remove(index))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the bundle has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Encrypt the document under a bundle key.
    pub fn seal(&self, key: &BundleKey) -> Result<Sealed> {
        let plaintext = Zeroizing::new(
            serde_json::to_vec(self).map_err(|e| Error::Serialization(e.to_string()))?,
        );
        aead::encrypt(key.as_bytes(), &plaintext)
    }

    /// Decrypt a sealed document read at `version`.
    ///
    /// # Errors
    /// - `Corrupt` if the document fails authentication or does not parse
    pub fn open(key: &BundleKey, sealed: &Sealed, version: u64) -> Result<Self> {
        let plaintext = Zeroizing::new(
            aead::decrypt(key.as_bytes(), sealed)
                .map_err(|_| Error::Corrupt("Metadata cannot be decrypted".to_string()))?,
        );
        let mut document: Self = serde_json::from_slice(&plaintext)
            .map_err(|e| Error::Corrupt(format!("Invalid metadata: {}", e)))?;
        document.version = version;
        Ok(document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(id: &str, path: &str, version: u64) -> EntryDescriptor {
        EntryDescriptor {
            id: EntryId::new(id).unwrap(),
            name: format!("Entry {}", id),
            entry_type: "password".to_string(),
            path: path.to_string(),
            version,
        }
    }

    #[test]
    fn test_upsert_replaces_by_id() {
        let mut doc = BundleMetadataDocument::new("Personal");
        assert!(doc.is_empty());

        assert!(doc.upsert(descriptor("e1", "p1", 0)).is_none());
        assert!(doc.upsert(descriptor("e2", "p2", 0)).is_none());

        let previous = doc.upsert(descriptor("e1", "p3", 1)).unwrap();
        assert_eq!(previous.path, "p1");
        assert_eq!(doc.len(), 2);

        let current = doc.find(&EntryId::new("e1").unwrap()).unwrap();
        assert_eq!(current.path, "p3");
        assert_eq!(current.version, 1);
        // Order is preserved on replace.
        assert_eq!(doc.entries[0].id.as_str(), "e1");
    }

    #[test]
    fn test_remove() {
        let mut doc = BundleMetadataDocument::new("Personal");
        doc.upsert(descriptor("e1", "p1", 0));

        assert_eq!(doc.remove(&EntryId::new("e1").unwrap()).unwrap().path, "p1");
        assert!(doc.remove(&EntryId::new("e1").unwrap()).is_none());
        assert!(doc.is_empty());
    }

    #[test]
    fn test_seal_and_open() {
        let key = BundleKey::generate();
        let mut doc = BundleMetadataDocument::new("Team");
        doc.upsert(descriptor("e1", "p1", 0));

        let sealed = doc.seal(&key).unwrap();
        let opened = BundleMetadataDocument::open(&key, &sealed, 7).unwrap();

        assert_eq!(opened.version, 7);
        assert_eq!(opened.bundle_name, "Team");
        assert_eq!(opened.entries, doc.entries);
    }

    #[test]
    fn test_wrong_key_or_garbage_is_corrupt() {
        let doc = BundleMetadataDocument::new("Team");
        let sealed = doc.seal(&BundleKey::generate()).unwrap();
        assert!(matches!(
            BundleMetadataDocument::open(&BundleKey::generate(), &sealed, 1),
            Err(Error::Corrupt(_))
        ));

        let key = BundleKey::generate();
        let garbage = aead::encrypt(key.as_bytes(), br#"{"bundleName":"x"}"#).unwrap();
        assert!(matches!(
            BundleMetadataDocument::open(&key, &garbage, 1),
            Err(Error::Corrupt(_))
        ));
    }

    #[test]
    fn test_plaintext_field_names() {
        let mut doc = BundleMetadataDocument::new("Team");
        doc.upsert(descriptor("e1", "p1", 0));
        let value = serde_json::to_value(&doc).unwrap();

        assert_eq!(value["bundleName"], "Team");
        assert_eq!(value["entries"][0]["type"], "password");
        assert!(value.get("version").is_none());
    }
}
