//! Entry payloads: the secret fields of one stored item.

use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use keybundle_common::{Error, Result};
use keybundle_crypto::aead::{self, Sealed};
use keybundle_crypto::BundleKey;

/// Entry type of [`Entry::password`].
pub const PASSWORD_TYPE: &str = "password";

/// One labelled value of an entry.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Field {
    #[serde(rename = "type")]
    pub field_type: String,
    pub label: String,
    #[serde(default)]
    pub placeholder: String,
    pub value: String,
}

impl Field {
    /// A field with no placeholder.
    pub fn new(field_type: &str, label: &str, value: impl Into<String>) -> Self {
        Self {
            field_type: field_type.to_string(),
            label: label.to_string(),
            placeholder: String::new(),
            value: value.into(),
        }
    }

    /// Whether the value should be hidden when displayed.
    pub fn is_concealed(&self) -> bool {
        self.field_type == "password"
    }
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("type", &self.field_type)
            .field("label", &self.label)
            .field("value", &"[REDACTED]")
            .finish()
    }
}

/// Decrypted contents of an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Entry {
    pub name: String,
    #[serde(rename = "type")]
    pub entry_type: String,
    /// Fields every entry of this type carries.
    pub core: Vec<Field>,
    /// User-added fields.
    #[serde(default)]
    pub more: Vec<Field>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Entry {
    /// An entry with no fields.
    pub fn new(name: impl Into<String>, entry_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entry_type: entry_type.into(),
            core: Vec::new(),
            more: Vec::new(),
            tags: Vec::new(),
        }
    }

    /// A login with a username and password.
    pub fn password(
        name: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        let mut entry = Self::new(name, PASSWORD_TYPE);
        entry.core.push(Field::new("text", "Username", username));
        entry.core.push(Field::new("password", "Password", password));
        entry
    }

    /// Add a user-defined field.
    pub fn with_field(mut self, field: Field) -> Self {
        self.more.push(field);
        self
    }

    /// Add a tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// First field with the given label, core fields first.
    pub fn field(&self, label: &str) -> Option<&Field> {
        self.core
            .iter()
            .chain(self.more.iter())
            .find(|f| f.label == label)
    }

    /// Check the entry can be stored.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidInput("Entry name cannot be empty".to_string()));
        }
        if self.entry_type.is_empty() {
            return Err(Error::InvalidInput("Entry type cannot be empty".to_string()));
        }
        Ok(())
    }

    /// Encrypt under a bundle key.
    pub fn seal(&self, key: &BundleKey) -> Result<Sealed> {
        let plaintext = Zeroizing::new(
            serde_json::to_vec(self).map_err(|e| Error::Serialization(e.to_string()))?,
        );
        aead::encrypt(key.as_bytes(), &plaintext)
    }

    /// Decrypt an entry.
    ///
    /// # Errors
    /// - `Corrupt` if the payload fails authentication or does not parse
    pub fn open(key: &BundleKey, sealed: &Sealed) -> Result<Self> {
        let plaintext = Zeroizing::new(
            aead::decrypt(key.as_bytes(), sealed)
                .map_err(|_| Error::Corrupt("Entry cannot be decrypted".to_string()))?,
        );
        serde_json::from_slice(&plaintext).map_err(|e| Error::Corrupt(format!("Invalid entry: {}", e)))
    }
}
