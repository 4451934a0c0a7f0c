//! Bundles and their membership.
//!
//! The bundle record itself is not secret: it is stored in clear at
//! `bundles/{bundleId}/info` so members can find the bundles shared with them.
//! Entry names and contents live in the encrypted metadata document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use crate::retry::{RetryConfig, RetryExecutor};
use keybundle_common::case::{from_wire, to_wire};
use keybundle_common::{BundleId, Error, IdentityId, Result, StorePath};
use keybundle_storage::{SecretStore, WriteGuard};

/// What a member may do with a bundle's entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Read,
    Create,
    Update,
    Delete,
    List,
}

impl Capability {
    /// Every capability, as granted to owners.
    pub const ALL: [Capability; 5] = [
        Capability::Read,
        Capability::Create,
        Capability::Update,
        Capability::Delete,
        Capability::List,
    ];

    /// Read-only access.
    pub const READ_ONLY: [Capability; 2] = [Capability::Read, Capability::List];

    /// Parse a capability name.
    pub fn parse(name: &str) -> Result<Self> {
        match name.trim() {
            "read" => Ok(Capability::Read),
            "create" => Ok(Capability::Create),
            "update" => Ok(Capability::Update),
            "delete" => Ok(Capability::Delete),
            "list" => Ok(Capability::List),
            other => Err(Error::InvalidInput(format!("Unknown capability: {}", other))),
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::Read => "read",
            Capability::Create => "create",
            Capability::Update => "update",
            Capability::Delete => "delete",
            Capability::List => "list",
        };
        write!(f, "{}", name)
    }
}

/// An identity a bundle is shared with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct Member {
    pub identity_id: IdentityId,
    pub capabilities: Vec<Capability>,
    /// Admins may change membership.
    pub is_admin: bool,
    /// When the bundle was first shared with this member.
    pub shared_at: DateTime<Utc>,
}

impl Member {
    /// A new member, shared with now.
    pub fn new(identity_id: IdentityId, capabilities: &[Capability], is_admin: bool) -> Self {
        let mut capabilities = capabilities.to_vec();
        capabilities.sort();
        capabilities.dedup();
        Self {
            identity_id,
            capabilities,
            is_admin,
            shared_at: Utc::now(),
        }
    }
}

/// A named, shareable collection of entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct Bundle {
    pub id: BundleId,
    /// Store prefix holding the bundle's keys, metadata and entries.
    pub path: String,
    pub name: String,
    pub owner_id: IdentityId,
    pub created: DateTime<Utc>,
    /// Everyone the bundle is shared with; the owner is implicit.
    pub members: Vec<Member>,
}

impl Bundle {
    /// Whether `identity` owns the bundle.
    pub fn is_owner(&self, identity: &IdentityId) -> bool {
        &self.owner_id == identity
    }

    /// Membership record of `identity`, if shared with it.
    pub fn member(&self, identity: &IdentityId) -> Option<&Member> {
        self.members.iter().find(|m| &m.identity_id == identity)
    }

    /// Whether `identity` may see the bundle at all.
    pub fn has_access(&self, identity: &IdentityId) -> bool {
        self.is_owner(identity) || self.member(identity).is_some()
    }

    /// Whether `identity` may change membership.
    pub fn can_administer(&self, identity: &IdentityId) -> bool {
        self.is_owner(identity) || self.member(identity).is_some_and(|m| m.is_admin)
    }

    /// Whether `identity` holds `capability` on the bundle's entries.
    pub fn allows(&self, identity: &IdentityId, capability: Capability) -> bool {
        self.is_owner(identity)
            || self
                .member(identity)
                .is_some_and(|m| m.capabilities.contains(&capability))
    }
}

/// Stores bundle records.
#[derive(Clone)]
pub struct BundleRegistry {
    store: Arc<dyn SecretStore>,
    retry: RetryConfig,
}

impl BundleRegistry {
    /// Create a registry over a store.
    pub fn new(store: Arc<dyn SecretStore>, retry: RetryConfig) -> Self {
        Self { store, retry }
    }

    /// Create a new bundle owned by `owner`.
    ///
    /// Only the record is written; the key and metadata are created the first
    /// time the owner opens the bundle.
    pub async fn create(&self, owner: &IdentityId, name: &str) -> Result<Bundle> {
        if name.trim().is_empty() {
            return Err(Error::InvalidInput("Bundle name cannot be empty".to_string()));
        }

        let id = BundleId::generate();
        let bundle = Bundle {
            path: StorePath::bundle(&id).to_string(),
            id,
            name: name.to_string(),
            owner_id: owner.clone(),
            created: Utc::now(),
            members: Vec::new(),
        };

        self.store
            .put(
                &StorePath::bundle_info(&bundle.id),
                to_wire(&bundle)?,
                WriteGuard::CreateOnly,
            )
            .await
            .map_err(|e| match e {
                Error::Conflict(_) => {
                    Error::AlreadyExists(format!("Bundle {} already exists", bundle.id))
                }
                other => other,
            })?;

        info!(bundle = %bundle.id, owner = %owner, "Created bundle");
        Ok(bundle)
    }

    /// Fetch a bundle record.
    ///
    /// # Errors
    /// - `NotFound` if there is no such bundle
    pub async fn get(&self, id: &BundleId) -> Result<Bundle> {
        Ok(self.get_versioned(id).await?.0)
    }

    async fn get_versioned(&self, id: &BundleId) -> Result<(Bundle, u64)> {
        let doc = self
            .store
            .get(&StorePath::bundle_info(id))
            .await
            .map_err(|e| match e {
                Error::NotFound(_) => Error::NotFound(format!("Bundle {} not found", id)),
                other => other,
            })?;
        Ok((from_wire(&doc.data)?, doc.version))
    }

    /// Bundles `identity` owns or is a member of, oldest first.
    pub async fn list_for(&self, identity: &IdentityId) -> Result<Vec<Bundle>> {
        let mut bundles = Vec::new();

        for child in self.store.list(&StorePath::bundles()).await? {
            let Some(name) = child.strip_suffix('/') else {
                continue;
            };
            let Ok(id) = BundleId::new(name) else {
                continue;
            };
            match self.get(&id).await {
                Ok(bundle) if bundle.has_access(identity) => bundles.push(bundle),
                Ok(_) => {}
                // Bundle folders without a record are partially deleted bundles.
                Err(Error::NotFound(_)) => debug!(bundle = %id, "Skipping bundle without record"),
                Err(e) => return Err(e),
            }
        }

        bundles.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.id.cmp(&b.id)));
        Ok(bundles)
    }

    /// Add a member, or update an existing member's rights.
    ///
    /// An updated member keeps its original `shared_at`.
    ///
    /// # Errors
    /// - `NoAccess` if `actor` is neither the owner nor an admin member
    /// - `InvalidInput` if `member` is the owner
    /// - `ConflictExhausted` if concurrent membership changes kept winning
    pub async fn upsert_member(
        &self,
        bundle: &BundleId,
        actor: &IdentityId,
        member: Member,
    ) -> Result<Bundle> {
        let executor = RetryExecutor::new(self.retry.clone());
        let member = &member;

        executor
            .on_conflict(|_| async move {
                let (mut record, version) = self.get_versioned(bundle).await?;

                if !record.can_administer(actor) {
                    return Err(Error::NoAccess(format!(
                        "{} may not change members of bundle {}",
                        actor, bundle
                    )));
                }
                if record.is_owner(&member.identity_id) {
                    return Err(Error::InvalidInput(
                        "The owner cannot be added as a member".to_string(),
                    ));
                }

                let mut updated = member.clone();
                match record
                    .members
                    .iter_mut()
                    .find(|m| m.identity_id == member.identity_id)
                {
                    Some(existing) => {
                        updated.shared_at = existing.shared_at;
                        *existing = updated;
                    }
                    None => record.members.push(updated),
                }

                self.store
                    .put(
                        &StorePath::bundle_info(bundle),
                        to_wire(&record)?,
                        WriteGuard::Version(version),
                    )
                    .await?;

                info!(bundle = %bundle, member = %member.identity_id, "Updated bundle membership");
                Ok(record)
            })
            .await
    }
}
