//! Vault client capability and item model
//!
//! The operator only needs four read operations from the vault. They are
//! expressed as the [`VaultClient`] trait so the resolver and the drift
//! scanner can be exercised without a Connect server.

pub mod connect;
pub mod resolver;

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[cfg(test)]
use mockall::automock;

use crate::Error;

pub use connect::ConnectClient;
pub use resolver::{is_valid_id, resolve_item, ItemPath};

/// A vault as returned by title lookups
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Vault {
    /// Vault ID
    pub id: String,
    /// Vault title
    #[serde(default)]
    pub name: String,
    /// Creation time, used to break title ties
    pub created_at: DateTime<Utc>,
}

/// A single field of a vault item
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ItemField {
    /// Field label as shown in the vault
    pub label: String,
    /// Field value (may be empty)
    pub value: String,
}

/// A file attached to a vault item
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ItemFile {
    /// File ID
    pub id: String,
    /// File name as uploaded
    pub name: String,
    /// Size in bytes as reported by the vault
    pub size: u64,
    /// File content; populated by the resolver
    pub content: Option<Vec<u8>>,
}

/// Immutable snapshot of a vault item
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VaultItem {
    /// Item ID
    pub id: String,
    /// Item title
    pub title: String,
    /// ID of the vault holding the item
    pub vault_id: String,
    /// Vault-assigned version, bumped on every change
    pub version: u64,
    /// Item tags
    pub tags: BTreeSet<String>,
    /// Fields in vault order
    pub fields: Vec<ItemField>,
    /// Attached files in vault order
    pub files: Vec<ItemFile>,
    /// Creation time, used to break title ties
    pub created_at: DateTime<Utc>,
}

impl VaultItem {
    /// Canonical `vaults/<vault-id>/items/<item-id>` address
    pub fn path(&self) -> String {
        ItemPath::canonical(&self.vault_id, &self.id)
    }

    /// True when the item carries the given tag
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }
}

/// Read access to the vault
///
/// Implementations must be safe for concurrent use. Errors are reported as
/// [`Error::Vault`] (rate limiting flagged) or [`Error::NotFound`]; callers
/// decide on retries.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait VaultClient: Send + Sync {
    /// Fetch an item by vault and item ID
    async fn get_item_by_id(&self, vault_id: &str, item_id: &str) -> Result<VaultItem, Error>;

    /// List items in a vault whose title matches exactly
    ///
    /// Returned items may be summaries without fields or files.
    async fn get_items_by_title(&self, vault_id: &str, title: &str)
        -> Result<Vec<VaultItem>, Error>;

    /// Download the content of a file attached to an item
    async fn get_file_content(
        &self,
        vault_id: &str,
        item_id: &str,
        file_id: &str,
    ) -> Result<Vec<u8>, Error>;

    /// List vaults whose title matches exactly
    async fn get_vaults_by_title(&self, title: &str) -> Result<Vec<Vault>, Error>;
}
