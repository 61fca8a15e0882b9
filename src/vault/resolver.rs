//! Vault item resolution
//!
//! Turns a `vaults/<vault>/items/<item>` address into a fully populated
//! [`VaultItem`]. Either segment may be an ID or a title; titles that match
//! more than one object resolve to the oldest one.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::{VaultClient, VaultItem};
use crate::Error;

const VAULTS_MARKER: &str = "vaults/";
const ITEMS_MARKER: &str = "/items/";

/// Length of vault and item IDs
const ID_LENGTH: usize = 26;

/// A parsed vault address
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ItemPath {
    /// Vault ID or title
    pub vault: String,
    /// Item ID or title
    pub item: String,
}

impl ItemPath {
    /// Parse `vaults/<vault>/items/<item>`
    ///
    /// The vault segment ends at the first `/items/` marker, so item titles
    /// may themselves contain slashes.
    pub fn parse(path: &str) -> Result<Self, Error> {
        let rest = path
            .strip_prefix(VAULTS_MARKER)
            .ok_or_else(|| Error::invalid_path(path, "must start with 'vaults/'"))?;

        let split = rest
            .find(ITEMS_MARKER)
            .ok_or_else(|| Error::invalid_path(path, "missing '/items/' segment"))?;

        let vault = &rest[..split];
        let item = &rest[split + ITEMS_MARKER.len()..];

        if vault.is_empty() {
            return Err(Error::invalid_path(path, "vault reference is empty"));
        }
        if item.is_empty() {
            return Err(Error::invalid_path(path, "item reference is empty"));
        }

        Ok(Self {
            vault: vault.to_string(),
            item: item.to_string(),
        })
    }

    /// Format the canonical address for a vault and item ID
    pub fn canonical(vault_id: &str, item_id: &str) -> String {
        format!("{VAULTS_MARKER}{vault_id}{ITEMS_MARKER}{item_id}")
    }
}

impl FromStr for ItemPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ItemPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&Self::canonical(&self.vault, &self.item))
    }
}

/// True when `value` has the shape of a vault or item ID
pub fn is_valid_id(value: &str) -> bool {
    value.len() == ID_LENGTH
        && value
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
}

/// Resolve a vault address into an item with file contents attached.
///
/// Never retries; vault failures propagate unchanged.
pub async fn resolve_item(client: &dyn VaultClient, path: &str) -> Result<VaultItem, Error> {
    let parsed = ItemPath::parse(path)?;

    let vault_id = resolve_vault_id(client, &parsed.vault).await?;
    let item_id = resolve_item_id(client, &vault_id, &parsed.item).await?;

    let mut item = client.get_item_by_id(&vault_id, &item_id).await?;

    for file in item.files.iter_mut() {
        let content = client
            .get_file_content(&vault_id, &item.id, &file.id)
            .await?;
        debug!(item = %item.id, file = %file.name, bytes = content.len(), "fetched file content");
        file.content = Some(content);
    }

    Ok(item)
}

async fn resolve_vault_id(client: &dyn VaultClient, vault_ref: &str) -> Result<String, Error> {
    if is_valid_id(vault_ref) {
        return Ok(vault_ref.to_string());
    }

    let vaults = client.get_vaults_by_title(vault_ref).await?;
    let count = vaults.len();
    let vault = oldest(vaults, |v| v.created_at, |v| v.id.as_str())
        .ok_or_else(|| Error::not_found(format!("no vault titled '{vault_ref}'")))?;

    if count > 1 {
        warn!(
            vault_title = %vault_ref,
            matches = count,
            selected = %vault.id,
            "multiple vaults share this title, using the oldest"
        );
    }
    Ok(vault.id)
}

async fn resolve_item_id(
    client: &dyn VaultClient,
    vault_id: &str,
    item_ref: &str,
) -> Result<String, Error> {
    if is_valid_id(item_ref) {
        return Ok(item_ref.to_string());
    }

    let items = client.get_items_by_title(vault_id, item_ref).await?;
    let count = items.len();
    let item = oldest(items, |i| i.created_at, |i| i.id.as_str()).ok_or_else(|| {
        Error::not_found(format!("no item titled '{item_ref}' in vault {vault_id}"))
    })?;

    if count > 1 {
        warn!(
            item_title = %item_ref,
            vault = %vault_id,
            matches = count,
            selected = %item.id,
            "multiple items share this title, using the oldest"
        );
    }
    Ok(item.id)
}

/// Oldest candidate by creation time; ID breaks exact ties
fn oldest<T>(
    candidates: Vec<T>,
    created_at: impl Fn(&T) -> DateTime<Utc>,
    id: impl Fn(&T) -> &str,
) -> Option<T> {
    candidates
        .into_iter()
        .min_by(|a, b| {
            created_at(a)
                .cmp(&created_at(b))
                .then_with(|| id(a).cmp(id(b)))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{item, vault, FILE_ID, ITEM_ID, VAULT_ID};
    use crate::vault::{ItemFile, MockVaultClient};
    use chrono::TimeZone;

    mod path_parsing {
        use super::*;

        #[test]
        fn parses_ids_and_titles() {
            let path = ItemPath::parse("vaults/Production/items/Database Login").unwrap();
            assert_eq!(path.vault, "Production");
            assert_eq!(path.item, "Database Login");
        }

        #[test]
        fn item_title_may_contain_slashes() {
            let path = ItemPath::parse("vaults/prod/items/team/db").unwrap();
            assert_eq!(path.vault, "prod");
            assert_eq!(path.item, "team/db");
        }

        #[test]
        fn vault_ends_at_first_items_marker() {
            let path = ItemPath::parse("vaults/a/items/b/items/c").unwrap();
            assert_eq!(path.vault, "a");
            assert_eq!(path.item, "b/items/c");
        }

        #[test]
        fn rejects_malformed_paths() {
            for bad in [
                "",
                "vault/a/items/b",
                "vaults/a/item/b",
                "vaults//items/b",
                "vaults/a/items/",
                "items/b",
                "a/b",
            ] {
                let err = ItemPath::parse(bad).unwrap_err();
                assert!(
                    matches!(err, Error::InvalidPath { .. }),
                    "expected InvalidPath for {bad:?}, got {err:?}"
                );
            }
        }

        #[test]
        fn display_round_trips_canonical_form() {
            let path: ItemPath = "vaults/v/items/i".parse().unwrap();
            assert_eq!(path.to_string(), "vaults/v/items/i");
            assert_eq!(ItemPath::canonical("v", "i"), "vaults/v/items/i");
        }
    }

    mod id_detection {
        use super::*;

        #[test]
        fn accepts_lowercase_alphanumeric_of_fixed_length() {
            assert!(is_valid_id("abcdefghijklmnopqrstuvwxy0"));
            assert!(is_valid_id(VAULT_ID));
        }

        #[test]
        fn rejects_titles() {
            assert!(!is_valid_id("Production"));
            assert!(!is_valid_id("ABCDEFGHIJKLMNOPQRSTUVWXY0"));
            assert!(!is_valid_id("abcdefghijklmnopqrstuvwxy"));
            assert!(!is_valid_id("abcdefghijklmnopqrstuvwx-0"));
        }
    }

    mod resolution {
        use super::*;

        #[tokio::test]
        async fn ids_are_used_directly() {
            let mut client = MockVaultClient::new();
            client.expect_get_vaults_by_title().never();
            client.expect_get_items_by_title().never();
            client
                .expect_get_item_by_id()
                .withf(|v, i| v == VAULT_ID && i == ITEM_ID)
                .returning(|_, _| Ok(item(3)));

            let path = ItemPath::canonical(VAULT_ID, ITEM_ID);
            let resolved = resolve_item(&client, &path).await.unwrap();
            assert_eq!(resolved.version, 3);
        }

        #[tokio::test]
        async fn titles_pick_oldest_match() {
            let mut client = MockVaultClient::new();
            client.expect_get_vaults_by_title().returning(|_| {
                Ok(vec![
                    vault("newervaultnewervaultnewer1", 2024),
                    vault(VAULT_ID, 2020),
                ])
            });
            client.expect_get_items_by_title().returning(|_, _| {
                let mut newer = item(1);
                newer.id = "neweritemneweritemnewer001".to_string();
                newer.created_at = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
                Ok(vec![newer, item(1)])
            });
            client
                .expect_get_item_by_id()
                .withf(|v, i| v == VAULT_ID && i == ITEM_ID)
                .returning(|_, _| Ok(item(7)));

            let resolved = resolve_item(&client, "vaults/Production/items/Database")
                .await
                .unwrap();
            assert_eq!(resolved.id, ITEM_ID);
            assert_eq!(resolved.version, 7);
        }

        #[tokio::test]
        async fn identical_timestamps_break_ties_by_id() {
            let mut client = MockVaultClient::new();
            client.expect_get_vaults_by_title().returning(|_| {
                Ok(vec![
                    vault("zzzzzzzzzzzzzzzzzzzzzzzzzz", 2020),
                    vault("aaaaaaaaaaaaaaaaaaaaaaaaaa", 2020),
                ])
            });
            client
                .expect_get_item_by_id()
                .withf(|v, _| v == "aaaaaaaaaaaaaaaaaaaaaaaaaa")
                .returning(|_, _| Ok(item(1)));

            let path = format!("vaults/Shared/items/{ITEM_ID}");
            assert!(resolve_item(&client, &path).await.is_ok());
        }

        #[tokio::test]
        async fn unknown_title_is_not_found() {
            let mut client = MockVaultClient::new();
            client
                .expect_get_vaults_by_title()
                .returning(|_| Ok(Vec::new()));

            let err = resolve_item(&client, "vaults/Missing/items/x")
                .await
                .unwrap_err();
            assert!(matches!(err, Error::NotFound(_)));
        }

        #[tokio::test]
        async fn missing_item_title_is_not_found() {
            let mut client = MockVaultClient::new();
            client
                .expect_get_items_by_title()
                .returning(|_, _| Ok(Vec::new()));

            let path = format!("vaults/{VAULT_ID}/items/Nothing");
            let err = resolve_item(&client, &path).await.unwrap_err();
            assert!(err.is_not_found());
        }

        #[tokio::test]
        async fn file_contents_are_attached() {
            let mut client = MockVaultClient::new();
            client.expect_get_item_by_id().returning(|_, _| {
                let mut it = item(1);
                it.files.push(ItemFile {
                    id: FILE_ID.to_string(),
                    name: "cert.pem".to_string(),
                    size: 5,
                    content: None,
                });
                Ok(it)
            });
            client
                .expect_get_file_content()
                .withf(|_, _, f| f == FILE_ID)
                .times(1)
                .returning(|_, _, _| Ok(b"PEM!!".to_vec()));

            let resolved = resolve_item(&client, &ItemPath::canonical(VAULT_ID, ITEM_ID))
                .await
                .unwrap();
            assert_eq!(resolved.files[0].content.as_deref(), Some(&b"PEM!!"[..]));
        }

        #[tokio::test]
        async fn file_fetch_failure_fails_resolution() {
            let mut client = MockVaultClient::new();
            client.expect_get_item_by_id().returning(|_, _| {
                let mut it = item(1);
                it.files.push(ItemFile {
                    id: FILE_ID.to_string(),
                    name: "key".to_string(),
                    size: 1,
                    content: None,
                });
                Ok(it)
            });
            client
                .expect_get_file_content()
                .returning(|_, _, _| Err(Error::vault("connection reset")));

            let err = resolve_item(&client, &ItemPath::canonical(VAULT_ID, ITEM_ID))
                .await
                .unwrap_err();
            assert!(matches!(err, Error::Vault { .. }));
        }

        #[tokio::test]
        async fn vault_errors_propagate_without_retry() {
            let mut client = MockVaultClient::new();
            client
                .expect_get_item_by_id()
                .times(1)
                .returning(|_, _| Err(Error::rate_limited("429")));

            let err = resolve_item(&client, &ItemPath::canonical(VAULT_ID, ITEM_ID))
                .await
                .unwrap_err();
            assert!(err.is_rate_limited());
        }

        #[tokio::test]
        async fn invalid_path_makes_no_vault_calls() {
            let client = MockVaultClient::new();
            let err = resolve_item(&client, "not-a-path").await.unwrap_err();
            assert!(matches!(err, Error::InvalidPath { .. }));
        }
    }
}
