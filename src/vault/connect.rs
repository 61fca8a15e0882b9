//! Connect server implementation of [`VaultClient`]
//!
//! Talks to the Connect REST API with a bearer token. Every request carries
//! the configured timeout; nothing is retried here.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

use super::{ItemField, ItemFile, Vault, VaultClient, VaultItem};
use crate::Error;

/// HTTP client for a Connect server
#[derive(Clone)]
pub struct ConnectClient {
    http: reqwest::Client,
    host: String,
    token: String,
}

impl ConnectClient {
    /// Create a client for the Connect server at `host`
    pub fn new(
        host: impl Into<String>,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("onepassword-operator/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::vault(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            host: host.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.host, path)
    }

    async fn get(&self, path: &str, filter: Option<String>) -> Result<reqwest::Response, Error> {
        let mut request = self.http.get(self.url(path)).bearer_auth(&self.token);
        if let Some(filter) = filter {
            request = request.query(&[("filter", filter)]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::vault(format!("GET {path}: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(status_error(status, path, &body))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        filter: Option<String>,
    ) -> Result<T, Error> {
        self.get(path, filter)
            .await?
            .json::<T>()
            .await
            .map_err(|e| Error::vault(format!("GET {path}: invalid response body: {e}")))
    }
}

impl std::fmt::Debug for ConnectClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectClient")
            .field("host", &self.host)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl VaultClient for ConnectClient {
    async fn get_item_by_id(&self, vault_id: &str, item_id: &str) -> Result<VaultItem, Error> {
        let path = format!("vaults/{vault_id}/items/{item_id}");
        let item: ConnectItem = self.get_json(&path, None).await?;
        debug!(vault = %vault_id, item = %item_id, version = item.version, "fetched item");
        Ok(item.into())
    }

    async fn get_items_by_title(
        &self,
        vault_id: &str,
        title: &str,
    ) -> Result<Vec<VaultItem>, Error> {
        let path = format!("vaults/{vault_id}/items");
        let items: Vec<ConnectItem> = self.get_json(&path, Some(title_filter(title))).await?;
        // The API filter is case-insensitive; titles must match exactly.
        Ok(items
            .into_iter()
            .filter(|i| i.title == title)
            .map(VaultItem::from)
            .collect())
    }

    async fn get_file_content(
        &self,
        vault_id: &str,
        item_id: &str,
        file_id: &str,
    ) -> Result<Vec<u8>, Error> {
        let path = format!("vaults/{vault_id}/items/{item_id}/files/{file_id}/content");
        let bytes = self
            .get(&path, None)
            .await?
            .bytes()
            .await
            .map_err(|e| Error::vault(format!("GET {path}: failed to read content: {e}")))?;
        Ok(bytes.to_vec())
    }

    async fn get_vaults_by_title(&self, title: &str) -> Result<Vec<Vault>, Error> {
        let vaults: Vec<Vault> = self.get_json("vaults", Some(name_filter(title))).await?;
        Ok(vaults.into_iter().filter(|v| v.name == title).collect())
    }
}

fn title_filter(title: &str) -> String {
    format!("title eq \"{}\"", escape_filter_value(title))
}

fn name_filter(name: &str) -> String {
    format!("name eq \"{}\"", escape_filter_value(name))
}

fn escape_filter_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Map a non-success HTTP status onto the operator's error taxonomy
fn status_error(status: StatusCode, path: &str, body: &str) -> Error {
    let message = format!("GET {path}: {status}: {}", body.trim());
    match status {
        StatusCode::TOO_MANY_REQUESTS => Error::rate_limited(message),
        StatusCode::NOT_FOUND => Error::not_found(message),
        _ => Error::vault(message),
    }
}

// =============================================================================
// Wire format
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectItem {
    id: String,
    #[serde(default)]
    title: String,
    vault: ConnectVaultRef,
    #[serde(default)]
    version: u64,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    fields: Vec<ConnectField>,
    #[serde(default)]
    files: Vec<ConnectFile>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct ConnectVaultRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ConnectField {
    #[serde(default)]
    label: String,
    #[serde(default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct ConnectFile {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    size: u64,
}

impl From<ConnectItem> for VaultItem {
    fn from(item: ConnectItem) -> Self {
        Self {
            id: item.id,
            title: item.title,
            vault_id: item.vault.id,
            version: item.version,
            tags: item.tags.into_iter().collect::<BTreeSet<_>>(),
            fields: item
                .fields
                .into_iter()
                .map(|f| ItemField {
                    label: f.label,
                    value: f.value,
                })
                .collect(),
            files: item
                .files
                .into_iter()
                .map(|f| ItemFile {
                    id: f.id,
                    name: f.name,
                    size: f.size,
                    content: None,
                })
                .collect(),
            created_at: item.created_at,
        }
    }
}
