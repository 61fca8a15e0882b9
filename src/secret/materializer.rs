//! Secret materialization
//!
//! Creates or updates a single Secret from a resolved vault item. Every write
//! is based on a fresh read; the object's resourceVersion is carried into
//! updates so concurrent writers conflict instead of overwriting each other.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::ResourceExt;
use tracing::{debug, info};

use super::payload::build_data;
use crate::kube_client::ObjectStore;
use crate::restart::parse_flag;
use crate::vault::VaultItem;
use crate::{
    Error, AUTO_RESTART_ANNOTATION, ITEM_PATH_ANNOTATION, ITEM_VERSION_ANNOTATION,
    LEGACY_AUTO_RESTART_ANNOTATION,
};

const OPAQUE: &str = "Opaque";

/// Annotation keys recording which item version the data came from
const SYNC_ANNOTATIONS: [&str; 2] = [ITEM_PATH_ANNOTATION, ITEM_VERSION_ANNOTATION];

/// Auto-restart keys, owned by the materializer unless the target keeps them
const RESTART_ANNOTATIONS: [&str; 2] = [AUTO_RESTART_ANNOTATION, LEGACY_AUTO_RESTART_ANNOTATION];

/// What a materialization did
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The Secret did not exist and was created
    Created,
    /// The Secret existed and was rewritten
    Updated,
    /// The Secret already matched; nothing was written
    Unchanged,
}

/// The Secret a vault item should be materialized into
#[derive(Clone, Debug, Default)]
pub struct SecretTarget {
    /// Secret name (already sanitized)
    pub name: String,
    /// Secret namespace
    pub namespace: String,
    /// Requested Secret type; `None` or empty means Opaque
    pub secret_type: Option<String>,
    /// Labels to set on the Secret, replacing existing ones
    pub labels: BTreeMap<String, String>,
    /// Owner reference, applied only when the Secret is created
    pub owner: Option<OwnerReference>,
    /// Raw per-secret auto-restart flag; must parse as a boolean when set
    pub restart_flag: Option<String>,
    /// Leave the Secret's auto-restart annotations as they are, unvalidated;
    /// `restart_flag` is ignored
    pub keep_restart_flag: bool,
}

impl SecretTarget {
    /// Target with no labels, owner or restart flag
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }
}

/// Secret type with `""` and unset folded into `Opaque`
pub fn normalize_type(secret_type: Option<&str>) -> &str {
    match secret_type {
        None | Some("") => OPAQUE,
        Some(t) => t,
    }
}

/// Annotations stamped on a Secret built from `item`
pub fn desired_annotations(
    item: &VaultItem,
    restart_flag: Option<&str>,
) -> Result<BTreeMap<String, String>, Error> {
    let mut annotations = BTreeMap::from([
        (ITEM_VERSION_ANNOTATION.to_string(), item.version.to_string()),
        (ITEM_PATH_ANNOTATION.to_string(), item.path()),
    ]);

    if let Some(flag) = restart_flag.filter(|f| !f.is_empty()) {
        parse_flag(flag)?;
        annotations.insert(AUTO_RESTART_ANNOTATION.to_string(), flag.to_string());
    }

    Ok(annotations)
}

fn merge_annotations(
    current: &BTreeMap<String, String>,
    desired: &BTreeMap<String, String>,
    keep_restart_flag: bool,
) -> BTreeMap<String, String> {
    let managed = |key: &str| {
        SYNC_ANNOTATIONS.contains(&key)
            || (!keep_restart_flag && RESTART_ANNOTATIONS.contains(&key))
    };
    let mut merged: BTreeMap<String, String> = current
        .iter()
        .filter(|(k, _)| !managed(k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    merged.extend(desired.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

/// Create or update the target Secret so it mirrors `item`
///
/// A no-op when annotations and labels already match. Changing the type of
/// an existing Secret fails with [`Error::CannotChangeSecretType`] and
/// writes nothing.
pub async fn materialize(
    store: &dyn ObjectStore,
    target: &SecretTarget,
    item: &VaultItem,
) -> Result<Outcome, Error> {
    let restart_flag = if target.keep_restart_flag {
        None
    } else {
        target.restart_flag.as_deref()
    };
    let annotations = desired_annotations(item, restart_flag)?;
    let desired_type = normalize_type(target.secret_type.as_deref());

    let Some(existing) = store.get_secret(&target.name, &target.namespace).await? else {
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(target.name.clone()),
                namespace: Some(target.namespace.clone()),
                annotations: Some(annotations),
                labels: (!target.labels.is_empty()).then(|| target.labels.clone()),
                owner_references: target.owner.clone().map(|o| vec![o]),
                ..Default::default()
            },
            type_: Some(desired_type.to_string()),
            data: Some(build_data(item)),
            ..Default::default()
        };
        store.create_secret(&secret).await?;
        info!(
            secret = %target.name,
            namespace = %target.namespace,
            item_path = %item.path(),
            version = item.version,
            "created secret"
        );
        return Ok(Outcome::Created);
    };

    let current_type = normalize_type(existing.type_.as_deref());
    if current_type != desired_type {
        return Err(Error::CannotChangeSecretType {
            namespace: target.namespace.clone(),
            name: target.name.clone(),
            current: current_type.to_string(),
            desired: desired_type.to_string(),
        });
    }

    let current_annotations = existing.annotations().clone();
    let merged = merge_annotations(
        &current_annotations,
        &annotations,
        target.keep_restart_flag,
    );
    if merged == current_annotations && existing.labels() == &target.labels {
        debug!(secret = %target.name, namespace = %target.namespace, "secret up to date");
        return Ok(Outcome::Unchanged);
    }

    let mut updated = existing;
    updated.metadata.annotations = Some(merged);
    updated.metadata.labels = Some(target.labels.clone());
    updated.data = Some(build_data(item));
    updated.string_data = None;
    store.update_secret(&updated).await?;

    info!(
        secret = %target.name,
        namespace = %target.namespace,
        item_path = %item.path(),
        version = item.version,
        "updated secret"
    );
    Ok(Outcome::Updated)
}

/// Record `item`'s version and path on an existing Secret without touching
/// its data
///
/// Used for locked items so the same upstream change is not detected again.
pub async fn stamp_item(
    store: &dyn ObjectStore,
    existing: &Secret,
    item: &VaultItem,
) -> Result<Outcome, Error> {
    let mut annotations = existing.annotations().clone();
    let before = annotations.clone();
    annotations.insert(ITEM_VERSION_ANNOTATION.to_string(), item.version.to_string());
    annotations.insert(ITEM_PATH_ANNOTATION.to_string(), item.path());
    if annotations == before {
        return Ok(Outcome::Unchanged);
    }

    let mut updated = existing.clone();
    updated.metadata.annotations = Some(annotations);
    store.update_secret(&updated).await?;
    debug!(
        secret = %existing.name_any(),
        namespace = ?existing.namespace(),
        version = item.version,
        "stamped locked item version"
    );
    Ok(Outcome::Updated)
}
