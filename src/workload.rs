//! Workload dependency surface and restart marker
//!
//! A Deployment depends on a Secret when a container env var references it,
//! when a pod volume is backed by it, or when its item-name annotation
//! names it.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, SecondsFormat, Utc};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::PodSpec;

use crate::secret::sanitize_secret_name;
use crate::{ITEM_NAME_ANNOTATION, RESTART_MARKER_ANNOTATION};

fn pod_spec(deployment: &Deployment) -> Option<&PodSpec> {
    deployment.spec.as_ref()?.template.spec.as_ref()
}

/// Secret names referenced by container env vars
fn env_references(spec: &PodSpec) -> impl Iterator<Item = &str> {
    spec.containers
        .iter()
        .chain(spec.init_containers.iter().flatten())
        .flat_map(|c| c.env.iter().flatten())
        .filter_map(|env| env.value_from.as_ref()?.secret_key_ref.as_ref())
        .map(|selector| selector.name.as_str())
}

/// Secret names backing pod volumes
fn volume_references(spec: &PodSpec) -> impl Iterator<Item = &str> {
    spec.volumes
        .iter()
        .flatten()
        .filter_map(|v| v.secret.as_ref()?.secret_name.as_deref())
}

/// Secret named by the item-name annotation, as it is created in the cluster
fn annotation_reference(deployment: &Deployment) -> Option<String> {
    deployment
        .metadata
        .annotations
        .as_ref()?
        .get(ITEM_NAME_ANNOTATION)
        .map(|name| sanitize_secret_name(name))
        .filter(|name| !name.is_empty())
}

/// Every Secret name the Deployment depends on
pub fn secret_references(deployment: &Deployment) -> BTreeSet<String> {
    let mut names: BTreeSet<String> = pod_spec(deployment)
        .map(|spec| {
            env_references(spec)
                .chain(volume_references(spec))
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    names.extend(annotation_reference(deployment));
    names
}

/// True when the Deployment depends on the named Secret
pub fn depends_on(deployment: &Deployment, secret_name: &str) -> bool {
    secret_references(deployment).contains(secret_name)
}

/// Entries of `updated` (keyed by Secret name) the Deployment depends on
pub fn matching_secrets<'a, T>(
    deployment: &Deployment,
    updated: &'a BTreeMap<String, T>,
) -> Vec<&'a T> {
    secret_references(deployment)
        .iter()
        .filter_map(|name| updated.get(name))
        .collect()
}

/// Bump the pod template restart marker so the Deployment rolls
pub fn mark_for_restart(deployment: &mut Deployment, now: DateTime<Utc>) {
    let template = &mut deployment.spec.get_or_insert_with(Default::default).template;
    template
        .metadata
        .get_or_insert_with(Default::default)
        .annotations
        .get_or_insert_with(Default::default)
        .insert(
            RESTART_MARKER_ANNOTATION.to_string(),
            now.to_rfc3339_opts(SecondsFormat::Nanos, true),
        );
}

/// Current restart marker, if the Deployment was ever restarted by us
pub fn restart_marker(deployment: &Deployment) -> Option<&str> {
    deployment
        .spec
        .as_ref()?
        .template
        .metadata
        .as_ref()?
        .annotations
        .as_ref()?
        .get(RESTART_MARKER_ANNOTATION)
        .map(String::as_str)
}
