//! Shared-secret deletion guard
//!
//! A Secret created for a Deployment may be consumed by its siblings too.
//! Before tearing it down we check that no other Deployment in the namespace
//! still depends on it.

use k8s_openapi::api::apps::v1::Deployment;
use kube::ResourceExt;
use tracing::debug;

use crate::kube_client::ObjectStore;
use crate::workload::depends_on;
use crate::Error;

/// True when a Deployment other than `deleted` still depends on the Secret
///
/// Siblings that are being deleted themselves do not count. List failures
/// propagate; callers must keep the Secret in that case.
pub async fn is_secret_in_use(
    store: &dyn ObjectStore,
    secret_name: &str,
    deleted: &Deployment,
) -> Result<bool, Error> {
    let namespace = deleted.namespace().unwrap_or_default();
    let deleted_name = deleted.name_any();

    let siblings = store.list_deployments(Some(namespace.clone())).await?;
    let user = siblings
        .iter()
        .filter(|d| d.name_any() != deleted_name && d.metadata.deletion_timestamp.is_none())
        .find(|d| depends_on(d, secret_name));

    if let Some(user) = user {
        debug!(
            secret = %secret_name,
            namespace = %namespace,
            deployment = %user.name_any(),
            "secret still in use"
        );
        return Ok(true);
    }
    Ok(false)
}
