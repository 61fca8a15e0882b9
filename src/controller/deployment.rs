//! Annotated Deployment reconciler
//!
//! A Deployment annotated with an item path and an item name gets a Secret
//! of that name synced from the vault. The Secret is not owned by the
//! Deployment; on deletion it is removed only when no sibling still uses it.

use std::sync::Arc;

use k8s_openapi::api::apps::v1::Deployment;
use kube::runtime::controller::Action;
use kube::{Resource, ResourceExt};
use tracing::{debug, info, instrument};

use super::{finalizers_with, finalizers_without, has_finalizer, Context};
use crate::guard::is_secret_in_use;
use crate::restart::restart_annotation;
use crate::secret::{materialize, sanitize_secret_name, Outcome, SecretTarget};
use crate::vault::resolve_item;
use crate::{Error, ITEM_NAME_ANNOTATION, ITEM_PATH_ANNOTATION};

fn annotation<'a>(deployment: &'a Deployment, key: &str) -> Option<&'a str> {
    deployment
        .annotations()
        .get(key)
        .map(String::as_str)
        .filter(|v| !v.is_empty())
}

/// Name of the Secret requested by the Deployment, as created in the cluster
fn requested_secret(deployment: &Deployment) -> Option<String> {
    annotation(deployment, ITEM_NAME_ANNOTATION)
        .map(sanitize_secret_name)
        .filter(|name| !name.is_empty())
}

/// Reconcile a Deployment carrying sync annotations
#[instrument(skip(deployment, ctx), fields(deployment = %deployment.name_any(), namespace = ?deployment.namespace()))]
pub async fn reconcile(deployment: Arc<Deployment>, ctx: Arc<Context>) -> Result<Action, Error> {
    let name = deployment.name_any();
    let namespace = deployment
        .namespace()
        .ok_or_else(|| Error::validation("deployment has no namespace"))?;

    if deployment.meta().deletion_timestamp.is_some() {
        if has_finalizer(deployment.as_ref()) {
            cleanup(&deployment, &ctx).await?;
            ctx.store
                .set_deployment_finalizers(
                    &name,
                    &namespace,
                    finalizers_without(deployment.as_ref()),
                )
                .await?;
        }
        return Ok(Action::await_change());
    }

    let Some(item_path) = annotation(&deployment, ITEM_PATH_ANNOTATION) else {
        if has_finalizer(deployment.as_ref()) {
            ctx.store
                .set_deployment_finalizers(
                    &name,
                    &namespace,
                    finalizers_without(deployment.as_ref()),
                )
                .await?;
            debug!("sync annotations removed, released finalizer");
        }
        return Ok(Action::await_change());
    };

    let secret_name = requested_secret(&deployment).ok_or_else(|| {
        Error::validation(format!(
            "deployment {namespace}/{name} sets {ITEM_PATH_ANNOTATION} without {ITEM_NAME_ANNOTATION}"
        ))
    })?;

    if !has_finalizer(deployment.as_ref()) {
        ctx.store
            .set_deployment_finalizers(&name, &namespace, finalizers_with(deployment.as_ref()))
            .await?;
        debug!("added finalizer");
    }

    let item = resolve_item(ctx.vault.as_ref(), item_path).await?;
    let target = SecretTarget {
        restart_flag: restart_annotation(deployment.annotations()).map(str::to_string),
        ..SecretTarget::new(secret_name.as_str(), namespace.as_str())
    };
    let outcome = materialize(ctx.store.as_ref(), &target, &item).await?;
    if outcome != Outcome::Unchanged {
        info!(?outcome, secret = %secret_name, item_path = %item_path, "synced secret");
    }

    Ok(Action::await_change())
}

/// Delete the Deployment's Secret unless a sibling still depends on it
async fn cleanup(deployment: &Deployment, ctx: &Context) -> Result<(), Error> {
    let Some(secret_name) = requested_secret(deployment) else {
        return Ok(());
    };
    let namespace = deployment.namespace().unwrap_or_default();

    if is_secret_in_use(ctx.store.as_ref(), &secret_name, deployment).await? {
        info!(secret = %secret_name, "secret still used by another deployment, keeping it");
        return Ok(());
    }

    ctx.store.delete_secret(&secret_name, &namespace).await?;
    info!(secret = %secret_name, "deleted secret of removed deployment");
    Ok(())
}
