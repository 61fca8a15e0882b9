//! OnePasswordItem reconciler
//!
//! Mirrors the referenced vault item into a Secret of the same name, owned by
//! the OnePasswordItem, and reports the outcome in a `Ready` condition.

use std::sync::Arc;

use kube::runtime::controller::Action;
use kube::{Resource, ResourceExt};
use tracing::{debug, info, instrument, warn};

use super::{finalizers_with, finalizers_without, has_finalizer, Context};
use crate::crd::{OnePasswordItem, OnePasswordItemStatus};
use crate::restart::restart_annotation;
use crate::secret::{materialize, Outcome, SecretTarget};
use crate::vault::resolve_item;
use crate::Error;

/// Reconcile a OnePasswordItem
#[instrument(skip(item, ctx), fields(item = %item.name_any(), namespace = ?item.namespace()))]
pub async fn reconcile(item: Arc<OnePasswordItem>, ctx: Arc<Context>) -> Result<Action, Error> {
    let name = item.name_any();
    let namespace = item
        .namespace()
        .ok_or_else(|| Error::validation("OnePasswordItem has no namespace"))?;

    if item.meta().deletion_timestamp.is_some() {
        if has_finalizer(item.as_ref()) {
            ctx.store.delete_secret(&name, &namespace).await?;
            ctx.store
                .set_item_finalizers(&name, &namespace, finalizers_without(item.as_ref()))
                .await?;
            info!("removed secret for deleted item");
        }
        return Ok(Action::await_change());
    }

    if !has_finalizer(item.as_ref()) {
        ctx.store
            .set_item_finalizers(&name, &namespace, finalizers_with(item.as_ref()))
            .await?;
        debug!("added finalizer");
    }

    match sync(&item, &ctx, &name, &namespace).await {
        Ok(outcome) => {
            if outcome != Outcome::Unchanged {
                info!(?outcome, item_path = %item.spec.item_path, "synced secret");
            }
            update_status(&item, &ctx, OnePasswordItemStatus::ready()).await?;
            Ok(Action::await_change())
        }
        Err(e) => {
            warn!(error = %e, item_path = %item.spec.item_path, "failed to sync secret");
            let status = OnePasswordItemStatus::failed(status_reason(&e), e.to_string());
            // The sync error decides the requeue, not the status write.
            if let Err(status_err) = update_status(&item, &ctx, status).await {
                warn!(error = %status_err, "failed to record sync failure in status");
            }
            Err(e)
        }
    }
}

async fn sync(
    item: &OnePasswordItem,
    ctx: &Context,
    name: &str,
    namespace: &str,
) -> Result<Outcome, Error> {
    let resolved = resolve_item(ctx.vault.as_ref(), &item.spec.item_path).await?;

    let target = SecretTarget {
        name: name.to_string(),
        namespace: namespace.to_string(),
        secret_type: item.spec.secret_type.clone(),
        labels: item.labels().clone(),
        owner: item.controller_owner_ref(&()),
        restart_flag: restart_annotation(item.annotations()).map(str::to_string),
        keep_restart_flag: false,
    };
    materialize(ctx.store.as_ref(), &target, &resolved).await
}

/// Patch the status only when the Ready condition actually changes
async fn update_status(
    item: &OnePasswordItem,
    ctx: &Context,
    status: OnePasswordItemStatus,
) -> Result<(), Error> {
    let current = item.status.clone().unwrap_or_default();
    if !current.differs_from(&status) {
        return Ok(());
    }
    let namespace = item.namespace().unwrap_or_default();
    ctx.store
        .patch_item_status(&item.name_any(), &namespace, &status)
        .await
}

/// Machine-readable condition reason for a sync failure
fn status_reason(error: &Error) -> &'static str {
    match error {
        Error::InvalidPath { .. } => "InvalidItemPath",
        Error::NotFound(_) => "ItemNotFound",
        Error::Vault {
            rate_limited: true, ..
        } => "RateLimited",
        Error::Vault { .. } => "VaultError",
        Error::CannotChangeSecretType { .. } => "SecretTypeImmutable",
        Error::Validation(_) => "InvalidConfiguration",
        _ => "SyncFailed",
    }
}
