//! Periodic drift sweep
//!
//! Every synced Secret is re-resolved against the vault on a fixed interval.
//! Secrets whose stored version or path no longer matches are rebuilt, and
//! Deployments consuming them are rolled when their effective restart policy
//! allows it.
//!
//! Failures are isolated per Secret: one bad vault item is logged and
//! skipped, never aborting the rest of the sweep. Each sweep recomputes
//! everything from fresh reads, so a partially completed sweep is healed by
//! the next one.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::OperatorConfig;
use crate::kube_client::ObjectStore;
use crate::restart::{effective_restart, restart_annotation, RestartDecision};
use crate::secret::{materialize, stamp_item, SecretTarget};
use crate::vault::{resolve_item, VaultClient, VaultItem};
use crate::workload::{mark_for_restart, matching_secrets};
use crate::{
    Error, ITEM_PATH_ANNOTATION, ITEM_VERSION_ANNOTATION, LOCK_TAG, RATE_LIMIT_COOLDOWN_SECS,
};

/// `(namespace, name)` of a Deployment
type WorkloadKey = (String, String);

/// Secrets updated during a sweep, by namespace then name
type UpdatedSecrets = BTreeMap<String, BTreeMap<String, Secret>>;

/// Counters for one sweep
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Synced Secrets examined
    pub scanned: usize,
    /// Secrets rewritten with new data
    pub updated: usize,
    /// Secrets whose item carries the lock tag and were only re-stamped
    pub locked: usize,
    /// Secrets skipped because of a vault or write failure
    pub failed: usize,
    /// Deployments restarted
    pub restarted: usize,
    /// The vault asked us to slow down during this sweep
    pub rate_limited: bool,
    /// The sweep stopped early because it was cancelled
    pub cancelled: bool,
}

/// Outcome of checking one Secret
enum Checked {
    Current,
    Updated,
    Locked,
}

/// Drift scanner over every synced Secret in scope
pub struct DriftScanner {
    store: Arc<dyn ObjectStore>,
    vault: Arc<dyn VaultClient>,
    config: OperatorConfig,
    /// Deployments whose restart write failed; retried on the next sweep
    pending_restarts: Mutex<BTreeSet<WorkloadKey>>,
    /// Secrets refreshed in a sweep whose restart phase could not list
    /// workloads; their dependents are worked out again next sweep
    pending_secrets: Mutex<UpdatedSecrets>,
}

impl DriftScanner {
    /// Create a scanner over the configured namespace scope
    pub fn new(
        store: Arc<dyn ObjectStore>,
        vault: Arc<dyn VaultClient>,
        config: OperatorConfig,
    ) -> Self {
        Self {
            store,
            vault,
            config,
            pending_restarts: Mutex::new(BTreeSet::new()),
            pending_secrets: Mutex::new(UpdatedSecrets::new()),
        }
    }

    /// Run sweeps every `period` until cancelled
    ///
    /// Sweeps run one after another in this task, so a slow sweep delays the
    /// next tick instead of overlapping it. After a rate-limited sweep the
    /// loop waits out the cooldown first.
    pub async fn run(&self, period: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!(interval_secs = period.as_secs(), "Drift scanner started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.run_sweep(&cancel).await {
                Ok(report) => {
                    info!(
                        scanned = report.scanned,
                        updated = report.updated,
                        locked = report.locked,
                        failed = report.failed,
                        restarted = report.restarted,
                        "Drift sweep finished"
                    );
                    if report.rate_limited {
                        warn!(
                            cooldown_secs = RATE_LIMIT_COOLDOWN_SECS,
                            "Vault rate limit hit, pausing sweeps"
                        );
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(Duration::from_secs(RATE_LIMIT_COOLDOWN_SECS)) => {}
                        }
                        ticker.reset();
                    }
                }
                Err(e) => error!(error = %e, "Drift sweep failed"),
            }
        }

        info!("Drift scanner stopped");
    }

    /// Run one sweep
    ///
    /// Only listing failures abort the sweep. Cancellation is honoured
    /// between Secrets; a cancelled sweep performs no restarts.
    #[instrument(skip_all)]
    pub async fn run_sweep(&self, cancel: &CancellationToken) -> Result<SweepReport, Error> {
        let mut report = SweepReport::default();
        let mut updated = UpdatedSecrets::new();

        for secret in self.synced_secrets().await? {
            if cancel.is_cancelled() {
                info!("Drift sweep cancelled");
                report.cancelled = true;
                return Ok(report);
            }
            report.scanned += 1;

            if report.rate_limited {
                // Leave the rest for the next sweep instead of hammering the vault.
                report.failed += 1;
                continue;
            }

            match self.check_secret(&secret).await {
                Ok(Checked::Current) => {}
                Ok(Checked::Locked) => report.locked += 1,
                Ok(Checked::Updated) => {
                    report.updated += 1;
                    updated
                        .entry(secret.namespace().unwrap_or_default())
                        .or_default()
                        .insert(secret.name_any(), secret);
                }
                Err(e) => {
                    report.failed += 1;
                    report.rate_limited |= e.is_rate_limited();
                    warn!(
                        secret = %secret.name_any(),
                        namespace = ?secret.namespace(),
                        error = %e,
                        "Skipping secret this sweep"
                    );
                }
            }
        }

        report.restarted = self.restart_dependents(updated).await?;
        Ok(report)
    }

    /// Secrets in scope carrying both sync annotations
    async fn synced_secrets(&self) -> Result<Vec<Secret>, Error> {
        let mut secrets = Vec::new();
        for scope in self.config.scopes() {
            secrets.extend(
                self.store
                    .list_secrets(scope)
                    .await?
                    .into_iter()
                    .filter(is_synced),
            );
        }
        Ok(secrets)
    }

    /// Item path a Secret should follow; a OnePasswordItem of the same name wins
    async fn authoritative_path(&self, secret: &Secret) -> Result<String, Error> {
        let namespace = secret.namespace().unwrap_or_default();
        if let Some(item) = self.store.get_item(&secret.name_any(), &namespace).await? {
            return Ok(item.spec.item_path);
        }
        Ok(annotation(secret, ITEM_PATH_ANNOTATION)
            .unwrap_or_default()
            .to_string())
    }

    async fn check_secret(&self, secret: &Secret) -> Result<Checked, Error> {
        let path = self.authoritative_path(secret).await?;
        let item = resolve_item(self.vault.as_ref(), &path).await?;

        if !has_drifted(secret, &item) {
            return Ok(Checked::Current);
        }

        if item.has_tag(LOCK_TAG) {
            stamp_item(self.store.as_ref(), secret, &item).await?;
            info!(
                secret = %secret.name_any(),
                namespace = ?secret.namespace(),
                version = item.version,
                "Item is locked, keeping secret data"
            );
            return Ok(Checked::Locked);
        }

        let target = SecretTarget {
            name: secret.name_any(),
            namespace: secret.namespace().unwrap_or_default(),
            secret_type: secret.type_.clone(),
            labels: secret.labels().clone(),
            owner: None,
            restart_flag: None,
            // A bad flag on the Secret must not block the data refresh.
            keep_restart_flag: true,
        };
        materialize(self.store.as_ref(), &target, &item).await?;
        Ok(Checked::Updated)
    }

    /// Restart Deployments depending on updated Secrets, plus earlier failures
    async fn restart_dependents(&self, mut updated: UpdatedSecrets) -> Result<usize, Error> {
        let pending = std::mem::take(&mut *self.pending_restarts.lock().await);
        let carried = std::mem::take(&mut *self.pending_secrets.lock().await);
        for (namespace, secrets) in carried {
            let entry = updated.entry(namespace).or_default();
            for (name, secret) in secrets {
                entry.entry(name).or_insert(secret);
            }
        }
        if updated.is_empty() && pending.is_empty() {
            return Ok(0);
        }

        let listed = self.list_restart_inputs().await;
        let (deployments, namespace_flags) = match listed {
            Ok(inputs) => inputs,
            Err(e) => {
                self.pending_restarts.lock().await.extend(pending);
                *self.pending_secrets.lock().await = updated;
                return Err(e);
            }
        };

        let mut failed = BTreeSet::new();
        let mut restarted = 0;

        for deployment in deployments {
            let key = (
                deployment.namespace().unwrap_or_default(),
                deployment.name_any(),
            );

            let retry = pending.contains(&key);
            let decision = self.restart_decision(&deployment, &updated, &namespace_flags);
            if !retry && decision.is_none() {
                continue;
            }

            match self.restart(deployment).await {
                Ok(()) => {
                    restarted += 1;
                    info!(
                        deployment = %key.1,
                        namespace = %key.0,
                        source = ?decision.map(|d| d.source),
                        retry,
                        "Restarted deployment"
                    );
                }
                Err(e) => {
                    warn!(
                        deployment = %key.1,
                        namespace = %key.0,
                        error = %e,
                        "Failed to restart deployment, will retry next sweep"
                    );
                    failed.insert(key);
                }
            }
        }

        self.pending_restarts.lock().await.extend(failed);
        Ok(restarted)
    }

    async fn list_restart_inputs(
        &self,
    ) -> Result<(Vec<Deployment>, BTreeMap<String, String>), Error> {
        let mut deployments = Vec::new();
        for scope in self.config.scopes() {
            deployments.extend(self.store.list_deployments(scope).await?);
        }

        let namespace_flags = self
            .store
            .list_namespaces()
            .await?
            .into_iter()
            .filter_map(|ns| {
                let flag = restart_annotation(ns.annotations())?.to_string();
                Some((ns.name_any(), flag))
            })
            .collect();

        Ok((deployments, namespace_flags))
    }

    /// First updated Secret whose effective policy restarts the Deployment
    fn restart_decision(
        &self,
        deployment: &Deployment,
        updated: &UpdatedSecrets,
        namespace_flags: &BTreeMap<String, String>,
    ) -> Option<RestartDecision> {
        let namespace = deployment.namespace().unwrap_or_default();
        let secrets = updated.get(&namespace)?;
        let workload_flag = restart_annotation(deployment.annotations());
        let namespace_flag = namespace_flags.get(&namespace).map(String::as_str);

        matching_secrets(deployment, secrets)
            .into_iter()
            .map(|secret| {
                effective_restart(
                    restart_annotation(secret.annotations()),
                    workload_flag,
                    namespace_flag,
                    self.config.auto_restart,
                )
            })
            .find(|decision| decision.restart)
    }

    async fn restart(&self, mut deployment: Deployment) -> Result<(), Error> {
        mark_for_restart(&mut deployment, Utc::now());
        self.store.update_deployment(&deployment).await
    }

    #[cfg(test)]
    async fn pending(&self) -> BTreeSet<WorkloadKey> {
        self.pending_restarts.lock().await.clone()
    }
}

fn annotation<'a>(secret: &'a Secret, key: &str) -> Option<&'a str> {
    secret.annotations().get(key).map(String::as_str)
}

fn is_synced(secret: &Secret) -> bool {
    annotation(secret, ITEM_PATH_ANNOTATION).is_some()
        && annotation(secret, ITEM_VERSION_ANNOTATION).is_some()
}

/// Version or path differs from what the Secret was built from
fn has_drifted(secret: &Secret, item: &VaultItem) -> bool {
    let version = annotation(secret, ITEM_VERSION_ANNOTATION).unwrap_or_default();
    let path = annotation(secret, ITEM_PATH_ANNOTATION).unwrap_or_default();
    let drifted = version != item.version.to_string() || path != item.path();
    if drifted {
        debug!(
            secret = %secret.name_any(),
            stored_version = %version,
            vault_version = item.version,
            stored_path = %path,
            vault_path = %item.path(),
            "Secret drifted from vault"
        );
    }
    drifted
}
