//! Reconcilers for OnePasswordItems and annotated Deployments
//!
//! Both reconcilers are thin shells: they handle finalizers and status, and
//! delegate the actual work to the resolver, the materializer and the
//! shared-secret guard.

pub mod deployment;
pub mod item;

use std::sync::Arc;
use std::time::Duration;

use kube::runtime::controller::Action;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::{Client, ResourceExt};
use tracing::error;

use crate::config::OperatorConfig;
use crate::kube_client::{KubeStore, ObjectStore};
use crate::vault::VaultClient;
use crate::{Error, RATE_LIMIT_COOLDOWN_SECS, REQUEUE_ERROR_SECS, SECRET_FINALIZER};

/// Shared state for both reconcilers
pub struct Context {
    /// Object store for API operations (trait object for testability)
    pub store: Arc<dyn ObjectStore>,
    /// Vault client used to resolve items
    pub vault: Arc<dyn VaultClient>,
    /// Process configuration
    pub config: OperatorConfig,
}

impl Context {
    /// Create a controller context backed by the given Kubernetes client
    pub fn new(client: Client, vault: Arc<dyn VaultClient>, config: OperatorConfig) -> Self {
        Self {
            store: Arc::new(KubeStore::new(client)),
            vault,
            config,
        }
    }

    /// Create a context for testing with custom mock clients
    #[cfg(test)]
    pub fn for_testing(
        store: Arc<dyn ObjectStore>,
        vault: Arc<dyn VaultClient>,
        config: OperatorConfig,
    ) -> Self {
        Self {
            store,
            vault,
            config,
        }
    }
}

/// Server-side timeout for watch requests (must be less than the client read timeout)
pub const WATCH_TIMEOUT_SECS: u32 = 25;

/// Lowest client read timeout; watches sit idle up to [`WATCH_TIMEOUT_SECS`]
const MIN_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Watcher configuration shared by every controller
pub fn watcher_config() -> WatcherConfig {
    WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS)
}

/// Client read timeout for the configured request timeout
///
/// Never below [`MIN_READ_TIMEOUT`], so an idle watch is closed by the
/// server before the client gives up on it.
pub fn read_timeout(request_timeout: Duration) -> Duration {
    request_timeout.max(MIN_READ_TIMEOUT)
}

/// Requeue decision for a failed reconcile
///
/// Rate limiting waits out the cooldown, errors a human has to fix wait for
/// the object to change, everything else retries shortly.
pub fn requeue_for(error: &Error) -> Action {
    if error.is_rate_limited() {
        Action::requeue(Duration::from_secs(RATE_LIMIT_COOLDOWN_SECS))
    } else if error.is_terminal() {
        Action::await_change()
    } else {
        Action::requeue(Duration::from_secs(REQUEUE_ERROR_SECS))
    }
}

/// Error policy shared by both controllers
pub fn error_policy<K: ResourceExt>(object: Arc<K>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        name = %object.name_any(),
        namespace = ?object.namespace(),
        "reconciliation failed"
    );
    requeue_for(error)
}

fn has_finalizer<K: ResourceExt>(object: &K) -> bool {
    object.finalizers().iter().any(|f| f == SECRET_FINALIZER)
}

fn finalizers_with<K: ResourceExt>(object: &K) -> Vec<String> {
    let mut finalizers = object.finalizers().to_vec();
    finalizers.push(SECRET_FINALIZER.to_string());
    finalizers
}

fn finalizers_without<K: ResourceExt>(object: &K) -> Vec<String> {
    object
        .finalizers()
        .iter()
        .filter(|f| f.as_str() != SECRET_FINALIZER)
        .cloned()
        .collect()
}
