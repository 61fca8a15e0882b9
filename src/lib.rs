//! 1Password operator - keeps Kubernetes Secrets in sync with vault items
//!
//! Secrets are materialized from items stored in a 1Password vault and kept
//! up to date by a periodic drift sweep. Workloads that consume a changed
//! Secret can be rolled automatically, governed by a per-secret,
//! per-workload, per-namespace and global auto-restart policy.
//!
//! # Modules
//!
//! - [`crd`] - The `OnePasswordItem` custom resource
//! - [`vault`] - Vault client capability, item model and path resolution
//! - [`secret`] - Secret payload building and materialization
//! - [`restart`] - Auto-restart policy resolution
//! - [`workload`] - Workload dependency surface and restart marker
//! - [`guard`] - Shared-secret deletion guard
//! - [`scanner`] - Periodic drift sweep
//! - [`controller`] - Reconcilers for `OnePasswordItem` and annotated Deployments
//! - [`kube_client`] - Object store abstraction over the Kubernetes API
//! - [`connect`] - Optional auto-deployment of the Connect server
//! - [`config`] - Process configuration
//! - [`telemetry`] - Logging setup
//! - [`error`] - Error types for the operator

#![deny(missing_docs)]

pub mod config;
pub mod connect;
pub mod controller;
pub mod crd;
pub mod error;
pub mod guard;
pub mod kube_client;
pub mod restart;
pub mod scanner;
pub mod secret;
pub mod telemetry;
pub mod vault;
pub mod workload;

#[cfg(test)]
pub(crate) mod testing;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Wire contract
// =============================================================================
// Annotation keys, tags and finalizers are shared with existing deployments
// of the operator and must not change.

/// Prefix shared by every operator annotation
pub const ANNOTATION_PREFIX: &str = "operator.1password.io";

/// Vault address (`vaults/<vault>/items/<item>`) the Secret is synced from
pub const ITEM_PATH_ANNOTATION: &str = "operator.1password.io/item-path";

/// Secret name requested by a Deployment
pub const ITEM_NAME_ANNOTATION: &str = "operator.1password.io/item-name";

/// Vault item version the Secret data was built from
pub const ITEM_VERSION_ANNOTATION: &str = "operator.1password.io/item-version";

/// Auto-restart flag on Secrets, Deployments and Namespaces
pub const AUTO_RESTART_ANNOTATION: &str = "operator.1password.io/auto-restart";

/// Legacy spelling of [`AUTO_RESTART_ANNOTATION`], accepted on read only
pub const LEGACY_AUTO_RESTART_ANNOTATION: &str = "operator.1password.io/auto_restart";

/// Pod template annotation bumped to force a rolling restart
pub const RESTART_MARKER_ANNOTATION: &str = "operator.1password.io/last-restarted";

/// Vault item tag that freezes the synced Secret in place
pub const LOCK_TAG: &str = "operator.1password.io:ignore-secret";

/// Finalizer placed on OnePasswordItems and annotated Deployments
pub const SECRET_FINALIZER: &str = "onepassword.com/finalizer.secret";

/// Field manager used for server-side apply and status patches
pub const FIELD_MANAGER: &str = "onepassword-operator";

// =============================================================================
// Default Configuration Constants
// =============================================================================

/// Default drift sweep interval in seconds
pub const DEFAULT_POLLING_INTERVAL_SECS: u64 = 600;

/// Cooldown before retrying after the vault reported rate limiting
pub const RATE_LIMIT_COOLDOWN_SECS: u64 = 15 * 60;

/// Requeue delay after a retryable reconcile failure
pub const REQUEUE_ERROR_SECS: u64 = 30;

/// Default timeout for a single vault or Kubernetes API call
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
