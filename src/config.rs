//! Process configuration
//!
//! Every option can be given as a flag or through the environment, matching
//! the variables used by existing operator deployments.

use std::time::Duration;

use clap::Args;

use crate::vault::ConnectClient;
use crate::{Error, DEFAULT_POLLING_INTERVAL_SECS, DEFAULT_REQUEST_TIMEOUT_SECS};

/// Operator settings shared by the reconcilers and the drift scanner
#[derive(Args, Clone, Debug, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Seconds between drift sweeps (0 disables the sweep)
    #[arg(long, env = "POLLING_INTERVAL", default_value_t = DEFAULT_POLLING_INTERVAL_SECS)]
    pub polling_interval: u64,

    /// Restart workloads on secret change unless a more specific level says otherwise
    #[arg(long, env = "AUTO_RESTART", default_value_t = false, action = clap::ArgAction::Set)]
    pub auto_restart: bool,

    /// Comma-separated namespaces to watch (empty watches the whole cluster)
    #[arg(long, env = "WATCH_NAMESPACE", default_value = "")]
    pub watch_namespace: String,

    /// Deploy the Connect server alongside the operator
    #[arg(long, env = "MANAGE_CONNECT", default_value_t = false, action = clap::ArgAction::Set)]
    pub manage_connect: bool,

    /// Namespace the operator runs in (target for the managed Connect server)
    #[arg(long, env = "OPERATOR_NAMESPACE", default_value = "default")]
    pub operator_namespace: String,

    /// Timeout in seconds for each vault or Kubernetes API call
    #[arg(long, env = "REQUEST_TIMEOUT", default_value_t = DEFAULT_REQUEST_TIMEOUT_SECS)]
    pub request_timeout: u64,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            polling_interval: DEFAULT_POLLING_INTERVAL_SECS,
            auto_restart: false,
            watch_namespace: String::new(),
            manage_connect: false,
            operator_namespace: "default".to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl OperatorConfig {
    /// Namespaces in scope; empty means cluster-wide
    pub fn namespaces(&self) -> Vec<String> {
        self.watch_namespace
            .split(',')
            .map(str::trim)
            .filter(|ns| !ns.is_empty())
            .map(String::from)
            .collect()
    }

    /// List scopes to iterate: one per namespace, or a single cluster-wide scope
    pub fn scopes(&self) -> Vec<Option<String>> {
        let namespaces = self.namespaces();
        if namespaces.is_empty() {
            vec![None]
        } else {
            namespaces.into_iter().map(Some).collect()
        }
    }

    /// Sweep interval, or `None` when the sweep is disabled
    pub fn polling_interval(&self) -> Option<Duration> {
        (self.polling_interval > 0).then(|| Duration::from_secs(self.polling_interval))
    }

    /// Per-call timeout for outbound requests
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout.max(1))
    }
}

/// Connection settings for the Connect server
///
/// Both values are required to run the operator; they are optional here so
/// `--crd` works without them.
#[derive(Args, Clone, Default)]
pub struct ConnectSettings {
    /// Connect server URL
    #[arg(long = "connect-host", env = "OP_CONNECT_HOST")]
    pub host: Option<String>,

    /// Connect access token
    #[arg(long = "connect-token", env = "OP_CONNECT_TOKEN", hide_env_values = true)]
    pub token: Option<String>,
}

impl ConnectSettings {
    /// Build a Connect client, failing when host or token is missing
    pub fn client(&self, timeout: Duration) -> Result<ConnectClient, Error> {
        let host = non_empty(&self.host)
            .ok_or_else(|| Error::validation("OP_CONNECT_HOST must be set"))?;
        let token = non_empty(&self.token)
            .ok_or_else(|| Error::validation("OP_CONNECT_TOKEN must be set"))?;
        ConnectClient::new(host, token, timeout)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl std::fmt::Debug for ConnectSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectSettings")
            .field("host", &self.host)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
