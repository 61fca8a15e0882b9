//! Auto-restart policy resolution
//!
//! Whether a workload is rolled after one of its Secrets changed is decided
//! by the most specific level that sets the flag: the Secret, then the
//! workload, then its namespace, then the process-wide default. Levels are
//! never combined.

use std::collections::BTreeMap;
use std::fmt;

use tracing::warn;

use crate::{Error, AUTO_RESTART_ANNOTATION, LEGACY_AUTO_RESTART_ANNOTATION};

/// Level of the hierarchy that decided a restart
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PolicySource {
    /// Annotation on the Secret
    Secret,
    /// Annotation on the Deployment
    Workload,
    /// Annotation on the Namespace
    Namespace,
    /// Process-wide default
    Global,
}

impl fmt::Display for PolicySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Secret => write!(f, "secret"),
            Self::Workload => write!(f, "workload"),
            Self::Namespace => write!(f, "namespace"),
            Self::Global => write!(f, "global"),
        }
    }
}

/// Resolved restart policy and the level it came from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RestartDecision {
    /// Whether the workload should be restarted
    pub restart: bool,
    /// Level that decided
    pub source: PolicySource,
}

/// Parse a boolean flag value
///
/// Accepts `1`, `t`, `true`, `0`, `f` and `false`, case-insensitively.
pub fn parse_flag(raw: &str) -> Result<bool, Error> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "t" | "true" => Ok(true),
        "0" | "f" | "false" => Ok(false),
        _ => Err(Error::validation(format!(
            "invalid auto-restart value '{raw}': expected true or false"
        ))),
    }
}

/// Auto-restart flag from an annotation map
///
/// The canonical key wins over the legacy one. Empty values count as absent.
pub fn restart_annotation(annotations: &BTreeMap<String, String>) -> Option<&str> {
    [AUTO_RESTART_ANNOTATION, LEGACY_AUTO_RESTART_ANNOTATION]
        .into_iter()
        .filter_map(|key| annotations.get(key))
        .map(String::as_str)
        .find(|value| !value.is_empty())
}

/// Resolve the effective restart policy
///
/// The first present level decides. A present but unparseable value
/// resolves to `false` at that level.
pub fn effective_restart(
    secret: Option<&str>,
    workload: Option<&str>,
    namespace: Option<&str>,
    global_default: bool,
) -> RestartDecision {
    let levels = [
        (PolicySource::Secret, secret),
        (PolicySource::Workload, workload),
        (PolicySource::Namespace, namespace),
    ];

    for (source, raw) in levels {
        let Some(raw) = raw.filter(|r| !r.is_empty()) else {
            continue;
        };
        let restart = match parse_flag(raw) {
            Ok(value) => value,
            Err(e) => {
                warn!(level = %source, error = %e, "ignoring auto-restart flag, treating as false");
                false
            }
        };
        return RestartDecision { restart, source };
    }

    RestartDecision {
        restart: global_default,
        source: PolicySource::Global,
    }
}
