//! OnePasswordItem Custom Resource Definition
//!
//! A OnePasswordItem declares that a Secret with the same name and namespace
//! must mirror a vault item.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Condition, ConditionStatus};

/// Condition type reported on every OnePasswordItem
pub const READY_CONDITION: &str = "Ready";

/// Specification for a OnePasswordItem
///
/// Example:
/// ```yaml
/// apiVersion: onepassword.com/v1
/// kind: OnePasswordItem
/// metadata:
///   name: database
/// spec:
///   itemPath: vaults/Production/items/Postgres
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "onepassword.com",
    version = "v1",
    kind = "OnePasswordItem",
    plural = "onepassworditems",
    shortname = "opi",
    namespaced,
    status = "OnePasswordItemStatus",
    printcolumn = r#"{"name":"Path","type":"string","jsonPath":".spec.itemPath"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct OnePasswordItemSpec {
    /// Vault address in the form `vaults/<vault-id-or-title>/items/<item-id-or-title>`
    pub item_path: String,

    /// Kubernetes Secret type for the generated Secret (defaults to Opaque)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_type: Option<String>,
}

/// Observed state of a OnePasswordItem
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OnePasswordItemStatus {
    /// Latest observations of the item's state
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl OnePasswordItemStatus {
    /// Status with a single Ready=True condition
    pub fn ready() -> Self {
        Self {
            conditions: vec![Condition::new(
                READY_CONDITION,
                ConditionStatus::True,
                "Synced",
                "",
            )],
        }
    }

    /// Status with a single Ready=False condition carrying the error message
    pub fn failed(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            conditions: vec![Condition::new(
                READY_CONDITION,
                ConditionStatus::False,
                reason,
                message,
            )],
        }
    }

    /// The Ready condition, if any
    pub fn ready_condition(&self) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == READY_CONDITION)
    }

    /// True when the Ready condition is set to True
    pub fn is_ready(&self) -> bool {
        self.ready_condition()
            .map(|c| c.status == ConditionStatus::True)
            .unwrap_or(false)
    }

    /// Whether writing `next` would change anything beyond timestamps
    pub fn differs_from(&self, next: &OnePasswordItemStatus) -> bool {
        match (self.ready_condition(), next.ready_condition()) {
            (Some(current), Some(next)) => !current.same_state(next),
            (None, None) => false,
            _ => true,
        }
    }
}
