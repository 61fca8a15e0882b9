//! Custom Resource Definitions for the operator

mod item;
mod types;

pub use item::{OnePasswordItem, OnePasswordItemSpec, OnePasswordItemStatus, READY_CONDITION};
pub use types::{Condition, ConditionStatus};

use kube::CustomResourceExt;

use crate::Error;

/// YAML manifest of every CRD the operator serves
pub fn crd_yaml() -> Result<String, Error> {
    serde_yaml::to_string(&OnePasswordItem::crd()).map_err(|e| Error::serialization(e.to_string()))
}
