//! Secret payload building and materialization

mod materializer;
mod payload;

pub use materializer::{
    desired_annotations, materialize, normalize_type, stamp_item, Outcome, SecretTarget,
};
pub use payload::{build_data, sanitize_data_key, sanitize_secret_name, MAX_NAME_LENGTH};
