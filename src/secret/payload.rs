//! Secret payload building
//!
//! Maps vault item fields and files onto Secret data keys, and turns
//! user-supplied names into valid Secret names.

use std::collections::BTreeMap;

use k8s_openapi::ByteString;
use tracing::warn;

use crate::vault::VaultItem;

/// Maximum length of a Secret data key and of a DNS subdomain
pub const MAX_NAME_LENGTH: usize = 253;

fn is_data_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')
}

fn is_secret_name_char(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '.')
}

/// Collapse every run of characters rejected by `valid` into one `-`
fn replace_invalid_runs(value: &str, valid: impl Fn(char) -> bool) -> String {
    let mut out = String::with_capacity(value.len());
    let mut in_run = false;
    for c in value.chars() {
        if valid(c) {
            out.push(c);
            in_run = false;
        } else if !in_run {
            out.push('-');
            in_run = true;
        }
    }
    out
}

/// Sanitize a field label into a valid Secret data key
///
/// Invalid leading and trailing characters are dropped, interior runs of
/// invalid characters become a single `-`.
pub fn sanitize_data_key(label: &str) -> String {
    let trimmed = label.trim_matches(|c: char| !is_data_key_char(c));
    let mut key = replace_invalid_runs(trimmed, is_data_key_char);
    // Only ASCII survives the replacement, so byte truncation is safe.
    key.truncate(MAX_NAME_LENGTH);
    key
}

/// Sanitize a requested name into a valid DNS-subdomain Secret name
pub fn sanitize_secret_name(name: &str) -> String {
    let lowered = name.to_lowercase();
    let mut sanitized = replace_invalid_runs(&lowered, is_secret_name_char);
    sanitized.truncate(MAX_NAME_LENGTH);
    sanitized.trim_matches(|c: char| c == '-' || c == '.').to_string()
}

/// Build the Secret data map for a resolved item
///
/// Fields are written first; a file whose name is already taken by a field
/// is skipped.
pub fn build_data(item: &VaultItem) -> BTreeMap<String, ByteString> {
    let mut data = BTreeMap::new();

    for field in &item.fields {
        if field.label.is_empty() || field.value.is_empty() {
            continue;
        }
        let key = sanitize_data_key(&field.label);
        if key.is_empty() {
            warn!(
                item = %item.id,
                label = %field.label,
                "field label has no valid key characters, skipping"
            );
            continue;
        }
        data.insert(key, ByteString(field.value.as_bytes().to_vec()));
    }

    for file in &item.files {
        if data.contains_key(&file.name) {
            warn!(
                item = %item.id,
                file = %file.name,
                "file name collides with a field, keeping the field value"
            );
            continue;
        }
        let Some(content) = &file.content else {
            warn!(item = %item.id, file = %file.name, "file content was not fetched, skipping");
            continue;
        };
        data.insert(file.name.clone(), ByteString(content.clone()));
    }

    data
}
