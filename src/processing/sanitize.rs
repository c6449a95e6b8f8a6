//! Helpers for normalizing metadata values before they reach Chroma.

use serde_json::{Map, Value};

use super::types::Metadata;

/// Metadata key recording where a chunk came from.
pub const SOURCE_KEY: &str = "source";
/// Source recorded for chunks ingested through the HTTP API.
pub const DEFAULT_SOURCE: &str = "api";

/// Metadata attached when the caller supplies none.
pub fn default_metadata() -> Metadata {
    let mut metadata = Map::new();
    metadata.insert(SOURCE_KEY.into(), Value::String(DEFAULT_SOURCE.into()));
    metadata
}

/// Ensure a `source` key is present without overriding a caller-supplied one.
pub fn with_default_source(mut metadata: Metadata) -> Metadata {
    metadata
        .entry(SOURCE_KEY)
        .or_insert_with(|| Value::String(DEFAULT_SOURCE.into()));
    metadata
}

/// Chroma stores only scalar metadata; nested values are kept as compact JSON strings.
pub fn normalize_metadata(metadata: Metadata) -> Metadata {
    metadata
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(_) | Value::Number(_) | Value::Bool(_) => value,
                other => Value::String(other.to_string()),
            };
            (key, value)
        })
        .collect()
}

/// Trim a string and drop it when empty.
pub(crate) fn sanitize_string(value: Option<String>) -> Option<String> {
    value.and_then(|input| {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
