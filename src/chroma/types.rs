//! Shared types used by the Chroma client.

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors returned while interacting with Chroma.
#[derive(Debug, Error)]
pub enum ChromaError {
    /// Base URL failed to parse or normalize.
    #[error("Invalid Chroma URL: {0}")]
    InvalidUrl(String),
    /// Collection name violates Chroma's naming rules.
    #[error("Invalid collection name {name:?}: {reason}")]
    InvalidCollectionName {
        /// Name as supplied by the caller.
        name: String,
        /// Rule the name breaks.
        reason: &'static str,
    },
    /// HTTP layer failed before receiving a response.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Chroma responded with an unexpected status code.
    #[error("Unexpected Chroma response ({status}): {body}")]
    UnexpectedStatus {
        /// HTTP status returned from Chroma.
        status: StatusCode,
        /// Body payload associated with the failing response.
        body: String,
    },
}

/// Collection descriptor returned by Chroma.
#[derive(Debug, Clone, Deserialize)]
pub struct CollectionInfo {
    /// Server-assigned collection id used by record endpoints.
    pub id: String,
    /// Collection name.
    pub name: String,
    /// Collection metadata (for example the HNSW distance space).
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}

/// Record selection accepted by `get` and `delete`.
///
/// Mirrors the keyword arguments of Chroma's `collection.get`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GetFilters {
    /// Explicit record ids.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<String>>,
    /// Metadata filter.
    #[serde(default, rename = "where", skip_serializing_if = "Option::is_none")]
    pub where_: Option<Value>,
    /// Document content filter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub where_document: Option<Value>,
    /// Maximum number of records to return.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    /// Number of records to skip.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    /// Fields to include in the response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include: Option<Vec<String>>,
}

/// Filters applied to nearest-neighbour queries. Other keys are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryFilters {
    /// Metadata filter.
    #[serde(default, rename = "where")]
    pub where_: Option<Value>,
    /// Document content filter.
    #[serde(default)]
    pub where_document: Option<Value>,
}

#[derive(Serialize)]
pub(crate) struct CreateCollectionBody<'a> {
    pub(crate) name: &'a str,
    pub(crate) metadata: Value,
    pub(crate) get_or_create: bool,
}

#[derive(Serialize)]
pub(crate) struct AddBody<'a> {
    pub(crate) ids: &'a [String],
    pub(crate) embeddings: &'a [Vec<f32>],
    pub(crate) metadatas: &'a [Map<String, Value>],
    pub(crate) documents: &'a [String],
}

#[derive(Serialize)]
pub(crate) struct QueryBody<'a> {
    pub(crate) query_embeddings: Vec<&'a [f32]>,
    pub(crate) n_results: usize,
    pub(crate) include: [&'static str; 3],
    #[serde(rename = "where", skip_serializing_if = "Option::is_none")]
    pub(crate) where_: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) where_document: Option<&'a Value>,
}

#[derive(Serialize)]
pub(crate) struct DeleteBody<'a> {
    pub(crate) ids: &'a [String],
}

/// Subset of Chroma's `get` response needed to resolve record ids.
#[derive(Deserialize)]
pub(crate) struct GetIdsResponse {
    #[serde(default)]
    pub(crate) ids: Vec<String>,
}

/// Column-oriented query response; one inner list per query embedding.
#[derive(Debug, Deserialize)]
pub struct QueryResponse {
    /// Matching record ids.
    pub ids: Vec<Vec<String>>,
    /// Matching documents.
    #[serde(default)]
    pub documents: Option<Vec<Vec<Option<String>>>>,
    /// Matching metadata.
    #[serde(default)]
    pub metadatas: Option<Vec<Vec<Option<Map<String, Value>>>>>,
    /// Cosine distances to the query embedding.
    #[serde(default)]
    pub distances: Option<Vec<Vec<Option<f64>>>>,
}
