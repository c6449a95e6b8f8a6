//! Core data types and error definitions for the processing pipeline.

use crate::{chroma::ChromaError, embedding::EmbeddingClientError};
use rayon::ThreadPoolBuildError;
use reqwest::StatusCode;
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors produced while turning raw text into chunks.
#[derive(Debug, Error)]
pub enum ChunkingError {
    /// Ingestion configured an impossible chunk budget.
    #[error("chunk_size must be greater than zero")]
    InvalidChunkSize,
    /// The worker pool for parallel splitting could not be created.
    #[error("failed to start chunking workers: {0}")]
    WorkerPool(#[from] ThreadPoolBuildError),
}

/// Errors raised while resolving a document reference to raw content.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Local path resolves outside every allow-listed directory.
    #[error("Access to path not allowed: {0}")]
    AccessDenied(String),
    /// Local path does not exist or is not a regular file.
    #[error("File not found: {0}")]
    NotFound(String),
    /// Local file exceeds the configured size ceiling.
    #[error("File too large: {path} ({size} bytes, limit {limit})")]
    TooLarge {
        /// Offending path.
        path: String,
        /// Actual size in bytes.
        size: u64,
        /// Configured ceiling in bytes.
        limit: u64,
    },
    /// Remote server answered with a non-success status.
    #[error("Failed to fetch {url}: HTTP {status}")]
    Status {
        /// Requested URL.
        url: String,
        /// Status returned by the server.
        status: StatusCode,
    },
    /// HTTP layer failed before receiving a response (includes timeouts).
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Local filesystem error.
    #[error("Failed to read {path}: {source}")]
    Io {
        /// Path being read.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Content was expected to be UTF-8 text.
    #[error("File is not valid UTF-8 text: {0}")]
    InvalidUtf8(String),
}

/// Errors raised by the format readers.
#[derive(Debug, Error)]
pub enum ReaderError {
    /// File extension has no registered reader.
    #[error("Unsupported file type: {0}")]
    UnsupportedFormat(String),
    /// Content could not be fetched.
    #[error(transparent)]
    Fetch(#[from] FetchError),
    /// DOCX archive or XML was malformed.
    #[error("Error reading DOCX file: {0}")]
    Docx(String),
    /// PDF could not be parsed.
    #[error("Error reading PDF file: {0}")]
    Pdf(String),
    /// CSV could not be parsed.
    #[error("Error reading CSV file: {0}")]
    Csv(#[from] csv::Error),
    /// JSON could not be parsed.
    #[error("Error reading JSON file: {0}")]
    Json(#[from] serde_json::Error),
    /// Text could not be chunked.
    #[error(transparent)]
    Chunking(#[from] ChunkingError),
    /// The worker pool for parallel extraction could not be created.
    #[error("failed to start extraction workers: {0}")]
    WorkerPool(#[from] ThreadPoolBuildError),
    /// Blocking extraction task panicked or was cancelled.
    #[error("extraction task failed: {0}")]
    Join(String),
}

impl ReaderError {
    /// True when the failure is caused by the caller's input rather than the server.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedFormat(_)
                | Self::Csv(_)
                | Self::Json(_)
                | Self::Chunking(ChunkingError::InvalidChunkSize)
        )
    }
}

/// Errors emitted by the store manager.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Caller supplied inconsistent input.
    #[error("{0}")]
    Validation(String),
    /// Embedding provider failed to produce vectors for the input text.
    #[error(transparent)]
    Embedding(#[from] EmbeddingClientError),
    /// Chroma interaction failed.
    #[error("Chroma request failed: {0}")]
    Chroma(#[from] ChromaError),
}

/// Metadata attached to a stored chunk.
pub type Metadata = Map<String, Value>;

/// Result of [`crate::processing::StoreManager::add_documents`].
#[derive(Debug, Clone)]
pub struct AddOutcome {
    /// Number of chunks written.
    pub added: usize,
    /// Ids assigned to the written chunks, in input order.
    pub ids: Vec<String>,
    /// Embedding model used for the chunks.
    pub model_used: String,
}

/// Result of [`crate::processing::StoreManager::delete_documents`].
#[derive(Debug, Clone, Default)]
pub struct DeleteOutcome {
    /// Number of records removed.
    pub deleted: usize,
    /// Ids of the removed records.
    pub ids: Vec<String>,
}

/// Parameters for a nearest-neighbour query.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    /// Collection to search.
    pub collection: String,
    /// Natural language query text to embed.
    pub query_text: String,
    /// Maximum number of matches to return.
    pub n_results: usize,
    /// Embedding overrides.
    pub embedding: crate::embedding::EmbeddingOptions,
    /// Metadata/content constraints.
    pub filters: crate::chroma::QueryFilters,
}

/// One nearest-neighbour match.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryMatch {
    /// Record id.
    pub id: String,
    /// Stored document text.
    pub document: Option<String>,
    /// Stored metadata.
    pub metadata: Option<Metadata>,
    /// Cosine distance to the query.
    pub distance: Option<f64>,
}

/// Matches ordered by ascending distance, plus the model used to embed the query.
#[derive(Debug, Clone)]
pub struct QueryOutcome {
    /// Ordered matches.
    pub matches: Vec<QueryMatch>,
    /// Embedding model used for the query.
    pub model_used: String,
}
