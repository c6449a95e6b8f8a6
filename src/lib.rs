#![deny(missing_docs)]

//! Core library for the Chroma gateway: document ingestion, embedding, and vector storage
//! behind a single token-authenticated HTTP endpoint.

/// HTTP routing and action handlers.
pub mod api;
/// ChromaDB HTTP client.
pub mod chroma;
/// Environment-driven configuration management.
pub mod config;
/// Embedding client abstraction and adapters.
pub mod embedding;
/// Structured logging, tracing setup, and the append-only error log.
pub mod logging;
/// Document fetching, parsing, chunking, and the store manager.
pub mod processing;
