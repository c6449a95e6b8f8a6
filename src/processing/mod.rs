//! Ingestion pipeline: fetching, format readers, chunking, and the Chroma-backed store manager.

pub mod chunking;
pub mod fetch;
pub mod pool;
pub mod readers;
pub mod sanitize;
mod service;
pub mod types;

pub use chunking::{ChunkOptions, split_text};
pub use fetch::Fetcher;
pub use pool::Parallelism;
pub use readers::{DocumentReader, FileType};
pub use service::{StoreApi, StoreManager};
pub use types::{
    AddOutcome, ChunkingError, DeleteOutcome, FetchError, Metadata, QueryMatch, QueryOutcome,
    QueryRequest, ReaderError, StoreError,
};
