//! ChromaDB vector store integration.

pub mod client;
pub mod types;

pub use client::ChromaService;
pub use types::{ChromaError, CollectionInfo, GetFilters, QueryFilters, QueryResponse};
