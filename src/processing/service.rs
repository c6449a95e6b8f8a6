//! Store manager coordinating embeddings and Chroma operations.

use crate::{
    chroma::{ChromaService, GetFilters, QueryResponse},
    config::Config,
    embedding::{EmbeddingClient, EmbeddingClientError, EmbeddingOptions, get_embedding_client},
    processing::{
        sanitize::{default_metadata, normalize_metadata},
        types::{
            AddOutcome, DeleteOutcome, Metadata, QueryMatch, QueryOutcome, QueryRequest,
            StoreError,
        },
    },
};
use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

/// Fields returned by `show_collection` when the caller does not choose.
const DEFAULT_GET_INCLUDE: [&str; 2] = ["metadatas", "documents"];

/// Owns the embedding client and Chroma transport.
///
/// Construct once near process start and share it through an `Arc`.
pub struct StoreManager {
    embedding_client: Box<dyn EmbeddingClient + Send + Sync>,
    chroma: ChromaService,
}

/// Store operations used by the HTTP surface.
#[async_trait]
pub trait StoreApi: Send + Sync {
    /// Round-trip to Chroma's heartbeat endpoint.
    async fn heartbeat(&self) -> Result<(), StoreError>;

    /// Embed and write `texts` into `collection`, creating it if needed.
    ///
    /// `metadata`, when supplied, must hold one entry per text.
    async fn add_documents(
        &self,
        collection: &str,
        texts: Vec<String>,
        metadata: Option<Vec<Metadata>>,
        embedding: EmbeddingOptions,
    ) -> Result<AddOutcome, StoreError>;

    /// Delete every record matching `filters`.
    async fn delete_documents(
        &self,
        collection: &str,
        filters: GetFilters,
    ) -> Result<DeleteOutcome, StoreError>;

    /// Drop a collection and all of its records.
    async fn delete_collection(&self, collection: &str) -> Result<(), StoreError>;

    /// Raw records matching `filters`.
    async fn get_documents(
        &self,
        collection: &str,
        filters: GetFilters,
    ) -> Result<Value, StoreError>;

    /// Number of records in a collection.
    async fn count_documents(&self, collection: &str) -> Result<u64, StoreError>;

    /// Nearest neighbours of the query text, ordered by ascending distance.
    async fn query_collection(&self, request: QueryRequest) -> Result<QueryOutcome, StoreError>;
}

impl StoreManager {
    /// Build the manager from configuration.
    pub fn new(config: &Config) -> Result<Self, StoreError> {
        tracing::info!(url = %config.chroma_url(), "Initializing Chroma client");
        let chroma = ChromaService::new(&config.chroma_url(), config.chroma_auth_token.clone())?;
        let embedding_client = get_embedding_client(config)?;
        Ok(Self::with_clients(embedding_client, chroma))
    }

    /// Assemble a manager from existing clients.
    pub fn with_clients(
        embedding_client: Box<dyn EmbeddingClient + Send + Sync>,
        chroma: ChromaService,
    ) -> Self {
        Self {
            embedding_client,
            chroma,
        }
    }

    /// Embed and write a batch of chunks.
    pub async fn add_documents(
        &self,
        collection_name: &str,
        texts: Vec<String>,
        metadata: Option<Vec<Metadata>>,
        embedding: EmbeddingOptions,
    ) -> Result<AddOutcome, StoreError> {
        if let Some(metadata) = &metadata
            && metadata.len() != texts.len()
        {
            return Err(StoreError::Validation(format!(
                "metadata count ({}) does not match document count ({})",
                metadata.len(),
                texts.len()
            )));
        }

        let collection = self.chroma.get_or_create_collection(collection_name).await?;
        let model_used = self.embedding_client.resolve_model(&embedding);
        if texts.is_empty() {
            tracing::info!(collection = collection_name, "No chunks to add");
            return Ok(AddOutcome {
                added: 0,
                ids: Vec::new(),
                model_used,
            });
        }

        let ids: Vec<String> = texts.iter().map(|_| Uuid::new_v4().to_string()).collect();
        let embeddings = self
            .embedding_client
            .generate_embeddings(texts.clone(), &embedding)
            .await?;
        if embeddings.len() != texts.len() {
            return Err(StoreError::Embedding(EmbeddingClientError::InvalidResponse(
                format!(
                    "expected {} embeddings, received {}",
                    texts.len(),
                    embeddings.len()
                ),
            )));
        }

        let metadatas: Vec<Metadata> = metadata
            .unwrap_or_else(|| vec![default_metadata(); texts.len()])
            .into_iter()
            .map(|entry| {
                if entry.is_empty() {
                    default_metadata()
                } else {
                    normalize_metadata(entry)
                }
            })
            .collect();

        self.chroma
            .add(&collection, &ids, &embeddings, &metadatas, &texts)
            .await?;
        tracing::info!(
            collection = collection_name,
            added = ids.len(),
            model = %model_used,
            "Documents added"
        );

        Ok(AddOutcome {
            added: ids.len(),
            ids,
            model_used,
        })
    }

    /// Resolve matching ids, then delete them. Nothing is deleted when nothing matches.
    pub async fn delete_documents(
        &self,
        collection_name: &str,
        filters: GetFilters,
    ) -> Result<DeleteOutcome, StoreError> {
        let collection = self.chroma.get_collection(collection_name).await?;
        let ids = self.chroma.get_ids(&collection, &filters).await?;
        if ids.is_empty() {
            tracing::info!(collection = collection_name, "No documents matched delete filters");
            return Ok(DeleteOutcome::default());
        }

        self.chroma.delete(&collection, &ids).await?;
        tracing::info!(
            collection = collection_name,
            deleted = ids.len(),
            "Documents deleted"
        );
        Ok(DeleteOutcome {
            deleted: ids.len(),
            ids,
        })
    }

    /// Drop a collection.
    pub async fn delete_collection(&self, collection_name: &str) -> Result<(), StoreError> {
        self.chroma.delete_collection(collection_name).await?;
        tracing::info!(collection = collection_name, "Collection deleted");
        Ok(())
    }

    /// Raw `get` passthrough; documents and metadata are included unless overridden.
    pub async fn get_documents(
        &self,
        collection_name: &str,
        mut filters: GetFilters,
    ) -> Result<Value, StoreError> {
        let collection = self.chroma.get_collection(collection_name).await?;
        if filters.include.is_none() {
            filters.include = Some(DEFAULT_GET_INCLUDE.iter().map(|s| s.to_string()).collect());
        }
        Ok(self.chroma.get(&collection, &filters).await?)
    }

    /// Number of records in a collection.
    pub async fn count_documents(&self, collection_name: &str) -> Result<u64, StoreError> {
        let collection = self.chroma.get_collection(collection_name).await?;
        Ok(self.chroma.count(&collection).await?)
    }

    /// Embed the query text and search the collection.
    pub async fn query_collection(
        &self,
        request: QueryRequest,
    ) -> Result<QueryOutcome, StoreError> {
        let QueryRequest {
            collection,
            query_text,
            n_results,
            embedding,
            filters,
        } = request;
        if n_results == 0 {
            return Err(StoreError::Validation(
                "n_results must be at least 1".into(),
            ));
        }

        let info = self.chroma.get_collection(&collection).await?;
        let model_used = self.embedding_client.resolve_model(&embedding);
        let mut vectors = self
            .embedding_client
            .generate_embeddings(vec![query_text], &embedding)
            .await?;
        let vector = vectors.pop().ok_or_else(|| {
            StoreError::Embedding(EmbeddingClientError::InvalidResponse(
                "no embedding returned for query".into(),
            ))
        })?;

        let response = self
            .chroma
            .query(&info, &vector, n_results, &filters)
            .await?;
        let matches = ordered_matches(response);
        tracing::info!(
            collection = %collection,
            matches = matches.len(),
            model = %model_used,
            "Query completed"
        );
        Ok(QueryOutcome {
            matches,
            model_used,
        })
    }
}

/// Flatten the first query's columns into matches sorted by ascending distance.
///
/// Missing distances sort last; ties keep Chroma's order.
fn ordered_matches(response: QueryResponse) -> Vec<QueryMatch> {
    let QueryResponse {
        ids,
        documents,
        metadatas,
        distances,
    } = response;
    let ids = ids.into_iter().next().unwrap_or_default();
    let mut documents = first_column(documents).into_iter();
    let mut metadatas = first_column(metadatas).into_iter();
    let mut distances = first_column(distances).into_iter();

    let mut matches: Vec<QueryMatch> = ids
        .into_iter()
        .map(|id| QueryMatch {
            id,
            document: documents.next().flatten(),
            metadata: metadatas.next().flatten(),
            distance: distances.next().flatten(),
        })
        .collect();

    matches.sort_by(|left, right| match (left.distance, right.distance) {
        (Some(a), Some(b)) => a.total_cmp(&b),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });
    matches
}

fn first_column<T>(column: Option<Vec<Vec<Option<T>>>>) -> Vec<Option<T>> {
    column
        .and_then(|rows| rows.into_iter().next())
        .unwrap_or_default()
}

#[async_trait]
impl StoreApi for StoreManager {
    async fn heartbeat(&self) -> Result<(), StoreError> {
        Ok(self.chroma.heartbeat().await?)
    }

    async fn add_documents(
        &self,
        collection: &str,
        texts: Vec<String>,
        metadata: Option<Vec<Metadata>>,
        embedding: EmbeddingOptions,
    ) -> Result<AddOutcome, StoreError> {
        StoreManager::add_documents(self, collection, texts, metadata, embedding).await
    }

    async fn delete_documents(
        &self,
        collection: &str,
        filters: GetFilters,
    ) -> Result<DeleteOutcome, StoreError> {
        StoreManager::delete_documents(self, collection, filters).await
    }

    async fn delete_collection(&self, collection: &str) -> Result<(), StoreError> {
        StoreManager::delete_collection(self, collection).await
    }

    async fn get_documents(
        &self,
        collection: &str,
        filters: GetFilters,
    ) -> Result<Value, StoreError> {
        StoreManager::get_documents(self, collection, filters).await
    }

    async fn count_documents(&self, collection: &str) -> Result<u64, StoreError> {
        StoreManager::count_documents(self, collection).await
    }

    async fn query_collection(&self, request: QueryRequest) -> Result<QueryOutcome, StoreError> {
        StoreManager::query_collection(self, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chroma::QueryFilters;
    use httpmock::{
        Method::{GET, POST},
        MockServer,
    };
    use serde_json::json;
    use std::sync::Mutex;

    /// Deterministic embeddings: one two-dimensional vector per input.
    #[derive(Default)]
    struct FakeEmbedding {
        calls: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl EmbeddingClient for FakeEmbedding {
        async fn generate_embeddings(
            &self,
            texts: Vec<String>,
            _options: &EmbeddingOptions,
        ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
            let vectors = texts.iter().map(|text| vec![text.len() as f32, 1.0]).collect();
            self.calls.lock().expect("lock").push(texts);
            Ok(vectors)
        }

        fn resolve_model(&self, options: &EmbeddingOptions) -> String {
            options
                .model
                .clone()
                .unwrap_or_else(|| "fake-embedding".into())
        }
    }

    fn manager(server: &MockServer) -> StoreManager {
        let chroma = ChromaService::new(&server.base_url(), None).expect("chroma");
        StoreManager::with_clients(Box::new(FakeEmbedding::default()), chroma)
    }

    async fn mock_collection(server: &MockServer, name: &str, id: &str) {
        let body = json!({"id": id, "name": name, "metadata": {"hnsw:space": "cosine"}});
        let create_body = body.clone();
        server
            .mock_async(move |when, then| {
                when.method(GET)
                    .path(format!("/api/v1/collections/{name}"));
                then.status(200).json_body(body);
            })
            .await;
        server
            .mock_async(move |when, then| {
                when.method(POST).path("/api/v1/collections");
                then.status(200).json_body(create_body);
            })
            .await;
    }

    #[test]
    fn matches_are_sorted_by_distance_with_missing_last() {
        let response = QueryResponse {
            ids: vec![vec!["a".into(), "b".into(), "c".into()]],
            documents: Some(vec![vec![
                Some("doc a".into()),
                Some("doc b".into()),
                None,
            ]]),
            metadatas: None,
            distances: Some(vec![vec![Some(0.9), None, Some(0.1)]]),
        };
        let ordered: Vec<String> = ordered_matches(response)
            .into_iter()
            .map(|hit| hit.id)
            .collect();
        assert_eq!(ordered, vec!["c", "a", "b"]);
    }

    #[tokio::test]
    async fn add_documents_writes_default_metadata_and_ids() {
        let server = MockServer::start_async().await;
        mock_collection(&server, "demo", "col-1").await;
        let add = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/v1/collections/col-1/add")
                    .json_body_partial(
                        r#"{"documents":["one","three"],"metadatas":[{"source":"api"},{"source":"api"}]}"#,
                    );
                then.status(201).json_body(json!(true));
            })
            .await;

        let outcome = manager(&server)
            .add_documents(
                "demo",
                vec!["one".into(), "three".into()],
                None,
                EmbeddingOptions::default(),
            )
            .await
            .expect("add");

        add.assert_async().await;
        assert_eq!(outcome.added, 2);
        assert_eq!(outcome.ids.len(), 2);
        assert_ne!(outcome.ids[0], outcome.ids[1]);
        assert_eq!(outcome.model_used, "fake-embedding");
    }

    #[tokio::test]
    async fn add_documents_rejects_mismatched_metadata() {
        let server = MockServer::start_async().await;
        let error = manager(&server)
            .add_documents(
                "demo",
                vec!["one".into()],
                Some(Vec::new()),
                EmbeddingOptions::default(),
            )
            .await
            .expect_err("mismatch");
        assert!(matches!(error, StoreError::Validation(_)));
    }

    #[tokio::test]
    async fn delete_with_no_matches_skips_delete_call() {
        let server = MockServer::start_async().await;
        mock_collection(&server, "demo", "col-1").await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/v1/collections/col-1/get");
                then.status(200).json_body(json!({"ids": []}));
            })
            .await;
        let delete = server
            .mock_async(|when, then| {
                when.method(POST).path("/api/v1/collections/col-1/delete");
                then.status(200).json_body(json!([]));
            })
            .await;

        let filters = GetFilters {
            where_: Some(json!({"source": "missing.txt"})),
            ..GetFilters::default()
        };
        let outcome = manager(&server)
            .delete_documents("demo", filters)
            .await
            .expect("delete");

        assert_eq!(outcome.deleted, 0);
        assert!(outcome.ids.is_empty());
        delete.assert_hits_async(0).await;
    }

    #[tokio::test]
    async fn delete_removes_resolved_ids() {
        let server = MockServer::start_async().await;
        mock_collection(&server, "demo", "col-1").await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/v1/collections/col-1/get")
                    .json_body_partial(r#"{"where":{"source":"a.txt"},"include":[]}"#);
                then.status(200).json_body(json!({"ids": ["x", "y"]}));
            })
            .await;
        let delete = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/v1/collections/col-1/delete")
                    .json_body(json!({"ids": ["x", "y"]}));
                then.status(200).json_body(json!(["x", "y"]));
            })
            .await;

        let filters = GetFilters {
            where_: Some(json!({"source": "a.txt"})),
            ..GetFilters::default()
        };
        let outcome = manager(&server)
            .delete_documents("demo", filters)
            .await
            .expect("delete");

        delete.assert_async().await;
        assert_eq!(outcome.deleted, 2);
        assert_eq!(outcome.ids, vec!["x", "y"]);
    }

    #[tokio::test]
    async fn get_documents_defaults_include() {
        let server = MockServer::start_async().await;
        mock_collection(&server, "demo", "col-1").await;
        let payload = json!({"ids": ["x"], "documents": ["text"], "metadatas": [{"source": "api"}]});
        let get = server
            .mock_async({
                let payload = payload.clone();
                move |when, then| {
                    when.method(POST)
                        .path("/api/v1/collections/col-1/get")
                        .json_body(json!({"include": ["metadatas", "documents"]}));
                    then.status(200).json_body(payload);
                }
            })
            .await;

        let value = manager(&server)
            .get_documents("demo", GetFilters::default())
            .await
            .expect("get");

        get.assert_async().await;
        assert_eq!(value, payload);
    }

    #[tokio::test]
    async fn query_collection_orders_matches_and_reports_model() {
        let server = MockServer::start_async().await;
        mock_collection(&server, "demo", "col-1").await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/v1/collections/col-1/query")
                    .json_body_partial(r#"{"n_results":2,"where":{"lang":"en"}}"#);
                then.status(200).json_body(json!({
                    "ids": [["far", "near"]],
                    "documents": [["far doc", "near doc"]],
                    "metadatas": [[{"lang": "en"}, {"lang": "en"}]],
                    "distances": [[0.8, 0.2]]
                }));
            })
            .await;

        let outcome = manager(&server)
            .query_collection(QueryRequest {
                collection: "demo".into(),
                query_text: "hello".into(),
                n_results: 2,
                embedding: EmbeddingOptions {
                    api_key: None,
                    model: Some("custom-model".into()),
                },
                filters: QueryFilters {
                    where_: Some(json!({"lang": "en"})),
                    where_document: None,
                },
            })
            .await
            .expect("query");

        assert_eq!(outcome.model_used, "custom-model");
        let ids: Vec<&str> = outcome.matches.iter().map(|hit| hit.id.as_str()).collect();
        assert_eq!(ids, vec!["near", "far"]);
        assert_eq!(outcome.matches[0].document.as_deref(), Some("near doc"));
    }
}
