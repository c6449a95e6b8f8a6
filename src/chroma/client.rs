//! HTTP client wrapper for interacting with Chroma's v1 REST API.

use crate::chroma::types::{
    AddBody, ChromaError, CollectionInfo, CreateCollectionBody, DeleteBody, GetFilters,
    GetIdsResponse, QueryBody, QueryFilters, QueryResponse,
};
use reqwest::{Client, Method};
use serde_json::{Map, Value, json};
use std::net::Ipv4Addr;

const API_PREFIX: &str = "api/v1";
const COLLECTION_NAME_LEN: std::ops::RangeInclusive<usize> = 3..=63;

/// Lightweight HTTP client for Chroma operations.
pub struct ChromaService {
    pub(crate) client: Client,
    pub(crate) base_url: String,
    pub(crate) auth_token: Option<String>,
}

impl ChromaService {
    /// Construct a new client for the Chroma server at `url`.
    pub fn new(url: &str, auth_token: Option<String>) -> Result<Self, ChromaError> {
        let client = Client::builder().user_agent("chroma-gateway/0.1").build()?;
        let base_url = normalize_base_url(url).map_err(ChromaError::InvalidUrl)?;
        tracing::info!(
            url = %base_url,
            has_auth_token = auth_token.as_deref().is_some_and(|value| !value.is_empty()),
            "Chroma client initialized"
        );

        Ok(Self {
            client,
            base_url,
            auth_token,
        })
    }

    /// Ping the server; succeeds when Chroma answers its heartbeat endpoint.
    pub async fn heartbeat(&self) -> Result<(), ChromaError> {
        let response = self.request(Method::GET, "heartbeat").send().await?;
        self.ensure_success(response, || {}).await
    }

    /// Fetch a collection, creating it with cosine distance when it is missing.
    pub async fn get_or_create_collection(
        &self,
        name: &str,
    ) -> Result<CollectionInfo, ChromaError> {
        validate_collection_name(name)?;
        let body = CreateCollectionBody {
            name,
            metadata: json!({ "hnsw:space": "cosine" }),
            get_or_create: true,
        };
        let response = self
            .request(Method::POST, "collections")
            .json(&body)
            .send()
            .await?;
        let collection: CollectionInfo = self.parse_json(response).await?;
        tracing::debug!(collection = name, id = %collection.id, "Collection ensured");
        Ok(collection)
    }

    /// Fetch an existing collection by name.
    pub async fn get_collection(&self, name: &str) -> Result<CollectionInfo, ChromaError> {
        validate_collection_name(name)?;
        let response = self
            .request(Method::GET, &format!("collections/{name}"))
            .send()
            .await?;
        self.parse_json(response).await
    }

    /// Drop a collection and every record in it.
    pub async fn delete_collection(&self, name: &str) -> Result<(), ChromaError> {
        validate_collection_name(name)?;
        let response = self
            .request(Method::DELETE, &format!("collections/{name}"))
            .send()
            .await?;
        self.ensure_success(response, || {
            tracing::info!(collection = name, "Collection deleted");
        })
        .await
    }

    /// Write documents with their embeddings, metadata, and ids.
    pub async fn add(
        &self,
        collection: &CollectionInfo,
        ids: &[String],
        embeddings: &[Vec<f32>],
        metadatas: &[Map<String, Value>],
        documents: &[String],
    ) -> Result<(), ChromaError> {
        let body = AddBody {
            ids,
            embeddings,
            metadatas,
            documents,
        };
        let response = self
            .request(Method::POST, &format!("collections/{}/add", collection.id))
            .json(&body)
            .send()
            .await?;
        self.ensure_success(response, || {
            tracing::debug!(
                collection = %collection.name,
                records = ids.len(),
                "Records added"
            );
        })
        .await
    }

    /// Raw `get` passthrough; the response body is returned untouched.
    pub async fn get(
        &self,
        collection: &CollectionInfo,
        filters: &GetFilters,
    ) -> Result<Value, ChromaError> {
        let response = self
            .request(Method::POST, &format!("collections/{}/get", collection.id))
            .json(filters)
            .send()
            .await?;
        self.parse_json(response).await
    }

    /// Resolve the ids of records matching `filters` without fetching their payloads.
    pub async fn get_ids(
        &self,
        collection: &CollectionInfo,
        filters: &GetFilters,
    ) -> Result<Vec<String>, ChromaError> {
        let body = GetFilters {
            include: Some(Vec::new()),
            ..filters.clone()
        };
        let response = self
            .request(Method::POST, &format!("collections/{}/get", collection.id))
            .json(&body)
            .send()
            .await?;
        let GetIdsResponse { ids } = self.parse_json(response).await?;
        Ok(ids)
    }

    /// Delete records by id.
    pub async fn delete(
        &self,
        collection: &CollectionInfo,
        ids: &[String],
    ) -> Result<(), ChromaError> {
        let response = self
            .request(
                Method::POST,
                &format!("collections/{}/delete", collection.id),
            )
            .json(&DeleteBody { ids })
            .send()
            .await?;
        self.ensure_success(response, || {
            tracing::debug!(collection = %collection.name, records = ids.len(), "Records deleted");
        })
        .await
    }

    /// Number of records stored in the collection.
    pub async fn count(&self, collection: &CollectionInfo) -> Result<u64, ChromaError> {
        let response = self
            .request(Method::GET, &format!("collections/{}/count", collection.id))
            .send()
            .await?;
        self.parse_json(response).await
    }

    /// Nearest-neighbour search for a single query embedding.
    pub async fn query(
        &self,
        collection: &CollectionInfo,
        embedding: &[f32],
        n_results: usize,
        filters: &QueryFilters,
    ) -> Result<QueryResponse, ChromaError> {
        let body = QueryBody {
            query_embeddings: vec![embedding],
            n_results,
            include: ["documents", "metadatas", "distances"],
            where_: filters.where_.as_ref(),
            where_document: filters.where_document.as_ref(),
        };
        let response = self
            .request(Method::POST, &format!("collections/{}/query", collection.id))
            .json(&body)
            .send()
            .await?;
        self.parse_json(response).await
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format_endpoint(&self.base_url, path);
        let mut req = self.client.request(method, url);
        if let Some(token) = &self.auth_token
            && !token.is_empty()
        {
            req = req.header("X-Chroma-Token", token);
        }
        req
    }

    async fn ensure_success<F>(
        &self,
        response: reqwest::Response,
        on_success: F,
    ) -> Result<(), ChromaError>
    where
        F: FnOnce(),
    {
        if response.status().is_success() {
            on_success();
            Ok(())
        } else {
            Err(Self::status_error(response).await)
        }
    }

    async fn parse_json<T>(&self, response: reqwest::Response) -> Result<T, ChromaError>
    where
        T: serde::de::DeserializeOwned,
    {
        if !response.status().is_success() {
            return Err(Self::status_error(response).await);
        }
        Ok(response.json().await?)
    }

    async fn status_error(response: reqwest::Response) -> ChromaError {
        let status = response.status();
        let url = response.url().path().to_string();
        let body = response.text().await.unwrap_or_default();
        let error = ChromaError::UnexpectedStatus { status, body };
        tracing::error!(path = %url, error = %error, "Chroma request failed");
        error
    }
}

/// Check `name` against Chroma's collection naming rules.
///
/// Names end up as URL path segments, so anything outside `[A-Za-z0-9._-]` is refused
/// before a request is built.
pub fn validate_collection_name(name: &str) -> Result<(), ChromaError> {
    let invalid = |reason| {
        Err(ChromaError::InvalidCollectionName {
            name: name.to_string(),
            reason,
        })
    };
    if !COLLECTION_NAME_LEN.contains(&name.len()) {
        return invalid("must be between 3 and 63 characters");
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return invalid("only letters, digits, '.', '_' and '-' are allowed");
    }
    let bytes = name.as_bytes();
    if !bytes[0].is_ascii_alphanumeric() || !bytes[bytes.len() - 1].is_ascii_alphanumeric() {
        return invalid("must start and end with a letter or digit");
    }
    if name.contains("..") {
        return invalid("must not contain two consecutive periods");
    }
    if name.parse::<Ipv4Addr>().is_ok() {
        return invalid("must not be an IPv4 address");
    }
    Ok(())
}

fn normalize_base_url(url: &str) -> Result<String, String> {
    let mut parsed = reqwest::Url::parse(url).map_err(|err| err.to_string())?;
    let path = parsed.path().trim_end_matches('/').to_string();
    parsed.set_path(&path);
    Ok(parsed.to_string())
}

fn format_endpoint(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{API_PREFIX}/{path}")
}
