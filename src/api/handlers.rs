//! Action handlers behind `POST /api`.
//!
//! Each handler deserializes its own typed request from the JSON body, validates required
//! fields, delegates to the reader and store, and shapes the success payload.

use crate::{
    chroma::{GetFilters, QueryFilters},
    embedding::EmbeddingOptions,
    processing::{
        ChunkOptions, Metadata, Parallelism, QueryRequest, StoreApi,
        sanitize::{sanitize_string, with_default_source},
    },
};
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::{Map, Value, json};

use super::{ApiError, AppState};

const DEFAULT_N_RESULTS: usize = 4;

/// Actions accepted by `POST /api`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Read a file or URL, chunk it, and store the chunks.
    Upsert,
    /// Store inline JSON, optionally one chunk per question.
    UpsertJson,
    /// Delete records matching a filter.
    DeleteFile,
    /// Drop a whole collection.
    DeleteCollection,
    /// Return raw records matching a filter.
    ShowCollection,
    /// Count records in a collection.
    Count,
    /// Nearest-neighbour search.
    Query,
}

impl Action {
    /// Every action, in dispatch-table order.
    pub const ALL: [Action; 7] = [
        Action::Upsert,
        Action::UpsertJson,
        Action::DeleteFile,
        Action::DeleteCollection,
        Action::ShowCollection,
        Action::Count,
        Action::Query,
    ];

    /// Wire name of the action.
    pub fn name(self) -> &'static str {
        match self {
            Action::Upsert => "upsert",
            Action::UpsertJson => "upsert_json",
            Action::DeleteFile => "delete_file",
            Action::DeleteCollection => "delete_collection",
            Action::ShowCollection => "show_collection",
            Action::Count => "count",
            Action::Query => "query",
        }
    }

    /// Look up an action by wire name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|action| action.name() == name)
    }
}

pub(super) async fn dispatch<S>(
    action: Action,
    state: &AppState<S>,
    payload: Map<String, Value>,
) -> Result<Value, ApiError>
where
    S: StoreApi,
{
    let payload = Value::Object(payload);
    match action {
        Action::Upsert => upsert(state, parse(payload)?).await,
        Action::UpsertJson => upsert_json(state, parse(payload)?).await,
        Action::DeleteFile => delete_file(state, parse(payload)?).await,
        Action::DeleteCollection => delete_collection(state, parse(payload)?).await,
        Action::ShowCollection => show_collection(state, parse(payload)?).await,
        Action::Count => count(state, parse(payload)?).await,
        Action::Query => query(state, parse(payload)?).await,
    }
}

fn parse<T: DeserializeOwned>(payload: Value) -> Result<T, ApiError> {
    serde_json::from_value(payload)
        .map_err(|error| ApiError::Validation(format!("Invalid request: {error}")))
}

fn required(value: Option<String>, field: &str) -> Result<String, ApiError> {
    value
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ApiError::Validation(format!("{field} is required")))
}

fn embedding_options(api_key: Option<String>, model: Option<String>) -> EmbeddingOptions {
    EmbeddingOptions {
        api_key: sanitize_string(api_key),
        model: sanitize_string(model),
    }
}

/// Values a caller would consider "not provided": null, false, zero, and empty containers.
pub(super) fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(flag) => !flag,
        Value::Number(number) => number.as_f64() == Some(0.0),
        Value::String(text) => text.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(fields) => fields.is_empty(),
    }
}

#[derive(Deserialize)]
struct UpsertRequest {
    file_name: Option<String>,
    collection_name: Option<String>,
    chunk_size: Option<usize>,
    chunk_overlap: Option<usize>,
    custom_separators: Option<Vec<String>>,
    metadata: Option<Metadata>,
    openai_api_key: Option<String>,
    model_name: Option<String>,
}

async fn upsert<S: StoreApi>(
    state: &AppState<S>,
    request: UpsertRequest,
) -> Result<Value, ApiError> {
    let file_name = required(request.file_name, "file_name")?;
    let collection = required(request.collection_name, "collection_name")?;
    tracing::info!(file = %file_name, collection = %collection, "Starting file upload");

    let options = ChunkOptions {
        chunk_size: request.chunk_size,
        chunk_overlap: request.chunk_overlap,
        custom_separators: request.custom_separators,
        parallelism: Parallelism::new(state.max_workers),
    };
    let texts = state.reader.read_file(&file_name, &options).await?;
    let metadata = request
        .metadata
        .filter(|metadata| !metadata.is_empty())
        .map(|metadata| vec![metadata; texts.len()]);

    let outcome = state
        .store
        .add_documents(
            &collection,
            texts,
            metadata,
            embedding_options(request.openai_api_key, request.model_name),
        )
        .await?;
    Ok(json!({
        "status": "success",
        "added": outcome.added,
        "ids": outcome.ids,
        "model_used": outcome.model_used,
    }))
}

#[derive(Deserialize)]
struct UpsertJsonRequest {
    collection_name: Option<String>,
    json_data: Option<Value>,
    separate_chunks: Option<bool>,
    metadata: Option<Value>,
    openai_api_key: Option<String>,
    model_name: Option<String>,
}

async fn upsert_json<S: StoreApi>(
    state: &AppState<S>,
    request: UpsertJsonRequest,
) -> Result<Value, ApiError> {
    let collection = required(request.collection_name, "collection_name")?;
    let json_data = request
        .json_data
        .filter(|data| !is_blank(data))
        .ok_or_else(|| ApiError::Validation("json_data is required".into()))?;
    let global = match request.metadata {
        None => Metadata::new(),
        Some(Value::Object(fields)) => fields,
        Some(_) => return Err(ApiError::Validation("metadata must be an object".into())),
    };

    let (texts, metadatas) =
        build_json_documents(json_data, request.separate_chunks.unwrap_or(false), global)?;
    tracing::info!(collection = %collection, documents = texts.len(), "Upserting JSON data");

    let outcome = state
        .store
        .add_documents(
            &collection,
            texts,
            Some(metadatas),
            embedding_options(request.openai_api_key, request.model_name),
        )
        .await?;
    Ok(json!({
        "status": "success",
        "added": outcome.added,
        "ids": outcome.ids,
        "model_used": outcome.model_used,
    }))
}

/// Turn `json_data` into documents with one metadata entry each.
///
/// With `separate_chunks` and a non-empty `questions` array every item becomes its own
/// document; otherwise the whole payload is stored pretty-printed.
pub(super) fn build_json_documents(
    json_data: Value,
    separate_chunks: bool,
    global: Metadata,
) -> Result<(Vec<String>, Vec<Metadata>), ApiError> {
    if separate_chunks
        && let Some(Value::Array(items)) = json_data.get("questions")
        && !items.is_empty()
    {
        let mut texts = Vec::with_capacity(items.len());
        let mut metadatas = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            match item {
                Value::Object(fields) => {
                    let text = match fields.get("text") {
                        None | Some(Value::Null) => String::new(),
                        Some(Value::String(text)) => text.clone(),
                        Some(other) => other.to_string(),
                    };
                    let mut merged = global.clone();
                    match fields.get("metadata") {
                        None | Some(Value::Null) => {}
                        Some(Value::Object(item_metadata)) => merged.extend(item_metadata.clone()),
                        Some(_) => {
                            return Err(ApiError::Validation(format!(
                                "questions[{index}].metadata must be an object"
                            )));
                        }
                    }
                    texts.push(text);
                    metadatas.push(with_default_source(merged));
                }
                Value::String(text) => {
                    texts.push(text.clone());
                    metadatas.push(with_default_source(global.clone()));
                }
                other => {
                    texts.push(other.to_string());
                    metadatas.push(with_default_source(global.clone()));
                }
            }
        }
        return Ok((texts, metadatas));
    }

    let document = serde_json::to_string_pretty(&json_data)
        .map_err(|error| ApiError::Validation(format!("json_data is not serializable: {error}")))?;
    Ok((vec![document], vec![with_default_source(global)]))
}

#[derive(Deserialize)]
struct DeleteFileRequest {
    collection_name: Option<String>,
    filters: Option<GetFilters>,
}

async fn delete_file<S: StoreApi>(
    state: &AppState<S>,
    request: DeleteFileRequest,
) -> Result<Value, ApiError> {
    let collection = required(request.collection_name, "collection_name")?;
    let filters = request
        .filters
        .ok_or_else(|| ApiError::Validation("filters is required".into()))?;
    let outcome = state.store.delete_documents(&collection, filters).await?;
    Ok(json!({
        "status": "success",
        "deleted": outcome.deleted,
        "ids": outcome.ids,
    }))
}

#[derive(Deserialize)]
struct CollectionRequest {
    collection_name: Option<String>,
}

async fn delete_collection<S: StoreApi>(
    state: &AppState<S>,
    request: CollectionRequest,
) -> Result<Value, ApiError> {
    let collection = required(request.collection_name, "collection_name")?;
    state.store.delete_collection(&collection).await?;
    Ok(json!({
        "status": "success",
        "message": format!("Collection {collection} deleted"),
    }))
}

#[derive(Deserialize)]
struct ShowCollectionRequest {
    collection_name: Option<String>,
    filters: Option<GetFilters>,
}

async fn show_collection<S: StoreApi>(
    state: &AppState<S>,
    request: ShowCollectionRequest,
) -> Result<Value, ApiError> {
    let collection = required(request.collection_name, "collection_name")?;
    let filters = request.filters.unwrap_or_default();
    Ok(state.store.get_documents(&collection, filters).await?)
}

async fn count<S: StoreApi>(
    state: &AppState<S>,
    request: CollectionRequest,
) -> Result<Value, ApiError> {
    let collection = required(request.collection_name, "collection_name")?;
    let count = state.store.count_documents(&collection).await?;
    Ok(json!({ "status": "success", "count": count }))
}

#[derive(Deserialize)]
struct QueryActionRequest {
    collection_name: Option<String>,
    query: Option<String>,
    n_results: Option<usize>,
    model_name: Option<String>,
    openai_api_key: Option<String>,
    filters: Option<QueryFilters>,
}

async fn query<S: StoreApi>(
    state: &AppState<S>,
    request: QueryActionRequest,
) -> Result<Value, ApiError> {
    let collection = required(request.collection_name, "collection_name")?;
    let query_text = required(request.query, "query")?;
    let n_results = request.n_results.unwrap_or(DEFAULT_N_RESULTS);
    if n_results == 0 {
        return Err(ApiError::Validation("n_results must be at least 1".into()));
    }

    let outcome = state
        .store
        .query_collection(QueryRequest {
            collection,
            query_text,
            n_results,
            embedding: embedding_options(request.openai_api_key, request.model_name),
            filters: request.filters.unwrap_or_default(),
        })
        .await?;

    let mut documents = Vec::with_capacity(outcome.matches.len());
    let mut metadatas = Vec::with_capacity(outcome.matches.len());
    let mut distances = Vec::with_capacity(outcome.matches.len());
    let mut ids = Vec::with_capacity(outcome.matches.len());
    for hit in outcome.matches {
        documents.push(hit.document);
        metadatas.push(hit.metadata);
        distances.push(hit.distance);
        ids.push(hit.id);
    }

    Ok(json!({
        "status": "success",
        "results": {
            "documents": documents,
            "metadatas": metadatas,
            "distances": distances,
            "ids": ids,
            "model_used": outcome.model_used,
        }
    }))
}
