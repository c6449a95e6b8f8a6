use crate::config::Config;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum number of inputs sent in a single embeddings request.
const MAX_BATCH_SIZE: usize = 256;

/// Errors raised by embedding providers.
#[derive(Debug, Error)]
pub enum EmbeddingClientError {
    /// Neither the request nor the environment supplied an API key.
    #[error("OPENAI_API_KEY not found in request or environment")]
    MissingApiKey,
    /// Provider rejected the request (rate limit, unknown model, bad key, ...).
    #[error("Embedding provider error for model '{model}' ({status}): {message}")]
    Provider {
        /// Model the request was issued for.
        model: String,
        /// HTTP status returned by the provider.
        status: StatusCode,
        /// Provider-supplied error message.
        message: String,
    },
    /// HTTP layer failed before receiving a response.
    #[error("Embedding request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Provider answered successfully but the payload violated the embedding contract.
    #[error("Invalid embedding response: {0}")]
    InvalidResponse(String),
}

impl EmbeddingClientError {
    /// True when the failure stems from missing or rejected credentials.
    pub fn is_auth(&self) -> bool {
        match self {
            Self::MissingApiKey => true,
            Self::Provider { status, .. } => *status == StatusCode::UNAUTHORIZED,
            _ => false,
        }
    }
}

/// Per-request overrides for the embedding provider.
#[derive(Debug, Clone, Default)]
pub struct EmbeddingOptions {
    /// API key overriding the configured default.
    pub api_key: Option<String>,
    /// Model overriding the configured default.
    pub model: Option<String>,
}

/// Interface implemented by embedding backends.
#[async_trait]
pub trait EmbeddingClient {
    /// Produce an embedding vector for each supplied text, in input order.
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
        options: &EmbeddingOptions,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError>;

    /// Model that will be used for the given overrides.
    fn resolve_model(&self, options: &EmbeddingOptions) -> String;
}

/// Embedding client for OpenAI-compatible `/embeddings` endpoints.
pub struct OpenAiEmbeddingClient {
    client: Client,
    base_url: String,
    default_api_key: Option<String>,
    default_model: String,
}

impl OpenAiEmbeddingClient {
    /// Build a client from the gateway configuration.
    pub fn new(config: &Config) -> Result<Self, EmbeddingClientError> {
        let client = Client::builder().user_agent("chroma-gateway/0.1").build()?;
        Ok(Self {
            client,
            base_url: config.openai_base_url.trim_end_matches('/').to_string(),
            default_api_key: config.openai_api_key.clone(),
            default_model: config.embedding_model.clone(),
        })
    }

    fn resolve_api_key<'a>(&'a self, options: &'a EmbeddingOptions) -> Option<&'a str> {
        options
            .api_key
            .as_deref()
            .or(self.default_api_key.as_deref())
            .filter(|key| !key.trim().is_empty())
    }

    async fn embed_batch(
        &self,
        api_key: &str,
        model: &str,
        batch: &[String],
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(api_key)
            .json(&EmbeddingRequest {
                model,
                input: batch,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorResponse>(&body)
                .map(|envelope| envelope.error.message)
                .unwrap_or(body);
            return Err(EmbeddingClientError::Provider {
                model: model.to_string(),
                status,
                message,
            });
        }

        let mut payload: EmbeddingResponse = response.json().await?;
        if payload.data.len() != batch.len() {
            return Err(EmbeddingClientError::InvalidResponse(format!(
                "expected {} embeddings, received {}",
                batch.len(),
                payload.data.len()
            )));
        }
        payload.data.sort_by_key(|item| item.index);
        Ok(payload.data.into_iter().map(|item| item.embedding).collect())
    }
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbeddingClient {
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
        options: &EmbeddingOptions,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        let model = self.resolve_model(options);
        let Some(api_key) = self.resolve_api_key(options) else {
            tracing::error!(model = %model, "No embedding API key available");
            return Err(EmbeddingClientError::MissingApiKey);
        };

        tracing::debug!(model = %model, texts = texts.len(), "Generating embeddings");

        let mut embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(MAX_BATCH_SIZE) {
            match self.embed_batch(api_key, &model, batch).await {
                Ok(vectors) => embeddings.extend(vectors),
                Err(error) => {
                    tracing::error!(model = %model, error = %error, "Error creating embeddings");
                    return Err(error);
                }
            }
        }

        ensure_uniform_dimension(&embeddings)?;
        Ok(embeddings)
    }

    fn resolve_model(&self, options: &EmbeddingOptions) -> String {
        options
            .model
            .as_deref()
            .map(str::trim)
            .filter(|model| !model.is_empty())
            .unwrap_or(self.default_model.as_str())
            .to_string()
    }
}

fn ensure_uniform_dimension(embeddings: &[Vec<f32>]) -> Result<(), EmbeddingClientError> {
    let Some(first) = embeddings.first() else {
        return Ok(());
    };
    let expected = first.len();
    if expected == 0 {
        return Err(EmbeddingClientError::InvalidResponse(
            "provider returned an empty vector".into(),
        ));
    }
    if let Some(bad) = embeddings.iter().find(|vector| vector.len() != expected) {
        return Err(EmbeddingClientError::InvalidResponse(format!(
            "dimension mismatch: expected {expected}, got {}",
            bad.len()
        )));
    }
    Ok(())
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

/// Build the embedding client for the current configuration.
pub fn get_embedding_client(
    config: &Config,
) -> Result<Box<dyn EmbeddingClient + Send + Sync>, EmbeddingClientError> {
    Ok(Box::new(OpenAiEmbeddingClient::new(config)?))
}
