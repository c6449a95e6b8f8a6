use std::env;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_CHROMA_HOST: &str = "service_chroma";
const DEFAULT_CHROMA_PORT: u16 = 8000;
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-large";
const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_ALLOWED_DIRS: &str = "/var/www/html/data,/opt/data";
const DEFAULT_MAX_FILE_SIZE_MB: u64 = 10;
const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_WORKERS: usize = 4;
const DEFAULT_ERROR_LOG_PATH: &str = "error.txt";
const DEFAULT_SERVER_PORT: u16 = 5000;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Runtime configuration for the gateway.
///
/// Built once by the binary and handed to each component's constructor.
#[derive(Debug, Clone)]
pub struct Config {
    /// Hostname of the ChromaDB server.
    pub chroma_host: String,
    /// Port of the ChromaDB server.
    pub chroma_port: u16,
    /// Optional token forwarded to ChromaDB when server auth is enabled.
    pub chroma_auth_token: Option<String>,
    /// Embedding model used when a request does not name one.
    pub embedding_model: String,
    /// Fallback API key for the embedding provider.
    pub openai_api_key: Option<String>,
    /// Base URL of the OpenAI-compatible embeddings API.
    pub openai_base_url: String,
    /// Secret every `/api` request must present in `x-chroma-api-token`.
    pub api_token: Option<String>,
    /// Directories local file references must resolve into.
    pub allowed_dirs: Vec<PathBuf>,
    /// Maximum size of a local file in bytes.
    pub max_file_size_bytes: u64,
    /// Timeout applied to outbound document fetches.
    pub fetch_timeout: Duration,
    /// Width of the per-call worker pools used by readers and the chunker.
    pub max_workers: usize,
    /// Path of the append-only error log.
    pub error_log_path: PathBuf,
    /// Port the HTTP server listens on.
    pub server_port: u16,
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        let max_file_size_mb = parse_env("MAX_FILE_SIZE_MB")?.unwrap_or(DEFAULT_MAX_FILE_SIZE_MB);
        let max_file_size_bytes = megabytes_to_bytes(max_file_size_mb)?;
        let max_workers: usize = parse_env("INGEST_MAX_WORKERS")?.unwrap_or(DEFAULT_MAX_WORKERS);
        if max_workers == 0 {
            return Err(ConfigError::InvalidValue("INGEST_MAX_WORKERS".into()));
        }

        Ok(Self {
            chroma_host: load_env_optional("CHROMA_SERVER_HOST")
                .unwrap_or_else(|| DEFAULT_CHROMA_HOST.to_string()),
            chroma_port: parse_env("CHROMA_SERVER_PORT")?.unwrap_or(DEFAULT_CHROMA_PORT),
            chroma_auth_token: load_env_optional("CHROMA_SERVER_AUTH_TOKEN"),
            embedding_model: load_env_optional("CHROMA_MODEL")
                .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string()),
            openai_api_key: load_env_optional("OPENAI_API_KEY"),
            openai_base_url: load_env_optional("OPENAI_BASE_URL")
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
            api_token: load_env_optional("CHROMA_API_TOKEN"),
            allowed_dirs: parse_dir_list(
                &load_env_optional("ALLOWED_DATA_DIRS")
                    .unwrap_or_else(|| DEFAULT_ALLOWED_DIRS.to_string()),
            ),
            max_file_size_bytes,
            fetch_timeout: Duration::from_secs(
                parse_env("FETCH_TIMEOUT_SECS")?.unwrap_or(DEFAULT_FETCH_TIMEOUT_SECS),
            ),
            max_workers,
            error_log_path: load_env_optional("ERROR_LOG_PATH")
                .unwrap_or_else(|| DEFAULT_ERROR_LOG_PATH.to_string())
                .into(),
            server_port: parse_env("SERVER_PORT")?.unwrap_or(DEFAULT_SERVER_PORT),
        })
    }

    /// Base URL of the ChromaDB HTTP API.
    pub fn chroma_url(&self) -> String {
        format!("http://{}:{}", self.chroma_host, self.chroma_port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chroma_host: DEFAULT_CHROMA_HOST.to_string(),
            chroma_port: DEFAULT_CHROMA_PORT,
            chroma_auth_token: None,
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            openai_api_key: None,
            openai_base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            api_token: None,
            allowed_dirs: parse_dir_list(DEFAULT_ALLOWED_DIRS),
            max_file_size_bytes: DEFAULT_MAX_FILE_SIZE_MB * 1024 * 1024,
            fetch_timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
            max_workers: DEFAULT_MAX_WORKERS,
            error_log_path: DEFAULT_ERROR_LOG_PATH.into(),
            server_port: DEFAULT_SERVER_PORT,
        }
    }
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn megabytes_to_bytes(megabytes: u64) -> Result<u64, ConfigError> {
    megabytes
        .checked_mul(1024 * 1024)
        .ok_or_else(|| ConfigError::InvalidValue("MAX_FILE_SIZE_MB".into()))
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    load_env_optional(key)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue(key.to_string()))
        })
        .transpose()
}

fn parse_dir_list(raw: &str) -> Vec<PathBuf> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(PathBuf::from)
        .collect()
}

/// Load `.env` (if present) and build the configuration.
pub fn load() -> Result<Config, ConfigError> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    tracing::debug!(
        chroma_url = %config.chroma_url(),
        model = %config.embedding_model,
        allowed_dirs = ?config.allowed_dirs,
        max_workers = config.max_workers,
        server_port = config.server_port,
        has_api_token = config.api_token.is_some(),
        "Loaded configuration"
    );
    Ok(config)
}
