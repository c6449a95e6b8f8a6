//! Resolve document references to raw content.
//!
//! A reference starting with `http://` or `https://` is downloaded. Anything else is treated as
//! a local path, which must resolve inside one of the allow-listed directories and stay under
//! the size ceiling.

use crate::config::Config;
use reqwest::Client;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use super::types::FetchError;

/// Loads document bytes from URLs or sandboxed local paths.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
    allowed_dirs: Vec<PathBuf>,
    max_file_size: u64,
}

impl Fetcher {
    /// Build a fetcher from the gateway configuration.
    pub fn new(config: &Config) -> Result<Self, FetchError> {
        Self::with_limits(
            config.allowed_dirs.clone(),
            config.max_file_size_bytes,
            config.fetch_timeout,
        )
    }

    /// Build a fetcher with explicit limits.
    pub fn with_limits(
        allowed_dirs: Vec<PathBuf>,
        max_file_size: u64,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent("chroma-gateway/0.1")
            .build()?;
        let allowed_dirs = allowed_dirs
            .iter()
            .filter_map(|dir| normalize_path(dir).ok())
            .collect();
        Ok(Self {
            client,
            allowed_dirs,
            max_file_size,
        })
    }

    /// True when the reference names a remote resource.
    pub fn is_url(reference: &str) -> bool {
        reference.starts_with("http://") || reference.starts_with("https://")
    }

    /// Fetch the reference as UTF-8 text.
    pub async fn fetch_text(&self, reference: &str) -> Result<String, FetchError> {
        let result = if Self::is_url(reference) {
            match self.download(reference).await {
                Ok(response) => response.text().await.map_err(FetchError::from),
                Err(error) => Err(error),
            }
        } else {
            match self.read_local(reference).await {
                Ok(bytes) => String::from_utf8(bytes)
                    .map_err(|_| FetchError::InvalidUtf8(reference.to_string())),
                Err(error) => Err(error),
            }
        };
        result.inspect_err(|error| tracing::error!(reference, %error, "Error reading file"))
    }

    /// Fetch the reference as raw bytes.
    pub async fn fetch_bytes(&self, reference: &str) -> Result<Vec<u8>, FetchError> {
        let result = if Self::is_url(reference) {
            match self.download(reference).await {
                Ok(response) => response
                    .bytes()
                    .await
                    .map(|bytes| bytes.to_vec())
                    .map_err(FetchError::from),
                Err(error) => Err(error),
            }
        } else {
            self.read_local(reference).await
        };
        result.inspect_err(|error| tracing::error!(reference, %error, "Error reading file"))
    }

    async fn download(&self, url: &str) -> Result<reqwest::Response, FetchError> {
        tracing::debug!(url, "Downloading document");
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status,
            });
        }
        Ok(response)
    }

    async fn read_local(&self, reference: &str) -> Result<Vec<u8>, FetchError> {
        let path = self.resolve_local(reference).await?;
        tokio::fs::read(&path).await.map_err(|source| FetchError::Io {
            path: reference.to_string(),
            source,
        })
    }

    /// Validate a local reference and return the canonical path to read.
    async fn resolve_local(&self, reference: &str) -> Result<PathBuf, FetchError> {
        let io_error = |source| FetchError::Io {
            path: reference.to_string(),
            source,
        };
        let normalized = normalize_path(Path::new(reference)).map_err(io_error)?;
        if !self.is_allowed(&normalized) {
            return Err(FetchError::AccessDenied(reference.to_string()));
        }

        let metadata = match tokio::fs::metadata(&normalized).await {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => return Err(FetchError::NotFound(reference.to_string())),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Err(FetchError::NotFound(reference.to_string()));
            }
            Err(error) => return Err(io_error(error)),
        };
        if metadata.len() > self.max_file_size {
            return Err(FetchError::TooLarge {
                path: reference.to_string(),
                size: metadata.len(),
                limit: self.max_file_size,
            });
        }

        // Symlinks must not escape the sandbox either.
        let canonical = tokio::fs::canonicalize(&normalized)
            .await
            .map_err(io_error)?;
        if !self.is_allowed_canonical(&canonical).await {
            return Err(FetchError::AccessDenied(reference.to_string()));
        }
        Ok(canonical)
    }

    fn is_allowed(&self, path: &Path) -> bool {
        self.allowed_dirs.iter().any(|dir| path.starts_with(dir))
    }

    async fn is_allowed_canonical(&self, path: &Path) -> bool {
        for dir in &self.allowed_dirs {
            let canonical_dir = tokio::fs::canonicalize(dir)
                .await
                .unwrap_or_else(|_| dir.clone());
            if path.starts_with(&canonical_dir) {
                return true;
            }
        }
        false
    }
}

/// Make `path` absolute and resolve `.` and `..` lexically.
fn normalize_path(path: &Path) -> std::io::Result<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::ParentDir => {
                normalized.pop();
            }
            Component::CurDir => {}
            other => normalized.push(other.as_os_str()),
        }
    }
    Ok(normalized)
}
