//! Error taxonomy shared by the transport, site handlers, resume store and packager.

use std::path::PathBuf;
use thiserror::Error;

use crate::epub::EpubError;

/// Base error for every fallible operation in the crate.
#[derive(Debug, Error)]
pub enum InkwellError {
    #[error(transparent)]
    Network(#[from] NetworkError),

    /// Expected page structure is absent. Never retried.
    #[error("Could not parse page at {url}: {message}")]
    Parse { url: String, message: String },

    #[error("Invalid CSS selector {selector:?}: {message}")]
    Selector { selector: String, message: String },

    #[error("No handler found for URL: {url}")]
    UnsupportedSite { url: String },

    #[error("Invalid URL {input}: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("No chapters were downloaded successfully.")]
    NoChaptersDownloaded,

    #[error(transparent)]
    Packaging(#[from] EpubError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl InkwellError {
    pub fn parse(url: &str, message: impl Into<String>) -> Self {
        InkwellError::Parse {
            url: url.to_string(),
            message: message.into(),
        }
    }

    pub fn invalid_url(input: &str, reason: impl ToString) -> Self {
        InkwellError::InvalidUrl {
            input: input.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Transport or HTTP-status failure. Callers never see raw `reqwest` errors outside this type.
#[derive(Debug, Error)]
pub enum NetworkError {
    /// HTTP 429.
    #[error("Rate limited on {url}")]
    RateLimited { url: String },

    #[error("HTTP {status} for {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Request failed for {url}: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Failed to read response body from {url}: {source}")]
    Body {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Cannot build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

impl NetworkError {
    pub fn url(&self) -> &str {
        match self {
            NetworkError::RateLimited { url }
            | NetworkError::HttpStatus { url, .. }
            | NetworkError::Request { url, .. }
            | NetworkError::Body { url, .. } => url,
            NetworkError::Client(_) => "",
        }
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(self, NetworkError::RateLimited { .. })
    }

    /// Transient failures: 429, 408, 5xx, timeouts and connection-level errors.
    /// Permanent client errors (404, 403, ...) are not retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            NetworkError::RateLimited { .. } => true,
            NetworkError::HttpStatus { status, .. } => *status == 408 || *status >= 500,
            NetworkError::Request { source, .. } => {
                source.is_timeout() || source.is_connect() || source.is_request()
            }
            NetworkError::Body { .. } => true,
            NetworkError::Client(_) => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config {path}: {source}")]
    Invalid {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Cannot determine current directory: {0}")]
    CurrentDir(#[source] std::io::Error),

    #[error("Invalid {key} = {value} seconds: {source}")]
    Duration {
        key: &'static str,
        value: f64,
        #[source]
        source: std::time::TryFromFloatSecsError,
    },
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cannot determine the user cache directory")]
    NoCacheDir,

    #[error("Checkpoint I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot encode checkpoint for {url}: {source}")]
    Encode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}
