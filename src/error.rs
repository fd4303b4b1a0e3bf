//! Error types for the proxypool crate.

use thiserror::Error;

/// Error returned when the pool holds no live record.
#[derive(Debug, Error)]
#[error("No proxy available in pool")]
pub struct NoProxyAvailable;

/// Failure of a source to produce candidates.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The list could not be downloaded.
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The list answered with a non-success status.
    #[error("{url} answered with status {status}")]
    Status {
        /// Requested URL.
        url: String,
        /// HTTP status code.
        status: u16,
    },

    /// A local list file could not be read.
    #[error("failed to read {path}: {error}")]
    Io {
        /// File path.
        path: String,
        /// Underlying error.
        #[source]
        error: std::io::Error,
    },

    /// Every location of the source failed.
    #[error("all {0} locations failed")]
    Exhausted(usize),
}

/// Failure of the pool store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The pool is empty.
    #[error(transparent)]
    Empty(#[from] NoProxyAvailable),

    /// No record exists under the given key.
    #[error("no record stored at {0}")]
    NotFound(String),

    /// A record could not be encoded or decoded.
    #[error("record codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// The Redis backend failed.
    #[cfg(feature = "redis")]
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Run-level error of the crawl and recheck pipelines.
#[derive(Debug, Error)]
pub enum PoolError {
    /// A source could not be fetched.
    #[error("source `{name}` failed: {error}")]
    Fetch {
        /// Source name.
        name: String,
        /// Underlying error.
        #[source]
        error: SourceError,
    },

    /// Writing a record to the store failed.
    #[error("store write for {key} failed: {error}")]
    StoreWrite {
        /// Record key.
        key: String,
        /// Underlying error.
        #[source]
        error: StoreError,
    },

    /// Reading the pool failed.
    #[error("store read failed: {0}")]
    StoreRead(#[source] StoreError),

    /// The run was cancelled before it finished.
    #[error("run cancelled")]
    Cancelled,
}

/// Invalid or unreadable configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file {path}: {error}")]
    Read {
        /// File path.
        path: String,
        /// Underlying error.
        #[source]
        error: std::io::Error,
    },

    /// The TOML could not be parsed.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range.
    #[error("invalid config: {0}")]
    Invalid(String),
}
