//! Error types for the domainwall filtering service.

use std::io;

use thiserror::Error;

use crate::store::StoreError;

/// Main error type for domainwall operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("rule store error: {0}")]
    Store(#[from] StoreError),

    #[error("DNS protocol error: {0}")]
    Protocol(String),

    #[error("resolver error: {0}")]
    Resolver(String),

    #[error("upstream resolver timed out after {0:?}")]
    ResolverTimeout(std::time::Duration),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("metrics error: {0}")]
    Metrics(String),
}

impl From<hickory_proto::ProtoError> for Error {
    fn from(err: hickory_proto::ProtoError) -> Self {
        Self::Protocol(err.to_string())
    }
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadFile(#[source] io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[source] toml::de::Error),

    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),
}

/// Validation errors for configuration values.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("dns.upstream_timeout_ms must be greater than 0")]
    ZeroUpstreamTimeout,

    #[error("dns.answer_cache_ttl_secs must be greater than 0")]
    ZeroAnswerCacheTtl,

    #[error("dns.block_ttl_secs must be greater than 0")]
    ZeroBlockTtl,

    #[error("proxy.connect_timeout_secs must be greater than 0")]
    ZeroConnectTimeout,

    #[error("rules.refresh_interval_secs must be greater than 0")]
    ZeroRefreshInterval,

    #[error("rules.source has empty file path")]
    EmptyStorePath,

    #[error("rules.source has invalid URL (must start with http:// or https://): {url:?}")]
    InvalidStoreUrl { url: String },

    #[error("rules.source.timeout_secs must be greater than 0")]
    ZeroStoreTimeout,
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;
