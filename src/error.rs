//! Error types for the proxy.
//!
//! Only [`ConfigError`] and [`ProxyError`] are fatal. Upstream and cache
//! errors are contained within the dispatch of a single query.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Invalid startup parameters.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unsupported HTTP method {0:?} (expected GET or POST)")]
    UnsupportedMethod(String),

    #[error("invalid upstream URL {url:?}: {reason}")]
    InvalidUpstreamUrl { url: String, reason: String },

    #[error("invalid bind address {0:?}")]
    InvalidBindAddress(String),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),
}

/// Errors that stop the proxy from starting, or stop it once running.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("failed to bind UDP socket on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("proxy task failed: {0}")]
    TaskFailed(#[source] tokio::task::JoinError),

    #[error("proxy task exited unexpectedly")]
    TaskExited,
}

/// Failure of a single upstream round trip. The query is dropped.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("request to upstream failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("upstream returned HTTP {0}")]
    Status(reqwest::StatusCode),

    #[error("failed to read upstream response body: {0}")]
    Body(#[source] reqwest::Error),
}

/// Reasons a reply was not stored in the cache.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache-Control header is missing or empty")]
    Missing,

    #[error("Cache-Control header has no max-age directive")]
    NoMaxAge,

    #[error("invalid max-age value {0:?}")]
    InvalidMaxAge(String),

    #[error("message shorter than a transaction ID")]
    QueryTooShort,

    #[error("TTL of {0}s overflows the clock")]
    TtlOverflow(u64),

    #[error("cache lock poisoned")]
    Unavailable,
}
