//! Error types for workflow-tagger.
//!
//! [`ApiError`] is the classified form of every remote failure. It is built
//! once at the HTTP boundary (see [`crate::api::http`]) and is the only shape
//! the edge-case policy ever inspects.

use std::time::Duration;
use thiserror::Error;

/// A classified remote API failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// 409: the desired state already holds.
    #[error("conflict: {0}")]
    Conflict(String),

    /// 404: the target record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// 401: credentials rejected.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// 429: the remote rate limit was hit.
    #[error("rate limited{}", retry_after.map(|d| format!(" (retry after {}s)", d.as_secs())).unwrap_or_default())]
    RateLimited { retry_after: Option<Duration> },

    /// 5xx.
    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },

    /// Connection reset, refused, or the per-attempt deadline elapsed.
    #[error("network error{}: {message}", if *timed_out { " (timeout)" } else { "" })]
    Network { timed_out: bool, message: String },

    /// Anything else, including malformed payloads.
    #[error("unexpected response{}: {message}", status.map(|s| format!(" {s}")).unwrap_or_default())]
    Unknown { status: Option<u16>, message: String },
}

impl ApiError {
    /// Short machine-friendly label, used for metrics and report rows.
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Conflict(_) => "conflict",
            ApiError::NotFound(_) => "not_found",
            ApiError::Unauthorized(_) => "unauthorized",
            ApiError::RateLimited { .. } => "rate_limited",
            ApiError::Server { .. } => "server",
            ApiError::Network { timed_out: true, .. } => "timeout",
            ApiError::Network { .. } => "network",
            ApiError::Unknown { .. } => "unknown",
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("connectivity error: {0}")]
    Connectivity(String),

    #[error("api error: {0}")]
    Api(#[from] ApiError),

    #[error("report error: {0}")]
    Report(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
