use reqwest::StatusCode;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors surfaced by credential lifecycle management routines.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    #[error("stored credential belongs to client '{stored}', expected '{expected}'")]
    ClientIdMismatch { stored: String, expected: String },
    #[error("callback URI '{0}' is relative and no absolute base URL was supplied")]
    MissingAbsoluteUrl(String),
    #[error("stored credential for '{user_id}' is unreadable: {source}")]
    CorruptStorage {
        user_id: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("token exchange failed with status {status}: {body}")]
    ExchangeFailed { status: StatusCode, body: String },
    #[error("token revocation failed with status {status}: {body}")]
    RevokeFailed { status: StatusCode, body: String },
    #[error("token store unavailable: {0}")]
    StoreUnavailable(#[from] std::io::Error),
    #[error("token refresh unavailable")]
    RefreshUnavailable,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
}
