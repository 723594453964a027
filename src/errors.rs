use std::time::Duration;

use thiserror::Error;

/// Rejection of a candidate URL, raised before any network call is made.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("URL is empty")]
    Empty,

    #[error("URL has no scheme, expected http:// or https://: {0}")]
    MissingScheme(String),

    #[error("URL is malformed: {0}")]
    Malformed(String),

    #[error("unsupported protocol '{0}', only http and https can be checked")]
    UnsupportedScheme(String),

    #[error("URL has no host: {0}")]
    MissingHost(String),

    #[error("invalid host '{0}'")]
    InvalidHost(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("{name} must be greater than zero")]
    ZeroDuration { name: &'static str },

    #[error("max interval {max:?} is shorter than interval {interval:?}")]
    MaxIntervalTooShort { interval: Duration, max: Duration },

    #[error("history limit must be at least 1")]
    ZeroHistoryLimit,

    #[error("target is already monitored: {0}")]
    DuplicateTarget(String),

    #[error("target is not monitored: {0}")]
    UnknownTarget(String),
}

#[derive(Error, Debug)]
pub enum WebcheckerError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("failed to parse JSON config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, WebcheckerError>;
