use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] finrates_models::ConfigError),

    #[error("TTL out of range: {0:?}")]
    InvalidTtl(Duration),

    #[error("Filters must serialize to a flat object, got: {0}")]
    InvalidFilters(String),

    #[error("Operation not supported: {0}")]
    Unsupported(String),

    #[error("Cache not available: {0}")]
    Unavailable(String),
}
