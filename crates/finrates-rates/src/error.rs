use thiserror::Error;

#[derive(Error, Debug)]
pub enum RatesError {
    #[error("Unsupported currency: {0}")]
    UnsupportedCurrency(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Invalid rate: {0}")]
    InvalidRate(String),

    #[error("Cache error: {0}")]
    Cache(#[from] finrates_cache::CacheError),

    #[error("Configuration error: {0}")]
    Config(#[from] finrates_models::ConfigError),

    #[error("Rate store not available: {0}")]
    Unavailable(String),
}

impl RatesError {
    /// Failures of the external provider. Lookups degrade to 1:1 on these
    /// instead of failing.
    pub fn is_provider_failure(&self) -> bool {
        matches!(
            self,
            RatesError::Http(_) | RatesError::Provider(_) | RatesError::InvalidRate(_) | RatesError::Json(_)
        )
    }
}
