//! External exchange rate sources.

mod direct_pair;
mod pivot_table;

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use finrates_models::config::{ProviderConfig, ProviderKind};
use rust_decimal::Decimal;

use crate::error::RatesError;

pub use direct_pair::DirectPairProvider;
pub use pivot_table::PivotTableProvider;

/// A source of `1 from = rate to` quotes.
#[async_trait]
pub trait RateProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Currency every quote must involve, if the provider only publishes
    /// rates against one currency. Pairs without it are resolved in two hops.
    fn pivot(&self) -> Option<&str> {
        None
    }

    async fn fetch_rate(&self, from: &str, to: &str, date: NaiveDate)
        -> Result<Decimal, RatesError>;
}

/// Build the provider selected in configuration.
pub fn create_provider(config: &ProviderConfig) -> Result<Arc<dyn RateProvider>, RatesError> {
    let provider: Arc<dyn RateProvider> = match config.kind {
        ProviderKind::DirectPair => Arc::new(DirectPairProvider::new(config)?),
        ProviderKind::PivotTable => Arc::new(PivotTableProvider::new(config)?),
    };
    tracing::info!(provider = provider.name(), base_url = %config.base_url, "Rate provider configured");
    Ok(provider)
}

fn http_client(config: &ProviderConfig) -> Result<reqwest::Client, RatesError> {
    Ok(reqwest::Client::builder()
        .gzip(true)
        .timeout(config.timeout())
        .build()?)
}

/// Convert a JSON number to a decimal rate, rejecting zero, negative and
/// non-finite values.
///
/// Goes through the shortest decimal form of the float, so `41.2512`
/// stays `41.2512` instead of picking up binary noise.
pub(crate) fn rate_from_f64(value: f64) -> Result<Decimal, RatesError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(RatesError::InvalidRate(value.to_string()));
    }
    Decimal::from_str(&value.to_string()).map_err(|e| RatesError::InvalidRate(format!("{value}: {e}")))
}
