use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use finrates_models::config::ProviderConfig;
use rust_decimal::Decimal;
use serde::Deserialize;

use super::{http_client, rate_from_f64, RateProvider};
use crate::error::RatesError;

/// Live pair quotes: `GET {base_url}[/{api_key}]/pair/{from}/{to}`.
///
/// The API has no history. Every date gets the current rate, which the
/// service then stores under the requested date.
pub struct DirectPairProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PairResponse {
    result: String,
    #[serde(default)]
    conversion_rate: Option<f64>,
    #[serde(default, rename = "error-type")]
    error_type: Option<String>,
}

impl DirectPairProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self, RatesError> {
        Ok(Self {
            client: http_client(config)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone().filter(|key| !key.is_empty()),
        })
    }

    fn pair_url(&self, from: &str, to: &str) -> String {
        match &self.api_key {
            Some(key) => format!("{}/{key}/pair/{from}/{to}", self.base_url),
            None => format!("{}/pair/{from}/{to}", self.base_url),
        }
    }
}

/// Extract `conversion_rate` from a pair response body.
pub(crate) fn parse_pair_response(body: &str) -> Result<Decimal, RatesError> {
    let response: PairResponse = serde_json::from_str(body)?;
    if response.result != "success" {
        return Err(RatesError::Provider(format!(
            "pair request failed: {}",
            response.error_type.as_deref().unwrap_or(&response.result)
        )));
    }
    let rate = response
        .conversion_rate
        .ok_or_else(|| RatesError::Provider("response has no conversion_rate".to_string()))?;
    rate_from_f64(rate)
}

#[async_trait]
impl RateProvider for DirectPairProvider {
    fn name(&self) -> &str {
        "direct_pair"
    }

    async fn fetch_rate(&self, from: &str, to: &str, date: NaiveDate) -> Result<Decimal, RatesError> {
        if date != Utc::now().date_naive() {
            tracing::debug!(%from, %to, %date, "No history on direct-pair provider, using live rate");
        }

        let body = self
            .client
            .get(self.pair_url(from, to))
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        let rate = parse_pair_response(&body)?;
        tracing::debug!(%from, %to, %rate, "Fetched pair rate");
        Ok(rate)
    }
}
