use async_trait::async_trait;
use chrono::NaiveDate;
use finrates_models::config::ProviderConfig;
use finrates_models::currency::normalize_code;
use finrates_models::exchange_rate::invert_rate;
use rust_decimal::Decimal;
use serde::Deserialize;

use super::{http_client, rate_from_f64, RateProvider};
use crate::error::RatesError;

/// Historical rates published against one pivot currency, the way a
/// central bank publishes its daily table.
///
/// `GET {base_url}/exchange?valcode={code}&date={YYYYMMDD}&json` returns
/// `[{"rate": r, ...}]` meaning `1 code = r pivot`.
pub struct PivotTableProvider {
    client: reqwest::Client,
    base_url: String,
    pivot: String,
}

#[derive(Debug, Deserialize)]
struct TableRow {
    rate: f64,
    #[serde(default)]
    cc: Option<String>,
}

impl PivotTableProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self, RatesError> {
        Ok(Self {
            client: http_client(config)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            pivot: normalize_code(&config.pivot),
        })
    }

    fn table_url(&self, code: &str, date: NaiveDate) -> String {
        format!(
            "{}/exchange?valcode={code}&date={}&json",
            self.base_url,
            date.format("%Y%m%d")
        )
    }

    /// `1 code = rate pivot` on `date`.
    async fn pivot_rate(&self, code: &str, date: NaiveDate) -> Result<Decimal, RatesError> {
        let body = self
            .client
            .get(self.table_url(code, date))
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        let rate = parse_table_response(&body, code)?;
        tracing::debug!(%code, pivot = %self.pivot, %date, %rate, "Fetched table rate");
        Ok(rate)
    }
}

/// Extract the rate for `code` from a table response body.
pub(crate) fn parse_table_response(body: &str, code: &str) -> Result<Decimal, RatesError> {
    let rows: Vec<TableRow> = serde_json::from_str(body)?;
    let row = rows
        .iter()
        .find(|row| row.cc.as_deref().map_or(true, |cc| cc.eq_ignore_ascii_case(code)))
        .ok_or_else(|| RatesError::Provider(format!("no table rate for {code}")))?;
    rate_from_f64(row.rate)
}

#[async_trait]
impl RateProvider for PivotTableProvider {
    fn name(&self) -> &str {
        "pivot_table"
    }

    fn pivot(&self) -> Option<&str> {
        Some(&self.pivot)
    }

    async fn fetch_rate(&self, from: &str, to: &str, date: NaiveDate) -> Result<Decimal, RatesError> {
        if from == to {
            return Ok(Decimal::ONE);
        }
        if to == self.pivot {
            return self.pivot_rate(from, date).await;
        }
        if from == self.pivot {
            let rate = self.pivot_rate(to, date).await?;
            return invert_rate(rate)
                .ok_or_else(|| RatesError::InvalidRate(format!("cannot invert {rate}")));
        }
        Err(RatesError::Provider(format!(
            "{from}->{to} does not involve pivot {}",
            self.pivot
        )))
    }
}
