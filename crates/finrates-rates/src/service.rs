use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use finrates_cache::CacheStore;
use finrates_models::cache_schema::key_patterns;
use finrates_models::config::{ConfigError, CurrencyConfig};
use finrates_models::currency::{normalize_code, SupportedCurrency};
use finrates_models::exchange_rate::{
    invert_rate, round_rate, ExchangeRate, PairReport, RateOrigin, RateOutcome, RateSource,
    RefreshReport,
};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::error::RatesError;
use crate::providers::RateProvider;
use crate::store::SqliteRateStore;

/// Fractional digits of a converted amount.
pub const AMOUNT_SCALE: u32 = 2;

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

/// A conversion together with the rate that produced it.
#[derive(Debug, Clone, Serialize)]
pub struct Conversion {
    pub amount: Decimal,
    pub from: String,
    pub to: String,
    pub date: NaiveDate,
    pub converted: Decimal,
    pub outcome: RateOutcome,
}

/// Resolves exchange rates and converts amounts between supported currencies.
///
/// Lookup order for a pair on a date: cache, stored row, stored reciprocal,
/// provider. Anything found below the cache is written back to it. Provider
/// failures degrade to a 1:1 [`RateOutcome::Fallback`]; storage and cache
/// failures are returned as errors.
pub struct CurrencyService {
    currencies: Vec<SupportedCurrency>,
    store: SqliteRateStore,
    cache: Arc<dyn CacheStore>,
    provider: Arc<dyn RateProvider>,
    rate_ttl: Duration,
}

impl CurrencyService {
    pub fn new(
        config: &CurrencyConfig,
        store: SqliteRateStore,
        cache: Arc<dyn CacheStore>,
        provider: Arc<dyn RateProvider>,
        rate_ttl: Duration,
    ) -> Result<Self, RatesError> {
        config.validate()?;
        let currencies: Vec<SupportedCurrency> = config
            .currencies
            .iter()
            .map(|c| SupportedCurrency {
                code: normalize_code(&c.code),
                ..c.clone()
            })
            .collect();

        if let Some(pivot) = provider.pivot() {
            if !currencies.iter().any(|c| c.code == pivot) {
                return Err(ConfigError::UnsupportedPivot(pivot.to_string()).into());
            }
        }

        info!(
            currencies = currencies.len(),
            provider = provider.name(),
            cache = cache.name(),
            "Currency service ready"
        );
        Ok(Self {
            currencies,
            store,
            cache,
            provider,
            rate_ttl,
        })
    }

    pub fn currencies(&self) -> &[SupportedCurrency] {
        &self.currencies
    }

    pub fn currency(&self, code: &str) -> Option<&SupportedCurrency> {
        let code = normalize_code(code);
        self.currencies.iter().find(|c| c.code == code)
    }

    pub fn is_supported(&self, code: &str) -> bool {
        self.currency(code).is_some()
    }

    /// The underlying rate table.
    pub fn store(&self) -> &SqliteRateStore {
        &self.store
    }

    fn ensure_supported(&self, code: &str) -> Result<(), RatesError> {
        if self.is_supported(code) {
            Ok(())
        } else {
            Err(RatesError::UnsupportedCurrency(code.to_string()))
        }
    }

    /// `round(amount * rate, 2)`. Same-currency amounts come back unchanged.
    pub async fn convert(
        &self,
        amount: Decimal,
        from: &str,
        to: &str,
        date: Option<NaiveDate>,
    ) -> Result<Decimal, RatesError> {
        Ok(self.convert_detailed(amount, from, to, date).await?.converted)
    }

    /// Like [`convert`](Self::convert), keeping the rate outcome.
    pub async fn convert_detailed(
        &self,
        amount: Decimal,
        from: &str,
        to: &str,
        date: Option<NaiveDate>,
    ) -> Result<Conversion, RatesError> {
        let (from, to) = (normalize_code(from), normalize_code(to));
        let date = date.unwrap_or_else(today);
        let outcome = self.get_rate(&from, &to, Some(date)).await?;

        let converted = if outcome.origin() == Some(RateOrigin::Identity) {
            amount
        } else {
            amount
                .checked_mul(outcome.rate())
                .ok_or_else(|| RatesError::InvalidRate(format!("{amount} x {} overflows", outcome.rate())))?
                .round_dp_with_strategy(AMOUNT_SCALE, RoundingStrategy::MidpointAwayFromZero)
        };

        Ok(Conversion {
            amount,
            from,
            to,
            date,
            converted,
            outcome,
        })
    }

    /// Rate for `1 from = rate to` on `date` (today when `None`).
    pub async fn get_rate(
        &self,
        from: &str,
        to: &str,
        date: Option<NaiveDate>,
    ) -> Result<RateOutcome, RatesError> {
        let (from, to) = (normalize_code(from), normalize_code(to));
        if from == to {
            return Ok(RateOutcome::resolved(Decimal::ONE, RateOrigin::Identity));
        }
        self.ensure_supported(&from)?;
        self.ensure_supported(&to)?;
        let date = date.unwrap_or_else(today);

        if let Some((rate, origin)) = self.lookup(&from, &to, date).await? {
            return Ok(RateOutcome::resolved(rate, origin));
        }

        match self.fetch(&from, &to, date, false).await {
            Ok(rate) => Ok(RateOutcome::resolved(rate, RateOrigin::Provider)),
            Err(e) if e.is_provider_failure() => {
                error!(%from, %to, %date, error = %e, "Rate provider failed, falling back to 1:1");
                Ok(RateOutcome::fallback(e.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    /// Re-fetch a pair from the provider, ignoring cache and stored rows, and
    /// overwrite what is stored. Provider failures are returned, not masked.
    pub async fn refresh_rate(
        &self,
        from: &str,
        to: &str,
        date: Option<NaiveDate>,
    ) -> Result<Decimal, RatesError> {
        let (from, to) = (normalize_code(from), normalize_code(to));
        if from == to {
            return Ok(Decimal::ONE);
        }
        self.ensure_supported(&from)?;
        self.ensure_supported(&to)?;
        self.fetch(&from, &to, date.unwrap_or_else(today), true).await
    }

    /// Store an operator-supplied rate. Replaces any cached value for the
    /// pair and its reciprocal.
    pub async fn set_rate(
        &self,
        from: &str,
        to: &str,
        date: NaiveDate,
        rate: Decimal,
    ) -> Result<(), RatesError> {
        let (from, to) = (normalize_code(from), normalize_code(to));
        self.ensure_supported(&from)?;
        self.ensure_supported(&to)?;
        if from == to {
            return Err(RatesError::InvalidRate(format!("{from}->{to} is always 1")));
        }
        self.persist(&from, &to, date, round_rate(rate), RateSource::Manual)
            .await?;
        info!(%from, %to, %date, %rate, "Manual rate stored");
        Ok(())
    }

    /// Render `amount` with the currency's precision and symbol, e.g.
    /// `-12.50$`. The sign is applied to the rounded magnitude.
    pub fn format(&self, amount: Decimal, code: &str) -> Result<String, RatesError> {
        let currency = self
            .currency(code)
            .ok_or_else(|| RatesError::UnsupportedCurrency(code.to_string()))?;
        let magnitude = amount
            .abs()
            .round_dp_with_strategy(currency.decimals, RoundingStrategy::MidpointAwayFromZero);
        let sign = if amount.is_sign_negative() && !magnitude.is_zero() {
            "-"
        } else {
            ""
        };
        Ok(format!(
            "{sign}{magnitude:.prec$}{}",
            currency.symbol,
            prec = currency.decimals as usize
        ))
    }

    /// Refresh every ordered pair of distinct supported currencies.
    ///
    /// Failures are reported per pair and never stop the run.
    pub async fn update_all_rates(&self, date: Option<NaiveDate>) -> RefreshReport {
        let date = date.unwrap_or_else(today);
        let mut pairs = Vec::new();

        for from in &self.currencies {
            for to in &self.currencies {
                if from.code == to.code {
                    continue;
                }
                match self.refresh_rate(&from.code, &to.code, Some(date)).await {
                    Ok(rate) => pairs.push(PairReport::ok(&from.code, &to.code, rate)),
                    Err(e) => {
                        warn!(from = %from.code, to = %to.code, %date, error = %e, "Rate refresh failed");
                        pairs.push(PairReport::failed(&from.code, &to.code, e.to_string()));
                    }
                }
            }
        }

        let report = RefreshReport { date, pairs };
        info!(
            %date,
            succeeded = report.succeeded(),
            failed = report.failed(),
            "Rate refresh complete"
        );
        report
    }

    /// Cached rate, stored rate, or stored reciprocal.
    async fn lookup(
        &self,
        from: &str,
        to: &str,
        date: NaiveDate,
    ) -> Result<Option<(Decimal, RateOrigin)>, RatesError> {
        let key = key_patterns::exchange_rate(from, to, date);
        if let Some(json) = self.cache.get(&key).await? {
            match serde_json::from_str::<Decimal>(&json) {
                Ok(rate) => {
                    debug!(%key, "Rate cache hit");
                    return Ok(Some((rate, RateOrigin::Cache)));
                }
                Err(e) => warn!(%key, error = %e, "Undecodable cached rate, ignoring"),
            }
        }

        if let Some(row) = self.store.find(from, to, date)? {
            debug!(%key, source = row.source.as_str(), "Rate found in store");
            self.cache_rate(&key, row.rate).await?;
            return Ok(Some((row.rate, RateOrigin::Store)));
        }

        if let Some(row) = self.store.find(to, from, date)? {
            if let Some(rate) = invert_rate(row.rate) {
                debug!(%key, "Rate derived from stored reciprocal");
                self.cache_rate(&key, rate).await?;
                return Ok(Some((rate, RateOrigin::Store)));
            }
        }

        Ok(None)
    }

    /// Get the rate from the provider and persist it. When the provider only
    /// quotes against a pivot and neither side is the pivot, both legs are
    /// resolved and their product is stored as a derived row.
    ///
    /// With `refresh` unset the legs may come from cache or store.
    async fn fetch(
        &self,
        from: &str,
        to: &str,
        date: NaiveDate,
        refresh: bool,
    ) -> Result<Decimal, RatesError> {
        match self.provider.pivot() {
            Some(pivot) if from != pivot && to != pivot => {
                let first = self.leg(from, pivot, date, refresh).await?;
                let second = self.leg(pivot, to, date, refresh).await?;
                let product = first.checked_mul(second).ok_or_else(|| {
                    RatesError::InvalidRate(format!("{first} x {second} overflows"))
                })?;
                let rate = round_rate(product);
                debug!(%from, %to, %pivot, %rate, "Derived rate through pivot");
                self.persist(from, to, date, rate, RateSource::Derived)
                    .await?;
                Ok(rate)
            }
            _ => self.fetch_direct(from, to, date).await,
        }
    }

    async fn leg(
        &self,
        from: &str,
        to: &str,
        date: NaiveDate,
        refresh: bool,
    ) -> Result<Decimal, RatesError> {
        if !refresh {
            if let Some((rate, _)) = self.lookup(from, to, date).await? {
                return Ok(rate);
            }
        }
        self.fetch_direct(from, to, date).await
    }

    async fn fetch_direct(
        &self,
        from: &str,
        to: &str,
        date: NaiveDate,
    ) -> Result<Decimal, RatesError> {
        let fetched = match self.provider.fetch_rate(from, to, date).await {
            Ok(rate) => rate,
            Err(e) => {
                warn!(%from, %to, %date, provider = self.provider.name(), error = %e, "Rate fetch failed");
                return Err(e);
            }
        };
        let rate = round_rate(fetched);
        info!(%from, %to, %date, %rate, provider = self.provider.name(), "Fetched rate");
        self.persist(from, to, date, rate, RateSource::Provider)
            .await?;
        Ok(rate)
    }

    /// Upsert the row and its reciprocal, cache the pair and drop any cached
    /// reciprocal so it is re-read from the store.
    async fn persist(
        &self,
        from: &str,
        to: &str,
        date: NaiveDate,
        rate: Decimal,
        source: RateSource,
    ) -> Result<(), RatesError> {
        if rate <= Decimal::ZERO {
            return Err(RatesError::InvalidRate(format!("{from}->{to} = {rate}")));
        }
        let row = ExchangeRate::new(from, to, date, rate, source);
        self.store.upsert(&row)?;
        self.store.upsert_inverse(&row)?;

        self.cache_rate(&key_patterns::exchange_rate(from, to, date), rate)
            .await?;
        self.cache
            .forget(&key_patterns::exchange_rate(to, from, date))
            .await?;
        Ok(())
    }

    async fn cache_rate(&self, key: &str, rate: Decimal) -> Result<(), RatesError> {
        self.cache
            .put(key, serde_json::to_string(&rate)?, self.rate_ttl)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockProvider;
    use finrates_cache::MemoryStore;
    use finrates_models::config::{ProviderConfig, ProviderKind};
    use rust_decimal_macros::dec;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 10, 6).unwrap()
    }

    fn config(codes: &[(&str, &str, u32)]) -> CurrencyConfig {
        CurrencyConfig {
            rates_db_path: ":memory:".to_string(),
            provider: ProviderConfig {
                kind: ProviderKind::PivotTable,
                base_url: "http://localhost".to_string(),
                api_key: None,
                pivot: "UAH".to_string(),
                timeout_seconds: 1,
            },
            currencies: codes
                .iter()
                .map(|(code, symbol, decimals)| SupportedCurrency::new(code, code, symbol, *decimals))
                .collect(),
        }
    }

    fn service(provider: Arc<MockProvider>) -> CurrencyService {
        CurrencyService::new(
            &config(&[("UAH", "₴", 2), ("USD", "$", 2), ("EUR", "€", 2), ("JPY", "¥", 0)]),
            SqliteRateStore::open_in_memory().unwrap(),
            Arc::new(MemoryStore::new(100)),
            provider,
            Duration::from_secs(3600),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn identity_skips_lookup() {
        let provider = Arc::new(MockProvider::with_pivot("UAH"));
        provider.set_failing(true);
        let svc = service(provider.clone());

        let converted = svc.convert(dec!(12.345), "usd", "USD", Some(day())).await.unwrap();
        assert_eq!(converted, dec!(12.345));
        assert_eq!(provider.fetch_count(), 0);
        assert_eq!(svc.store().count().unwrap(), 0);
    }

    #[tokio::test]
    async fn unsupported_currency_is_rejected() {
        let provider = Arc::new(MockProvider::with_pivot("UAH"));
        let svc = service(provider.clone());

        let result = svc.convert(dec!(1), "USD", "GBP", Some(day())).await;
        assert!(matches!(result, Err(RatesError::UnsupportedCurrency(code)) if code == "GBP"));
        assert!(matches!(
            svc.get_rate("XXX", "USD", Some(day())).await,
            Err(RatesError::UnsupportedCurrency(_))
        ));
        assert_eq!(provider.fetch_count(), 0);
    }

    #[tokio::test]
    async fn provider_rate_is_persisted_with_inverse() {
        let provider = Arc::new(MockProvider::with_pivot("UAH").with_rate("USD", "UAH", dec!(41.25)));
        let svc = service(provider.clone());

        let outcome = svc.get_rate("USD", "UAH", Some(day())).await.unwrap();
        assert_eq!(outcome, RateOutcome::resolved(dec!(41.25), RateOrigin::Provider));

        let stored = svc.store().find("USD", "UAH", day()).unwrap().unwrap();
        assert_eq!(stored.source, RateSource::Provider);
        let inverse = svc.store().find("UAH", "USD", day()).unwrap().unwrap();
        assert_eq!(inverse.rate, dec!(0.0242424242));
        assert_eq!(inverse.source, RateSource::Inverse);
    }

    #[tokio::test]
    async fn second_lookup_served_from_cache() {
        let provider = Arc::new(MockProvider::with_pivot("UAH").with_rate("USD", "UAH", dec!(41.25)));
        let svc = service(provider.clone());

        svc.get_rate("USD", "UAH", Some(day())).await.unwrap();
        let again = svc.get_rate("USD", "UAH", Some(day())).await.unwrap();
        assert_eq!(again, RateOutcome::resolved(dec!(41.25), RateOrigin::Cache));
        assert_eq!(provider.fetch_count(), 1);
    }

    #[tokio::test]
    async fn pivot_product_is_stored_as_derived() {
        let provider = Arc::new(
            MockProvider::with_pivot("UAH")
                .with_rate("USD", "UAH", dec!(41.25))
                .with_rate("EUR", "UAH", dec!(50)),
        );
        let svc = service(provider.clone());

        let rate = svc.get_rate("USD", "EUR", Some(day())).await.unwrap().rate();
        // 41.25 * (1 / 50)
        assert_eq!(rate, dec!(0.825));
        assert_eq!(provider.fetch_count(), 2);

        let row = svc.store().find("USD", "EUR", day()).unwrap().unwrap();
        assert_eq!(row.source, RateSource::Derived);

        // Reciprocal now comes from the store.
        let back = svc.get_rate("EUR", "USD", Some(day())).await.unwrap();
        assert_eq!(back.origin(), Some(RateOrigin::Store));
        assert_eq!(provider.fetch_count(), 2);
    }

    #[tokio::test]
    async fn pivot_legs_reuse_stored_rates() {
        let provider = Arc::new(
            MockProvider::with_pivot("UAH")
                .with_rate("USD", "UAH", dec!(41.25))
                .with_rate("EUR", "UAH", dec!(48)),
        );
        let svc = service(provider.clone());

        svc.get_rate("USD", "UAH", Some(day())).await.unwrap();
        svc.get_rate("USD", "EUR", Some(day())).await.unwrap();
        // Only the UAH->EUR leg needed the provider.
        assert_eq!(provider.fetch_count(), 2);
    }

    #[tokio::test]
    async fn provider_failure_falls_back_to_one() {
        let provider = Arc::new(MockProvider::with_pivot("UAH"));
        provider.set_failing(true);
        let svc = service(provider.clone());

        let outcome = svc.get_rate("USD", "UAH", Some(day())).await.unwrap();
        assert!(outcome.is_fallback());
        assert_eq!(outcome.rate(), Decimal::ONE);

        let converted = svc.convert(dec!(100), "USD", "UAH", Some(day())).await.unwrap();
        assert_eq!(converted, dec!(100.00));
        // Fallbacks are never stored.
        assert_eq!(svc.store().count().unwrap(), 0);
    }

    #[tokio::test]
    async fn fallback_is_retried_once_provider_recovers() {
        let provider = Arc::new(MockProvider::with_pivot("UAH").with_rate("USD", "UAH", dec!(41.25)));
        provider.set_failing(true);
        let svc = service(provider.clone());

        assert!(svc.get_rate("USD", "UAH", Some(day())).await.unwrap().is_fallback());
        provider.set_failing(false);
        let outcome = svc.get_rate("USD", "UAH", Some(day())).await.unwrap();
        assert_eq!(outcome.rate(), dec!(41.25));
    }

    #[tokio::test]
    async fn refresh_overwrites_stored_rate() {
        let provider = Arc::new(MockProvider::with_pivot("UAH").with_rate("USD", "UAH", dec!(41.25)));
        let svc = service(provider.clone());
        svc.get_rate("USD", "UAH", Some(day())).await.unwrap();

        provider.set_rate("USD", "UAH", dec!(41.50));
        assert_eq!(svc.refresh_rate("USD", "UAH", Some(day())).await.unwrap(), dec!(41.50));

        let outcome = svc.get_rate("USD", "UAH", Some(day())).await.unwrap();
        assert_eq!(outcome.rate(), dec!(41.50));
        let inverse = svc.get_rate("UAH", "USD", Some(day())).await.unwrap();
        assert_eq!(inverse.rate(), invert_rate(dec!(41.50)).unwrap());
    }

    #[tokio::test]
    async fn refresh_surfaces_provider_errors() {
        let provider = Arc::new(MockProvider::with_pivot("UAH"));
        provider.set_failing(true);
        let svc = service(provider);

        let result = svc.refresh_rate("USD", "UAH", Some(day())).await;
        assert!(matches!(result, Err(RatesError::Provider(_))));
    }

    #[tokio::test]
    async fn manual_rate_replaces_cached_value() {
        let provider = Arc::new(MockProvider::with_pivot("UAH").with_rate("USD", "UAH", dec!(41.25)));
        let svc = service(provider.clone());
        svc.get_rate("USD", "UAH", Some(day())).await.unwrap();
        svc.get_rate("UAH", "USD", Some(day())).await.unwrap();

        svc.set_rate("usd", "uah", day(), dec!(40)).await.unwrap();

        assert_eq!(svc.get_rate("USD", "UAH", Some(day())).await.unwrap().rate(), dec!(40));
        assert_eq!(svc.get_rate("UAH", "USD", Some(day())).await.unwrap().rate(), dec!(0.025));
        let row = svc.store().find("USD", "UAH", day()).unwrap().unwrap();
        assert_eq!(row.source, RateSource::Manual);
    }

    #[tokio::test]
    async fn manual_rate_must_be_positive() {
        let svc = service(Arc::new(MockProvider::with_pivot("UAH")));
        assert!(matches!(
            svc.set_rate("USD", "UAH", day(), dec!(0)).await,
            Err(RatesError::InvalidRate(_))
        ));
        assert!(matches!(
            svc.set_rate("USD", "USD", day(), dec!(1)).await,
            Err(RatesError::InvalidRate(_))
        ));
    }

    #[tokio::test]
    async fn update_all_rates_reports_each_pair() {
        let provider = Arc::new(
            MockProvider::with_pivot("UAH")
                .with_rate("USD", "UAH", dec!(41.25))
                .with_rate("EUR", "UAH", dec!(48)),
        );
        let svc = service(provider);

        let report = svc.update_all_rates(Some(day())).await;
        // 4 currencies -> 12 ordered pairs; JPY has no mock rate.
        assert_eq!(report.pairs.len(), 12);
        assert_eq!(report.succeeded(), 6);
        assert_eq!(report.failed(), 6);
        let failed = report.pairs.iter().find(|p| p.from == "JPY" && p.to == "UAH").unwrap();
        assert!(!failed.success);
        assert!(failed.error.as_deref().unwrap().contains("JPY"));
    }

    #[test]
    fn format_keeps_sign_outside_magnitude() {
        let svc = service(Arc::new(MockProvider::with_pivot("UAH")));
        assert_eq!(svc.format(dec!(-12.5), "USD").unwrap(), "-12.50$");
        assert_eq!(svc.format(dec!(1234.567), "uah").unwrap(), "1234.57₴");
        assert_eq!(svc.format(dec!(-0.001), "USD").unwrap(), "0.00$");
        assert_eq!(svc.format(dec!(1500.5), "JPY").unwrap(), "1501¥");
        assert!(matches!(
            svc.format(dec!(1), "GBP"),
            Err(RatesError::UnsupportedCurrency(_))
        ));
    }

    #[test]
    fn pivot_must_be_supported() {
        let result = CurrencyService::new(
            &config(&[("UAH", "₴", 2), ("USD", "$", 2)]),
            SqliteRateStore::open_in_memory().unwrap(),
            Arc::new(MemoryStore::new(10)),
            Arc::new(MockProvider::with_pivot("PLN")),
            Duration::from_secs(60),
        );
        assert!(matches!(
            result,
            Err(RatesError::Config(ConfigError::UnsupportedPivot(_)))
        ));
    }
}
