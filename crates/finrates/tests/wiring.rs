//! Builds the full stack from configuration, the way the binary does, with
//! a mock provider in place of the HTTP client.
//!
//! Run with:
//! ```bash
//! cargo test -p finrates --test wiring
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::NaiveDate;
use finrates::cache::{subkey, Filters};
use finrates::models::cache_schema::CacheType;
use finrates::models::config::{CacheBackend, FinratesConfig, ProviderKind};
use finrates::rates::test_support::MockProvider;
use rust_decimal_macros::dec;

fn sample_config_path() -> String {
    format!("{}/../../config/finrates.toml", env!("CARGO_MANIFEST_DIR"))
}

fn test_config(backend: CacheBackend, dir: &tempfile::TempDir) -> FinratesConfig {
    let mut config = finrates::load_config(&sample_config_path()).unwrap();
    config.cache.backend = backend;
    config.cache.sqlite_path = dir.path().join("cache.db").to_str().unwrap().to_string();
    config.currency.rates_db_path = dir.path().join("rates.db").to_str().unwrap().to_string();
    config
}

#[test]
fn sample_config_is_valid() {
    let config = finrates::load_config(&sample_config_path()).unwrap();
    assert_eq!(config.cache.backend, CacheBackend::Sqlite);
    assert_eq!(config.currency.provider.kind, ProviderKind::PivotTable);
    assert_eq!(config.currency.provider.pivot, "UAH");
    assert_eq!(config.currency.currencies.len(), 4);
}

#[test]
fn missing_config_is_reported() {
    let err = finrates::load_config("/nonexistent/finrates.toml").unwrap_err();
    assert!(err.to_string().contains("Failed to read config"));
}

#[test]
fn invalid_config_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    let body = std::fs::read_to_string(sample_config_path())
        .unwrap()
        .replace("strategy = \"moderate\"", "strategy = \"reckless\"");
    std::fs::write(&path, body).unwrap();

    let err = finrates::load_config(path.to_str().unwrap()).unwrap_err();
    assert!(err.to_string().contains("Invalid config"));
}

#[test]
fn sqlite_backend_exposes_store_for_cleanup() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(CacheBackend::Sqlite, &dir);

    let stores = finrates::build_cache_store(&config.cache).unwrap();
    assert!(stores.sqlite.is_some());
    assert_eq!(stores.store.name(), "sqlite");

    let cache = finrates::build_derived_cache(&config, &stores).unwrap();
    assert_eq!(cache.invalidator_name(), "pattern");
}

#[test]
fn memory_backend_uses_enumerated_invalidation() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(CacheBackend::Memory, &dir);

    let stores = finrates::build_cache_store(&config.cache).unwrap();
    assert!(stores.sqlite.is_none());
    let cache = finrates::build_derived_cache(&config, &stores).unwrap();
    assert_eq!(cache.invalidator_name(), "enumerated");
}

#[test]
fn missing_data_directory_is_created() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(CacheBackend::Sqlite, &dir);
    config.cache.sqlite_path = dir.path().join("nested/data/cache.db").to_str().unwrap().to_string();

    finrates::build_cache_store(&config.cache).unwrap();
    assert!(dir.path().join("nested/data/cache.db").exists());
}

/// Stats computed from converted transaction amounts are memoized and
/// dropped when a transaction is written.
#[tokio::test]
async fn converted_stats_invalidated_by_transaction_write() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(CacheBackend::Sqlite, &dir);
    let stores = finrates::build_cache_store(&config.cache).unwrap();
    let provider = Arc::new(
        MockProvider::with_pivot("UAH")
            .with_rate("USD", "UAH", dec!(41.25))
            .with_rate("EUR", "UAH", dec!(48.10)),
    );
    let service =
        finrates::build_currency_service_with(&config, &stores, provider.clone()).unwrap();
    let cache = finrates::build_derived_cache(&config, &stores).unwrap();
    let date = NaiveDate::from_ymd_opt(2025, 10, 6).unwrap();

    let transactions = [(dec!(100), "USD"), (dec!(50), "EUR"), (dec!(1200), "UAH")];
    let runs = AtomicUsize::new(0);
    let key = subkey(7, &Filters::new().with("period", "month"), None);

    for _ in 0..2 {
        let counter = &runs;
        let service = &service;
        let total = cache
            .try_remember(CacheType::Stats, &key, None, move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                let mut total = dec!(0);
                for (amount, currency) in transactions {
                    total += service.convert(amount, currency, "UAH", Some(date)).await?;
                }
                Ok::<_, finrates::rates::RatesError>(total)
            })
            .await
            .unwrap();
        // 4125.00 + 2405.00 + 1200
        assert_eq!(total, dec!(7730.00));
    }
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(provider.fetch_count(), 2);

    cache.forget_user_transactions(7).await.unwrap();
    assert!(!cache.has(CacheType::Stats, &key).await.unwrap());
    // Rates are still cached under their own keys.
    service.convert(dec!(1), "USD", "UAH", Some(date)).await.unwrap();
    assert_eq!(provider.fetch_count(), 2);
}
