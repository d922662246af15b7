//! Several processes share one rate table: the refresh daemon writes while
//! CLI invocations and the application read. WAL mode must keep readers
//! unblocked and every row they see complete.
//!
//! Run with:
//! ```bash
//! cargo test -p finrates-rates --test shared_rate_table
//! ```

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use chrono::NaiveDate;
use finrates_cache::MemoryStore;
use finrates_models::config::{CurrencyConfig, ProviderConfig, ProviderKind};
use finrates_models::currency::SupportedCurrency;
use finrates_models::exchange_rate::{ExchangeRate, RateOrigin, RateSource};
use finrates_rates::test_support::MockProvider;
use finrates_rates::{CurrencyService, SqliteRateStore};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn base_day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()
}

fn currency_config() -> CurrencyConfig {
    CurrencyConfig {
        rates_db_path: String::new(),
        provider: ProviderConfig {
            kind: ProviderKind::PivotTable,
            base_url: "http://localhost".to_string(),
            api_key: None,
            pivot: "UAH".to_string(),
            timeout_seconds: 1,
        },
        currencies: vec![
            SupportedCurrency::new("UAH", "Hryvnia", "₴", 2),
            SupportedCurrency::new("USD", "US dollar", "$", 2),
            SupportedCurrency::new("EUR", "Euro", "€", 2),
        ],
    }
}

/// A writer upserting a year of rates while readers query the same file.
#[test]
fn concurrent_writer_and_readers_no_busy_errors() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("rates.db");
    let path_str = db_path.to_str().unwrap();

    // Writer creates the DB and enables WAL
    let writer = SqliteRateStore::open(path_str).unwrap();
    writer
        .upsert(&ExchangeRate::new("USD", "UAH", base_day(), dec!(41.25), RateSource::Provider))
        .unwrap();

    let days = 365;
    let reader_count = 4;
    let reads_per_reader = 100;
    let barrier = Arc::new(Barrier::new(1 + reader_count));

    let writer_barrier = barrier.clone();
    let writer_path = path_str.to_string();
    let writer_handle = thread::spawn(move || {
        writer_barrier.wait();
        let writer = SqliteRateStore::open(&writer_path).unwrap();
        for i in 1..days {
            let date = base_day() + chrono::Duration::days(i);
            let rate = ExchangeRate::new(
                "USD",
                "UAH",
                date,
                dec!(41) + Decimal::new(i, 3),
                RateSource::Provider,
            );
            writer.upsert(&rate).unwrap();
            writer.upsert_inverse(&rate).unwrap();
        }
    });

    let reader_handles: Vec<_> = (0..reader_count)
        .map(|reader_id| {
            let b = barrier.clone();
            let p = path_str.to_string();
            thread::spawn(move || {
                b.wait();
                let reader = SqliteRateStore::open(&p).unwrap();
                let mut found = 0usize;
                for i in 0..reads_per_reader {
                    if let Some(row) = reader.find("USD", "UAH", base_day()).unwrap() {
                        assert_eq!(row.rate, dec!(41.25));
                        found += 1;
                    }
                    let date = base_day() + chrono::Duration::days(i);
                    // Whatever is visible for a date is a whole row.
                    for row in reader.rates_on(date).unwrap() {
                        assert!(row.rate > Decimal::ZERO);
                        found += 1;
                    }
                }
                (reader_id, found)
            })
        })
        .collect();

    writer_handle.join().expect("writer thread panicked");
    for handle in reader_handles {
        let (id, found) = handle.join().expect("reader thread panicked");
        assert!(found > 0, "Reader {id} found zero rows");
    }

    let reader = SqliteRateStore::open(path_str).unwrap();
    // One seeded row, then a pair and its inverse per written day.
    assert_eq!(reader.count().unwrap(), 1 + 2 * (days as usize - 1));
}

/// Rates refreshed by one service are visible to another process's
/// service through the table, even with the provider down.
#[tokio::test]
async fn refreshed_rates_visible_to_second_process() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("rates.db");
    let path_str = db_path.to_str().unwrap();

    let daemon_provider = Arc::new(
        MockProvider::with_pivot("UAH")
            .with_rate("USD", "UAH", dec!(41.25))
            .with_rate("EUR", "UAH", dec!(50)),
    );
    let daemon_side = CurrencyService::new(
        &currency_config(),
        SqliteRateStore::open(path_str).unwrap(),
        Arc::new(MemoryStore::new(100)),
        daemon_provider,
        Duration::from_secs(3600),
    )
    .unwrap();
    let report = daemon_side.update_all_rates(Some(base_day())).await;
    assert_eq!(report.failed(), 0);

    let cli_provider = Arc::new(MockProvider::with_pivot("UAH"));
    cli_provider.set_failing(true);
    let cli_side = CurrencyService::new(
        &currency_config(),
        SqliteRateStore::open(path_str).unwrap(),
        Arc::new(MemoryStore::new(100)),
        cli_provider.clone(),
        Duration::from_secs(3600),
    )
    .unwrap();

    let outcome = cli_side.get_rate("USD", "EUR", Some(base_day())).await.unwrap();
    assert_eq!(outcome.origin(), Some(RateOrigin::Store));
    assert_eq!(outcome.rate(), dec!(0.825));
    assert_eq!(
        cli_side.convert(dec!(1000), "EUR", "UAH", Some(base_day())).await.unwrap(),
        dec!(50000.00)
    );
    assert_eq!(cli_provider.fetch_count(), 0);
}
