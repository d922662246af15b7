//! finrates - currency conversion and derived-data caching for a personal
//! finance backend.
//!
//! Exchange rates are resolved through a cache, a SQLite rate table and an
//! external provider. Per-user derived data (statistics, filtered lists) is
//! memoized in the same cache store and invalidated when the records it was
//! computed from change.
//!
//! # Library Usage
//!
//! ```rust,no_run
//! use finrates::models::config::FinratesConfig;
//! use finrates::cache::{DerivedCache, Filters, subkey};
//! use finrates::rates::CurrencyService;
//! ```

pub use finrates_cache as cache;
pub use finrates_models as models;
pub use finrates_rates as rates;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use finrates_cache::{CacheStore, DerivedCache, MemoryStore, SqliteStore};
use finrates_models::config::{CacheBackend, CacheConfig, FinratesConfig};
use finrates_rates::{create_provider, CurrencyService, RateProvider, SqliteRateStore};

/// The configured cache store. `sqlite` is set for the SQLite backend so the
/// daemon can purge expired rows.
#[derive(Clone)]
pub struct CacheStores {
    pub store: Arc<dyn CacheStore>,
    pub sqlite: Option<Arc<SqliteStore>>,
}

/// Read, parse and validate a TOML configuration file.
pub fn load_config(path: &str) -> Result<FinratesConfig> {
    let config_str =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read config: {path}"))?;
    let config: FinratesConfig =
        toml::from_str(&config_str).with_context(|| "Failed to parse config")?;
    config.validate().context("Invalid config")?;
    Ok(config)
}

fn ensure_parent_dir(path: &str) -> Result<()> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
    }
    Ok(())
}

/// Open the cache store selected by `config.backend`.
pub fn build_cache_store(config: &CacheConfig) -> Result<CacheStores> {
    match config.backend {
        CacheBackend::Memory => Ok(CacheStores {
            store: Arc::new(MemoryStore::new(config.memory_max_capacity)),
            sqlite: None,
        }),
        CacheBackend::Sqlite => {
            ensure_parent_dir(&config.sqlite_path)?;
            let sqlite = Arc::new(
                SqliteStore::open(&config.sqlite_path)
                    .with_context(|| format!("Failed to open cache DB: {}", config.sqlite_path))?,
            );
            Ok(CacheStores {
                store: sqlite.clone(),
                sqlite: Some(sqlite),
            })
        }
    }
}

/// Derived-data cache over the shared store.
pub fn build_derived_cache(config: &FinratesConfig, stores: &CacheStores) -> Result<DerivedCache> {
    DerivedCache::new(stores.store.clone(), &config.cache).context("Failed to build derived cache")
}

/// Currency service using the configured provider.
pub fn build_currency_service(
    config: &FinratesConfig,
    stores: &CacheStores,
) -> Result<CurrencyService> {
    let provider =
        create_provider(&config.currency.provider).context("Failed to build rate provider")?;
    build_currency_service_with(config, stores, provider)
}

/// Currency service with an explicit provider.
pub fn build_currency_service_with(
    config: &FinratesConfig,
    stores: &CacheStores,
    provider: Arc<dyn RateProvider>,
) -> Result<CurrencyService> {
    let path = &config.currency.rates_db_path;
    let store = if path == ":memory:" {
        SqliteRateStore::open_in_memory()
    } else {
        ensure_parent_dir(path)?;
        SqliteRateStore::open(path)
    }
    .with_context(|| format!("Failed to open rates DB: {path}"))?;

    CurrencyService::new(
        &config.currency,
        store,
        stores.store.clone(),
        provider,
        config.cache.rate_ttl()?,
    )
    .context("Failed to build currency service")
}
