use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache_schema::CacheType;
use crate::currency::{is_valid_code, normalize_code, SupportedCurrency};

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Unknown cache strategy: {0}")]
    UnknownStrategy(String),

    #[error("Strategy multiplier must be positive: {name}={value}")]
    InvalidMultiplier { name: String, value: f64 },

    #[error("TTL for {0} is out of range")]
    TtlOutOfRange(String),

    #[error("Invalid currency code: {0}")]
    InvalidCurrencyCode(String),

    #[error("Duplicate currency code: {0}")]
    DuplicateCurrency(String),

    #[error("Pivot currency {0} is not in the supported currency list")]
    UnsupportedPivot(String),

    #[error("Configuration error: {0}")]
    Invalid(String),
}

/// Top-level configuration, read once at startup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FinratesConfig {
    #[serde(default)]
    pub cache: CacheConfig,
    pub currency: CurrencyConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
}

impl FinratesConfig {
    /// Checks cross-field invariants the type system can't express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.cache.validate()?;
        self.currency.validate()
    }
}

/// Which key-value store backs the derived-data cache.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    /// In-process moka cache. No prefix deletion.
    #[default]
    Memory,
    /// Shared SQLite file. Supports prefix deletion.
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheConfig {
    /// Leading segment of every derived-data key.
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default)]
    pub backend: CacheBackend,
    /// Path to the SQLite cache file (sqlite backend only).
    #[serde(default = "default_cache_sqlite_path")]
    pub sqlite_path: String,
    /// Maximum number of entries in the moka store (memory backend only).
    #[serde(default = "default_memory_capacity")]
    pub memory_max_capacity: u64,
    /// Name of the active TTL strategy. Must be a key of `strategies`.
    #[serde(default = "default_strategy")]
    pub strategy: String,
    #[serde(default = "default_strategies")]
    pub strategies: BTreeMap<String, f64>,
    #[serde(default)]
    pub ttl_minutes: TtlMinutes,
    /// How many pages of paginated types are rebuilt during enumerated invalidation.
    #[serde(default = "default_invalidation_pages")]
    pub invalidation_pages: u32,
    /// TTL for cached exchange rates.
    #[serde(default = "default_rate_ttl")]
    pub rate_ttl_minutes: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            backend: CacheBackend::default(),
            sqlite_path: default_cache_sqlite_path(),
            memory_max_capacity: default_memory_capacity(),
            strategy: default_strategy(),
            strategies: default_strategies(),
            ttl_minutes: TtlMinutes::default(),
            invalidation_pages: default_invalidation_pages(),
            rate_ttl_minutes: default_rate_ttl(),
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in &self.strategies {
            if !value.is_finite() || *value <= 0.0 {
                return Err(ConfigError::InvalidMultiplier {
                    name: name.clone(),
                    value: *value,
                });
            }
        }
        let multiplier = self.strategy_multiplier()?;
        for cache_type in CacheType::ALL {
            self.ttl_for(cache_type, multiplier)?;
        }
        self.rate_ttl()?;
        Ok(())
    }

    /// Multiplier of the configured strategy.
    pub fn strategy_multiplier(&self) -> Result<f64, ConfigError> {
        self.strategies
            .get(&self.strategy)
            .copied()
            .ok_or_else(|| ConfigError::UnknownStrategy(self.strategy.clone()))
    }

    /// Base TTL for a type scaled by `multiplier`, capped at `MAX_TTL`.
    pub fn ttl_for(&self, cache_type: CacheType, multiplier: f64) -> Result<Duration, ConfigError> {
        let out_of_range = || ConfigError::TtlOutOfRange(cache_type.as_str().to_string());
        let base = minutes(self.ttl_minutes.get(cache_type)).ok_or_else(out_of_range)?;
        Duration::try_from_secs_f64(base.as_secs_f64() * multiplier)
            .ok()
            .filter(|ttl| *ttl <= MAX_TTL)
            .ok_or_else(out_of_range)
    }

    pub fn rate_ttl(&self) -> Result<Duration, ConfigError> {
        minutes(self.rate_ttl_minutes)
            .filter(|ttl| *ttl <= MAX_TTL)
            .ok_or_else(|| ConfigError::TtlOutOfRange("exchange_rate".to_string()))
    }
}

/// Longest TTL any cache entry may be written with.
pub const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

fn minutes(count: u64) -> Option<Duration> {
    count.checked_mul(60).map(Duration::from_secs)
}

/// Base TTL per cache type, in minutes, before the strategy multiplier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TtlMinutes {
    #[serde(default = "default_stats_ttl")]
    pub stats: u64,
    #[serde(default = "default_transactions_ttl")]
    pub transactions: u64,
    #[serde(default = "default_categories_ttl")]
    pub categories: u64,
    #[serde(default = "default_budgets_ttl")]
    pub budgets: u64,
    #[serde(default = "default_notifications_ttl")]
    pub notifications: u64,
}

impl TtlMinutes {
    pub fn get(&self, cache_type: CacheType) -> u64 {
        match cache_type {
            CacheType::Stats => self.stats,
            CacheType::Transactions => self.transactions,
            CacheType::Categories => self.categories,
            CacheType::Budgets => self.budgets,
            CacheType::Notifications => self.notifications,
        }
    }
}

impl Default for TtlMinutes {
    fn default() -> Self {
        Self {
            stats: default_stats_ttl(),
            transactions: default_transactions_ttl(),
            categories: default_categories_ttl(),
            budgets: default_budgets_ttl(),
            notifications: default_notifications_ttl(),
        }
    }
}

/// Which external rate provider to use for missing rates.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Live `from -> to` quotes, no history.
    DirectPair,
    /// Historical `foreign -> pivot` table (central bank style).
    #[default]
    PivotTable,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderConfig {
    #[serde(default)]
    pub kind: ProviderKind,
    pub base_url: String,
    /// Appended as a path segment by the direct-pair provider when present.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Pivot currency of a pivot-table provider.
    #[serde(default = "default_pivot")]
    pub pivot: String,
    #[serde(default = "default_provider_timeout")]
    pub timeout_seconds: u64,
}

impl ProviderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CurrencyConfig {
    /// Path to the SQLite file holding persisted exchange rates.
    #[serde(default = "default_rates_db_path")]
    pub rates_db_path: String,
    pub provider: ProviderConfig,
    pub currencies: Vec<SupportedCurrency>,
}

impl CurrencyConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for currency in &self.currencies {
            if !is_valid_code(&currency.code) {
                return Err(ConfigError::InvalidCurrencyCode(currency.code.clone()));
            }
            if !seen.insert(normalize_code(&currency.code)) {
                return Err(ConfigError::DuplicateCurrency(currency.code.clone()));
            }
        }
        if self.currencies.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one supported currency is required".to_string(),
            ));
        }
        if self.provider.kind == ProviderKind::PivotTable
            && !seen.contains(&normalize_code(&self.provider.pivot))
        {
            return Err(ConfigError::UnsupportedPivot(self.provider.pivot.clone()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RefreshConfig {
    /// Whether the daemon runs the periodic rate refresh.
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_refresh_interval")]
    pub interval_seconds: u64,
    /// Interval between expired cache entry cleanups (sqlite backend).
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_seconds: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            interval_seconds: default_refresh_interval(),
            cleanup_interval_seconds: default_cleanup_interval(),
        }
    }
}

fn default_prefix() -> String {
    "finrates".to_string()
}
fn default_cache_sqlite_path() -> String {
    "data/finrates_cache.db".to_string()
}
fn default_memory_capacity() -> u64 {
    10_000
}
fn default_strategy() -> String {
    "moderate".to_string()
}
fn default_strategies() -> BTreeMap<String, f64> {
    BTreeMap::from([
        ("aggressive".to_string(), 2.0),
        ("moderate".to_string(), 1.0),
        ("conservative".to_string(), 0.5),
    ])
}
fn default_invalidation_pages() -> u32 {
    5
}
fn default_rate_ttl() -> u64 {
    60
}
fn default_stats_ttl() -> u64 {
    30
}
fn default_transactions_ttl() -> u64 {
    15
}
fn default_categories_ttl() -> u64 {
    60
}
fn default_budgets_ttl() -> u64 {
    30
}
fn default_notifications_ttl() -> u64 {
    1440
}
fn default_pivot() -> String {
    "UAH".to_string()
}
fn default_provider_timeout() -> u64 {
    10
}
fn default_rates_db_path() -> String {
    "data/finrates_rates.db".to_string()
}
fn default_true() -> bool {
    true
}
fn default_refresh_interval() -> u64 {
    21_600
}
fn default_cleanup_interval() -> u64 {
    300
}
