pub mod cache_schema;
pub mod config;
pub mod currency;
pub mod exchange_rate;

pub use cache_schema::{CacheRow, CacheType};
pub use config::{
    CacheBackend, CacheConfig, ConfigError, CurrencyConfig, FinratesConfig, ProviderConfig,
    ProviderKind, RefreshConfig, TtlMinutes,
};
pub use currency::SupportedCurrency;
pub use exchange_rate::{
    ExchangeRate, PairReport, RateOrigin, RateOutcome, RateSource, RefreshReport,
};
