use serde::{Deserialize, Serialize};

/// Categories of derived data held in the cache.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum CacheType {
    Stats,
    Transactions,
    Categories,
    Budgets,
    /// "Already sent" markers for budget threshold notifications.
    Notifications,
}

/// A filter key together with every value the application sends for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterDimension {
    pub key: &'static str,
    pub values: &'static [&'static str],
}

const TYPE_DIMENSION: FilterDimension = FilterDimension {
    key: "type",
    values: &["income", "expense"],
};

const ACTIVE_DIMENSION: FilterDimension = FilterDimension {
    key: "is_active",
    values: &["true", "false"],
};

const PERIOD_DIMENSION: FilterDimension = FilterDimension {
    key: "period",
    values: &["week", "month", "year"],
};

impl CacheType {
    pub const ALL: [CacheType; 5] = [
        CacheType::Stats,
        CacheType::Transactions,
        CacheType::Categories,
        CacheType::Budgets,
        CacheType::Notifications,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheType::Stats => "stats",
            CacheType::Transactions => "transactions",
            CacheType::Categories => "categories",
            CacheType::Budgets => "budgets",
            CacheType::Notifications => "notifications",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }

    /// Types whose cached values are computed from this one and must be
    /// invalidated with it.
    pub fn dependents(&self) -> &'static [CacheType] {
        match self {
            CacheType::Transactions => &[CacheType::Stats],
            CacheType::Categories => &[CacheType::Stats],
            CacheType::Stats | CacheType::Budgets | CacheType::Notifications => &[],
        }
    }

    /// Filter keys callers use for this type. Each dimension may also be
    /// absent from a request.
    pub fn filter_dimensions(&self) -> &'static [FilterDimension] {
        match self {
            CacheType::Stats => &[PERIOD_DIMENSION, TYPE_DIMENSION],
            CacheType::Transactions => &[TYPE_DIMENSION],
            CacheType::Categories => &[TYPE_DIMENSION, ACTIVE_DIMENSION],
            CacheType::Budgets => &[ACTIVE_DIMENSION],
            CacheType::Notifications => &[],
        }
    }

    /// Whether subkeys of this type carry a page number.
    pub fn paginated(&self) -> bool {
        matches!(self, CacheType::Transactions)
    }
}

impl std::fmt::Display for CacheType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Schema of the SQLite cache store.
///
/// ```sql
/// CREATE TABLE IF NOT EXISTS cache_entries (
///     key         TEXT PRIMARY KEY,
///     value_json  TEXT NOT NULL,
///     created_at  TEXT NOT NULL,
///     expires_at  TEXT NOT NULL
/// );
/// ```
pub const CACHE_TABLE_DDL: &str = "\
CREATE TABLE IF NOT EXISTS cache_entries (
    key         TEXT PRIMARY KEY,
    value_json  TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    expires_at  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_cache_expires ON cache_entries(expires_at);
";

/// Schema of the persisted exchange rate table. `(base, target, date)` is
/// the upsert key; `rate` is a decimal string.
pub const RATES_TABLE_DDL: &str = "\
CREATE TABLE IF NOT EXISTS exchange_rates (
    base_currency   TEXT NOT NULL,
    target_currency TEXT NOT NULL,
    rate_date       TEXT NOT NULL,
    rate            TEXT NOT NULL,
    source          TEXT NOT NULL,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL,
    PRIMARY KEY (base_currency, target_currency, rate_date)
);
CREATE INDEX IF NOT EXISTS idx_rates_date ON exchange_rates(rate_date);
";

/// Key conventions shared by every cache user.
///
/// - Exchange rates: `exchange_rate:{from}:{to}:{date}` (e.g. `exchange_rate:USD:UAH:2025-10-06`)
/// - Derived data: `{prefix}:{type}:{subkey}` (e.g. `finrates:stats:user_5_all`)
/// - Subkeys start with `user_{id}_`, so one user's entries of a type share a prefix.
pub mod key_patterns {
    use chrono::NaiveDate;

    use super::CacheType;

    pub fn exchange_rate(from: &str, to: &str, date: NaiveDate) -> String {
        format!("exchange_rate:{from}:{to}:{}", date.format("%Y-%m-%d"))
    }

    pub fn derived(prefix: &str, cache_type: CacheType, subkey: &str) -> String {
        format!("{prefix}:{}:{subkey}", cache_type.as_str())
    }

    /// Prefix shared by every subkey of one user.
    pub fn user_subkey_prefix(user_id: i64) -> String {
        format!("user_{user_id}_")
    }

    /// Prefix shared by every key of one user within a type.
    pub fn user_type_prefix(prefix: &str, cache_type: CacheType, user_id: i64) -> String {
        derived(prefix, cache_type, &user_subkey_prefix(user_id))
    }
}

/// A raw cache row as stored in SQLite.
#[derive(Debug, Clone)]
pub struct CacheRow {
    pub key: String,
    pub value_json: String,
    pub created_at: String,
    pub expires_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn key_pattern_exchange_rate() {
        let date = NaiveDate::from_ymd_opt(2025, 10, 6).unwrap();
        assert_eq!(
            key_patterns::exchange_rate("USD", "UAH", date),
            "exchange_rate:USD:UAH:2025-10-06"
        );
    }

    #[test]
    fn key_pattern_derived() {
        assert_eq!(
            key_patterns::derived("finrates", CacheType::Budgets, "user_5_all"),
            "finrates:budgets:user_5_all"
        );
    }

    #[test]
    fn user_prefix_does_not_cover_other_users() {
        let prefix = key_patterns::user_type_prefix("finrates", CacheType::Stats, 5);
        assert_eq!(prefix, "finrates:stats:user_5_");
        assert!(key_patterns::derived("finrates", CacheType::Stats, "user_5_all").starts_with(&prefix));
        assert!(!key_patterns::derived("finrates", CacheType::Stats, "user_50_all").starts_with(&prefix));
    }

    #[test]
    fn dependency_graph() {
        assert_eq!(CacheType::Transactions.dependents(), &[CacheType::Stats]);
        assert_eq!(CacheType::Categories.dependents(), &[CacheType::Stats]);
        assert!(CacheType::Budgets.dependents().is_empty());
        assert!(CacheType::Stats.dependents().is_empty());
    }

    #[test]
    fn cache_type_parse_roundtrip() {
        for cache_type in CacheType::ALL {
            assert_eq!(CacheType::parse(cache_type.as_str()), Some(cache_type));
            let json = serde_json::to_string(&cache_type).unwrap();
            assert_eq!(json, format!("\"{}\"", cache_type.as_str()));
        }
        assert_eq!(CacheType::parse("reports"), None);
    }

    #[test]
    fn only_transactions_are_paginated() {
        let paginated: Vec<_> = CacheType::ALL.into_iter().filter(|t| t.paginated()).collect();
        assert_eq!(paginated, vec![CacheType::Transactions]);
    }
}
