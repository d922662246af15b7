//! Deterministic subkeys for derived-data cache entries.
//!
//! A subkey encodes the user and the request parameters:
//! `user_{id}_{all|digest}[_page_{n}]`. Filters are kept in a sorted map, so
//! the digest does not depend on the order callers supplied them in.

use std::collections::BTreeMap;

use finrates_models::cache_schema::key_patterns;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::CacheError;

/// Hex characters of the SHA-256 digest kept in a subkey.
const DIGEST_LEN: usize = 16;

/// Request filters in canonical form.
///
/// Values are stored as strings: `true`, `"true"` and `Some("true")` all
/// address the same entry. Empty values are dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filters(BTreeMap<String, String>);

impl Filters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: impl ToString) {
        let value = value.to_string();
        if value.is_empty() {
            self.0.remove(key);
        } else {
            self.0.insert(key.to_string(), value);
        }
    }

    /// Build filters from a flat serializable struct or map. `null` fields are skipped.
    pub fn from_serialize<T: Serialize>(value: &T) -> Result<Self, CacheError> {
        let serde_json::Value::Object(map) = serde_json::to_value(value)? else {
            return Err(CacheError::InvalidFilters(
                serde_json::to_string(value).unwrap_or_default(),
            ));
        };

        let mut filters = Self::new();
        for (key, value) in map {
            match value {
                serde_json::Value::Null => {}
                serde_json::Value::String(s) => filters.insert(&key, s),
                other => filters.insert(&key, other),
            }
        }
        Ok(filters)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Sorted JSON object of the filters.
    pub fn canonical(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_default()
    }

    /// Truncated SHA-256 of [`Filters::canonical`].
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.canonical().as_bytes());
        let mut hex = format!("{:x}", hasher.finalize());
        hex.truncate(DIGEST_LEN);
        hex
    }
}

impl<K: AsRef<str>, V: ToString> FromIterator<(K, V)> for Filters {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut filters = Self::new();
        for (key, value) in iter {
            filters.insert(key.as_ref(), value);
        }
        filters
    }
}

/// Subkey for a user's request. `page` is set for paginated types.
pub fn subkey(user_id: i64, filters: &Filters, page: Option<u32>) -> String {
    let body = if filters.is_empty() {
        "all".to_string()
    } else {
        filters.digest()
    };
    let mut key = format!("{}{body}", key_patterns::user_subkey_prefix(user_id));
    if let Some(page) = page {
        key.push_str(&format!("_page_{page}"));
    }
    key
}
