use std::time::Duration;

use async_trait::async_trait;

use crate::error::CacheError;

/// A key-value store with per-entry expiry.
///
/// Values are opaque JSON strings. Prefix deletion is optional; stores that
/// can do it report so through [`CacheStore::supports_prefix_delete`].
#[async_trait]
pub trait CacheStore: Send + Sync {
    fn name(&self) -> &str;

    /// Value for `key`, or `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Store `value` under `key`, replacing any existing entry.
    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;

    /// Store `value` only if no live entry exists. Returns whether it was stored.
    async fn put_if_absent(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> Result<bool, CacheError>;

    async fn has(&self, key: &str) -> Result<bool, CacheError>;

    /// Remove `key`. Returns whether an entry was removed.
    async fn forget(&self, key: &str) -> Result<bool, CacheError>;

    /// Remove every entry.
    async fn flush(&self) -> Result<(), CacheError>;

    fn supports_prefix_delete(&self) -> bool {
        false
    }

    /// Remove every entry whose key starts with `prefix`. Returns the number removed.
    async fn forget_prefix(&self, prefix: &str) -> Result<usize, CacheError> {
        Err(CacheError::Unsupported(format!(
            "{} store cannot delete by prefix ({prefix})",
            self.name()
        )))
    }
}
