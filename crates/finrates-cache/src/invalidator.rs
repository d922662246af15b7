use async_trait::async_trait;
use finrates_models::cache_schema::{key_patterns, CacheType};
use tracing::debug;

use crate::error::CacheError;
use crate::store::CacheStore;
use crate::subkey::{subkey, Filters};

/// Removes one user's cached entries of one type.
#[async_trait]
pub trait CacheInvalidator: Send + Sync {
    fn name(&self) -> &str;

    /// Returns the number of entries removed.
    async fn forget_user_type(
        &self,
        store: &dyn CacheStore,
        prefix: &str,
        cache_type: CacheType,
        user_id: i64,
    ) -> Result<usize, CacheError>;
}

/// Deletes by key prefix. Complete, but needs a store that can scan keys.
pub struct PatternInvalidator;

#[async_trait]
impl CacheInvalidator for PatternInvalidator {
    fn name(&self) -> &str {
        "pattern"
    }

    async fn forget_user_type(
        &self,
        store: &dyn CacheStore,
        prefix: &str,
        cache_type: CacheType,
        user_id: i64,
    ) -> Result<usize, CacheError> {
        let key_prefix = key_patterns::user_type_prefix(prefix, cache_type, user_id);
        let removed = store.forget_prefix(&key_prefix).await?;
        debug!(prefix = %key_prefix, removed, "Invalidated by prefix");
        Ok(removed)
    }
}

/// Rebuilds and deletes a fixed list of keys.
///
/// Covers every combination of the type's known filter values (each
/// dimension may also be absent) and, for paginated types, the first
/// `pages` pages. Entries written with filters outside that set are not
/// found and live until their TTL runs out.
pub struct EnumeratedInvalidator {
    pages: u32,
}

impl EnumeratedInvalidator {
    pub fn new(pages: u32) -> Self {
        Self { pages }
    }

    /// Every filter combination known for `cache_type`.
    pub fn filter_variants(cache_type: CacheType) -> Vec<Filters> {
        let mut variants = vec![Filters::new()];
        for dimension in cache_type.filter_dimensions() {
            let mut next = Vec::with_capacity(variants.len() * (dimension.values.len() + 1));
            for filters in &variants {
                next.push(filters.clone());
                for value in dimension.values {
                    next.push(filters.clone().with(dimension.key, value));
                }
            }
            variants = next;
        }
        variants
    }

    /// Subkeys this invalidator deletes for one user.
    pub fn subkeys(&self, cache_type: CacheType, user_id: i64) -> Vec<String> {
        let mut keys = Vec::new();
        for filters in Self::filter_variants(cache_type) {
            keys.push(subkey(user_id, &filters, None));
            if cache_type.paginated() {
                for page in 1..=self.pages {
                    keys.push(subkey(user_id, &filters, Some(page)));
                }
            }
        }
        keys
    }
}

#[async_trait]
impl CacheInvalidator for EnumeratedInvalidator {
    fn name(&self) -> &str {
        "enumerated"
    }

    async fn forget_user_type(
        &self,
        store: &dyn CacheStore,
        prefix: &str,
        cache_type: CacheType,
        user_id: i64,
    ) -> Result<usize, CacheError> {
        let subkeys = self.subkeys(cache_type, user_id);
        let mut removed = 0;
        for sub in &subkeys {
            if store
                .forget(&key_patterns::derived(prefix, cache_type, sub))
                .await?
            {
                removed += 1;
            }
        }
        debug!(
            cache_type = %cache_type,
            user_id,
            checked = subkeys.len(),
            removed,
            "Invalidated enumerated variants"
        );
        Ok(removed)
    }
}

/// Pattern deletion when the store supports it, enumeration otherwise.
pub fn select_invalidator(store: &dyn CacheStore, pages: u32) -> Box<dyn CacheInvalidator> {
    if store.supports_prefix_delete() {
        Box::new(PatternInvalidator)
    } else {
        Box::new(EnumeratedInvalidator::new(pages))
    }
}
