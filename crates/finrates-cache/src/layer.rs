use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use finrates_models::cache_schema::{key_patterns, CacheType};
use finrates_models::config::CacheConfig;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::CacheError;
use crate::invalidator::{select_invalidator, CacheInvalidator};
use crate::store::CacheStore;

/// Get-or-compute cache for per-user derived data.
///
/// Keys are `{prefix}:{type}:{subkey}`. TTLs come from the per-type base
/// times the strategy multiplier fixed at construction. Store failures are
/// returned to the caller, never hidden.
///
/// `remember` is not atomic: concurrent misses on the same key may each run
/// the computation, and the last write wins.
pub struct DerivedCache {
    store: Arc<dyn CacheStore>,
    invalidator: Box<dyn CacheInvalidator>,
    config: CacheConfig,
    multiplier: f64,
}

impl DerivedCache {
    /// Build from config, choosing the invalidator from the store's capabilities.
    pub fn new(store: Arc<dyn CacheStore>, config: &CacheConfig) -> Result<Self, CacheError> {
        let invalidator = select_invalidator(store.as_ref(), config.invalidation_pages);
        Self::with_invalidator(store, invalidator, config)
    }

    pub fn with_invalidator(
        store: Arc<dyn CacheStore>,
        invalidator: Box<dyn CacheInvalidator>,
        config: &CacheConfig,
    ) -> Result<Self, CacheError> {
        config.validate()?;
        let multiplier = config.strategy_multiplier()?;
        debug!(
            store = store.name(),
            invalidator = invalidator.name(),
            strategy = %config.strategy,
            multiplier,
            "Derived cache ready"
        );
        Ok(Self {
            store,
            invalidator,
            config: config.clone(),
            multiplier,
        })
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    pub fn invalidator_name(&self) -> &str {
        self.invalidator.name()
    }

    pub fn key(&self, cache_type: CacheType, subkey: &str) -> String {
        key_patterns::derived(&self.config.prefix, cache_type, subkey)
    }

    /// Base TTL of the type scaled by the strategy multiplier.
    pub fn ttl_for(&self, cache_type: CacheType) -> Result<Duration, CacheError> {
        Ok(self.config.ttl_for(cache_type, self.multiplier)?)
    }

    /// Cached value for the key, or the result of `compute` stored under it.
    pub async fn remember<T, F, Fut>(
        &self,
        cache_type: CacheType,
        subkey: &str,
        ttl: Option<Duration>,
        compute: F,
    ) -> Result<T, CacheError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.try_remember(cache_type, subkey, ttl, move || async move {
            Ok::<T, CacheError>(compute().await)
        })
        .await
    }

    /// Like [`DerivedCache::remember`] for fallible computations. A failed
    /// computation is returned as-is and nothing is stored.
    pub async fn try_remember<T, E, F, Fut>(
        &self,
        cache_type: CacheType,
        subkey: &str,
        ttl: Option<Duration>,
        compute: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<CacheError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let key = self.key(cache_type, subkey);

        if let Some(json) = self.store.get(&key).await.map_err(E::from)? {
            match serde_json::from_str(&json) {
                Ok(value) => {
                    debug!(key = %key, "Cache hit");
                    return Ok(value);
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Undecodable cache entry, recomputing");
                }
            }
        }

        debug!(key = %key, "Cache miss");
        let value = compute().await?;
        let json = serde_json::to_string(&value).map_err(|e| E::from(CacheError::from(e)))?;
        let ttl = match ttl {
            Some(ttl) => ttl,
            None => self.ttl_for(cache_type)?,
        };
        self.store.put(&key, json, ttl).await.map_err(E::from)?;
        Ok(value)
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        cache_type: CacheType,
        subkey: &str,
    ) -> Result<Option<T>, CacheError> {
        match self.store.get(&self.key(cache_type, subkey)).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Cached value, or `default` when absent.
    pub async fn get_or<T: DeserializeOwned>(
        &self,
        cache_type: CacheType,
        subkey: &str,
        default: T,
    ) -> Result<T, CacheError> {
        Ok(self.get(cache_type, subkey).await?.unwrap_or(default))
    }

    pub async fn put<T: Serialize>(
        &self,
        cache_type: CacheType,
        subkey: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let json = serde_json::to_string(value)?;
        let ttl = match ttl {
            Some(ttl) => ttl,
            None => self.ttl_for(cache_type)?,
        };
        self.store.put(&self.key(cache_type, subkey), json, ttl).await
    }

    pub async fn has(&self, cache_type: CacheType, subkey: &str) -> Result<bool, CacheError> {
        self.store.has(&self.key(cache_type, subkey)).await
    }

    pub async fn forget(&self, cache_type: CacheType, subkey: &str) -> Result<bool, CacheError> {
        self.store.forget(&self.key(cache_type, subkey)).await
    }

    /// Set a marker unless one is already live. Returns `true` the first time,
    /// e.g. to send a budget threshold notification only once per period.
    pub async fn mark_once(
        &self,
        cache_type: CacheType,
        subkey: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, CacheError> {
        let ttl = match ttl {
            Some(ttl) => ttl,
            None => self.ttl_for(cache_type)?,
        };
        self.store
            .put_if_absent(&self.key(cache_type, subkey), "true".to_string(), ttl)
            .await
    }

    /// Remove one user's entries of one type. No cascade.
    pub async fn forget_user_type(
        &self,
        cache_type: CacheType,
        user_id: i64,
    ) -> Result<usize, CacheError> {
        self.invalidator
            .forget_user_type(self.store.as_ref(), &self.config.prefix, cache_type, user_id)
            .await
    }

    /// Remove the type and every type derived from it.
    async fn forget_cascading(&self, cache_type: CacheType, user_id: i64) -> Result<usize, CacheError> {
        let mut removed = self.forget_user_type(cache_type, user_id).await?;
        for dependent in cache_type.dependents() {
            removed += self.forget_user_type(*dependent, user_id).await?;
        }
        debug!(cache_type = %cache_type, user_id, removed, "User cache invalidated");
        Ok(removed)
    }

    pub async fn forget_user_transactions(&self, user_id: i64) -> Result<usize, CacheError> {
        self.forget_cascading(CacheType::Transactions, user_id).await
    }

    pub async fn forget_user_categories(&self, user_id: i64) -> Result<usize, CacheError> {
        self.forget_cascading(CacheType::Categories, user_id).await
    }

    pub async fn forget_user_budgets(&self, user_id: i64) -> Result<usize, CacheError> {
        self.forget_cascading(CacheType::Budgets, user_id).await
    }

    /// Remove every type for a user.
    pub async fn forget_user(&self, user_id: i64) -> Result<usize, CacheError> {
        let mut removed = 0;
        for cache_type in CacheType::ALL {
            removed += self.forget_user_type(cache_type, user_id).await?;
        }
        Ok(removed)
    }

    /// Clear the whole store. Administrative use only.
    pub async fn flush(&self) -> Result<(), CacheError> {
        warn!(store = self.store.name(), "Flushing cache store");
        self.store.flush().await
    }
}
