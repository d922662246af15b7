use std::sync::Arc;
use std::time::Duration;

use finrates_cache::SqliteStore;
use finrates_models::config::RefreshConfig;
use tokio_util::sync::CancellationToken;

use crate::error::RatesError;
use crate::service::CurrencyService;

/// Background rate refresher. Runs `update_all_rates` for today on an
/// interval and, when the derived cache lives in SQLite, purges expired
/// cache rows.
pub struct RefreshDaemon {
    service: Arc<CurrencyService>,
    cache_store: Option<Arc<SqliteStore>>,
    config: RefreshConfig,
    cancel: CancellationToken,
}

impl RefreshDaemon {
    pub fn new(service: Arc<CurrencyService>, config: RefreshConfig) -> Self {
        Self {
            service,
            cache_store: None,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Also clean expired entries out of a SQLite cache store.
    pub fn with_cleanup(mut self, store: Arc<SqliteStore>) -> Self {
        self.cache_store = Some(store);
        self
    }

    /// Returns a CancellationToken that can be used to trigger shutdown.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run until cancelled.
    pub async fn run(&self) -> Result<(), RatesError> {
        tracing::info!("Rate refresh daemon starting");

        let mut join_set = tokio::task::JoinSet::new();

        if self.config.enabled {
            let service = self.service.clone();
            let cancel = self.cancel.clone();
            let interval = Duration::from_secs(self.config.interval_seconds);
            join_set.spawn(async move {
                refresh_loop(service, interval, cancel).await;
            });
        } else {
            tracing::info!("Periodic rate refresh disabled");
        }

        if let Some(store) = &self.cache_store {
            let store = store.clone();
            let cancel = self.cancel.clone();
            let interval = Duration::from_secs(self.config.cleanup_interval_seconds);
            join_set.spawn(async move {
                cleanup_loop(store, interval, cancel).await;
            });
        }

        if join_set.is_empty() {
            tracing::warn!("Nothing to run, daemon exiting");
            return Ok(());
        }

        tracing::info!(tasks = join_set.len(), "Daemon tasks started");

        while let Some(result) = join_set.join_next().await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Daemon task failed");
            }
        }

        tracing::info!("Rate refresh daemon stopped");
        Ok(())
    }
}

/// Refresh immediately, then every `interval`.
pub async fn refresh_loop(
    service: Arc<CurrencyService>,
    interval: Duration,
    cancel: CancellationToken,
) {
    service.update_all_rates(None).await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Refresh loop shutting down");
                break;
            }
            _ = tokio::time::sleep(interval) => {
                service.update_all_rates(None).await;
            }
        }
    }
}

pub async fn cleanup_loop(store: Arc<SqliteStore>, interval: Duration, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Cleanup loop shutting down");
                break;
            }
            _ = tokio::time::sleep(interval) => {
                match store.expire_stale() {
                    Ok(deleted) if deleted > 0 => {
                        tracing::info!(deleted, "Cleaned up expired cache entries");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::error!(error = %e, "Cache cleanup failed");
                    }
                }
            }
        }
    }
}
