pub mod daemon;
pub mod error;
pub mod providers;
pub mod service;
pub mod store;

pub mod test_support;

pub use daemon::RefreshDaemon;
pub use error::RatesError;
pub use providers::{create_provider, DirectPairProvider, PivotTableProvider, RateProvider};
pub use service::{Conversion, CurrencyService};
pub use store::SqliteRateStore;
