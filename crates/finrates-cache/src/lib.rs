pub mod error;
pub mod invalidator;
pub mod layer;
pub mod memory;
pub mod sqlite;
pub mod store;
pub mod subkey;

pub use error::CacheError;
pub use invalidator::{select_invalidator, CacheInvalidator, EnumeratedInvalidator, PatternInvalidator};
pub use layer::DerivedCache;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use store::CacheStore;
pub use subkey::{subkey, Filters};
