use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use finrates_models::cache_schema::{CacheRow, CACHE_TABLE_DDL};
use rusqlite::Connection;

use crate::error::CacheError;
use crate::store::CacheStore;

/// Fixed-width RFC 3339 so stored timestamps compare correctly as text.
pub(crate) fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn expiry_after(now: DateTime<Utc>, ttl: Duration) -> Result<DateTime<Utc>, CacheError> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .ok_or(CacheError::InvalidTtl(ttl))
}

/// Cache store in a SQLite file.
///
/// Opens the database in WAL mode so several processes can share it.
/// Access is synchronized via `Mutex` since `rusqlite::Connection` is not `Sync`.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the cache database at `path`.
    pub fn open(path: &str) -> Result<Self, CacheError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(CACHE_TABLE_DDL)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database. Useful for testing.
    pub fn open_in_memory() -> Result<Self, CacheError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(CACHE_TABLE_DDL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, CacheError> {
        self.conn
            .lock()
            .map_err(|e| CacheError::Unavailable(format!("SQLite mutex poisoned: {e}")))
    }

    /// Get a live row by key.
    pub fn get_row(&self, key: &str) -> Result<Option<CacheRow>, CacheError> {
        let now = timestamp(Utc::now());
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT key, value_json, created_at, expires_at \
             FROM cache_entries WHERE key = ?1 AND expires_at > ?2",
        )?;

        let result = stmt.query_row(rusqlite::params![key, now], |row| {
            Ok(CacheRow {
                key: row.get(0)?,
                value_json: row.get(1)?,
                created_at: row.get(2)?,
                expires_at: row.get(3)?,
            })
        });

        match result {
            Ok(row) => Ok(Some(row)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(CacheError::Sqlite(e)),
        }
    }

    /// Insert or replace a raw row.
    pub fn upsert_row(&self, row: &CacheRow) -> Result<(), CacheError> {
        self.conn()?.execute(
            "INSERT OR REPLACE INTO cache_entries (key, value_json, created_at, expires_at) \
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![row.key, row.value_json, row.created_at, row.expires_at],
        )?;
        Ok(())
    }

    /// Delete all expired entries. Returns the number of rows deleted.
    pub fn expire_stale(&self) -> Result<usize, CacheError> {
        let now = timestamp(Utc::now());
        let deleted = self.conn()?.execute(
            "DELETE FROM cache_entries WHERE expires_at <= ?1",
            rusqlite::params![now],
        )?;
        Ok(deleted)
    }

    /// Count all rows, expired or not.
    pub fn count(&self) -> Result<usize, CacheError> {
        let count: usize =
            self.conn()?
                .query_row("SELECT COUNT(*) FROM cache_entries", [], |row| row.get(0))?;
        Ok(count)
    }
}

#[async_trait]
impl CacheStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.get_row(key)?.map(|row| row.value_json))
    }

    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let now = Utc::now();
        self.upsert_row(&CacheRow {
            key: key.to_string(),
            value_json: value,
            created_at: timestamp(now),
            expires_at: timestamp(expiry_after(now, ttl)?),
        })
    }

    async fn put_if_absent(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> Result<bool, CacheError> {
        let now = Utc::now();
        let created_at = timestamp(now);
        let expires_at = timestamp(expiry_after(now, ttl)?);
        // An expired row counts as absent and is overwritten.
        let changed = self.conn()?.execute(
            "INSERT INTO cache_entries (key, value_json, created_at, expires_at) \
             VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(key) DO UPDATE SET \
                 value_json = excluded.value_json, \
                 created_at = excluded.created_at, \
                 expires_at = excluded.expires_at \
             WHERE cache_entries.expires_at <= excluded.created_at",
            rusqlite::params![key, value, created_at, expires_at],
        )?;
        Ok(changed > 0)
    }

    async fn has(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.get_row(key)?.is_some())
    }

    async fn forget(&self, key: &str) -> Result<bool, CacheError> {
        let deleted = self.conn()?.execute(
            "DELETE FROM cache_entries WHERE key = ?1",
            rusqlite::params![key],
        )?;
        Ok(deleted > 0)
    }

    async fn flush(&self) -> Result<(), CacheError> {
        self.conn()?.execute("DELETE FROM cache_entries", [])?;
        Ok(())
    }

    fn supports_prefix_delete(&self) -> bool {
        true
    }

    async fn forget_prefix(&self, prefix: &str) -> Result<usize, CacheError> {
        // substr instead of LIKE: keys contain `_`, which LIKE treats as a wildcard.
        let deleted = self.conn()?.execute(
            "DELETE FROM cache_entries WHERE substr(key, 1, ?2) = ?1",
            rusqlite::params![prefix, prefix.chars().count() as i64],
        )?;
        Ok(deleted)
    }
}
