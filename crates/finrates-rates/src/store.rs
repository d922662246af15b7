use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use finrates_models::cache_schema::RATES_TABLE_DDL;
use finrates_models::exchange_rate::{ExchangeRate, RateSource};
use rusqlite::types::Type;
use rusqlite::{Connection, Row};
use rust_decimal::Decimal;

use crate::error::RatesError;

const SELECT_COLUMNS: &str = "SELECT base_currency, target_currency, rate_date, rate, source, created_at, updated_at \
                              FROM exchange_rates";

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_error(
    idx: usize,
    e: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn parse_timestamp(idx: usize, value: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&value)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn rate_from_row(row: &Row<'_>) -> rusqlite::Result<ExchangeRate> {
    let rate: String = row.get(3)?;
    let source: String = row.get(4)?;
    Ok(ExchangeRate {
        base_currency: row.get(0)?,
        target_currency: row.get(1)?,
        date: row.get::<_, NaiveDate>(2)?,
        rate: Decimal::from_str(&rate).map_err(|e| conversion_error(3, e))?,
        source: RateSource::parse(&source).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                4,
                Type::Text,
                format!("unknown rate source '{source}'").into(),
            )
        })?,
        created_at: parse_timestamp(5, row.get(5)?)?,
        updated_at: parse_timestamp(6, row.get(6)?)?,
    })
}

/// Persisted exchange rates, one row per `(base, target, date)`.
///
/// Rates are stored as decimal text so no precision is lost on the way
/// through SQLite. WAL mode lets the CLI read while the daemon writes.
pub struct SqliteRateStore {
    conn: Mutex<Connection>,
}

impl SqliteRateStore {
    /// Open (or create) the rates database. Enables WAL mode.
    pub fn open(path: &str) -> Result<Self, RatesError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(RATES_TABLE_DDL)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database for testing.
    pub fn open_in_memory() -> Result<Self, RatesError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(RATES_TABLE_DDL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, RatesError> {
        self.conn
            .lock()
            .map_err(|e| RatesError::Unavailable(format!("SQLite mutex poisoned: {e}")))
    }

    /// The row for exactly `base -> target` on `date`.
    pub fn find(
        &self,
        base: &str,
        target: &str,
        date: NaiveDate,
    ) -> Result<Option<ExchangeRate>, RatesError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(&format!(
            "{SELECT_COLUMNS} WHERE base_currency = ?1 AND target_currency = ?2 AND rate_date = ?3"
        ))?;

        match stmt.query_row(rusqlite::params![base, target, date], rate_from_row) {
            Ok(rate) => Ok(Some(rate)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(RatesError::Sqlite(e)),
        }
    }

    /// Every row stored for `date`, ordered by pair.
    pub fn rates_on(&self, date: NaiveDate) -> Result<Vec<ExchangeRate>, RatesError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(&format!(
            "{SELECT_COLUMNS} WHERE rate_date = ?1 ORDER BY base_currency, target_currency"
        ))?;
        let rates = stmt
            .query_map(rusqlite::params![date], rate_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rates)
    }

    /// Insert or update a row. `created_at` of an existing row is kept.
    pub fn upsert(&self, rate: &ExchangeRate) -> Result<(), RatesError> {
        self.conn()?.execute(
            "INSERT INTO exchange_rates \
             (base_currency, target_currency, rate_date, rate, source, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
             ON CONFLICT(base_currency, target_currency, rate_date) DO UPDATE SET \
                 rate = excluded.rate, \
                 source = excluded.source, \
                 updated_at = excluded.updated_at",
            rusqlite::params![
                rate.base_currency,
                rate.target_currency,
                rate.date,
                rate.rate.to_string(),
                rate.source.as_str(),
                timestamp(rate.created_at),
                timestamp(rate.updated_at),
            ],
        )?;
        Ok(())
    }

    /// Store the reciprocal of `rate`.
    ///
    /// Only fills a gap or replaces an earlier reciprocal: a row that came
    /// from the provider or an operator is never overwritten. Returns whether
    /// a row was written.
    pub fn upsert_inverse(&self, rate: &ExchangeRate) -> Result<bool, RatesError> {
        let Some(inverse) = rate.inverse() else {
            return Ok(false);
        };
        let changed = self.conn()?.execute(
            "INSERT INTO exchange_rates \
             (base_currency, target_currency, rate_date, rate, source, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
             ON CONFLICT(base_currency, target_currency, rate_date) DO UPDATE SET \
                 rate = excluded.rate, \
                 updated_at = excluded.updated_at \
             WHERE exchange_rates.source = ?5",
            rusqlite::params![
                inverse.base_currency,
                inverse.target_currency,
                inverse.date,
                inverse.rate.to_string(),
                RateSource::Inverse.as_str(),
                timestamp(inverse.created_at),
                timestamp(inverse.updated_at),
            ],
        )?;
        Ok(changed > 0)
    }

    /// Count all rows.
    pub fn count(&self) -> Result<usize, RatesError> {
        let count: usize =
            self.conn()?
                .query_row("SELECT COUNT(*) FROM exchange_rates", [], |row| row.get(0))?;
        Ok(count)
    }
}
