//! In-process rate provider for tests.
//!
//! `MockProvider` answers from a table of canned quotes, counts the fetches
//! it serves, and can be switched into a failing mode to simulate an outage
//! or into returning bodies that don't parse.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::NaiveDate;
use finrates_models::exchange_rate::invert_rate;
use rust_decimal::Decimal;

use crate::error::RatesError;
use crate::providers::RateProvider;

pub struct MockProvider {
    rates: Mutex<HashMap<(String, String), Decimal>>,
    pivot: Option<String>,
    failing: AtomicBool,
    malformed: AtomicBool,
    fetches: AtomicUsize,
}

impl MockProvider {
    /// Quotes any pair it knows, like a direct-pair API.
    pub fn direct() -> Self {
        Self {
            rates: Mutex::new(HashMap::new()),
            pivot: None,
            failing: AtomicBool::new(false),
            malformed: AtomicBool::new(false),
            fetches: AtomicUsize::new(0),
        }
    }

    /// Only quotes pairs involving `pivot`, like a central bank table.
    pub fn with_pivot(pivot: &str) -> Self {
        Self {
            pivot: Some(pivot.to_string()),
            ..Self::direct()
        }
    }

    /// Register `1 from = rate to`. The reverse pair is answered by inversion.
    pub fn with_rate(self, from: &str, to: &str, rate: Decimal) -> Self {
        self.set_rate(from, to, rate);
        self
    }

    pub fn set_rate(&self, from: &str, to: &str, rate: Decimal) {
        self.rates
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert((from.to_string(), to.to_string()), rate);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Answer every fetch with a JSON decoding error.
    pub fn set_malformed(&self, malformed: bool) {
        self.malformed.store(malformed, Ordering::SeqCst);
    }

    /// Number of `fetch_rate` calls served, failed ones included.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RateProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn pivot(&self) -> Option<&str> {
        self.pivot.as_deref()
    }

    async fn fetch_rate(&self, from: &str, to: &str, _date: NaiveDate) -> Result<Decimal, RatesError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);

        if self.failing.load(Ordering::SeqCst) {
            return Err(RatesError::Provider("mock provider unavailable".to_string()));
        }
        if self.malformed.load(Ordering::SeqCst) {
            let body: serde_json::Value = serde_json::from_str("<html>Service Unavailable</html>")?;
            return Err(RatesError::Provider(format!("unexpected body {body}")));
        }
        if let Some(pivot) = &self.pivot {
            if from != pivot && to != pivot {
                return Err(RatesError::Provider(format!(
                    "{from}->{to} does not involve pivot {pivot}"
                )));
            }
        }

        let rates = self.rates.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(rate) = rates.get(&(from.to_string(), to.to_string())) {
            return Ok(*rate);
        }
        rates
            .get(&(to.to_string(), from.to_string()))
            .and_then(|rate| invert_rate(*rate))
            .ok_or_else(|| RatesError::Provider(format!("no mock rate for {from}->{to}")))
    }
}
