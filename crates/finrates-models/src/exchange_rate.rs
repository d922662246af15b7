use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Fractional digits kept on stored rates.
pub const RATE_SCALE: u32 = 10;

/// Round a rate to the stored precision.
pub fn round_rate(rate: Decimal) -> Decimal {
    rate.round_dp_with_strategy(RATE_SCALE, RoundingStrategy::MidpointAwayFromZero)
        .normalize()
}

/// `1 / rate`, or `None` for a zero rate.
pub fn invert_rate(rate: Decimal) -> Option<Decimal> {
    if rate.is_zero() {
        return None;
    }
    Decimal::ONE.checked_div(rate).map(round_rate)
}

/// How a persisted rate row came to exist.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RateSource {
    /// Fetched from the external provider.
    Provider,
    /// Product of two pivot hops.
    Derived,
    /// Reciprocal of another stored row.
    Inverse,
    /// Set by an operator.
    Manual,
}

impl RateSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateSource::Provider => "provider",
            RateSource::Derived => "derived",
            RateSource::Inverse => "inverse",
            RateSource::Manual => "manual",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "provider" => Some(RateSource::Provider),
            "derived" => Some(RateSource::Derived),
            "inverse" => Some(RateSource::Inverse),
            "manual" => Some(RateSource::Manual),
            _ => None,
        }
    }
}

/// A persisted `(base, target, date) -> rate` fact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExchangeRate {
    pub base_currency: String,
    pub target_currency: String,
    pub date: NaiveDate,
    /// `1 base = rate target`.
    pub rate: Decimal,
    pub source: RateSource,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExchangeRate {
    pub fn new(base: &str, target: &str, date: NaiveDate, rate: Decimal, source: RateSource) -> Self {
        let now = Utc::now();
        Self {
            base_currency: base.to_string(),
            target_currency: target.to_string(),
            date,
            rate,
            source,
            created_at: now,
            updated_at: now,
        }
    }

    /// The reciprocal row, tagged as [`RateSource::Inverse`].
    pub fn inverse(&self) -> Option<Self> {
        Some(Self {
            base_currency: self.target_currency.clone(),
            target_currency: self.base_currency.clone(),
            date: self.date,
            rate: invert_rate(self.rate)?,
            source: RateSource::Inverse,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Where a resolved rate was found.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RateOrigin {
    /// Same currency on both sides.
    Identity,
    Cache,
    Store,
    Provider,
}

/// Result of a rate lookup.
///
/// Provider outages never surface as errors from a lookup; they produce a
/// `Fallback` carrying the 1:1 rate and the reason, so callers can tell a
/// degraded answer from a real one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RateOutcome {
    Resolved { rate: Decimal, origin: RateOrigin },
    Fallback { rate: Decimal, reason: String },
}

impl RateOutcome {
    pub fn resolved(rate: Decimal, origin: RateOrigin) -> Self {
        RateOutcome::Resolved { rate, origin }
    }

    /// The 1:1 fallback.
    pub fn fallback(reason: impl Into<String>) -> Self {
        RateOutcome::Fallback {
            rate: Decimal::ONE,
            reason: reason.into(),
        }
    }

    pub fn rate(&self) -> Decimal {
        match self {
            RateOutcome::Resolved { rate, .. } | RateOutcome::Fallback { rate, .. } => *rate,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, RateOutcome::Fallback { .. })
    }

    pub fn origin(&self) -> Option<RateOrigin> {
        match self {
            RateOutcome::Resolved { origin, .. } => Some(*origin),
            RateOutcome::Fallback { .. } => None,
        }
    }
}

/// Outcome of refreshing one ordered currency pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PairReport {
    pub from: String,
    pub to: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PairReport {
    pub fn ok(from: &str, to: &str, rate: Decimal) -> Self {
        Self {
            from: from.to_string(),
            to: to.to_string(),
            success: true,
            rate: Some(rate),
            error: None,
        }
    }

    pub fn failed(from: &str, to: &str, error: impl Into<String>) -> Self {
        Self {
            from: from.to_string(),
            to: to.to_string(),
            success: false,
            rate: None,
            error: Some(error.into()),
        }
    }
}

/// Per-pair report of a bulk rate refresh.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RefreshReport {
    pub date: NaiveDate,
    pub pairs: Vec<PairReport>,
}

impl RefreshReport {
    pub fn succeeded(&self) -> usize {
        self.pairs.iter().filter(|p| p.success).count()
    }

    pub fn failed(&self) -> usize {
        self.pairs.len() - self.succeeded()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn invert_rounds_to_scale() {
        assert_eq!(invert_rate(dec!(41.25)), Some(dec!(0.0242424242)));
        assert_eq!(invert_rate(dec!(0.5)), Some(dec!(2)));
        assert_eq!(invert_rate(Decimal::ZERO), None);
    }

    #[test]
    fn inverse_row_swaps_pair() {
        let date = NaiveDate::from_ymd_opt(2025, 10, 6).unwrap();
        let row = ExchangeRate::new("USD", "UAH", date, dec!(40), RateSource::Provider);
        let inverse = row.inverse().unwrap();
        assert_eq!(inverse.base_currency, "UAH");
        assert_eq!(inverse.target_currency, "USD");
        assert_eq!(inverse.rate, dec!(0.025));
        assert_eq!(inverse.source, RateSource::Inverse);
        assert_eq!(inverse.date, date);
    }

    #[test]
    fn rate_source_parse_matches_as_str() {
        for source in [
            RateSource::Provider,
            RateSource::Derived,
            RateSource::Inverse,
            RateSource::Manual,
        ] {
            assert_eq!(RateSource::parse(source.as_str()), Some(source));
        }
        assert_eq!(RateSource::parse("guess"), None);
    }

    #[test]
    fn fallback_outcome_is_one_to_one() {
        let outcome = RateOutcome::fallback("provider down");
        assert!(outcome.is_fallback());
        assert_eq!(outcome.rate(), Decimal::ONE);
        assert_eq!(outcome.origin(), None);

        let outcome = RateOutcome::resolved(dec!(41.25), RateOrigin::Store);
        assert!(!outcome.is_fallback());
        assert_eq!(outcome.origin(), Some(RateOrigin::Store));
    }

    #[test]
    fn outcome_serializes_with_status_tag() {
        let json = serde_json::to_value(RateOutcome::fallback("timeout")).unwrap();
        assert_eq!(json["status"], "fallback");
        assert_eq!(json["reason"], "timeout");

        let json = serde_json::to_value(RateOutcome::resolved(dec!(2), RateOrigin::Cache)).unwrap();
        assert_eq!(json["status"], "resolved");
        assert_eq!(json["origin"], "cache");
    }

    #[test]
    fn refresh_report_counts() {
        let report = RefreshReport {
            date: NaiveDate::from_ymd_opt(2025, 10, 6).unwrap(),
            pairs: vec![
                PairReport::ok("USD", "UAH", dec!(41.25)),
                PairReport::failed("EUR", "UAH", "timeout"),
                PairReport::ok("UAH", "USD", dec!(0.0242424242)),
            ],
        };
        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.failed(), 1);
    }
}
