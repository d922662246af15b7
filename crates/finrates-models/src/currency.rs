use serde::{Deserialize, Serialize};

/// A currency the conversion service is allowed to handle.
///
/// Loaded from configuration; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SupportedCurrency {
    /// ISO 4217 code, e.g. `UAH`.
    pub code: String,
    pub name: String,
    pub symbol: String,
    /// Number of fractional digits used when formatting amounts.
    #[serde(default = "default_decimals")]
    pub decimals: u32,
}

impl SupportedCurrency {
    pub fn new(code: &str, name: &str, symbol: &str, decimals: u32) -> Self {
        Self {
            code: normalize_code(code),
            name: name.to_string(),
            symbol: symbol.to_string(),
            decimals,
        }
    }
}

fn default_decimals() -> u32 {
    2
}

/// Upper-cases and trims a currency code.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

/// A well-formed code is exactly three ASCII letters.
pub fn is_valid_code(code: &str) -> bool {
    code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_uppercases_and_trims() {
        assert_eq!(normalize_code(" usd "), "USD");
        assert_eq!(normalize_code("Eur"), "EUR");
    }

    #[test]
    fn valid_codes() {
        assert!(is_valid_code("UAH"));
        assert!(!is_valid_code("US"));
        assert!(!is_valid_code("US1"));
        assert!(!is_valid_code("USDT"));
    }

    #[test]
    fn decimals_default_to_two() {
        let currency: SupportedCurrency =
            serde_json::from_str(r#"{"code": "USD", "name": "US dollar", "symbol": "$"}"#)
                .unwrap();
        assert_eq!(currency.decimals, 2);
    }
}
