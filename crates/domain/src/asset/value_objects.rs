//! Value objects for the asset domain.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// ISO 4217 currency code, always three uppercase ASCII letters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Currency(String);

impl Currency {
    /// Parses a code, accepting surrounding whitespace but not lowercase.
    pub fn parse(code: &str) -> Option<Self> {
        let code = code.trim();
        if code.len() == 3 && code.bytes().all(|b| b.is_ascii_uppercase()) {
            Some(Self(code.to_string()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// `XXX` is the ISO code for "no currency".
impl Default for Currency {
    fn default() -> Self {
        Self("XXX".to_string())
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Amount in minor units (cents) of a currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    amount_minor: i64,
    currency: Currency,
}

impl Money {
    pub fn new(amount_minor: i64, currency: Currency) -> Self {
        Self {
            amount_minor,
            currency,
        }
    }

    pub fn amount_minor(&self) -> i64 {
        self.amount_minor
    }

    pub fn currency(&self) -> &Currency {
        &self.currency
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.amount_minor < 0 { "-" } else { "" };
        let abs = self.amount_minor.unsigned_abs();
        write!(f, "{sign}{}.{:02} {}", abs / 100, abs % 100, self.currency)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    RealEstate,
    Security,
    Cash,
    Vehicle,
    #[default]
    Other,
}

impl std::fmt::Display for AssetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AssetKind::RealEstate => "real_estate",
            AssetKind::Security => "security",
            AssetKind::Cash => "cash",
            AssetKind::Vehicle => "vehicle",
            AssetKind::Other => "other",
        };
        f.write_str(s)
    }
}

/// One appraisal of an asset, part of the asset's valuation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Valuation {
    pub amount: Money,
    /// The date the appraisal refers to.
    pub as_of: NaiveDate,
    /// When the appraisal was entered.
    pub recorded_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn currency_accepts_iso_codes_only() {
        assert_eq!(Currency::parse(" EUR ").unwrap().as_str(), "EUR");
        assert!(Currency::parse("eur").is_none());
        assert!(Currency::parse("EURO").is_none());
        assert!(Currency::parse("").is_none());
    }

    #[test]
    fn money_display() {
        let eur = Currency::parse("EUR").unwrap();
        assert_eq!(Money::new(123_456, eur.clone()).to_string(), "1234.56 EUR");
        assert_eq!(Money::new(-5, eur).to_string(), "-0.05 EUR");
    }

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&AssetKind::RealEstate).unwrap();
        assert_eq!(json, "\"real_estate\"");
        assert_eq!(AssetKind::RealEstate.to_string(), "real_estate");
    }
}
