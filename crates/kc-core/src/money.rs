//! # Money: Fixed-Point Currency Amounts
//!
//! `Money` wraps `rust_decimal::Decimal`. Amounts are never represented as
//! binary floating point, and they serialize as decimal strings
//! (`"470.00"`), matching the Postgres `NUMERIC` columns they are stored in.
//!
//! Amounts are non-negative: a kit price or subscription price below zero is
//! a configuration error, not a refund.

use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Decimal places used for every charged amount.
pub const CURRENCY_SCALE: u32 = 2;

/// A non-negative fixed-point currency amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Money(Decimal);

impl Money {
    /// Zero, at currency scale (`0.00`).
    pub fn zero() -> Self {
        Self(Decimal::new(0, CURRENCY_SCALE))
    }

    /// Wrap a decimal, rejecting negatives.
    pub fn new(amount: Decimal) -> Result<Self, ValidationError> {
        if amount.is_sign_negative() && !amount.is_zero() {
            return Err(ValidationError::NegativeAmount(amount.to_string()));
        }
        Ok(Self(amount))
    }

    /// Build from integer minor units (`47000` → `470.00`).
    pub fn from_minor_units(minor: u32) -> Self {
        Self(Decimal::new(i64::from(minor), CURRENCY_SCALE))
    }

    /// Parse a decimal string such as `"350.00"`.
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        let amount = Decimal::from_str(s.trim()).map_err(|e| ValidationError::InvalidAmount {
            value: s.to_string(),
            reason: e.to_string(),
        })?;
        Self::new(amount)
    }

    /// The underlying decimal.
    pub fn amount(&self) -> Decimal {
        self.0
    }

    /// Sum two amounts. `None` on overflow.
    pub fn checked_add(&self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Self)
    }

    /// Round half-up (away from zero) to two decimal places and pin the
    /// scale, so `470` renders as `470.00`.
    pub fn round_currency(&self) -> Money {
        let mut rounded = self
            .0
            .round_dp_with_strategy(CURRENCY_SCALE, RoundingStrategy::MidpointAwayFromZero);
        rounded.rescale(CURRENCY_SCALE);
        Self(rounded)
    }

    /// Whether the amount is zero.
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl Default for Money {
    fn default() -> Self {
        Self::zero()
    }
}

impl TryFrom<Decimal> for Money {
    type Error = ValidationError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Money> for Decimal {
    fn from(value: Money) -> Self {
        value.0
    }
}

impl FromStr for Money {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display() {
        assert_eq!(Money::parse("350.00").unwrap().to_string(), "350.00");
        assert_eq!(Money::parse(" 12.5 ").unwrap().to_string(), "12.5");
    }

    #[test]
    fn negative_rejected() {
        assert!(matches!(
            Money::parse("-1.00"),
            Err(ValidationError::NegativeAmount(_))
        ));
    }

    #[test]
    fn garbage_rejected() {
        assert!(matches!(
            Money::parse("twelve"),
            Err(ValidationError::InvalidAmount { .. })
        ));
    }

    #[test]
    fn round_half_up() {
        assert_eq!(Money::parse("1.005").unwrap().round_currency().to_string(), "1.01");
        assert_eq!(Money::parse("1.004").unwrap().round_currency().to_string(), "1.00");
        assert_eq!(Money::parse("2.675").unwrap().round_currency().to_string(), "2.68");
    }

    #[test]
    fn round_pins_scale() {
        assert_eq!(Money::parse("470").unwrap().round_currency().to_string(), "470.00");
    }

    #[test]
    fn decimal_addition_is_exact() {
        let a = Money::parse("0.1").unwrap();
        let b = Money::parse("0.2").unwrap();
        assert_eq!(a.checked_add(b).unwrap(), Money::parse("0.3").unwrap());
    }

    #[test]
    fn minor_units() {
        assert_eq!(Money::from_minor_units(47_000).to_string(), "470.00");
        assert_eq!(Money::zero().to_string(), "0.00");
    }

    #[test]
    fn serializes_as_string() {
        let json = serde_json::to_string(&Money::parse("470.00").unwrap()).unwrap();
        assert_eq!(json, "\"470.00\"");
        let back: Money = serde_json::from_str(&json).unwrap();
        assert_eq!(back.to_string(), "470.00");
    }

    #[test]
    fn deserialize_rejects_negative() {
        assert!(serde_json::from_str::<Money>("\"-5.00\"").is_err());
    }
}
