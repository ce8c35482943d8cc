//! Amount type
//!
//! Domain primitives for monetary values. Every amount is a fixed-point
//! `Decimal`; floating binary never touches a balance.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum allowed amount (1 trillion in any currency)
const MAX_AMOUNT: Decimal = Decimal::from_parts(3_567_587_328, 232, 0, false, 0);

/// Largest stored balance: the range of a `NUMERIC(20, 2)` column
pub const MAX_BALANCE: Decimal = Decimal::from_parts(1_661_992_959, 1_808_227_885, 5, false, 2);

/// Minor-unit precision used for every stored monetary value
pub const MONEY_SCALE: u32 = 2;

/// Round a monetary value half-up to two decimal places.
///
/// Money handled here is never negative once rounded, so "away from zero"
/// is the same as round-half-up.
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Amount represents a validated, strictly positive monetary value.
///
/// # Invariants
/// - Value is always positive (> 0)
/// - At most 2 decimal places
/// - Maximum value is 1 trillion
///
/// # Example
/// ```
/// use rust_decimal::Decimal;
/// use remit_ledger::domain::Amount;
///
/// let amount = Amount::new(Decimal::new(10050, 2)).unwrap();
/// assert_eq!(amount.value(), Decimal::new(10050, 2));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Amount(Decimal);

/// Errors that can occur when creating an Amount
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmountError {
    #[error("amount must be positive (got {0})")]
    NotPositive(Decimal),

    #[error("amount has too many decimal places (max {MONEY_SCALE}, got {0})")]
    TooManyDecimals(u32),

    #[error("amount exceeds maximum allowed value ({MAX_AMOUNT})")]
    Overflow,

    #[error("balance would exceed maximum allowed value ({MAX_BALANCE})")]
    BalanceOverflow,

    #[error("invalid amount format: {0}")]
    ParseError(String),
}

impl Amount {
    /// Create a new Amount with validation.
    ///
    /// Trailing zeros beyond the second decimal place are accepted
    /// (`"10.500"`), significant digits are not (`"10.505"`).
    pub fn new(value: Decimal) -> Result<Self, AmountError> {
        if value <= Decimal::ZERO {
            return Err(AmountError::NotPositive(value));
        }

        let normalized = value.normalize();
        if normalized.scale() > MONEY_SCALE {
            return Err(AmountError::TooManyDecimals(normalized.scale()));
        }

        if value > MAX_AMOUNT {
            return Err(AmountError::Overflow);
        }

        let mut value = normalized;
        value.rescale(MONEY_SCALE);
        Ok(Self(value))
    }

    /// Create an Amount from whole currency units.
    pub fn from_integer(value: i64) -> Result<Self, AmountError> {
        Self::new(Decimal::from(value))
    }

    /// Get the underlying Decimal value.
    pub fn value(&self) -> Decimal {
        self.0
    }

    /// The amount as a signed debit delta.
    pub fn as_debit(&self) -> Decimal {
        -self.0
    }

    /// The amount as a signed credit delta.
    pub fn as_credit(&self) -> Decimal {
        self.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let decimal =
            Decimal::from_str(s.trim()).map_err(|e| AmountError::ParseError(e.to_string()))?;
        Amount::new(decimal)
    }
}

impl TryFrom<String> for Amount {
    type Error = AmountError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Amount::from_str(&value)
    }
}

impl From<Amount> for String {
    fn from(amount: Amount) -> Self {
        amount.to_string()
    }
}

/// Balance represents an account balance. Unlike Amount, it can be zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Balance(Decimal);

impl Balance {
    /// Create a new balance (zero or positive)
    pub fn new(value: Decimal) -> Result<Self, AmountError> {
        if value < Decimal::ZERO {
            return Err(AmountError::NotPositive(value));
        }
        if value > MAX_BALANCE {
            return Err(AmountError::BalanceOverflow);
        }
        Ok(Self(value))
    }

    pub fn zero() -> Self {
        Self(Decimal::ZERO)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    /// Check if balance covers a debit of `amount`
    pub fn is_sufficient_for(&self, amount: &Amount) -> bool {
        self.0 >= amount.value()
    }

    /// Apply a signed delta, refusing to go below zero.
    pub fn apply_delta(&self, delta: Decimal) -> Result<Balance, AmountError> {
        Balance::new(self.0 + delta)
    }
}

impl fmt::Display for Balance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl Default for Balance {
    fn default() -> Self {
        Self::zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_amount_positive() {
        let amount = Amount::new(dec!(100)).unwrap();
        assert_eq!(amount.value(), dec!(100.00));
        assert_eq!(amount.to_string(), "100.00");
    }

    #[test]
    fn test_amount_zero_and_negative_rejected() {
        assert!(matches!(Amount::new(Decimal::ZERO), Err(AmountError::NotPositive(_))));
        assert!(matches!(Amount::new(dec!(-5)), Err(AmountError::NotPositive(_))));
    }

    #[test]
    fn test_amount_too_many_decimals() {
        assert!(matches!(
            Amount::new(dec!(10.005)),
            Err(AmountError::TooManyDecimals(3))
        ));
        // Trailing zeros are not significant
        assert_eq!(Amount::new(dec!(10.500)).unwrap().value(), dec!(10.50));
    }

    #[test]
    fn test_amount_overflow() {
        assert!(Amount::new(dec!(1000000000000)).is_ok());
        assert!(matches!(
            Amount::new(dec!(1000000000000.01)),
            Err(AmountError::Overflow)
        ));
    }

    #[test]
    fn test_amount_from_str() {
        let amount: Amount = " 123.4 ".parse().unwrap();
        assert_eq!(amount.value(), dec!(123.40));
        assert!(matches!("abc".parse::<Amount>(), Err(AmountError::ParseError(_))));
    }

    #[test]
    fn test_amount_serde_as_string() {
        let amount: Amount = serde_json::from_str(r#""42.10""#).unwrap();
        assert_eq!(amount.value(), dec!(42.10));
        assert_eq!(serde_json::to_string(&amount).unwrap(), r#""42.10""#);
        assert!(serde_json::from_str::<Amount>(r#""-1""#).is_err());
    }

    #[test]
    fn test_round_money_half_up() {
        assert_eq!(round_money(dec!(82.875)), dec!(82.88));
        assert_eq!(round_money(dec!(82.8749)), dec!(82.87));
        assert_eq!(round_money(dec!(0.005)), dec!(0.01));
    }

    #[test]
    fn test_balance_apply_delta() {
        let balance = Balance::new(dec!(50)).unwrap();
        assert_eq!(balance.apply_delta(dec!(25)).unwrap().value(), dec!(75));
        assert_eq!(balance.apply_delta(dec!(-50)).unwrap().value(), dec!(0));
        assert!(balance.apply_delta(dec!(-50.01)).is_err());
    }

    #[test]
    fn test_balance_not_capped_at_amount_limit() {
        let balance = Balance::new(dec!(900000000000)).unwrap();
        let balance = balance.apply_delta(dec!(900000000000)).unwrap();
        assert_eq!(balance.value(), dec!(1800000000000));

        assert_eq!(MAX_BALANCE, dec!(999999999999999999.99));
        let full = Balance::new(MAX_BALANCE).unwrap();
        assert_eq!(full.apply_delta(dec!(0.01)), Err(AmountError::BalanceOverflow));
    }

    #[test]
    fn test_balance_insufficient() {
        let balance = Balance::new(dec!(30)).unwrap();
        let amount = Amount::new(dec!(50)).unwrap();
        assert!(!balance.is_sufficient_for(&amount));
    }
}
