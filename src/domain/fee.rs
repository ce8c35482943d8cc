//! Transfer pricing
//!
//! One canonical fee formula: a percentage of the source amount with a floor,
//! rounded half-up to two decimals and always denominated in the source
//! currency.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;

use super::amount::{round_money, Amount};
use super::error::LedgerError;

/// Percentage fee with a minimum charge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeSchedule {
    pub percentage: Decimal,
    pub minimum: Decimal,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            percentage: dec!(0.025),
            minimum: dec!(1.00),
        }
    }
}

/// Price breakdown of a cross-currency transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Pricing {
    pub source_amount: Decimal,
    pub fee: Decimal,
    /// Source amount left after the fee, still in the source currency
    pub net_amount: Decimal,
    pub rate: Decimal,
    pub destination_amount: Decimal,
}

impl FeeSchedule {
    pub fn new(percentage: Decimal, minimum: Decimal) -> Self {
        Self {
            percentage,
            minimum,
        }
    }

    /// `max(amount * percentage, minimum)`, rounded half-up to cents
    pub fn fee_for(&self, amount: &Amount) -> Decimal {
        round_money((amount.value() * self.percentage).max(self.minimum))
    }

    /// Price a transfer at a fixed rate.
    ///
    /// Fails when the fee swallows the whole amount or the converted amount
    /// rounds down to nothing.
    pub fn price(&self, source_amount: &Amount, rate: Decimal) -> Result<Pricing, LedgerError> {
        if rate <= Decimal::ZERO {
            return Err(LedgerError::validation(
                "exchange_rate",
                format!("rate must be positive, got {rate}"),
            ));
        }

        let fee = self.fee_for(source_amount);
        let net_amount = source_amount.value() - fee;
        if net_amount <= Decimal::ZERO {
            return Err(LedgerError::validation(
                "source_amount",
                format!("amount {source_amount} does not cover the transfer fee of {fee:.2}"),
            ));
        }

        let destination_amount = round_money(net_amount * rate);
        if destination_amount <= Decimal::ZERO {
            return Err(LedgerError::validation(
                "source_amount",
                "converted amount rounds to zero",
            ));
        }

        Ok(Pricing {
            source_amount: source_amount.value(),
            fee,
            net_amount,
            rate,
            destination_amount,
        })
    }
}
