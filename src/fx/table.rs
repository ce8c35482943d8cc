//! Static rate table
//!
//! USD-based rates. Pairs not listed directly are derived from the inverse
//! or by crossing through USD.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;

use crate::domain::Currency;

use super::{ExchangeRate, ExchangeRateProvider, FxError, RateSource};

/// Precision for derived (inverse or cross) rates
const DERIVED_RATE_SCALE: u32 = 10;

const PIVOT: &str = "USD";

#[derive(Debug, Clone)]
pub struct StaticRateTable {
    rates: HashMap<(String, String), Decimal>,
}

impl StaticRateTable {
    /// Empty table
    pub fn empty() -> Self {
        Self {
            rates: HashMap::new(),
        }
    }

    /// Table seeded with the built-in USD rates
    pub fn with_defaults() -> Self {
        [
            ("EUR", dec!(0.85)),
            ("GBP", dec!(0.73)),
            ("JPY", dec!(110.00)),
            ("CAD", dec!(1.25)),
            ("AUD", dec!(1.35)),
            ("CHF", dec!(0.92)),
            ("MXN", dec!(17.50)),
            ("INR", dec!(83.00)),
            ("PHP", dec!(56.00)),
            ("BRL", dec!(5.00)),
        ]
        .into_iter()
        .fold(Self::empty(), |table, (code, rate)| {
            table.with_rate(PIVOT, code, rate)
        })
    }

    /// Add or replace the rate for `from -> to`
    pub fn with_rate(mut self, from: &str, to: &str, rate: Decimal) -> Self {
        self.rates
            .insert((from.to_ascii_uppercase(), to.to_ascii_uppercase()), rate);
        self
    }

    fn direct(&self, from: &str, to: &str) -> Option<Decimal> {
        if let Some(rate) = self.rates.get(&(from.to_string(), to.to_string())) {
            return Some(*rate);
        }
        self.rates
            .get(&(to.to_string(), from.to_string()))
            .filter(|r| !r.is_zero())
            .map(|r| (Decimal::ONE / *r).round_dp(DERIVED_RATE_SCALE))
    }

    /// Rate for `from -> to`, if the table can produce one
    pub fn lookup(&self, from: &Currency, to: &Currency) -> Option<Decimal> {
        let (from, to) = (from.as_str(), to.as_str());
        if from == to {
            return Some(Decimal::ONE);
        }
        if let Some(rate) = self.direct(from, to) {
            return Some(rate);
        }
        let to_pivot = self.direct(from, PIVOT)?;
        let from_pivot = self.direct(PIVOT, to)?;
        Some((to_pivot * from_pivot).round_dp(DERIVED_RATE_SCALE))
    }

    /// Look up a rate and tag it with `source`
    pub fn rate(
        &self,
        from: &Currency,
        to: &Currency,
        source: RateSource,
    ) -> Result<ExchangeRate, FxError> {
        let rate = self
            .lookup(from, to)
            .ok_or_else(|| FxError::UnsupportedPair {
                from: from.clone(),
                to: to.clone(),
            })?;
        Ok(ExchangeRate {
            from: from.clone(),
            to: to.clone(),
            rate,
            as_of: Utc::now(),
            source,
        })
    }
}

impl Default for StaticRateTable {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[async_trait]
impl ExchangeRateProvider for StaticRateTable {
    async fn get_rate(&self, from: &Currency, to: &Currency) -> Result<ExchangeRate, FxError> {
        self.rate(from, to, RateSource::Static)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(code: &str) -> Currency {
        Currency::new(code).unwrap()
    }

    #[test]
    fn test_direct_and_identity() {
        let table = StaticRateTable::with_defaults();
        assert_eq!(table.lookup(&c("USD"), &c("EUR")), Some(dec!(0.85)));
        assert_eq!(table.lookup(&c("EUR"), &c("EUR")), Some(Decimal::ONE));
    }

    #[test]
    fn test_inverse_rate() {
        let table = StaticRateTable::with_defaults();
        assert_eq!(table.lookup(&c("EUR"), &c("USD")), Some(dec!(1.1764705882)));
    }

    #[test]
    fn test_cross_rate_through_usd() {
        let table = StaticRateTable::with_defaults();
        // EUR -> USD -> GBP
        let rate = table.lookup(&c("EUR"), &c("GBP")).unwrap();
        assert_eq!(rate, (dec!(1.1764705882) * dec!(0.73)).round_dp(10));
    }

    #[test]
    fn test_unknown_pair() {
        let table = StaticRateTable::with_defaults();
        let err = table.rate(&c("USD"), &c("XAU"), RateSource::Static).unwrap_err();
        assert!(matches!(err, FxError::UnsupportedPair { .. }));
    }

    #[tokio::test]
    async fn test_provider_reports_static_source() {
        let table = StaticRateTable::empty().with_rate("usd", "eur", dec!(0.90));
        let rate = table.get_rate(&c("USD"), &c("EUR")).await.unwrap();
        assert_eq!(rate.rate, dec!(0.90));
        assert_eq!(rate.source, RateSource::Static);
        assert!(!rate.is_fallback());
    }
}
