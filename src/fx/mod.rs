//! Exchange rates
//!
//! A rate is looked up once per operation, before any balance is locked, and
//! stays fixed for that operation.

pub mod fallback;
pub mod http;
pub mod table;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::domain::{Currency, LedgerError};

pub use fallback::FallbackRateProvider;
pub use http::HttpRateSource;
pub use table::StaticRateTable;

/// Where a rate came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RateSource {
    /// Live market-data endpoint
    Live,
    /// Configured static table, no live source in use
    Static,
    /// Static table used because the live source failed
    Fallback,
}

/// Rate for converting one unit of `from` into `to`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExchangeRate {
    pub from: Currency,
    pub to: Currency,
    pub rate: Decimal,
    pub as_of: DateTime<Utc>,
    pub source: RateSource,
}

impl ExchangeRate {
    pub fn is_fallback(&self) -> bool {
        self.source == RateSource::Fallback
    }
}

/// Exchange rate errors
#[derive(Debug, thiserror::Error)]
pub enum FxError {
    #[error("no rate for {from}/{to}")]
    UnsupportedPair { from: Currency, to: Currency },

    #[error("rate source unavailable: {0}")]
    Unavailable(String),

    #[error("invalid rate response: {0}")]
    InvalidResponse(String),
}

impl From<FxError> for LedgerError {
    fn from(err: FxError) -> Self {
        match err {
            FxError::UnsupportedPair { .. } => LedgerError::validation("currency", err.to_string()),
            FxError::Unavailable(_) | FxError::InvalidResponse(_) => {
                LedgerError::provider_unavailable("exchange rate provider", err.to_string())
            }
        }
    }
}

/// Source of currency-pair rates
#[async_trait]
pub trait ExchangeRateProvider: Send + Sync {
    async fn get_rate(&self, from: &Currency, to: &Currency) -> Result<ExchangeRate, FxError>;
}
