//! Live source with static fallback
//!
//! The live lookup is bounded by a timeout. When it fails or times out the
//! static table answers instead and the rate is flagged as a fallback.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::Currency;

use super::{ExchangeRate, ExchangeRateProvider, FxError, RateSource, StaticRateTable};

/// Default bound on a live lookup
pub const DEFAULT_RATE_TIMEOUT: Duration = Duration::from_secs(3);

pub struct FallbackRateProvider {
    live: Arc<dyn ExchangeRateProvider>,
    fallback: StaticRateTable,
    timeout: Duration,
}

impl FallbackRateProvider {
    pub fn new(live: Arc<dyn ExchangeRateProvider>, fallback: StaticRateTable) -> Self {
        Self {
            live,
            fallback,
            timeout: DEFAULT_RATE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn fall_back(&self, from: &Currency, to: &Currency, reason: &str) -> Result<ExchangeRate, FxError> {
        tracing::warn!(
            from = %from,
            to = %to,
            reason = %reason,
            "Live rate unavailable, using static fallback table"
        );
        self.fallback
            .rate(from, to, RateSource::Fallback)
            .map_err(|_| FxError::Unavailable(reason.to_string()))
    }
}

#[async_trait]
impl ExchangeRateProvider for FallbackRateProvider {
    async fn get_rate(&self, from: &Currency, to: &Currency) -> Result<ExchangeRate, FxError> {
        if from == to {
            return self.fallback.rate(from, to, RateSource::Static);
        }

        match tokio::time::timeout(self.timeout, self.live.get_rate(from, to)).await {
            Ok(Ok(rate)) => Ok(rate),
            Ok(Err(FxError::UnsupportedPair { .. })) => {
                // The table may still carry a pair the live source lacks
                self.fallback.rate(from, to, RateSource::Fallback)
            }
            Ok(Err(e)) => self.fall_back(from, to, &e.to_string()),
            Err(_) => self.fall_back(
                from,
                to,
                &format!("timed out after {} ms", self.timeout.as_millis()),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    struct DownSource;

    #[async_trait]
    impl ExchangeRateProvider for DownSource {
        async fn get_rate(&self, _: &Currency, _: &Currency) -> Result<ExchangeRate, FxError> {
            Err(FxError::Unavailable("connection refused".to_string()))
        }
    }

    struct SlowSource;

    #[async_trait]
    impl ExchangeRateProvider for SlowSource {
        async fn get_rate(&self, from: &Currency, to: &Currency) -> Result<ExchangeRate, FxError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(ExchangeRate {
                from: from.clone(),
                to: to.clone(),
                rate: dec!(9.99),
                as_of: Utc::now(),
                source: RateSource::Live,
            })
        }
    }

    struct LiveSource;

    #[async_trait]
    impl ExchangeRateProvider for LiveSource {
        async fn get_rate(&self, from: &Currency, to: &Currency) -> Result<ExchangeRate, FxError> {
            Ok(ExchangeRate {
                from: from.clone(),
                to: to.clone(),
                rate: dec!(0.86),
                as_of: Utc::now(),
                source: RateSource::Live,
            })
        }
    }

    fn pair() -> (Currency, Currency) {
        (Currency::new("USD").unwrap(), Currency::new("EUR").unwrap())
    }

    #[tokio::test]
    async fn test_live_rate_preferred() {
        let provider = FallbackRateProvider::new(Arc::new(LiveSource), StaticRateTable::with_defaults());
        let (usd, eur) = pair();
        let rate = provider.get_rate(&usd, &eur).await.unwrap();
        assert_eq!(rate.rate, dec!(0.86));
        assert!(!rate.is_fallback());
    }

    #[tokio::test]
    async fn test_outage_uses_static_table() {
        let provider = FallbackRateProvider::new(Arc::new(DownSource), StaticRateTable::with_defaults());
        let (usd, eur) = pair();
        let rate = provider.get_rate(&usd, &eur).await.unwrap();
        assert_eq!(rate.rate, dec!(0.85));
        assert!(rate.is_fallback());
    }

    #[tokio::test]
    async fn test_timeout_uses_static_table() {
        let provider = FallbackRateProvider::new(Arc::new(SlowSource), StaticRateTable::with_defaults())
            .with_timeout(Duration::from_millis(50));
        let (usd, eur) = pair();
        let rate = provider.get_rate(&usd, &eur).await.unwrap();
        assert_eq!(rate.rate, dec!(0.85));
        assert_eq!(rate.source, RateSource::Fallback);
    }

    #[tokio::test]
    async fn test_outage_without_fallback_pair_is_unavailable() {
        let provider = FallbackRateProvider::new(Arc::new(DownSource), StaticRateTable::empty());
        let (usd, eur) = pair();
        let err = provider.get_rate(&usd, &eur).await.unwrap_err();
        assert!(matches!(err, FxError::Unavailable(_)));
    }
}
