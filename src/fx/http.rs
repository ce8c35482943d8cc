//! Live rate source
//!
//! Queries an exchangerate-host style endpoint:
//! `GET {base_url}/latest?base=USD&symbols=EUR` returning
//! `{"base": "USD", "rates": {"EUR": 0.85}}`.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use crate::domain::Currency;

use super::{ExchangeRate, ExchangeRateProvider, FxError, RateSource};

#[derive(Debug, Deserialize)]
struct LatestRatesResponse {
    rates: HashMap<String, serde_json::Number>,
}

/// Extract the rate for `to` from a `/latest` response body
fn parse_rate(body: LatestRatesResponse, to: &Currency) -> Result<Decimal, FxError> {
    let number = body
        .rates
        .get(to.as_str())
        .ok_or_else(|| FxError::InvalidResponse(format!("no rate for {to} in response")))?;

    // serde_json holds the number as an f64. Its shortest round-trip text
    // reproduces any quote of up to 15 significant digits, and that text is
    // what becomes the Decimal.
    let rate = Decimal::from_str(&number.to_string())
        .or_else(|_| Decimal::from_scientific(&number.to_string()))
        .map_err(|e| FxError::InvalidResponse(format!("bad rate {number}: {e}")))?;

    if rate <= Decimal::ZERO {
        return Err(FxError::InvalidResponse(format!("non-positive rate {rate}")));
    }
    Ok(rate)
}

/// HTTP-backed [`ExchangeRateProvider`]
#[derive(Debug, Clone)]
pub struct HttpRateSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRateSource {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, FxError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FxError::Unavailable(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ExchangeRateProvider for HttpRateSource {
    async fn get_rate(&self, from: &Currency, to: &Currency) -> Result<ExchangeRate, FxError> {
        let response = self
            .client
            .get(format!("{}/latest", self.base_url))
            .query(&[("base", from.as_str()), ("symbols", to.as_str())])
            .send()
            .await
            .map_err(|e| FxError::Unavailable(format!("HTTP request failed: {e}")))?
            .error_for_status()
            .map_err(|e| FxError::Unavailable(e.to_string()))?;

        let body: LatestRatesResponse = response
            .json()
            .await
            .map_err(|e| FxError::InvalidResponse(format!("failed to parse response: {e}")))?;

        let rate = parse_rate(body, to)?;
        tracing::debug!(from = %from, to = %to, rate = %rate, "Live rate fetched");

        Ok(ExchangeRate {
            from: from.clone(),
            to: to.clone(),
            rate,
            as_of: Utc::now(),
            source: RateSource::Live,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn body(json: &str) -> LatestRatesResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_parse_rate_keeps_decimal_digits() {
        let eur = Currency::new("EUR").unwrap();
        let rate = parse_rate(body(r#"{"base":"USD","rates":{"EUR":0.8512}}"#), &eur).unwrap();
        assert_eq!(rate, dec!(0.8512));
    }

    #[test]
    fn test_parse_rate_exact_to_fifteen_digits() {
        let idr = Currency::new("IDR").unwrap();
        let rate = parse_rate(
            body(r#"{"rates":{"IDR":15634.2871234567}}"#),
            &idr,
        )
        .unwrap();
        assert_eq!(rate, dec!(15634.2871234567));

        let btc = Currency::new("XBT").unwrap();
        let rate = parse_rate(body(r#"{"rates":{"XBT":0.0000001}}"#), &btc).unwrap();
        assert_eq!(rate, dec!(0.0000001));
    }

    #[test]
    fn test_parse_rate_missing_symbol() {
        let gbp = Currency::new("GBP").unwrap();
        let err = parse_rate(body(r#"{"rates":{"EUR":0.85}}"#), &gbp).unwrap_err();
        assert!(matches!(err, FxError::InvalidResponse(_)));
    }

    #[test]
    fn test_parse_rate_rejects_zero() {
        let eur = Currency::new("EUR").unwrap();
        assert!(parse_rate(body(r#"{"rates":{"EUR":0}}"#), &eur).is_err());
    }

    #[tokio::test]
    async fn test_unreachable_source_is_unavailable() {
        let source = HttpRateSource::new("http://127.0.0.1:9", Duration::from_millis(200)).unwrap();
        let err = source
            .get_rate(&Currency::new("USD").unwrap(), &Currency::new("EUR").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, FxError::Unavailable(_)));
    }
}
