//! Configuration module
//!
//! Loads configuration from environment variables.

use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection URL; `None` runs on the in-memory store
    pub database_url: Option<String>,

    /// Maximum database connections in pool
    pub database_max_connections: u32,

    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Environment (development, production)
    pub environment: String,

    /// Live exchange rate endpoint; static table only when absent
    pub fx_api_url: Option<String>,

    /// Bound on a live rate lookup before falling back
    pub fx_timeout: Duration,

    /// Transfer fee rate, e.g. 0.025
    pub fee_percentage: Decimal,

    /// Transfer fee floor in the source currency
    pub fee_minimum: Decimal,

    /// Commit attempts on version conflicts
    pub max_commit_retries: u32,

    pub payment_link_base_url: String,

    pub expiry_sweep_interval: Duration,
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: &str,
) -> Result<T, ConfigError> {
    lookup(key)
        .unwrap_or_else(|| default.to_string())
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue(key))
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from any key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let environment = lookup("ENVIRONMENT").unwrap_or_else(|| "development".to_string());
        let database_url = non_empty("DATABASE_URL");
        if database_url.is_none() && environment == "production" {
            return Err(ConfigError::MissingEnv("DATABASE_URL"));
        }

        let database_max_connections = parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", "10")?;
        let host = lookup("HOST").unwrap_or_else(|| "127.0.0.1".to_string());
        let port = parse_or(&lookup, "PORT", "3000")?;

        let fx_api_url = non_empty("FX_API_URL");
        let fx_timeout_ms: u64 = parse_or(&lookup, "FX_TIMEOUT_MS", "3000")?;

        let fee_percentage: Decimal = parse_or(&lookup, "FEE_PERCENTAGE", "0.025")?;
        if fee_percentage < Decimal::ZERO || fee_percentage >= Decimal::ONE {
            return Err(ConfigError::InvalidValue("FEE_PERCENTAGE"));
        }
        let fee_minimum: Decimal = parse_or(&lookup, "FEE_MINIMUM", "1.00")?;
        if fee_minimum < Decimal::ZERO {
            return Err(ConfigError::InvalidValue("FEE_MINIMUM"));
        }

        let max_commit_retries: u32 = parse_or(&lookup, "MAX_COMMIT_RETRIES", "3")?;
        if max_commit_retries == 0 {
            return Err(ConfigError::InvalidValue("MAX_COMMIT_RETRIES"));
        }

        let payment_link_base_url = lookup("PAYMENT_LINK_BASE_URL")
            .unwrap_or_else(|| "http://localhost:3000/pay".to_string());

        let sweep_secs: u64 = parse_or(&lookup, "EXPIRY_SWEEP_INTERVAL_SECS", "300")?;
        if sweep_secs == 0 {
            return Err(ConfigError::InvalidValue("EXPIRY_SWEEP_INTERVAL_SECS"));
        }

        Ok(Self {
            database_url,
            database_max_connections,
            host,
            port,
            environment,
            fx_api_url,
            fx_timeout: Duration::from_millis(fx_timeout_ms),
            fee_percentage,
            fee_minimum,
            max_commit_retries,
            payment_link_base_url,
            expiry_sweep_interval: Duration::from_secs(sweep_secs),
        })
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();

        assert!(config.database_url.is_none());
        assert_eq!(config.database_max_connections, 10);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 3000);
        assert!(!config.is_production());
        assert!(config.fx_api_url.is_none());
        assert_eq!(config.fx_timeout, Duration::from_secs(3));
        assert_eq!(config.fee_percentage, dec!(0.025));
        assert_eq!(config.fee_minimum, dec!(1.00));
        assert_eq!(config.max_commit_retries, 3);
        assert_eq!(config.payment_link_base_url, "http://localhost:3000/pay");
        assert_eq!(config.expiry_sweep_interval, Duration::from_secs(300));
    }

    #[test]
    fn test_production_requires_database() {
        let err = Config::from_lookup(lookup(&[("ENVIRONMENT", "production")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnv("DATABASE_URL")));

        let config = Config::from_lookup(lookup(&[
            ("ENVIRONMENT", "production"),
            ("DATABASE_URL", "postgres://ledger@localhost/ledger"),
        ]))
        .unwrap();
        assert!(config.is_production());
    }

    #[test]
    fn test_invalid_values_name_the_key() {
        let err = Config::from_lookup(lookup(&[("PORT", "http")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue("PORT")));

        let err = Config::from_lookup(lookup(&[("FEE_PERCENTAGE", "1.5")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue("FEE_PERCENTAGE")));

        let err = Config::from_lookup(lookup(&[("MAX_COMMIT_RETRIES", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue("MAX_COMMIT_RETRIES")));
    }

    #[test]
    fn test_blank_optional_urls_are_absent() {
        let config = Config::from_lookup(lookup(&[("FX_API_URL", "  "), ("DATABASE_URL", "")])).unwrap();
        assert!(config.fx_api_url.is_none());
        assert!(config.database_url.is_none());
    }
}
