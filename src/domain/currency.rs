//! Currency and country codes
//!
//! Shape-validated ISO-4217 currency codes and ISO-3166 alpha-2 country codes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A three-letter, upper-case currency code (`USD`, `EUR`, ...)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

/// A two-letter, upper-case country code (`US`, `DE`, ...)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CountryCode(String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodeError {
    #[error("currency code must be 3 letters, got {0:?}")]
    InvalidCurrency(String),

    #[error("country code must be 2 letters, got {0:?}")]
    InvalidCountry(String),
}

fn is_alpha_code(code: &str, len: usize) -> bool {
    code.len() == len && code.bytes().all(|b| b.is_ascii_alphabetic())
}

impl Currency {
    /// Parse a currency code. Lower-case input is upper-cased.
    pub fn new(code: &str) -> Result<Self, CodeError> {
        let code = code.trim();
        if !is_alpha_code(code, 3) {
            return Err(CodeError::InvalidCurrency(code.to_string()));
        }
        Ok(Self(code.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl CountryCode {
    pub fn new(code: &str) -> Result<Self, CodeError> {
        let code = code.trim();
        if !is_alpha_code(code, 2) {
            return Err(CodeError::InvalidCountry(code.to_string()));
        }
        Ok(Self(code.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for CountryCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Currency {
    type Err = CodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Currency::new(s)
    }
}

impl TryFrom<String> for Currency {
    type Error = CodeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Currency::new(&value)
    }
}

impl From<Currency> for String {
    fn from(currency: Currency) -> Self {
        currency.0
    }
}

impl TryFrom<String> for CountryCode {
    type Error = CodeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        CountryCode::new(&value)
    }
}

impl From<CountryCode> for String {
    fn from(country: CountryCode) -> Self {
        country.0
    }
}
