//! Ledger Error Types
//!
//! The typed error taxonomy every engine operation returns.

use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by ledger operations.
///
/// Validation errors are raised before anything is persisted. Infrastructure
/// failures carry the correlation id of the operation that hit them so a
/// caller can match the response with server logs.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LedgerError {
    /// Malformed or missing input
    #[error("Validation failed on {field}: {message}")]
    Validation { field: String, message: String },

    /// Referenced entity does not exist
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Illegal state transition or optimistic-version mismatch
    #[error("Conflict: {reason}")]
    Conflict { reason: String },

    /// Debit larger than the available balance
    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: Decimal, available: Decimal },

    /// Rate source or payout pipeline is down
    #[error("{provider} unavailable: {message}")]
    ProviderUnavailable {
        provider: &'static str,
        message: String,
    },

    /// Storage or other infrastructure failure
    #[error("Infrastructure failure (correlation id {correlation_id}): {message}")]
    Infrastructure { correlation_id: Uuid, message: String },
}

impl LedgerError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn conflict(reason: impl Into<String>) -> Self {
        Self::Conflict {
            reason: reason.into(),
        }
    }

    pub fn insufficient_funds(required: Decimal, available: Decimal) -> Self {
        Self::InsufficientFunds {
            required,
            available,
        }
    }

    pub fn provider_unavailable(provider: &'static str, message: impl Into<String>) -> Self {
        Self::ProviderUnavailable {
            provider,
            message: message.into(),
        }
    }

    /// Check if this is a client error (caller's fault)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Validation { .. } | Self::NotFound { .. } | Self::InsufficientFunds { .. }
        )
    }

    /// Check if this is a conflict error (state or version mismatch)
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}
