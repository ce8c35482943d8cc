//! Store Errors
//!
//! Error types for ledger persistence.

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::LedgerError;

/// Errors that can occur while reading or committing ledger state
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Optimistic concurrency conflict on an account
    #[error("Version conflict for account {account_id}: expected version {expected}, found {actual}")]
    VersionConflict {
        account_id: Uuid,
        expected: i64,
        actual: i64,
    },

    /// Entity was moved out of the expected status by someone else
    #[error("{entity} {id} is {actual}, expected {expected}")]
    StatusConflict {
        entity: &'static str,
        id: Uuid,
        expected: String,
        actual: String,
    },

    /// A debit would take the balance below zero
    #[error("Insufficient funds on account {account_id}: required {required}, available {available}")]
    InsufficientFunds {
        account_id: Uuid,
        required: Decimal,
        available: Decimal,
    },

    #[error("Account not found: {0}")]
    AccountNotFound(Uuid),

    #[error("No {currency} account for owner {owner_id}")]
    NoCurrencyAccount { owner_id: Uuid, currency: String },

    #[error("{entity} not found: {id}")]
    EntityNotFound { entity: &'static str, id: Uuid },

    #[error("Account {account_id} is {status}")]
    AccountInactive { account_id: Uuid, status: String },

    /// A credit would take the balance past the storable maximum
    #[error("Balance limit exceeded on account {account_id}")]
    BalanceLimitExceeded { account_id: Uuid },

    #[error("Account already exists for owner {owner_id} in {currency}")]
    DuplicateAccount { owner_id: Uuid, currency: String },

    #[error("Reference number already used: {0}")]
    DuplicateReference(String),

    /// Stored row that no longer satisfies domain invariants
    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    /// Check if this error is a concurrency conflict
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, StoreError::VersionConflict { .. })
    }

    /// Check if the whole unit of work may be rebuilt and retried
    pub fn is_retryable(&self) -> bool {
        self.is_version_conflict()
    }

    /// Map into the engine-level taxonomy. Infrastructure failures are
    /// tagged with the operation's correlation id.
    pub fn into_ledger_error(self, correlation_id: Uuid) -> LedgerError {
        match self {
            StoreError::VersionConflict { account_id, .. } => LedgerError::conflict(format!(
                "account {account_id} was modified concurrently"
            )),
            StoreError::StatusConflict { .. }
            | StoreError::AccountInactive { .. }
            | StoreError::DuplicateAccount { .. }
            | StoreError::DuplicateReference(_) => LedgerError::conflict(self.to_string()),
            StoreError::InsufficientFunds {
                required,
                available,
                ..
            } => LedgerError::insufficient_funds(required, available),
            StoreError::BalanceLimitExceeded { .. } => {
                LedgerError::validation("amount", self.to_string())
            }
            StoreError::AccountNotFound(id) => LedgerError::not_found("account", id),
            StoreError::NoCurrencyAccount { owner_id, currency } => {
                LedgerError::not_found("account", format!("{owner_id}/{currency}"))
            }
            StoreError::EntityNotFound { entity, id } => LedgerError::not_found(entity, id),
            StoreError::Corrupt(message) => LedgerError::Infrastructure {
                correlation_id,
                message,
            },
            StoreError::Database(e) => LedgerError::Infrastructure {
                correlation_id,
                message: e.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_only_version_conflicts_are_retryable() {
        let conflict = StoreError::VersionConflict {
            account_id: Uuid::new_v4(),
            expected: 1,
            actual: 2,
        };
        assert!(conflict.is_retryable());

        let funds = StoreError::InsufficientFunds {
            account_id: Uuid::new_v4(),
            required: dec!(10),
            available: dec!(5),
        };
        assert!(!funds.is_retryable());
    }

    #[test]
    fn test_into_ledger_error_mapping() {
        let correlation_id = Uuid::new_v4();

        let funds = StoreError::InsufficientFunds {
            account_id: Uuid::new_v4(),
            required: dec!(60),
            available: dec!(40),
        };
        assert_eq!(
            funds.into_ledger_error(correlation_id),
            LedgerError::insufficient_funds(dec!(60), dec!(40))
        );

        let status = StoreError::StatusConflict {
            entity: "transfer",
            id: Uuid::new_v4(),
            expected: "pending".to_string(),
            actual: "completed".to_string(),
        };
        assert!(status.into_ledger_error(correlation_id).is_conflict());

        let corrupt = StoreError::Corrupt("bad currency".to_string());
        match corrupt.into_ledger_error(correlation_id) {
            LedgerError::Infrastructure {
                correlation_id: id, ..
            } => assert_eq!(id, correlation_id),
            other => panic!("unexpected {other:?}"),
        }
    }
}
