//! Lifecycle state machines
//!
//! Transfers and money requests only ever move forward, from `pending` into
//! exactly one terminal state. Stored as lower-case strings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::error::LedgerError;

/// Shared transition rules for entity statuses.
pub trait StateMachine: Copy + Eq + fmt::Display + Sized {
    /// Entity name used in error messages
    const ENTITY: &'static str;

    /// Whether `self -> next` is an edge of the machine
    fn allows(self, next: Self) -> bool;

    fn is_terminal(self) -> bool;

    /// Validate a transition, returning the new state.
    fn transition(self, next: Self) -> Result<Self, LedgerError> {
        if self.allows(next) {
            Ok(next)
        } else {
            Err(LedgerError::conflict(format!(
                "{} cannot move from {} to {}",
                Self::ENTITY,
                self,
                next
            )))
        }
    }
}

/// Error for unknown stored status strings
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {entity} status: {value}")]
pub struct UnknownStatus {
    pub entity: &'static str,
    pub value: String,
}

// =========================================================================
// TransferStatus
// =========================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    /// Funds reserved, waiting for payout
    Pending,
    Completed,
    Cancelled,
    /// Payout rejected; reservation released
    Failed,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Pending => "pending",
            TransferStatus::Completed => "completed",
            TransferStatus::Cancelled => "cancelled",
            TransferStatus::Failed => "failed",
        }
    }
}

impl StateMachine for TransferStatus {
    const ENTITY: &'static str = "transfer";

    fn allows(self, next: Self) -> bool {
        matches!(
            (self, next),
            (
                TransferStatus::Pending,
                TransferStatus::Completed | TransferStatus::Cancelled | TransferStatus::Failed
            )
        )
    }

    fn is_terminal(self) -> bool {
        !matches!(self, TransferStatus::Pending)
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransferStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransferStatus::Pending),
            "completed" => Ok(TransferStatus::Completed),
            "cancelled" => Ok(TransferStatus::Cancelled),
            "failed" => Ok(TransferStatus::Failed),
            other => Err(UnknownStatus {
                entity: "transfer",
                value: other.to_string(),
            }),
        }
    }
}

// =========================================================================
// MoneyRequestStatus
// =========================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoneyRequestStatus {
    Pending,
    Paid,
    Cancelled,
    Expired,
}

impl MoneyRequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MoneyRequestStatus::Pending => "pending",
            MoneyRequestStatus::Paid => "paid",
            MoneyRequestStatus::Cancelled => "cancelled",
            MoneyRequestStatus::Expired => "expired",
        }
    }
}

impl StateMachine for MoneyRequestStatus {
    const ENTITY: &'static str = "money request";

    fn allows(self, next: Self) -> bool {
        matches!(
            (self, next),
            (
                MoneyRequestStatus::Pending,
                MoneyRequestStatus::Paid | MoneyRequestStatus::Cancelled | MoneyRequestStatus::Expired
            )
        )
    }

    fn is_terminal(self) -> bool {
        !matches!(self, MoneyRequestStatus::Pending)
    }
}

impl fmt::Display for MoneyRequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MoneyRequestStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(MoneyRequestStatus::Pending),
            "paid" => Ok(MoneyRequestStatus::Paid),
            "cancelled" => Ok(MoneyRequestStatus::Cancelled),
            "expired" => Ok(MoneyRequestStatus::Expired),
            other => Err(UnknownStatus {
                entity: "money request",
                value: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRANSFER_STATES: [TransferStatus; 4] = [
        TransferStatus::Pending,
        TransferStatus::Completed,
        TransferStatus::Cancelled,
        TransferStatus::Failed,
    ];

    const REQUEST_STATES: [MoneyRequestStatus; 4] = [
        MoneyRequestStatus::Pending,
        MoneyRequestStatus::Paid,
        MoneyRequestStatus::Cancelled,
        MoneyRequestStatus::Expired,
    ];

    #[test]
    fn test_transfer_pending_edges() {
        let pending = TransferStatus::Pending;
        assert_eq!(pending.transition(TransferStatus::Completed), Ok(TransferStatus::Completed));
        assert_eq!(pending.transition(TransferStatus::Cancelled), Ok(TransferStatus::Cancelled));
        assert_eq!(pending.transition(TransferStatus::Failed), Ok(TransferStatus::Failed));
        assert!(pending.transition(TransferStatus::Pending).is_err());
    }

    #[test]
    fn test_transfer_terminal_states_reject_everything() {
        for from in TRANSFER_STATES.into_iter().filter(|s| s.is_terminal()) {
            for to in TRANSFER_STATES {
                let err = from.transition(to).unwrap_err();
                assert!(err.is_conflict(), "{from} -> {to} should conflict");
            }
        }
    }

    #[test]
    fn test_money_request_edges() {
        for from in REQUEST_STATES {
            for to in REQUEST_STATES {
                let legal = from == MoneyRequestStatus::Pending && to != MoneyRequestStatus::Pending;
                assert_eq!(from.transition(to).is_ok(), legal, "{from} -> {to}");
            }
        }
    }

    #[test]
    fn test_conflict_message_names_states() {
        let err = TransferStatus::Completed
            .transition(TransferStatus::Cancelled)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Conflict: transfer cannot move from completed to cancelled"
        );
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("failed".parse::<TransferStatus>(), Ok(TransferStatus::Failed));
        assert_eq!("paid".parse::<MoneyRequestStatus>(), Ok(MoneyRequestStatus::Paid));
        assert!("done".parse::<TransferStatus>().is_err());
    }
}
