//! Aggregate module
//!
//! Aggregate roots whose state changes flow through the ledger engine.

pub mod account;
pub mod money_request;
pub mod transfer;

pub use account::{Account, AccountStatus};
pub use money_request::{MoneyRequest, MONEY_REQUEST_TTL_DAYS};
pub use transfer::{Recipient, Transfer, TRANSFER_ARRIVAL_HOURS};

/// Aggregate trait that all aggregates implement
pub trait Aggregate {
    /// Aggregate type name (for audit records and error messages)
    fn aggregate_type() -> &'static str;

    /// Aggregate ID
    fn id(&self) -> uuid::Uuid;
}
