//! Domain module
//!
//! Core domain types and business rules, free of infrastructure.

pub mod amount;
pub mod context;
pub mod currency;
pub mod error;
pub mod fee;
pub mod status;
pub mod transaction;

pub use amount::{round_money, Amount, AmountError, Balance};
pub use context::OperationContext;
pub use currency::{CodeError, CountryCode, Currency};
pub use error::LedgerError;
pub use fee::{FeeSchedule, Pricing};
pub use status::{MoneyRequestStatus, StateMachine, TransferStatus, UnknownStatus};
pub use transaction::{EntryDirection, LedgerTransaction, TransactionStatus, TransactionType};
