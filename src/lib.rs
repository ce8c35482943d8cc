//! remit_ledger Library
//!
//! Multi-currency remittance ledger. Re-exports modules for the server
//! binary, the load test and integration tests.

pub mod aggregate;
pub mod api;
pub mod audit;
pub mod config;
pub mod db;
pub mod domain;
pub mod engine;
pub mod fx;
pub mod jobs;
pub mod notification;
pub mod payout;
pub mod reference;
pub mod store;

mod error;

pub use config::Config;
pub use domain::{Amount, AmountError, Balance, Currency, LedgerError, OperationContext};
pub use engine::{EngineSettings, LedgerEngine};
pub use error::{AppError, AppResult};
