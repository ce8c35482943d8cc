//! Ledger store
//!
//! Persistence boundary of the ledger. Every logical operation is handed to
//! the store as one [`UnitOfWork`] and committed all-or-nothing.

pub mod error;
pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::aggregate::{Account, AccountStatus, Aggregate, MoneyRequest, Transfer};
use crate::domain::{AmountError, Currency, LedgerTransaction, MoneyRequestStatus, TransferStatus};

pub use error::StoreError;
pub use memory::InMemoryLedgerStore;
pub use postgres::PgLedgerStore;

// =========================================================================
// Unit of work
// =========================================================================

/// Signed change to one account balance
#[derive(Debug, Clone, PartialEq)]
pub struct BalanceAdjustment {
    pub account_id: Uuid,
    pub delta: Decimal,
    /// Version the caller read. `None` applies the change unconditionally,
    /// which is only used for credits.
    pub expected_version: Option<i64>,
}

/// Insert a new entity, or replace one that is still in `expected_status`
#[derive(Debug, Clone, PartialEq)]
pub enum EntityWrite<T, S> {
    Insert(T),
    Update { entity: T, expected_status: S },
}

impl<T, S> EntityWrite<T, S> {
    pub fn entity(&self) -> &T {
        match self {
            EntityWrite::Insert(entity) => entity,
            EntityWrite::Update { entity, .. } => entity,
        }
    }
}

pub type TransferWrite = EntityWrite<Transfer, TransferStatus>;
pub type MoneyRequestWrite = EntityWrite<MoneyRequest, MoneyRequestStatus>;

/// Everything one ledger operation changes
#[derive(Debug, Default, Clone)]
pub struct UnitOfWork {
    adjustments: Vec<BalanceAdjustment>,
    transactions: Vec<LedgerTransaction>,
    transfer: Option<TransferWrite>,
    money_request: Option<MoneyRequestWrite>,
}

impl UnitOfWork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Debit `amount` from an account, guarded by the version it was read at
    pub fn debit(mut self, account: &Account, amount: Decimal) -> Self {
        self.adjustments.push(BalanceAdjustment {
            account_id: account.id(),
            delta: -amount,
            expected_version: Some(account.version()),
        });
        self
    }

    /// Credit `amount` to an account
    pub fn credit(mut self, account_id: Uuid, amount: Decimal) -> Self {
        self.adjustments.push(BalanceAdjustment {
            account_id,
            delta: amount,
            expected_version: None,
        });
        self
    }

    pub fn record(mut self, transaction: LedgerTransaction) -> Self {
        self.transactions.push(transaction);
        self
    }

    pub fn insert_transfer(mut self, transfer: Transfer) -> Self {
        self.transfer = Some(EntityWrite::Insert(transfer));
        self
    }

    pub fn update_transfer(mut self, transfer: Transfer, expected_status: TransferStatus) -> Self {
        self.transfer = Some(EntityWrite::Update {
            entity: transfer,
            expected_status,
        });
        self
    }

    pub fn insert_money_request(mut self, request: MoneyRequest) -> Self {
        self.money_request = Some(EntityWrite::Insert(request));
        self
    }

    pub fn update_money_request(
        mut self,
        request: MoneyRequest,
        expected_status: MoneyRequestStatus,
    ) -> Self {
        self.money_request = Some(EntityWrite::Update {
            entity: request,
            expected_status,
        });
        self
    }

    /// Adjustments merged per account and sorted by ascending account id,
    /// the order in which stores must lock them.
    pub fn ordered_adjustments(&self) -> Vec<BalanceAdjustment> {
        let mut merged: BTreeMap<Uuid, BalanceAdjustment> = BTreeMap::new();
        for adjustment in &self.adjustments {
            merged
                .entry(adjustment.account_id)
                .and_modify(|existing| {
                    existing.delta += adjustment.delta;
                    if existing.expected_version.is_none() {
                        existing.expected_version = adjustment.expected_version;
                    }
                })
                .or_insert_with(|| adjustment.clone());
        }
        merged.into_values().collect()
    }

    pub fn transactions(&self) -> &[LedgerTransaction] {
        &self.transactions
    }

    pub fn transfer(&self) -> Option<&TransferWrite> {
        self.transfer.as_ref()
    }

    pub fn money_request(&self) -> Option<&MoneyRequestWrite> {
        self.money_request.as_ref()
    }

    /// Reference numbers this unit introduces
    pub fn new_references(&self) -> Vec<&str> {
        let mut references: Vec<&str> = self
            .transactions
            .iter()
            .map(|t| t.reference_number.as_str())
            .collect();
        if let Some(EntityWrite::Insert(transfer)) = &self.transfer {
            references.push(&transfer.reference_number);
        }
        if let Some(EntityWrite::Insert(request)) = &self.money_request {
            references.push(&request.reference_number);
        }
        references
    }

    pub fn is_empty(&self) -> bool {
        self.adjustments.is_empty()
            && self.transactions.is_empty()
            && self.transfer.is_none()
            && self.money_request.is_none()
    }
}

/// Validate one adjustment against the locked account state and produce the
/// account's next version. Shared by every store implementation.
pub(crate) fn apply_adjustment(
    account: &Account,
    adjustment: &BalanceAdjustment,
) -> Result<Account, StoreError> {
    if let Some(expected) = adjustment.expected_version {
        if expected != account.version() {
            return Err(StoreError::VersionConflict {
                account_id: account.id(),
                expected,
                actual: account.version(),
            });
        }
    }

    // Frozen accounts may still be refunded; closed ones take nothing
    if adjustment.delta > Decimal::ZERO && account.status() == AccountStatus::Closed {
        return Err(StoreError::AccountInactive {
            account_id: account.id(),
            status: account.status().as_str().to_string(),
        });
    }

    if adjustment.delta < Decimal::ZERO {
        if account.status() != AccountStatus::Active {
            return Err(StoreError::AccountInactive {
                account_id: account.id(),
                status: account.status().as_str().to_string(),
            });
        }
        let available = account.balance().value();
        if available + adjustment.delta < Decimal::ZERO {
            return Err(StoreError::InsufficientFunds {
                account_id: account.id(),
                required: -adjustment.delta,
                available,
            });
        }
    }

    account.apply_delta(adjustment.delta).map_err(|e| match e {
        AmountError::BalanceOverflow => StoreError::BalanceLimitExceeded {
            account_id: account.id(),
        },
        other => StoreError::Corrupt(format!("account {}: {other}", account.id())),
    })
}

// =========================================================================
// Store traits
// =========================================================================

/// Per-account balance state with atomic, versioned mutation
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Account for (owner, currency), or `NoCurrencyAccount`
    async fn get_account(&self, owner_id: Uuid, currency: &Currency) -> Result<Account, StoreError> {
        self.find_account(owner_id, currency)
            .await?
            .ok_or_else(|| StoreError::NoCurrencyAccount {
                owner_id,
                currency: currency.to_string(),
            })
    }

    async fn find_account(
        &self,
        owner_id: Uuid,
        currency: &Currency,
    ) -> Result<Option<Account>, StoreError>;

    async fn get_account_by_id(&self, account_id: Uuid) -> Result<Option<Account>, StoreError>;

    async fn list_accounts(&self, owner_id: Uuid) -> Result<Vec<Account>, StoreError>;

    /// Open an account; `DuplicateAccount` if (owner, currency) is taken
    async fn create_account(&self, owner_id: Uuid, currency: &Currency) -> Result<Account, StoreError>;

    /// Apply a signed delta to one account, returning the new state.
    ///
    /// Fails with `VersionConflict` when the account moved past
    /// `expected_version` and with `InsufficientFunds` when the balance would
    /// go negative.
    async fn adjust_balance(
        &self,
        account_id: Uuid,
        delta: Decimal,
        expected_version: i64,
    ) -> Result<Account, StoreError>;
}

/// Full ledger persistence: accounts plus transfers, requests and entries
#[async_trait]
pub trait LedgerStore: AccountStore {
    /// Commit every change in `work` atomically, or none of them
    async fn commit(&self, work: UnitOfWork) -> Result<(), StoreError>;

    async fn get_transfer(&self, transfer_id: Uuid) -> Result<Option<Transfer>, StoreError>;

    async fn list_transfers(&self, owner_id: Uuid) -> Result<Vec<Transfer>, StoreError>;

    async fn get_money_request(&self, request_id: Uuid) -> Result<Option<MoneyRequest>, StoreError>;

    async fn get_money_request_by_token(
        &self,
        token: &str,
    ) -> Result<Option<MoneyRequest>, StoreError>;

    /// Entries on one account, newest first
    async fn transactions_by_account(
        &self,
        account_id: Uuid,
    ) -> Result<Vec<LedgerTransaction>, StoreError>;

    /// Entries across all of a user's accounts, newest first
    async fn transactions_by_user(&self, user_id: Uuid) -> Result<Vec<LedgerTransaction>, StoreError>;

    /// Whether any transfer, entry or request already uses `reference`
    async fn reference_exists(&self, reference: &str) -> Result<bool, StoreError>;

    /// Store `expired` on every pending request overdue at `now`,
    /// returning the requests that changed
    async fn expire_money_requests(&self, now: DateTime<Utc>) -> Result<Vec<MoneyRequest>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_ordered_adjustments_merge_and_sort() {
        let usd = Currency::new("USD").unwrap();
        let payer = Account::open(Uuid::new_v4(), usd.clone());
        let other = Uuid::new_v4();

        let work = UnitOfWork::new()
            .credit(other, dec!(5))
            .debit(&payer, dec!(20))
            .credit(payer.id(), dec!(3))
            .credit(other, dec!(7));

        let ordered = work.ordered_adjustments();
        assert_eq!(ordered.len(), 2);
        assert!(ordered[0].account_id < ordered[1].account_id);

        let payer_adj = ordered
            .iter()
            .find(|a| a.account_id == payer.id())
            .unwrap();
        assert_eq!(payer_adj.delta, dec!(-17));
        assert_eq!(payer_adj.expected_version, Some(payer.version()));

        let other_adj = ordered.iter().find(|a| a.account_id == other).unwrap();
        assert_eq!(other_adj.delta, dec!(12));
        assert_eq!(other_adj.expected_version, None);
    }

    #[test]
    fn test_apply_adjustment_checks_version_and_balance() {
        let account = Account::open(Uuid::new_v4(), Currency::new("USD").unwrap())
            .apply_delta(dec!(50))
            .unwrap();

        let stale = BalanceAdjustment {
            account_id: account.id(),
            delta: dec!(-10),
            expected_version: Some(account.version() - 1),
        };
        assert!(apply_adjustment(&account, &stale).unwrap_err().is_version_conflict());

        let overdraft = BalanceAdjustment {
            account_id: account.id(),
            delta: dec!(-50.01),
            expected_version: Some(account.version()),
        };
        assert!(matches!(
            apply_adjustment(&account, &overdraft),
            Err(StoreError::InsufficientFunds { .. })
        ));

        let credit = BalanceAdjustment {
            account_id: account.id(),
            delta: dec!(25),
            expected_version: None,
        };
        let next = apply_adjustment(&account, &credit).unwrap();
        assert_eq!(next.balance().value(), dec!(75));
        assert_eq!(next.version(), account.version() + 1);
    }

    #[test]
    fn test_inactive_account_accepts_credit_only() {
        let account = Account::open(Uuid::new_v4(), Currency::new("USD").unwrap())
            .apply_delta(dec!(50))
            .unwrap()
            .with_status(AccountStatus::Frozen);

        let debit = BalanceAdjustment {
            account_id: account.id(),
            delta: dec!(-1),
            expected_version: Some(account.version()),
        };
        assert!(matches!(
            apply_adjustment(&account, &debit),
            Err(StoreError::AccountInactive { .. })
        ));

        let refund = BalanceAdjustment {
            account_id: account.id(),
            delta: dec!(1),
            expected_version: None,
        };
        assert!(apply_adjustment(&account, &refund).is_ok());
    }

    #[test]
    fn test_closed_account_rejects_credit() {
        let account = Account::open(Uuid::new_v4(), Currency::new("EUR").unwrap())
            .with_status(AccountStatus::Closed);

        let credit = BalanceAdjustment {
            account_id: account.id(),
            delta: dec!(20),
            expected_version: None,
        };
        assert!(matches!(
            apply_adjustment(&account, &credit),
            Err(StoreError::AccountInactive { .. })
        ));
    }

    #[test]
    fn test_balance_limit_is_a_typed_error() {
        let now = Utc::now();
        let account = Account::from_db_state(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Currency::new("IDR").unwrap(),
            crate::domain::amount::MAX_BALANCE - dec!(1),
            AccountStatus::Active,
            7,
            now,
            now,
        )
        .unwrap();

        let credit = BalanceAdjustment {
            account_id: account.id(),
            delta: dec!(5),
            expected_version: None,
        };
        let err = apply_adjustment(&account, &credit).unwrap_err();
        assert!(matches!(err, StoreError::BalanceLimitExceeded { .. }));
        assert!(matches!(
            err.into_ledger_error(Uuid::new_v4()),
            crate::domain::LedgerError::Validation { ref field, .. } if field == "amount"
        ));
    }

    #[test]
    fn test_empty_unit_of_work() {
        assert!(UnitOfWork::new().is_empty());
        assert!(!UnitOfWork::new().credit(Uuid::new_v4(), dec!(1)).is_empty());
    }
}
