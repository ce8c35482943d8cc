//! Account Aggregate
//!
//! One balance per (owner, currency). Every mutation bumps the version so
//! concurrent writers can detect each other.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::{Amount, AmountError, Balance, Currency, LedgerError, UnknownStatus};

use super::Aggregate;

/// Account status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    #[default]
    Active,
    Frozen,
    Closed,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Frozen => "frozen",
            AccountStatus::Closed => "closed",
        }
    }
}

impl FromStr for AccountStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(AccountStatus::Active),
            "frozen" => Ok(AccountStatus::Frozen),
            "closed" => Ok(AccountStatus::Closed),
            other => Err(UnknownStatus {
                entity: "account",
                value: other.to_string(),
            }),
        }
    }
}

/// Account Aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    id: Uuid,
    owner_id: Uuid,
    currency: Currency,
    balance: Balance,
    status: AccountStatus,
    /// Incremented on every balance or status change
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Account {
    /// Open a new, empty, active account
    pub fn open(owner_id: Uuid, currency: Currency) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner_id,
            currency,
            balance: Balance::zero(),
            status: AccountStatus::Active,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Rebuild an account from persisted state
    #[allow(clippy::too_many_arguments)]
    pub fn from_db_state(
        id: Uuid,
        owner_id: Uuid,
        currency: Currency,
        balance: Decimal,
        status: AccountStatus,
        version: i64,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Result<Self, AmountError> {
        Ok(Self {
            id,
            owner_id,
            currency,
            balance: Balance::new(balance)?,
            status,
            version,
            created_at,
            updated_at,
        })
    }

    /// Reject any balance change on frozen or closed accounts
    pub fn ensure_active(&self) -> Result<(), LedgerError> {
        match self.status {
            AccountStatus::Active => Ok(()),
            status => Err(LedgerError::conflict(format!(
                "account {} is {}",
                self.id,
                status.as_str()
            ))),
        }
    }

    /// Check that a debit of `amount` is allowed right now
    pub fn ensure_can_debit(&self, amount: &Amount) -> Result<(), LedgerError> {
        self.ensure_active()?;
        if !self.balance.is_sufficient_for(amount) {
            return Err(LedgerError::insufficient_funds(
                amount.value(),
                self.balance.value(),
            ));
        }
        Ok(())
    }

    /// Apply a signed delta, producing the next version of the account.
    /// Fails if the balance would drop below zero.
    pub fn apply_delta(&self, delta: Decimal) -> Result<Account, AmountError> {
        let balance = self.balance.apply_delta(delta)?;
        Ok(Self {
            balance,
            version: self.version + 1,
            updated_at: Utc::now(),
            ..self.clone()
        })
    }

    /// Produce the next version with a new status
    pub fn with_status(&self, status: AccountStatus) -> Account {
        Self {
            status,
            version: self.version + 1,
            updated_at: Utc::now(),
            ..self.clone()
        }
    }

    pub fn owner_id(&self) -> Uuid {
        self.owner_id
    }

    pub fn currency(&self) -> &Currency {
        &self.currency
    }

    pub fn balance(&self) -> &Balance {
        &self.balance
    }

    pub fn status(&self) -> AccountStatus {
        self.status
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

impl Aggregate for Account {
    fn aggregate_type() -> &'static str {
        "Account"
    }

    fn id(&self) -> Uuid {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn funded(balance: Decimal) -> Account {
        Account::open(Uuid::new_v4(), Currency::new("USD").unwrap())
            .apply_delta(balance)
            .unwrap()
    }

    #[test]
    fn test_account_open() {
        let owner = Uuid::new_v4();
        let account = Account::open(owner, Currency::new("EUR").unwrap());

        assert_eq!(account.owner_id(), owner);
        assert_eq!(account.currency().as_str(), "EUR");
        assert_eq!(account.balance().value(), Decimal::ZERO);
        assert_eq!(account.status(), AccountStatus::Active);
        assert_eq!(account.version(), 1);
    }

    #[test]
    fn test_apply_delta_bumps_version() {
        let account = funded(dec!(100));
        assert_eq!(account.version(), 2);

        let account = account.apply_delta(dec!(-30)).unwrap();
        assert_eq!(account.balance().value(), dec!(70));
        assert_eq!(account.version(), 3);
    }

    #[test]
    fn test_apply_delta_refuses_overdraft() {
        let account = funded(dec!(10));
        assert!(account.apply_delta(dec!(-10.01)).is_err());
    }

    #[test]
    fn test_ensure_can_debit() {
        let account = funded(dec!(30));
        let fifty = Amount::new(dec!(50)).unwrap();

        let err = account.ensure_can_debit(&fifty).unwrap_err();
        assert_eq!(err, LedgerError::insufficient_funds(dec!(50.00), dec!(30)));
        assert!(account.ensure_can_debit(&Amount::new(dec!(30)).unwrap()).is_ok());
    }

    #[test]
    fn test_frozen_account_rejects_debit() {
        let account = funded(dec!(100)).with_status(AccountStatus::Frozen);
        let result = account.ensure_can_debit(&Amount::from_integer(1).unwrap());
        assert!(matches!(result, Err(LedgerError::Conflict { .. })));
    }

    #[test]
    fn test_from_db_state_rejects_negative_balance() {
        let now = Utc::now();
        let result = Account::from_db_state(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Currency::new("USD").unwrap(),
            dec!(-1),
            AccountStatus::Active,
            1,
            now,
            now,
        );
        assert!(result.is_err());
    }
}
