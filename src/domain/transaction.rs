//! Ledger transactions
//!
//! A ledger transaction is the immutable record of one account balance
//! change. Records are appended in the same unit of work as the balance
//! change they describe and are never updated afterwards.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::amount::Amount;
use super::currency::Currency;
use super::status::UnknownStatus;

/// Business type of a ledger transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Deposit,
    Withdrawal,
    Transfer,
    Fee,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Deposit => "DEPOSIT",
            TransactionType::Withdrawal => "WITHDRAWAL",
            TransactionType::Transfer => "TRANSFER",
            TransactionType::Fee => "FEE",
        }
    }

    /// Direction of a directly requested transaction of this type on the
    /// customer's account. Only deposits add money.
    pub fn customer_direction(&self) -> EntryDirection {
        match self {
            TransactionType::Deposit => EntryDirection::Credit,
            TransactionType::Withdrawal | TransactionType::Transfer | TransactionType::Fee => {
                EntryDirection::Debit
            }
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DEPOSIT" => Ok(TransactionType::Deposit),
            "WITHDRAWAL" => Ok(TransactionType::Withdrawal),
            "TRANSFER" => Ok(TransactionType::Transfer),
            "FEE" => Ok(TransactionType::Fee),
            _ => Err(UnknownStatus {
                entity: "transaction type",
                value: s.to_string(),
            }),
        }
    }
}

/// Side of the balance change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryDirection {
    Credit,
    Debit,
}

impl EntryDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryDirection::Credit => "credit",
            EntryDirection::Debit => "debit",
        }
    }

    /// Signed balance delta for `amount` in this direction
    pub fn delta(&self, amount: &Amount) -> Decimal {
        match self {
            EntryDirection::Credit => amount.as_credit(),
            EntryDirection::Debit => amount.as_debit(),
        }
    }
}

impl FromStr for EntryDirection {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "credit" => Ok(EntryDirection::Credit),
            "debit" => Ok(EntryDirection::Debit),
            other => Err(UnknownStatus {
                entity: "entry direction",
                value: other.to_string(),
            }),
        }
    }
}

/// `Compensating` marks an entry that undoes an earlier one (a released
/// reservation, a refunded payout).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Completed,
    Compensating,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Completed => "completed",
            TransactionStatus::Compensating => "compensating",
        }
    }
}

impl FromStr for TransactionStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "completed" => Ok(TransactionStatus::Completed),
            "compensating" => Ok(TransactionStatus::Compensating),
            other => Err(UnknownStatus {
                entity: "transaction",
                value: other.to_string(),
            }),
        }
    }
}

/// One balance change on one account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerTransaction {
    pub id: Uuid,
    pub account_id: Uuid,
    /// Owner of `account_id`, denormalized for per-user history
    pub user_id: Uuid,
    pub transaction_type: TransactionType,
    pub direction: EntryDirection,
    /// Always positive; `direction` carries the sign
    pub amount: Decimal,
    pub currency: Currency,
    pub transfer_id: Option<Uuid>,
    pub money_request_id: Option<Uuid>,
    pub reference_number: String,
    pub status: TransactionStatus,
    pub description: Option<String>,
    pub processed_at: DateTime<Utc>,
}

impl LedgerTransaction {
    pub fn new(
        account_id: Uuid,
        user_id: Uuid,
        currency: Currency,
        transaction_type: TransactionType,
        direction: EntryDirection,
        amount: &Amount,
        reference_number: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id,
            user_id,
            transaction_type,
            direction,
            amount: amount.value(),
            currency,
            transfer_id: None,
            money_request_id: None,
            reference_number,
            status: TransactionStatus::Completed,
            description: None,
            processed_at: Utc::now(),
        }
    }

    pub fn with_transfer(mut self, transfer_id: Uuid) -> Self {
        self.transfer_id = Some(transfer_id);
        self
    }

    pub fn with_money_request(mut self, money_request_id: Uuid) -> Self {
        self.money_request_id = Some(money_request_id);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn compensating(mut self) -> Self {
        self.status = TransactionStatus::Compensating;
        self
    }

    /// Balance delta this entry represents
    pub fn signed_amount(&self) -> Decimal {
        match self.direction {
            EntryDirection::Credit => self.amount,
            EntryDirection::Debit => -self.amount,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn usd() -> Currency {
        Currency::new("USD").unwrap()
    }

    #[test]
    fn test_transaction_type_parse_is_case_insensitive() {
        assert_eq!("deposit".parse::<TransactionType>(), Ok(TransactionType::Deposit));
        assert_eq!("FEE".parse::<TransactionType>(), Ok(TransactionType::Fee));
        assert!("REFUND".parse::<TransactionType>().is_err());
    }

    #[test]
    fn test_customer_direction() {
        assert_eq!(TransactionType::Deposit.customer_direction(), EntryDirection::Credit);
        assert_eq!(TransactionType::Withdrawal.customer_direction(), EntryDirection::Debit);
        assert_eq!(TransactionType::Fee.customer_direction(), EntryDirection::Debit);
    }

    #[test]
    fn test_signed_amount() {
        let amount = Amount::new(dec!(12.34)).unwrap();
        let debit = LedgerTransaction::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            usd(),
            TransactionType::Withdrawal,
            EntryDirection::Debit,
            &amount,
            "TXN-1".to_string(),
        );
        assert_eq!(debit.signed_amount(), dec!(-12.34));
        assert_eq!(EntryDirection::Credit.delta(&amount), dec!(12.34));
    }

    #[test]
    fn test_builder_links_and_status() {
        let transfer_id = Uuid::new_v4();
        let entry = LedgerTransaction::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            usd(),
            TransactionType::Transfer,
            EntryDirection::Credit,
            &Amount::from_integer(5).unwrap(),
            "TXN-2".to_string(),
        )
        .with_transfer(transfer_id)
        .with_description("reservation released")
        .compensating();

        assert_eq!(entry.transfer_id, Some(transfer_id));
        assert_eq!(entry.status, TransactionStatus::Compensating);
        assert_eq!(entry.description.as_deref(), Some("reservation released"));
    }

    #[test]
    fn test_transaction_type_serializes_upper_case() {
        let json = serde_json::to_string(&TransactionType::Withdrawal).unwrap();
        assert_eq!(json, r#""WITHDRAWAL""#);
    }
}
