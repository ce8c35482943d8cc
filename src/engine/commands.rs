//! Command definitions
//!
//! Commands carry caller input as received. Amounts and codes stay strings
//! until the engine validates them, so every rejection can name its field.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregate::MoneyRequest;
use crate::domain::{Currency, Pricing};
use crate::fx::ExchangeRate;

/// External beneficiary as supplied by the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipientInput {
    pub name: String,
    pub account_number: String,
    #[serde(default)]
    pub bank_name: Option<String>,
    pub country: String,
}

/// Command to send money abroad from one of the owner's balances
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTransferCommand {
    pub owner_id: Uuid,
    pub source_currency: String,
    pub destination_currency: String,
    /// Amount to send (as string for precise decimal)
    pub source_amount: String,
    pub recipient: RecipientInput,
    pub purpose: String,
}

/// Command to record a deposit, withdrawal, transfer or fee entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTransactionCommand {
    pub user_id: Uuid,
    pub currency: String,
    pub amount: String,
    /// `DEPOSIT`, `WITHDRAWAL`, `TRANSFER` or `FEE`
    pub transaction_type: String,
    /// Caller-supplied reference; generated when absent
    #[serde(default)]
    pub reference_number: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl CreateTransactionCommand {
    pub fn new(user_id: Uuid, currency: &str, amount: &str, transaction_type: &str) -> Self {
        Self {
            user_id,
            currency: currency.to_string(),
            amount: amount.to_string(),
            transaction_type: transaction_type.to_string(),
            reference_number: None,
            description: None,
        }
    }

    pub fn with_reference(mut self, reference: &str) -> Self {
        self.reference_number = Some(reference.to_string());
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }
}

/// Command to ask a specific user for money
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateMoneyRequestCommand {
    pub requester_id: Uuid,
    pub recipient_id: Uuid,
    pub amount: String,
    pub currency: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Command to create an open, shareable payment link
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePaymentLinkCommand {
    pub requester_id: Uuid,
    pub amount: String,
    pub currency: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Priced preview of a transfer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Quote {
    pub source_currency: Currency,
    pub destination_currency: Currency,
    pub source_amount: Decimal,
    pub fee: Decimal,
    pub net_amount: Decimal,
    pub exchange_rate: Decimal,
    pub destination_amount: Decimal,
    pub rate_is_fallback: bool,
    pub rate_as_of: DateTime<Utc>,
}

impl Quote {
    pub(crate) fn new(rate: &ExchangeRate, pricing: Pricing) -> Self {
        Self {
            source_currency: rate.from.clone(),
            destination_currency: rate.to.clone(),
            source_amount: pricing.source_amount,
            fee: pricing.fee,
            net_amount: pricing.net_amount,
            exchange_rate: pricing.rate,
            destination_amount: pricing.destination_amount,
            rate_is_fallback: rate.is_fallback(),
            rate_as_of: rate.as_of,
        }
    }
}

/// Money request reachable through a shareable URL
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentLink {
    pub token: String,
    pub url: String,
    pub request: MoneyRequest,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_command_builder() {
        let cmd = CreateTransactionCommand::new(Uuid::new_v4(), "USD", "100.00", "DEPOSIT")
            .with_reference("BANK-42")
            .with_description("salary");

        assert_eq!(cmd.reference_number.as_deref(), Some("BANK-42"));
        assert_eq!(cmd.description.as_deref(), Some("salary"));
    }

    #[test]
    fn test_transfer_command_deserializes_without_bank_name() {
        let json = r#"{
            "owner_id": "6a2f41a3-c54c-fce8-32d2-0324e1c32e22",
            "source_currency": "USD",
            "destination_currency": "EUR",
            "source_amount": "100.00",
            "recipient": {"name": "Ana", "account_number": "DE89", "country": "DE"},
            "purpose": "family support"
        }"#;
        let cmd: CreateTransferCommand = serde_json::from_str(json).unwrap();
        assert!(cmd.recipient.bank_name.is_none());
        assert_eq!(cmd.source_amount, "100.00");
    }
}
