//! Payout pipeline
//!
//! Hands reserved transfer funds to the external payout rail. The transfer
//! reference number doubles as the idempotency key, so resubmitting the same
//! transfer after a transient failure cannot pay twice.

use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::aggregate::Transfer;
use crate::domain::Currency;

/// What the payout rail is asked to deliver
#[derive(Debug, Clone, PartialEq)]
pub struct PayoutInstruction {
    pub transfer_id: Uuid,
    /// Idempotency key on the rail
    pub reference: String,
    pub recipient_name: String,
    pub recipient_account: String,
    pub country: String,
    pub currency: Currency,
    pub amount: Decimal,
}

impl From<&Transfer> for PayoutInstruction {
    fn from(transfer: &Transfer) -> Self {
        Self {
            transfer_id: transfer.id,
            reference: transfer.reference_number.clone(),
            recipient_name: transfer.recipient.name.clone(),
            recipient_account: transfer.recipient.account_number.clone(),
            country: transfer.recipient.country.to_string(),
            currency: transfer.destination_currency.clone(),
            amount: transfer.destination_amount,
        }
    }
}

/// Definitive answer from the rail
#[derive(Debug, Clone, PartialEq)]
pub enum PayoutOutcome {
    Accepted { payout_reference: String },
    Rejected { reason: String },
}

/// The rail could not be reached or did not answer; retry later
#[derive(Debug, thiserror::Error)]
#[error("payout gateway unavailable: {0}")]
pub struct PayoutUnavailable(pub String);

#[async_trait]
pub trait PayoutGateway: Send + Sync {
    async fn submit(&self, instruction: PayoutInstruction) -> Result<PayoutOutcome, PayoutUnavailable>;
}

/// Accepts every payout and logs it
#[derive(Debug, Default, Clone)]
pub struct LoggingPayoutGateway;

#[async_trait]
impl PayoutGateway for LoggingPayoutGateway {
    async fn submit(&self, instruction: PayoutInstruction) -> Result<PayoutOutcome, PayoutUnavailable> {
        tracing::info!(
            transfer_id = %instruction.transfer_id,
            reference = %instruction.reference,
            amount = %instruction.amount,
            currency = %instruction.currency,
            country = %instruction.country,
            "Payout submitted"
        );
        Ok(PayoutOutcome::Accepted {
            payout_reference: format!("PO-{}", instruction.reference),
        })
    }
}
