//! Transfer Aggregate
//!
//! A cross-currency payout to an external recipient. The source amount is
//! reserved (debited) when the transfer is created; the transfer then ends in
//! exactly one of `completed`, `cancelled` or `failed`.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{CountryCode, Currency, LedgerError, StateMachine, TransferStatus};

use super::Aggregate;

/// Promised delivery window from creation
pub const TRANSFER_ARRIVAL_HOURS: i64 = 24;

/// External beneficiary of a transfer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipient {
    pub name: String,
    pub account_number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bank_name: Option<String>,
    pub country: CountryCode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transfer {
    pub id: Uuid,
    pub owner_id: Uuid,
    /// Account the reservation was taken from
    pub source_account_id: Uuid,
    pub recipient: Recipient,
    pub source_currency: Currency,
    pub destination_currency: Currency,
    pub source_amount: Decimal,
    pub destination_amount: Decimal,
    pub exchange_rate: Decimal,
    /// Rate came from the static fallback table, not the live source
    pub rate_is_fallback: bool,
    /// Fee in the source currency
    pub fee: Decimal,
    pub purpose: String,
    pub(crate) status: TransferStatus,
    pub reference_number: String,
    pub payout_reference: Option<String>,
    /// Set once the payout has been handed to the gateway. A submitted
    /// payout can still complete or fail but can no longer be cancelled.
    #[serde(default)]
    pub payout_submitted_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub estimated_arrival: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transfer {
    pub fn status(&self) -> TransferStatus {
        self.status
    }

    /// Net amount handed to payout, in the source currency
    pub fn payout_amount(&self) -> Decimal {
        self.source_amount - self.fee
    }

    fn transition(&self, next: TransferStatus, now: DateTime<Utc>) -> Result<Transfer, LedgerError> {
        let status = self.status.transition(next)?;
        Ok(Self {
            status,
            updated_at: now,
            ..self.clone()
        })
    }

    /// `pending -> completed`, stamping `processed_at`
    pub fn complete(&self, payout_reference: String, now: DateTime<Utc>) -> Result<Transfer, LedgerError> {
        let mut next = self.transition(TransferStatus::Completed, now)?;
        next.payout_reference = Some(payout_reference);
        next.processed_at = Some(now);
        Ok(next)
    }

    /// Record that the payout is about to be submitted. Stays `pending`;
    /// a transfer already marked keeps its first submission time.
    pub fn mark_payout_submitted(&self, now: DateTime<Utc>) -> Result<Transfer, LedgerError> {
        self.status.transition(TransferStatus::Completed)?;
        Ok(Self {
            payout_submitted_at: self.payout_submitted_at.or(Some(now)),
            updated_at: now,
            ..self.clone()
        })
    }

    pub fn payout_submitted(&self) -> bool {
        self.payout_submitted_at.is_some()
    }

    /// `pending -> cancelled`, only before the payout was submitted
    pub fn cancel(&self, now: DateTime<Utc>) -> Result<Transfer, LedgerError> {
        if let Some(submitted_at) = self.payout_submitted_at {
            return Err(LedgerError::conflict(format!(
                "transfer {} payout was submitted at {}",
                self.id, submitted_at
            )));
        }
        self.transition(TransferStatus::Cancelled, now)
    }

    /// `pending -> failed`
    pub fn fail(&self, reason: impl Into<String>, now: DateTime<Utc>) -> Result<Transfer, LedgerError> {
        let mut next = self.transition(TransferStatus::Failed, now)?;
        next.failure_reason = Some(reason.into());
        Ok(next)
    }

    /// Default arrival estimate for a transfer created at `now`
    pub fn arrival_estimate(now: DateTime<Utc>) -> DateTime<Utc> {
        now + Duration::hours(TRANSFER_ARRIVAL_HOURS)
    }
}

impl Aggregate for Transfer {
    fn aggregate_type() -> &'static str {
        "Transfer"
    }

    fn id(&self) -> Uuid {
        self.id
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    pub(crate) fn pending_transfer() -> Transfer {
        let now = Utc::now();
        Transfer {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            source_account_id: Uuid::new_v4(),
            recipient: Recipient {
                name: "Ana Souza".to_string(),
                account_number: "DE89370400440532013000".to_string(),
                bank_name: None,
                country: CountryCode::new("DE").unwrap(),
            },
            source_currency: Currency::new("USD").unwrap(),
            destination_currency: Currency::new("EUR").unwrap(),
            source_amount: dec!(100.00),
            destination_amount: dec!(82.88),
            exchange_rate: dec!(0.85),
            rate_is_fallback: false,
            fee: dec!(2.50),
            purpose: "gift".to_string(),
            status: TransferStatus::Pending,
            reference_number: "TRF-TEST".to_string(),
            payout_reference: None,
            payout_submitted_at: None,
            failure_reason: None,
            estimated_arrival: Transfer::arrival_estimate(now),
            processed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_complete_stamps_processed_at() {
        let now = Utc::now();
        let done = pending_transfer().complete("PO-1".to_string(), now).unwrap();

        assert_eq!(done.status(), TransferStatus::Completed);
        assert_eq!(done.processed_at, Some(now));
        assert_eq!(done.payout_reference.as_deref(), Some("PO-1"));
    }

    #[test]
    fn test_cancel_completed_transfer_conflicts() {
        let done = pending_transfer()
            .complete("PO-1".to_string(), Utc::now())
            .unwrap();
        let before = done.clone();

        let err = done.cancel(Utc::now()).unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(done, before);
    }

    #[test]
    fn test_submitted_payout_blocks_cancel() {
        let first = Utc::now();
        let marked = pending_transfer().mark_payout_submitted(first).unwrap();
        assert_eq!(marked.status(), TransferStatus::Pending);
        assert!(marked.payout_submitted());

        let err = marked.cancel(Utc::now()).unwrap_err();
        assert!(err.is_conflict());

        // Resubmission keeps the original time and can still settle either way
        let again = marked.mark_payout_submitted(first + Duration::seconds(30)).unwrap();
        assert_eq!(again.payout_submitted_at, Some(first));
        assert!(again.fail("rejected", Utc::now()).is_ok());
        assert!(again.complete("PO-2".to_string(), Utc::now()).is_ok());
    }

    #[test]
    fn test_mark_payout_on_terminal_transfer_conflicts() {
        let cancelled = pending_transfer().cancel(Utc::now()).unwrap();
        assert!(cancelled.mark_payout_submitted(Utc::now()).unwrap_err().is_conflict());
    }

    #[test]
    fn test_fail_records_reason() {
        let failed = pending_transfer().fail("beneficiary bank closed", Utc::now()).unwrap();
        assert_eq!(failed.status(), TransferStatus::Failed);
        assert_eq!(failed.failure_reason.as_deref(), Some("beneficiary bank closed"));
    }

    #[test]
    fn test_payout_amount_excludes_fee() {
        assert_eq!(pending_transfer().payout_amount(), dec!(97.50));
    }

    #[test]
    fn test_arrival_estimate_is_one_day_out() {
        let now = Utc::now();
        assert_eq!(Transfer::arrival_estimate(now) - now, Duration::hours(24));
    }
}
