//! MoneyRequest Aggregate
//!
//! A request for payment between two platform users. A request with no
//! designated payer is an open payment link that anyone except the requester
//! may settle. Requests are payable at most once and only until they expire.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{Currency, LedgerError, MoneyRequestStatus, StateMachine};

use super::Aggregate;

/// Lifetime of a request from creation
pub const MONEY_REQUEST_TTL_DAYS: i64 = 30;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoneyRequest {
    pub id: Uuid,
    /// User who will receive the money
    pub requester_id: Uuid,
    /// User asked to pay; `None` for payment links
    pub recipient_id: Option<Uuid>,
    pub amount: Decimal,
    pub currency: Currency,
    pub description: Option<String>,
    pub(crate) status: MoneyRequestStatus,
    pub reference_number: String,
    pub payment_link_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub paid_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MoneyRequest {
    /// Stored status, which may lag behind expiry
    pub fn stored_status(&self) -> MoneyRequestStatus {
        self.status
    }

    /// Status as seen by readers: overdue pending requests are expired
    pub fn effective_status(&self, now: DateTime<Utc>) -> MoneyRequestStatus {
        if self.status == MoneyRequestStatus::Pending && now >= self.expires_at {
            MoneyRequestStatus::Expired
        } else {
            self.status
        }
    }

    /// Copy with the stored status replaced by the effective one
    pub fn as_seen_at(&self, now: DateTime<Utc>) -> MoneyRequest {
        Self {
            status: self.effective_status(now),
            ..self.clone()
        }
    }

    /// Expiry for a request created at `now`
    pub fn expiry_from(now: DateTime<Utc>) -> DateTime<Utc> {
        now + Duration::days(MONEY_REQUEST_TTL_DAYS)
    }

    /// Check whether `payer_id` may settle this request right now.
    ///
    /// Order matters: a request that already left `pending` is a conflict,
    /// an overdue one is a validation failure.
    pub fn ensure_payable_by(&self, payer_id: Uuid, now: DateTime<Utc>) -> Result<(), LedgerError> {
        if self.status != MoneyRequestStatus::Pending {
            return Err(LedgerError::conflict(format!(
                "money request {} is {}",
                self.id, self.status
            )));
        }
        if self.effective_status(now) == MoneyRequestStatus::Expired {
            return Err(LedgerError::validation(
                "expires_at",
                format!("money request {} expired at {}", self.id, self.expires_at),
            ));
        }
        if payer_id == self.requester_id {
            return Err(LedgerError::validation(
                "payer_id",
                "requester cannot pay their own request",
            ));
        }
        if let Some(recipient_id) = self.recipient_id {
            if recipient_id != payer_id {
                return Err(LedgerError::validation(
                    "payer_id",
                    "request is addressed to a different user",
                ));
            }
        }
        Ok(())
    }

    fn transition(&self, next: MoneyRequestStatus, now: DateTime<Utc>) -> Result<MoneyRequest, LedgerError> {
        let status = self.effective_status(now).transition(next)?;
        Ok(Self {
            status,
            updated_at: now,
            ..self.clone()
        })
    }

    /// `pending -> paid`
    pub fn mark_paid(&self, payer_id: Uuid, now: DateTime<Utc>) -> Result<MoneyRequest, LedgerError> {
        self.ensure_payable_by(payer_id, now)?;
        let mut next = self.transition(MoneyRequestStatus::Paid, now)?;
        next.paid_at = Some(now);
        next.paid_by = Some(payer_id);
        Ok(next)
    }

    /// `pending -> cancelled`; an overdue request has already expired
    pub fn cancel(&self, now: DateTime<Utc>) -> Result<MoneyRequest, LedgerError> {
        self.transition(MoneyRequestStatus::Cancelled, now)
    }

    /// `pending -> expired`, only once the expiry has passed
    pub fn expire(&self, now: DateTime<Utc>) -> Result<MoneyRequest, LedgerError> {
        if now < self.expires_at {
            return Err(LedgerError::conflict(format!(
                "money request {} has not expired yet",
                self.id
            )));
        }
        let status = self.status.transition(MoneyRequestStatus::Expired)?;
        Ok(Self {
            status,
            updated_at: now,
            ..self.clone()
        })
    }
}

impl Aggregate for MoneyRequest {
    fn aggregate_type() -> &'static str {
        "MoneyRequest"
    }

    fn id(&self) -> Uuid {
        self.id
    }
}
