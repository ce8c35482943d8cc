//! Ledger engine
//!
//! Composes the store, rate provider, state machines and reference
//! generator into the ledger's operations. Every operation validates its
//! input first, performs network I/O (rates, payouts) outside any lock, then
//! commits exactly one [`UnitOfWork`]. Audit records and notifications are
//! dispatched after the commit and never change the outcome.

mod accounts;
mod commands;
mod money_requests;
mod transactions;
mod transfers;


use std::collections::HashSet;
use std::future::Future;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use uuid::Uuid;

use crate::aggregate::Account;
use crate::audit::{AuditRecord, AuditSink, TracingAuditSink};
use crate::domain::{Amount, Currency, FeeSchedule, LedgerError, OperationContext};
use crate::fx::ExchangeRateProvider;
use crate::notification::{LogNotifier, Notification, NotificationService};
use crate::payout::{LoggingPayoutGateway, PayoutGateway};
use crate::reference::{ReferenceGenerator, ReferenceKind, UlidReferenceGenerator};
use crate::store::{LedgerStore, StoreError, UnitOfWork};

pub use commands::*;

/// Owner of the per-currency platform fee sink accounts
pub const FEE_SINK_OWNER: Uuid = Uuid::from_u128(0xfe);

/// Owner of the per-currency payout clearing accounts
pub const PAYOUT_CLEARING_OWNER: Uuid = Uuid::from_u128(0xc1);

/// Attempts at drawing a reference number not yet in the store
const MAX_REFERENCE_ATTEMPTS: u32 = 5;

/// Tunables that are not collaborators
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Total commit attempts when a versioned account moved underneath us
    pub max_retries: u32,
    /// Prefix for payment link URLs
    pub payment_link_base_url: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            payment_link_base_url: "http://localhost:3000/pay".to_string(),
        }
    }
}

/// Map store failures into the engine taxonomy under the operation's
/// correlation id
pub(crate) trait StoreResultExt<T> {
    fn in_context(self, context: &OperationContext) -> Result<T, LedgerError>;
}

impl<T> StoreResultExt<T> for Result<T, StoreError> {
    fn in_context(self, context: &OperationContext) -> Result<T, LedgerError> {
        self.map_err(|e| e.into_ledger_error(context.correlation_id))
    }
}

/// Transfers with a payout or cancellation in progress. Process and cancel
/// claim the transfer for their whole duration, so a payout is never
/// submitted for a transfer that is being cancelled.
#[derive(Debug, Default)]
struct InFlightTransfers(Mutex<HashSet<Uuid>>);

struct InFlightGuard {
    set: Arc<InFlightTransfers>,
    transfer_id: Uuid,
}

impl InFlightTransfers {
    fn claim(self: &Arc<Self>, transfer_id: Uuid) -> Option<InFlightGuard> {
        let mut set = self.0.lock().unwrap_or_else(|p| p.into_inner());
        if !set.insert(transfer_id) {
            return None;
        }
        Some(InFlightGuard {
            set: self.clone(),
            transfer_id,
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut set = self.set.0.lock().unwrap_or_else(|p| p.into_inner());
        set.remove(&self.transfer_id);
    }
}

/// The financial consistency engine
pub struct LedgerEngine {
    store: Arc<dyn LedgerStore>,
    rates: Arc<dyn ExchangeRateProvider>,
    references: Arc<dyn ReferenceGenerator>,
    notifier: Arc<dyn NotificationService>,
    audit: Arc<dyn AuditSink>,
    payouts: Arc<dyn PayoutGateway>,
    fees: FeeSchedule,
    settings: EngineSettings,
    in_flight: Arc<InFlightTransfers>,
}

impl LedgerEngine {
    /// Engine with default collaborators: ULID references, log-only
    /// notifications, tracing audit sink and an accept-all payout gateway
    pub fn new(store: Arc<dyn LedgerStore>, rates: Arc<dyn ExchangeRateProvider>) -> Self {
        Self {
            store,
            rates,
            references: Arc::new(UlidReferenceGenerator::new()),
            notifier: Arc::new(LogNotifier),
            audit: Arc::new(TracingAuditSink),
            payouts: Arc::new(LoggingPayoutGateway),
            fees: FeeSchedule::default(),
            settings: EngineSettings::default(),
            in_flight: Arc::new(InFlightTransfers::default()),
        }
    }

    pub fn with_reference_generator(mut self, references: Arc<dyn ReferenceGenerator>) -> Self {
        self.references = references;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationService>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_payout_gateway(mut self, payouts: Arc<dyn PayoutGateway>) -> Self {
        self.payouts = payouts;
        self
    }

    pub fn with_fee_schedule(mut self, fees: FeeSchedule) -> Self {
        self.fees = fees;
        self
    }

    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn fee_schedule(&self) -> &FeeSchedule {
        &self.fees
    }

    // =========================================================================
    // Unit of work with retry
    // =========================================================================

    /// Build and commit a unit of work, rebuilding it from fresh state when a
    /// versioned account changed between read and commit.
    async fn run_unit_of_work<T, F, Fut>(
        &self,
        context: &OperationContext,
        operation: &'static str,
        mut plan: F,
    ) -> Result<T, LedgerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(UnitOfWork, T), LedgerError>>,
    {
        let max_attempts = self.settings.max_retries.max(1);
        let mut attempt = 0;

        loop {
            let (work, output) = plan().await?;
            match self.store.commit(work).await {
                Ok(()) => return Ok(output),
                Err(e) if e.is_retryable() && attempt + 1 < max_attempts => {
                    attempt += 1;
                    tracing::warn!(
                        operation,
                        correlation_id = %context.correlation_id,
                        error = %e,
                        "Version conflict, retrying (attempt {}/{})",
                        attempt,
                        max_attempts
                    );
                    tokio::time::sleep(Duration::from_millis(50 * attempt as u64)).await;
                }
                Err(e) => {
                    if e.is_retryable() {
                        tracing::warn!(
                            operation,
                            correlation_id = %context.correlation_id,
                            "Version conflict persisted after {} attempts",
                            max_attempts
                        );
                    }
                    return Err(e.into_ledger_error(context.correlation_id));
                }
            }
        }
    }

    // =========================================================================
    // Shared helpers
    // =========================================================================

    /// Draw a reference number and confirm the store has not seen it
    async fn fresh_reference(
        &self,
        kind: ReferenceKind,
        context: &OperationContext,
    ) -> Result<String, LedgerError> {
        for _ in 0..MAX_REFERENCE_ATTEMPTS {
            let reference = self.references.next_reference(kind);
            if !self.store.reference_exists(&reference).await.in_context(context)? {
                return Ok(reference);
            }
            tracing::warn!(reference = %reference, "Reference number collision, drawing again");
        }
        Err(LedgerError::Infrastructure {
            correlation_id: context.correlation_id,
            message: format!("no unique {} reference after {MAX_REFERENCE_ATTEMPTS} attempts", kind.prefix()),
        })
    }

    /// Load or open the account for (owner, currency)
    async fn ensure_account(
        &self,
        owner_id: Uuid,
        currency: &Currency,
        context: &OperationContext,
    ) -> Result<Account, LedgerError> {
        if let Some(account) = self
            .store
            .find_account(owner_id, currency)
            .await
            .in_context(context)?
        {
            return Ok(account);
        }

        match self.store.create_account(owner_id, currency).await {
            Ok(account) => {
                tracing::info!(owner_id = %owner_id, currency = %currency, "Account opened on demand");
                Ok(account)
            }
            // Lost a race with another opener
            Err(StoreError::DuplicateAccount { .. }) => {
                self.store.get_account(owner_id, currency).await.in_context(context)
            }
            Err(e) => Err(e.into_ledger_error(context.correlation_id)),
        }
    }

    fn dispatch_audit(&self, record: AuditRecord) {
        let sink = self.audit.clone();
        tokio::spawn(async move {
            let action = record.action.clone();
            let correlation_id = record.correlation_id;
            if let Err(e) = sink.record(record).await {
                tracing::warn!(
                    action = %action,
                    correlation_id = %correlation_id,
                    error = %e,
                    "Failed to write audit record"
                );
            }
        });
    }

    fn dispatch_notification(&self, user_id: Uuid, notification: Notification) {
        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            let kind = notification.kind();
            if let Err(e) = notifier.notify(user_id, notification).await {
                tracing::warn!(user_id = %user_id, kind, error = %e, "Failed to send notification");
            }
        });
    }
}

// =========================================================================
// Input validation
// =========================================================================

pub(crate) fn parse_currency(field: &str, value: &str) -> Result<Currency, LedgerError> {
    Currency::new(value).map_err(|e| LedgerError::validation(field, e.to_string()))
}

pub(crate) fn parse_amount(field: &str, value: &str) -> Result<Amount, LedgerError> {
    Amount::from_str(value).map_err(|e| LedgerError::validation(field, e.to_string()))
}

/// Trimmed, non-empty text no longer than `max_len`
pub(crate) fn required_text(field: &str, value: &str, max_len: usize) -> Result<String, LedgerError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(LedgerError::validation(field, "must not be empty"));
    }
    if value.chars().count() > max_len {
        return Err(LedgerError::validation(
            field,
            format!("must be at most {max_len} characters"),
        ));
    }
    Ok(value.to_string())
}

/// Optional free text; blank becomes `None`
pub(crate) fn optional_text(
    field: &str,
    value: Option<&str>,
    max_len: usize,
) -> Result<Option<String>, LedgerError> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(v) => required_text(field, v, max_len).map(Some),
    }
}

/// Positive two-decimal amount from an already-computed value
pub(crate) fn money(field: &str, value: rust_decimal::Decimal) -> Result<Amount, LedgerError> {
    Amount::new(value).map_err(|e| LedgerError::validation(field, e.to_string()))
}
