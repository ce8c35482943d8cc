//! Transfer operations
//!
//! Funds are reserved (debited) when a transfer is created. Processing hands
//! the reservation to the payout rail and moves it into the fee sink and the
//! payout clearing account; cancellation or a rejected payout releases it
//! back to the source account with a compensating entry.

use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::aggregate::{Aggregate, Recipient, Transfer};
use crate::audit::{AuditAction, AuditLogBuilder};
use crate::domain::{
    CountryCode, EntryDirection, LedgerError, LedgerTransaction, OperationContext, StateMachine,
    TransactionType, TransferStatus,
};
use crate::notification::Notification;
use crate::payout::{PayoutInstruction, PayoutOutcome};
use crate::reference::ReferenceKind;
use crate::store::UnitOfWork;

use super::{
    money, parse_amount, parse_currency, required_text, CreateTransferCommand, LedgerEngine,
    Quote, RecipientInput, StoreResultExt, FEE_SINK_OWNER, PAYOUT_CLEARING_OWNER,
};

const MAX_NAME_LEN: usize = 140;
const MAX_ACCOUNT_NUMBER_LEN: usize = 64;
const MAX_PURPOSE_LEN: usize = 500;

fn parse_recipient(input: &RecipientInput) -> Result<Recipient, LedgerError> {
    let bank_name = match input.bank_name.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => Some(required_text("recipient.bank_name", name, MAX_NAME_LEN)?),
        _ => None,
    };
    Ok(Recipient {
        name: required_text("recipient.name", &input.name, MAX_NAME_LEN)?,
        account_number: required_text(
            "recipient.account_number",
            &input.account_number,
            MAX_ACCOUNT_NUMBER_LEN,
        )?,
        bank_name,
        country: CountryCode::new(&input.country)
            .map_err(|e| LedgerError::validation("recipient.country", e.to_string()))?,
    })
}

impl LedgerEngine {
    // =========================================================================
    // Quote
    // =========================================================================

    /// Price a transfer without touching any balance
    pub async fn quote(
        &self,
        from: &str,
        to: &str,
        amount: &str,
        context: &OperationContext,
    ) -> Result<Quote, LedgerError> {
        let from = parse_currency("from", from)?;
        let to = parse_currency("to", to)?;
        let amount = parse_amount("amount", amount)?;

        let rate = self.rates.get_rate(&from, &to).await?;
        if rate.is_fallback() {
            tracing::warn!(
                from = %from,
                to = %to,
                correlation_id = %context.correlation_id,
                "Quote priced at fallback rate"
            );
        }
        let pricing = self.fees.price(&amount, rate.rate)?;
        Ok(Quote::new(&rate, pricing))
    }

    // =========================================================================
    // CreateTransfer
    // =========================================================================

    /// Price a transfer and reserve its source amount
    pub async fn create_transfer(
        &self,
        command: CreateTransferCommand,
        context: &OperationContext,
    ) -> Result<Transfer, LedgerError> {
        // Validate everything before reading state
        let source_currency = parse_currency("source_currency", &command.source_currency)?;
        let destination_currency =
            parse_currency("destination_currency", &command.destination_currency)?;
        let amount = parse_amount("source_amount", &command.source_amount)?;
        let recipient = parse_recipient(&command.recipient)?;
        let purpose = required_text("purpose", &command.purpose, MAX_PURPOSE_LEN)?;

        let source = self
            .store
            .get_account(command.owner_id, &source_currency)
            .await
            .in_context(context)?;
        source.ensure_can_debit(&amount)?;

        // Rate is fixed here, outside the atomic section
        let rate = self
            .rates
            .get_rate(&source_currency, &destination_currency)
            .await?;
        if rate.is_fallback() {
            tracing::warn!(
                from = %source_currency,
                to = %destination_currency,
                rate = %rate.rate,
                correlation_id = %context.correlation_id,
                "Transfer priced at fallback rate"
            );
        }
        let pricing = self.fees.price(&amount, rate.rate)?;

        let now = Utc::now();
        let transfer = Transfer {
            id: Uuid::new_v4(),
            owner_id: command.owner_id,
            source_account_id: source.id(),
            recipient,
            source_currency: source_currency.clone(),
            destination_currency,
            source_amount: pricing.source_amount,
            destination_amount: pricing.destination_amount,
            exchange_rate: pricing.rate,
            rate_is_fallback: rate.is_fallback(),
            fee: pricing.fee,
            purpose,
            status: TransferStatus::Pending,
            reference_number: self.fresh_reference(ReferenceKind::Transfer, context).await?,
            payout_reference: None,
            payout_submitted_at: None,
            failure_reason: None,
            estimated_arrival: Transfer::arrival_estimate(now),
            processed_at: None,
            created_at: now,
            updated_at: now,
        };
        let entry_reference = self.fresh_reference(ReferenceKind::Transaction, context).await?;

        let store = &self.store;
        let transfer_ref = &transfer;
        let amount_ref = &amount;
        let entry_ref = &entry_reference;
        self.run_unit_of_work(context, "create_transfer", || async move {
            let source = store
                .get_account_by_id(transfer_ref.source_account_id)
                .await
                .in_context(context)?
                .ok_or_else(|| LedgerError::not_found("account", transfer_ref.source_account_id))?;
            source.ensure_can_debit(amount_ref)?;

            let reservation = LedgerTransaction::new(
                source.id(),
                source.owner_id(),
                source.currency().clone(),
                TransactionType::Transfer,
                EntryDirection::Debit,
                amount_ref,
                entry_ref.clone(),
            )
            .with_transfer(transfer_ref.id)
            .with_description(format!("Transfer {} reservation", transfer_ref.reference_number));

            let work = UnitOfWork::new()
                .debit(&source, amount_ref.value())
                .record(reservation)
                .insert_transfer(transfer_ref.clone());
            Ok((work, ()))
        })
        .await?;

        tracing::info!(
            transfer_id = %transfer.id,
            reference = %transfer.reference_number,
            source_amount = %transfer.source_amount,
            fee = %transfer.fee,
            destination_amount = %transfer.destination_amount,
            correlation_id = %context.correlation_id,
            "Transfer created"
        );
        self.dispatch_audit(
            AuditLogBuilder::new(AuditAction::TransferCreated)
                .resource_type(Transfer::aggregate_type())
                .resource_id(transfer.id)
                .after_state(&transfer)
                .build(context),
        );
        self.dispatch_notification(
            transfer.owner_id,
            Notification::TransferCreated {
                transfer_id: transfer.id,
                reference: transfer.reference_number.clone(),
            },
        );

        Ok(transfer)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub async fn get_transfer(
        &self,
        transfer_id: Uuid,
        context: &OperationContext,
    ) -> Result<Transfer, LedgerError> {
        self.store
            .get_transfer(transfer_id)
            .await
            .in_context(context)?
            .ok_or_else(|| LedgerError::not_found("transfer", transfer_id))
    }

    pub async fn list_transfers(
        &self,
        owner_id: Uuid,
        context: &OperationContext,
    ) -> Result<Vec<Transfer>, LedgerError> {
        self.store.list_transfers(owner_id).await.in_context(context)
    }

    // =========================================================================
    // ProcessTransfer
    // =========================================================================

    /// Submit a pending transfer's payout and settle the reservation.
    ///
    /// The transfer is marked as submitted before the gateway sees it, so it
    /// can no longer be cancelled. An accepted payout completes the transfer;
    /// a rejected one fails it and releases the reservation. A gateway outage
    /// or a failed settlement leaves it pending, and processing it again
    /// resubmits under the same reference.
    pub async fn process_transfer(
        &self,
        transfer_id: Uuid,
        context: &OperationContext,
    ) -> Result<Transfer, LedgerError> {
        let _claim = self.in_flight.claim(transfer_id).ok_or_else(|| {
            LedgerError::conflict(format!("transfer {transfer_id} is already being processed"))
        })?;

        let loaded = self.get_transfer(transfer_id, context).await?;
        let transfer = if loaded.payout_submitted() {
            tracing::info!(
                transfer_id = %loaded.id,
                reference = %loaded.reference_number,
                correlation_id = %context.correlation_id,
                "Resubmitting payout"
            );
            loaded.mark_payout_submitted(Utc::now())?
        } else {
            let marked = loaded.mark_payout_submitted(Utc::now())?;
            let work = UnitOfWork::new().update_transfer(marked.clone(), TransferStatus::Pending);
            let work_ref = &work;
            self.run_unit_of_work(context, "submit_payout", || async move {
                Ok((work_ref.clone(), ()))
            })
            .await?;
            marked
        };

        let outcome = self
            .payouts
            .submit(PayoutInstruction::from(&transfer))
            .await
            .map_err(|e| LedgerError::provider_unavailable("payout gateway", e.to_string()))?;

        match outcome {
            PayoutOutcome::Accepted { payout_reference } => {
                self.complete_transfer(transfer, payout_reference, context).await
            }
            PayoutOutcome::Rejected { reason } => {
                tracing::warn!(
                    transfer_id = %transfer.id,
                    reference = %transfer.reference_number,
                    reason = %reason,
                    correlation_id = %context.correlation_id,
                    "Payout rejected"
                );
                self.release_reservation(transfer, ReleaseReason::PayoutRejected(reason), context)
                    .await
            }
        }
    }

    /// Move the reservation into the fee sink and payout clearing accounts
    async fn complete_transfer(
        &self,
        transfer: Transfer,
        payout_reference: String,
        context: &OperationContext,
    ) -> Result<Transfer, LedgerError> {
        let fee_sink = self
            .ensure_account(FEE_SINK_OWNER, &transfer.source_currency, context)
            .await?;
        let clearing = self
            .ensure_account(PAYOUT_CLEARING_OWNER, &transfer.source_currency, context)
            .await?;
        let fee_reference = self.fresh_reference(ReferenceKind::Transaction, context).await?;
        let payout_entry_reference = self.fresh_reference(ReferenceKind::Transaction, context).await?;

        let completed = transfer.complete(payout_reference, Utc::now())?;
        let payout_amount = money("source_amount", transfer.payout_amount())?;

        let mut work = UnitOfWork::new()
            .credit(clearing.id(), payout_amount.value())
            .record(
                LedgerTransaction::new(
                    clearing.id(),
                    clearing.owner_id(),
                    clearing.currency().clone(),
                    TransactionType::Transfer,
                    EntryDirection::Credit,
                    &payout_amount,
                    payout_entry_reference,
                )
                .with_transfer(transfer.id)
                .with_description(format!("Transfer {} payout", transfer.reference_number)),
            );
        if transfer.fee > Decimal::ZERO {
            let fee = money("fee", transfer.fee)?;
            work = work.credit(fee_sink.id(), fee.value()).record(
                LedgerTransaction::new(
                    fee_sink.id(),
                    fee_sink.owner_id(),
                    fee_sink.currency().clone(),
                    TransactionType::Fee,
                    EntryDirection::Credit,
                    &fee,
                    fee_reference,
                )
                .with_transfer(transfer.id)
                .with_description(format!("Transfer {} fee", transfer.reference_number)),
            );
        }
        let work = work.update_transfer(completed.clone(), TransferStatus::Pending);

        // Credits only: no versioned account, a single attempt suffices
        let work_ref = &work;
        self.run_unit_of_work(context, "process_transfer", || async move {
            Ok((work_ref.clone(), ()))
        })
        .await?;

        tracing::info!(
            transfer_id = %completed.id,
            reference = %completed.reference_number,
            payout_reference = ?completed.payout_reference,
            correlation_id = %context.correlation_id,
            "Transfer completed"
        );
        self.dispatch_audit(
            AuditLogBuilder::new(AuditAction::TransferCompleted)
                .resource_type(Transfer::aggregate_type())
                .resource_id(completed.id)
                .before_state(&transfer)
                .after_state(&completed)
                .build(context),
        );
        self.dispatch_notification(
            completed.owner_id,
            Notification::TransferCompleted {
                transfer_id: completed.id,
                reference: completed.reference_number.clone(),
            },
        );

        Ok(completed)
    }

    // =========================================================================
    // CancelTransfer
    // =========================================================================

    /// Cancel a pending transfer and release its reservation
    pub async fn cancel_transfer(
        &self,
        transfer_id: Uuid,
        context: &OperationContext,
    ) -> Result<Transfer, LedgerError> {
        let _claim = self.in_flight.claim(transfer_id).ok_or_else(|| {
            LedgerError::conflict(format!("transfer {transfer_id} is being processed"))
        })?;

        let transfer = self.get_transfer(transfer_id, context).await?;
        transfer.status().transition(TransferStatus::Cancelled)?;
        self.release_reservation(transfer, ReleaseReason::Cancelled, context)
            .await
    }

    /// Credit the reserved amount back to the source account with a
    /// compensating entry and move the transfer to its terminal state
    async fn release_reservation(
        &self,
        transfer: Transfer,
        reason: ReleaseReason,
        context: &OperationContext,
    ) -> Result<Transfer, LedgerError> {
        let now = Utc::now();
        let (released, action, description) = match &reason {
            ReleaseReason::Cancelled => (
                transfer.cancel(now)?,
                AuditAction::TransferCancelled,
                format!("Transfer {} cancelled, reservation released", transfer.reference_number),
            ),
            ReleaseReason::PayoutRejected(why) => (
                transfer.fail(why.clone(), now)?,
                AuditAction::TransferFailed,
                format!("Transfer {} payout rejected, reservation released", transfer.reference_number),
            ),
        };

        let source = self
            .store
            .get_account_by_id(transfer.source_account_id)
            .await
            .in_context(context)?
            .ok_or_else(|| LedgerError::not_found("account", transfer.source_account_id))?;
        let amount = money("source_amount", transfer.source_amount)?;
        let entry_reference = self.fresh_reference(ReferenceKind::Transaction, context).await?;

        let work = UnitOfWork::new()
            .credit(source.id(), amount.value())
            .record(
                LedgerTransaction::new(
                    source.id(),
                    source.owner_id(),
                    source.currency().clone(),
                    TransactionType::Transfer,
                    EntryDirection::Credit,
                    &amount,
                    entry_reference,
                )
                .with_transfer(transfer.id)
                .with_description(description)
                .compensating(),
            )
            .update_transfer(released.clone(), TransferStatus::Pending);

        let work_ref = &work;
        self.run_unit_of_work(context, "release_reservation", || async move {
            Ok((work_ref.clone(), ()))
        })
        .await?;

        tracing::info!(
            transfer_id = %released.id,
            reference = %released.reference_number,
            status = %released.status(),
            correlation_id = %context.correlation_id,
            "Transfer reservation released"
        );
        self.dispatch_audit(
            AuditLogBuilder::new(action)
                .resource_type(Transfer::aggregate_type())
                .resource_id(released.id)
                .before_state(&transfer)
                .after_state(&released)
                .build(context),
        );
        let notification = match reason {
            ReleaseReason::Cancelled => Notification::TransferCancelled {
                transfer_id: released.id,
                reference: released.reference_number.clone(),
            },
            ReleaseReason::PayoutRejected(reason) => Notification::TransferFailed {
                transfer_id: released.id,
                reference: released.reference_number.clone(),
                reason,
            },
        };
        self.dispatch_notification(released.owner_id, notification);

        Ok(released)
    }
}

enum ReleaseReason {
    Cancelled,
    PayoutRejected(String),
}
