//! Direct ledger entries and transaction history

use std::str::FromStr;

use uuid::Uuid;

use crate::aggregate::Aggregate;
use crate::audit::{AuditAction, AuditLogBuilder};
use crate::domain::{
    EntryDirection, LedgerError, LedgerTransaction, OperationContext, TransactionType,
};
use crate::reference::ReferenceKind;
use crate::store::UnitOfWork;

use super::{
    optional_text, parse_amount, parse_currency, CreateTransactionCommand, LedgerEngine,
    StoreResultExt, FEE_SINK_OWNER,
};

const MAX_REFERENCE_LEN: usize = 64;
const MAX_DESCRIPTION_LEN: usize = 500;

impl LedgerEngine {
    /// Record a deposit, withdrawal, transfer or fee against the user's
    /// account in the command's currency.
    ///
    /// Deposits credit the account; every other type debits it. A fee is
    /// also credited to the platform fee sink so the ledger stays balanced.
    pub async fn create_transaction(
        &self,
        command: CreateTransactionCommand,
        context: &OperationContext,
    ) -> Result<LedgerTransaction, LedgerError> {
        let currency = parse_currency("currency", &command.currency)?;
        let amount = parse_amount("amount", &command.amount)?;
        let transaction_type = TransactionType::from_str(&command.transaction_type)
            .map_err(|e| LedgerError::validation("transaction_type", e.to_string()))?;
        let supplied_reference = optional_text(
            "reference_number",
            command.reference_number.as_deref(),
            MAX_REFERENCE_LEN,
        )?;
        let description = optional_text(
            "description",
            command.description.as_deref(),
            MAX_DESCRIPTION_LEN,
        )?;

        let account = self
            .store
            .get_account(command.user_id, &currency)
            .await
            .in_context(context)?;

        let reference = match supplied_reference {
            Some(reference) => {
                if self.store.reference_exists(&reference).await.in_context(context)? {
                    return Err(LedgerError::conflict(format!(
                        "reference number {reference} is already in use"
                    )));
                }
                reference
            }
            None => self.fresh_reference(ReferenceKind::Transaction, context).await?,
        };

        let fee_leg = if transaction_type == TransactionType::Fee {
            let sink = self.ensure_account(FEE_SINK_OWNER, &currency, context).await?;
            let sink_reference = self.fresh_reference(ReferenceKind::Transaction, context).await?;
            Some((sink, sink_reference))
        } else {
            None
        };

        let direction = transaction_type.customer_direction();
        let store = &self.store;
        let account_id = account.id();
        let (amount_ref, reference_ref, description_ref, fee_leg_ref) =
            (&amount, &reference, &description, &fee_leg);
        let entry = self
            .run_unit_of_work(context, "create_transaction", || async move {
                let account = store
                    .get_account_by_id(account_id)
                    .await
                    .in_context(context)?
                    .ok_or_else(|| LedgerError::not_found("account", account_id))?;

                let mut entry = LedgerTransaction::new(
                    account.id(),
                    account.owner_id(),
                    account.currency().clone(),
                    transaction_type,
                    direction,
                    amount_ref,
                    reference_ref.clone(),
                );
                if let Some(description) = description_ref {
                    entry = entry.with_description(description.clone());
                }

                let mut work = match direction {
                    EntryDirection::Debit => {
                        account.ensure_can_debit(amount_ref)?;
                        UnitOfWork::new().debit(&account, amount_ref.value())
                    }
                    EntryDirection::Credit => {
                        account.ensure_active()?;
                        UnitOfWork::new().credit(account.id(), amount_ref.value())
                    }
                };
                work = work.record(entry.clone());

                if let Some((sink, sink_reference)) = fee_leg_ref {
                    work = work.credit(sink.id(), amount_ref.value()).record(
                        LedgerTransaction::new(
                            sink.id(),
                            sink.owner_id(),
                            sink.currency().clone(),
                            TransactionType::Fee,
                            EntryDirection::Credit,
                            amount_ref,
                            sink_reference.clone(),
                        )
                        .with_description(format!("Fee collected under {reference_ref}")),
                    );
                }

                Ok((work, entry))
            })
            .await?;

        tracing::info!(
            transaction_id = %entry.id,
            account_id = %entry.account_id,
            transaction_type = %entry.transaction_type,
            amount = %entry.amount,
            reference = %entry.reference_number,
            correlation_id = %context.correlation_id,
            "Transaction recorded"
        );
        self.dispatch_audit(
            AuditLogBuilder::new(AuditAction::TransactionRecorded)
                .resource_type("LedgerTransaction")
                .resource_id(entry.id)
                .after_state(&entry)
                .build(context),
        );

        Ok(entry)
    }

    /// Every entry on the user's accounts, newest first
    pub async fn get_transactions_by_user(
        &self,
        user_id: Uuid,
        context: &OperationContext,
    ) -> Result<Vec<LedgerTransaction>, LedgerError> {
        self.store
            .transactions_by_user(user_id)
            .await
            .in_context(context)
    }

    pub async fn get_transactions_by_account(
        &self,
        account_id: Uuid,
        context: &OperationContext,
    ) -> Result<Vec<LedgerTransaction>, LedgerError> {
        if self
            .store
            .get_account_by_id(account_id)
            .await
            .in_context(context)?
            .is_none()
        {
            return Err(LedgerError::not_found("account", account_id));
        }
        self.store
            .transactions_by_account(account_id)
            .await
            .in_context(context)
    }
}
