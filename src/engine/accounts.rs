//! Account operations

use uuid::Uuid;

use crate::aggregate::{Account, Aggregate};
use crate::audit::{AuditAction, AuditLogBuilder};
use crate::domain::{LedgerError, OperationContext};

use super::{parse_currency, LedgerEngine, StoreResultExt};

impl LedgerEngine {
    /// Open an empty account; `Conflict` if (owner, currency) already has one
    pub async fn create_account(
        &self,
        owner_id: Uuid,
        currency: &str,
        context: &OperationContext,
    ) -> Result<Account, LedgerError> {
        let currency = parse_currency("currency", currency)?;
        let account = self
            .store
            .create_account(owner_id, &currency)
            .await
            .in_context(context)?;

        tracing::info!(
            account_id = %account.id(),
            owner_id = %owner_id,
            currency = %currency,
            correlation_id = %context.correlation_id,
            "Account created"
        );
        self.dispatch_audit(
            AuditLogBuilder::new(AuditAction::AccountCreated)
                .resource_type(Account::aggregate_type())
                .resource_id(account.id())
                .after_state(&account)
                .build(context),
        );

        Ok(account)
    }

    pub async fn get_account(
        &self,
        owner_id: Uuid,
        currency: &str,
        context: &OperationContext,
    ) -> Result<Account, LedgerError> {
        let currency = parse_currency("currency", currency)?;
        self.store.get_account(owner_id, &currency).await.in_context(context)
    }

    pub async fn list_accounts(
        &self,
        owner_id: Uuid,
        context: &OperationContext,
    ) -> Result<Vec<Account>, LedgerError> {
        self.store.list_accounts(owner_id).await.in_context(context)
    }
}
