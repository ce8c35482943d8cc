//! Money requests and payment links

use chrono::{DateTime, Utc};
use rand::RngCore;
use uuid::Uuid;

use crate::aggregate::{Aggregate, MoneyRequest};
use crate::audit::{AuditAction, AuditLogBuilder};
use crate::domain::{
    EntryDirection, LedgerError, LedgerTransaction, MoneyRequestStatus,
    OperationContext, TransactionType,
};
use crate::notification::Notification;
use crate::reference::ReferenceKind;
use crate::store::UnitOfWork;

use super::{
    money, optional_text, parse_amount, parse_currency, CreateMoneyRequestCommand,
    CreatePaymentLinkCommand, LedgerEngine, PaymentLink, StoreResultExt,
};

const MAX_DESCRIPTION_LEN: usize = 500;
const LINK_TOKEN_BYTES: usize = 32;

/// Unguessable URL-safe token for a payment link
fn new_link_token() -> String {
    let mut bytes = [0u8; LINK_TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

impl LedgerEngine {
    // =========================================================================
    // Creation
    // =========================================================================

    /// Ask a specific user for money
    pub async fn create_money_request(
        &self,
        command: CreateMoneyRequestCommand,
        context: &OperationContext,
    ) -> Result<MoneyRequest, LedgerError> {
        if command.requester_id == command.recipient_id {
            return Err(LedgerError::validation(
                "recipient_id",
                "cannot request money from yourself",
            ));
        }
        let request = self
            .new_money_request(
                command.requester_id,
                Some(command.recipient_id),
                &command.amount,
                &command.currency,
                command.description.as_deref(),
                None,
                context,
            )
            .await?;

        self.dispatch_notification(
            command.recipient_id,
            Notification::MoneyRequested {
                request_id: request.id,
                requester_id: request.requester_id,
            },
        );
        Ok(request)
    }

    /// Create an open request that anyone holding the link can pay
    pub async fn create_payment_link(
        &self,
        command: CreatePaymentLinkCommand,
        context: &OperationContext,
    ) -> Result<PaymentLink, LedgerError> {
        let token = new_link_token();
        let request = self
            .new_money_request(
                command.requester_id,
                None,
                &command.amount,
                &command.currency,
                command.description.as_deref(),
                Some(token),
                context,
            )
            .await?;
        Ok(self.payment_link(request))
    }

    #[allow(clippy::too_many_arguments)]
    async fn new_money_request(
        &self,
        requester_id: Uuid,
        recipient_id: Option<Uuid>,
        amount: &str,
        currency: &str,
        description: Option<&str>,
        payment_link_token: Option<String>,
        context: &OperationContext,
    ) -> Result<MoneyRequest, LedgerError> {
        let currency = parse_currency("currency", currency)?;
        let amount = parse_amount("amount", amount)?;
        let description = optional_text("description", description, MAX_DESCRIPTION_LEN)?;

        let now = Utc::now();
        let request = MoneyRequest {
            id: Uuid::new_v4(),
            requester_id,
            recipient_id,
            amount: amount.value(),
            currency,
            description,
            status: MoneyRequestStatus::Pending,
            reference_number: self.fresh_reference(ReferenceKind::MoneyRequest, context).await?,
            payment_link_token,
            expires_at: MoneyRequest::expiry_from(now),
            paid_at: None,
            paid_by: None,
            created_at: now,
            updated_at: now,
        };

        let work = UnitOfWork::new().insert_money_request(request.clone());
        let work_ref = &work;
        self.run_unit_of_work(context, "create_money_request", || async move {
            Ok((work_ref.clone(), ()))
        })
        .await?;

        tracing::info!(
            request_id = %request.id,
            reference = %request.reference_number,
            amount = %request.amount,
            currency = %request.currency,
            payment_link = request.payment_link_token.is_some(),
            correlation_id = %context.correlation_id,
            "Money request created"
        );
        self.dispatch_audit(
            AuditLogBuilder::new(AuditAction::MoneyRequestCreated)
                .resource_type(MoneyRequest::aggregate_type())
                .resource_id(request.id)
                .after_state(&request)
                .build(context),
        );
        Ok(request)
    }

    fn payment_link(&self, request: MoneyRequest) -> PaymentLink {
        let token = request.payment_link_token.clone().unwrap_or_default();
        let url = format!(
            "{}/{}",
            self.settings.payment_link_base_url.trim_end_matches('/'),
            token
        );
        PaymentLink { token, url, request }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub async fn get_money_request(
        &self,
        request_id: Uuid,
        context: &OperationContext,
    ) -> Result<MoneyRequest, LedgerError> {
        let request = self.load_money_request(request_id, context).await?;
        Ok(request.as_seen_at(Utc::now()))
    }

    pub async fn get_payment_link(
        &self,
        token: &str,
        context: &OperationContext,
    ) -> Result<PaymentLink, LedgerError> {
        let request = self.load_payment_link(token, context).await?;
        Ok(self.payment_link(request.as_seen_at(Utc::now())))
    }

    async fn load_money_request(
        &self,
        request_id: Uuid,
        context: &OperationContext,
    ) -> Result<MoneyRequest, LedgerError> {
        self.store
            .get_money_request(request_id)
            .await
            .in_context(context)?
            .ok_or_else(|| LedgerError::not_found("money request", request_id))
    }

    async fn load_payment_link(
        &self,
        token: &str,
        context: &OperationContext,
    ) -> Result<MoneyRequest, LedgerError> {
        self.store
            .get_money_request_by_token(token)
            .await
            .in_context(context)?
            .ok_or_else(|| LedgerError::not_found("payment link", token))
    }

    // =========================================================================
    // Settlement
    // =========================================================================

    /// Pay a request: debit the payer, credit the requester, mark it paid
    pub async fn settle_money_request(
        &self,
        request_id: Uuid,
        payer_id: Uuid,
        context: &OperationContext,
    ) -> Result<MoneyRequest, LedgerError> {
        let request = self.load_money_request(request_id, context).await?;
        self.settle(request, payer_id, context).await
    }

    /// Pay the request behind a payment link
    pub async fn settle_payment_link(
        &self,
        token: &str,
        payer_id: Uuid,
        context: &OperationContext,
    ) -> Result<MoneyRequest, LedgerError> {
        let request = self.load_payment_link(token, context).await?;
        self.settle(request, payer_id, context).await
    }

    async fn settle(
        &self,
        request: MoneyRequest,
        payer_id: Uuid,
        context: &OperationContext,
    ) -> Result<MoneyRequest, LedgerError> {
        let now = Utc::now();
        let paid = request.mark_paid(payer_id, now)?;
        let amount = money("amount", request.amount)?;

        let payer = self
            .store
            .get_account(payer_id, &request.currency)
            .await
            .in_context(context)?;
        payer.ensure_can_debit(&amount)?;
        let requester = self
            .ensure_account(request.requester_id, &request.currency, context)
            .await?;
        let debit_reference = self.fresh_reference(ReferenceKind::Transaction, context).await?;
        let credit_reference = self.fresh_reference(ReferenceKind::Transaction, context).await?;

        let store = &self.store;
        let payer_account_id = payer.id();
        let (paid_ref, amount_ref, requester_ref, debit_ref, credit_ref) =
            (&paid, &amount, &requester, &debit_reference, &credit_reference);
        self.run_unit_of_work(context, "settle_money_request", || async move {
            let payer = store
                .get_account_by_id(payer_account_id)
                .await
                .in_context(context)?
                .ok_or_else(|| LedgerError::not_found("account", payer_account_id))?;
            payer.ensure_can_debit(amount_ref)?;

            let description = format!("Money request {}", paid_ref.reference_number);
            let work = UnitOfWork::new()
                .debit(&payer, amount_ref.value())
                .credit(requester_ref.id(), amount_ref.value())
                .record(
                    LedgerTransaction::new(
                        payer.id(),
                        payer.owner_id(),
                        payer.currency().clone(),
                        TransactionType::Transfer,
                        EntryDirection::Debit,
                        amount_ref,
                        debit_ref.clone(),
                    )
                    .with_money_request(paid_ref.id)
                    .with_description(description.clone()),
                )
                .record(
                    LedgerTransaction::new(
                        requester_ref.id(),
                        requester_ref.owner_id(),
                        requester_ref.currency().clone(),
                        TransactionType::Transfer,
                        EntryDirection::Credit,
                        amount_ref,
                        credit_ref.clone(),
                    )
                    .with_money_request(paid_ref.id)
                    .with_description(description),
                )
                .update_money_request(paid_ref.clone(), MoneyRequestStatus::Pending);
            Ok((work, ()))
        })
        .await?;

        tracing::info!(
            request_id = %paid.id,
            reference = %paid.reference_number,
            payer_id = %payer_id,
            amount = %paid.amount,
            correlation_id = %context.correlation_id,
            "Money request paid"
        );
        self.dispatch_audit(
            AuditLogBuilder::new(AuditAction::MoneyRequestPaid)
                .resource_type(MoneyRequest::aggregate_type())
                .resource_id(paid.id)
                .before_state(&request)
                .after_state(&paid)
                .build(context),
        );
        self.dispatch_notification(
            paid.requester_id,
            Notification::MoneyRequestPaid {
                request_id: paid.id,
                payer_id,
            },
        );

        Ok(paid)
    }

    // =========================================================================
    // Cancellation and expiry
    // =========================================================================

    pub async fn cancel_money_request(
        &self,
        request_id: Uuid,
        context: &OperationContext,
    ) -> Result<MoneyRequest, LedgerError> {
        let request = self.load_money_request(request_id, context).await?;
        let cancelled = request.cancel(Utc::now())?;

        let work = UnitOfWork::new().update_money_request(cancelled.clone(), MoneyRequestStatus::Pending);
        let work_ref = &work;
        self.run_unit_of_work(context, "cancel_money_request", || async move {
            Ok((work_ref.clone(), ()))
        })
        .await?;

        tracing::info!(
            request_id = %cancelled.id,
            reference = %cancelled.reference_number,
            correlation_id = %context.correlation_id,
            "Money request cancelled"
        );
        self.dispatch_audit(
            AuditLogBuilder::new(AuditAction::MoneyRequestCancelled)
                .resource_type(MoneyRequest::aggregate_type())
                .resource_id(cancelled.id)
                .before_state(&request)
                .after_state(&cancelled)
                .build(context),
        );
        Ok(cancelled)
    }

    /// Persist `expired` on every pending request overdue at `now`
    pub async fn expire_stale_money_requests(
        &self,
        now: DateTime<Utc>,
        context: &OperationContext,
    ) -> Result<Vec<MoneyRequest>, LedgerError> {
        let expired = self
            .store
            .expire_money_requests(now)
            .await
            .in_context(context)?;

        for request in &expired {
            self.dispatch_audit(
                AuditLogBuilder::new(AuditAction::MoneyRequestExpired)
                    .resource_type(MoneyRequest::aggregate_type())
                    .resource_id(request.id)
                    .after_state(request)
                    .build(context),
            );
        }
        if !expired.is_empty() {
            tracing::info!(
                count = expired.len(),
                correlation_id = %context.correlation_id,
                "Expired stale money requests"
            );
        }
        Ok(expired)
    }
}

