//! API Routes
//!
//! HTTP endpoint definitions. Handlers translate JSON bodies into engine
//! commands and return the resulting entity.

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregate::{Account, MoneyRequest, Transfer};
use crate::domain::{LedgerTransaction, OperationContext};
use crate::engine::{
    CreateMoneyRequestCommand, CreatePaymentLinkCommand, CreateTransactionCommand,
    CreateTransferCommand, PaymentLink, Quote,
};
use crate::error::AppError;

use super::AppState;

// =========================================================================
// Request/Response types
// =========================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateAccountRequest {
    pub owner_id: Uuid,
    pub currency: String,
}

#[derive(Debug, Deserialize)]
pub struct QuoteQuery {
    pub from: String,
    pub to: String,
    pub amount: String,
}

/// Body for paying a money request or payment link. The payer defaults to
/// the `X-Request-User-Id` caller.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct PayRequest {
    #[serde(default)]
    pub payer_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct ListResponse<T> {
    pub items: Vec<T>,
    pub count: usize,
}

impl<T> From<Vec<T>> for ListResponse<T> {
    fn from(items: Vec<T>) -> Self {
        Self {
            count: items.len(),
            items,
        }
    }
}

/// Reject a request acting for someone other than the calling user
fn ensure_acting_user(context: &OperationContext, acting_for: Uuid) -> Result<(), AppError> {
    match context.request_user_id {
        Some(user_id) if user_id != acting_for => Err(AppError::Forbidden(
            "X-Request-User-Id does not match the acting user".to_string(),
        )),
        _ => Ok(()),
    }
}

fn resolve_payer(context: &OperationContext, body: Option<Json<PayRequest>>) -> Result<Uuid, AppError> {
    let requested = body.and_then(|Json(b)| b.payer_id);
    match (requested, context.request_user_id) {
        (Some(payer_id), _) => {
            ensure_acting_user(context, payer_id)?;
            Ok(payer_id)
        }
        (None, Some(user_id)) => Ok(user_id),
        (None, None) => Err(AppError::InvalidRequest(
            "payer_id or X-Request-User-Id is required".to_string(),
        )),
    }
}

// =========================================================================
// API Router
// =========================================================================

/// Create the API router
pub fn create_router() -> Router<AppState> {
    Router::new()
        // Accounts
        .route("/accounts", post(create_account))
        .route("/accounts/:account_id/transactions", get(get_account_transactions))
        .route("/users/:user_id/accounts", get(list_accounts))
        .route("/users/:user_id/accounts/:currency", get(get_account))
        .route("/users/:user_id/transactions", get(get_user_transactions))
        .route("/users/:user_id/transfers", get(list_transfers))
        // Quotes and transfers
        .route("/quotes", get(quote))
        .route("/transfers", post(create_transfer))
        .route("/transfers/:transfer_id", get(get_transfer))
        .route("/transfers/:transfer_id/process", post(process_transfer))
        .route("/transfers/:transfer_id/cancel", post(cancel_transfer))
        // Direct ledger entries
        .route("/transactions", post(create_transaction))
        // Money requests and payment links
        .route("/money-requests", post(create_money_request))
        .route("/money-requests/:request_id", get(get_money_request))
        .route("/money-requests/:request_id/pay", post(pay_money_request))
        .route("/money-requests/:request_id/cancel", post(cancel_money_request))
        .route("/payment-links", post(create_payment_link))
        .route("/payment-links/:token", get(get_payment_link))
        .route("/payment-links/:token/pay", post(pay_payment_link))
}

// =========================================================================
// Accounts
// =========================================================================

async fn create_account(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Json(request): Json<CreateAccountRequest>,
) -> Result<(StatusCode, Json<Account>), AppError> {
    let account = state
        .engine
        .create_account(request.owner_id, &request.currency, &context)
        .await?;
    Ok((StatusCode::CREATED, Json(account)))
}

async fn get_account(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Path((user_id, currency)): Path<(Uuid, String)>,
) -> Result<Json<Account>, AppError> {
    Ok(Json(state.engine.get_account(user_id, &currency, &context).await?))
}

async fn list_accounts(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<ListResponse<Account>>, AppError> {
    let accounts = state.engine.list_accounts(user_id, &context).await?;
    Ok(Json(accounts.into()))
}

async fn get_account_transactions(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Path(account_id): Path<Uuid>,
) -> Result<Json<ListResponse<LedgerTransaction>>, AppError> {
    let entries = state
        .engine
        .get_transactions_by_account(account_id, &context)
        .await?;
    Ok(Json(entries.into()))
}

async fn get_user_transactions(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<ListResponse<LedgerTransaction>>, AppError> {
    let entries = state.engine.get_transactions_by_user(user_id, &context).await?;
    Ok(Json(entries.into()))
}

// =========================================================================
// Quotes and transfers
// =========================================================================

async fn quote(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Query(query): Query<QuoteQuery>,
) -> Result<Json<Quote>, AppError> {
    let quote = state
        .engine
        .quote(&query.from, &query.to, &query.amount, &context)
        .await?;
    Ok(Json(quote))
}

async fn create_transfer(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Json(command): Json<CreateTransferCommand>,
) -> Result<(StatusCode, Json<Transfer>), AppError> {
    ensure_acting_user(&context, command.owner_id)?;
    let transfer = state.engine.create_transfer(command, &context).await?;
    Ok((StatusCode::CREATED, Json(transfer)))
}

async fn get_transfer(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Path(transfer_id): Path<Uuid>,
) -> Result<Json<Transfer>, AppError> {
    Ok(Json(state.engine.get_transfer(transfer_id, &context).await?))
}

async fn list_transfers(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<ListResponse<Transfer>>, AppError> {
    let transfers = state.engine.list_transfers(user_id, &context).await?;
    Ok(Json(transfers.into()))
}

async fn process_transfer(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Path(transfer_id): Path<Uuid>,
) -> Result<Json<Transfer>, AppError> {
    Ok(Json(state.engine.process_transfer(transfer_id, &context).await?))
}

async fn cancel_transfer(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Path(transfer_id): Path<Uuid>,
) -> Result<Json<Transfer>, AppError> {
    Ok(Json(state.engine.cancel_transfer(transfer_id, &context).await?))
}

// =========================================================================
// Direct ledger entries
// =========================================================================

async fn create_transaction(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Json(command): Json<CreateTransactionCommand>,
) -> Result<(StatusCode, Json<LedgerTransaction>), AppError> {
    let entry = state.engine.create_transaction(command, &context).await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

// =========================================================================
// Money requests and payment links
// =========================================================================

async fn create_money_request(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Json(command): Json<CreateMoneyRequestCommand>,
) -> Result<(StatusCode, Json<MoneyRequest>), AppError> {
    ensure_acting_user(&context, command.requester_id)?;
    let request = state.engine.create_money_request(command, &context).await?;
    Ok((StatusCode::CREATED, Json(request)))
}

async fn get_money_request(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Path(request_id): Path<Uuid>,
) -> Result<Json<MoneyRequest>, AppError> {
    Ok(Json(state.engine.get_money_request(request_id, &context).await?))
}

async fn pay_money_request(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Path(request_id): Path<Uuid>,
    body: Option<Json<PayRequest>>,
) -> Result<Json<MoneyRequest>, AppError> {
    let payer_id = resolve_payer(&context, body)?;
    let paid = state
        .engine
        .settle_money_request(request_id, payer_id, &context)
        .await?;
    Ok(Json(paid))
}

async fn cancel_money_request(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Path(request_id): Path<Uuid>,
) -> Result<Json<MoneyRequest>, AppError> {
    Ok(Json(state.engine.cancel_money_request(request_id, &context).await?))
}

async fn create_payment_link(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Json(command): Json<CreatePaymentLinkCommand>,
) -> Result<(StatusCode, Json<PaymentLink>), AppError> {
    ensure_acting_user(&context, command.requester_id)?;
    let link = state.engine.create_payment_link(command, &context).await?;
    Ok((StatusCode::CREATED, Json(link)))
}

async fn get_payment_link(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Path(token): Path<String>,
) -> Result<Json<PaymentLink>, AppError> {
    Ok(Json(state.engine.get_payment_link(&token, &context).await?))
}

async fn pay_payment_link(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Path(token): Path<String>,
    body: Option<Json<PayRequest>>,
) -> Result<Json<MoneyRequest>, AppError> {
    let payer_id = resolve_payer(&context, body)?;
    let paid = state
        .engine
        .settle_payment_link(&token, payer_id, &context)
        .await?;
    Ok(Json(paid))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payer_defaults_to_request_user() {
        let user = Uuid::new_v4();
        let context = OperationContext::new().with_request_user(user);
        assert_eq!(resolve_payer(&context, None).unwrap(), user);
    }

    #[test]
    fn test_payer_must_match_request_user() {
        let context = OperationContext::new().with_request_user(Uuid::new_v4());
        let body = Json(PayRequest {
            payer_id: Some(Uuid::new_v4()),
        });
        assert!(matches!(
            resolve_payer(&context, Some(body)),
            Err(AppError::Forbidden(_))
        ));
    }

    #[test]
    fn test_payer_required_without_header() {
        assert!(matches!(
            resolve_payer(&OperationContext::new(), None),
            Err(AppError::InvalidRequest(_))
        ));
    }
}
