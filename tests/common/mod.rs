//! Common test utilities
#![allow(dead_code)]

use std::str::FromStr;
use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::PgPool;
use tower::util::ServiceExt;
use uuid::Uuid;

use remit_ledger::api::{self, AppState};
use remit_ledger::fx::StaticRateTable;
use remit_ledger::store::InMemoryLedgerStore;
use remit_ledger::LedgerEngine;

/// Full application router over a fresh in-memory ledger
pub fn test_app() -> Router {
    let engine = LedgerEngine::new(
        Arc::new(InMemoryLedgerStore::new()),
        Arc::new(StaticRateTable::with_defaults()),
    );
    api::build_router(AppState::new(Arc::new(engine)))
}

/// Send one request and return the status and parsed JSON body
/// (`Value::Null` for empty or non-JSON bodies)
pub async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    user: Option<Uuid>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        builder = builder.header("X-Request-User-Id", user.to_string());
    }
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

/// Decimal field of a JSON body
pub fn decimal(value: &Value, field: &str) -> Decimal {
    let raw = match &value[field] {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    Decimal::from_str(&raw).unwrap_or_else(|_| panic!("{field} is not a decimal: {raw}"))
}

/// Open an account and deposit into it through the API
pub async fn open_funded_account(app: &Router, owner: Uuid, currency: &str, amount: &str) {
    let (status, _) = send(
        app,
        "POST",
        "/api/v1/accounts",
        Some(owner),
        Some(serde_json::json!({ "owner_id": owner, "currency": currency })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "account creation failed");

    let (status, _) = send(
        app,
        "POST",
        "/api/v1/transactions",
        Some(owner),
        Some(serde_json::json!({
            "user_id": owner,
            "currency": currency,
            "amount": amount,
            "transaction_type": "DEPOSIT",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "deposit failed");
}

/// Pool for the Postgres suite, or `None` when DATABASE_URL is unset or the
/// schema has not been migrated
pub async fn test_pool() -> Option<PgPool> {
    dotenvy::dotenv().ok();
    let database_url = std::env::var("DATABASE_URL").ok()?;

    let pool = remit_ledger::db::create_pool(&database_url, 5)
        .await
        .expect("Failed to connect to DB");

    if !remit_ledger::db::check_schema(&pool).await.expect("Failed to inspect schema") {
        eprintln!("skipping: run migrations/0001_ledger.sql first");
        return None;
    }
    Some(pool)
}
