//! Postgres store integration tests
//!
//! Skipped unless DATABASE_URL points at a migrated database.

use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

use remit_ledger::aggregate::Aggregate;
use remit_ledger::domain::{
    Amount, Currency, EntryDirection, LedgerTransaction, OperationContext, TransactionType,
};
use remit_ledger::engine::{
    CreateTransactionCommand, CreateTransferCommand, EngineSettings, RecipientInput,
};
use remit_ledger::fx::StaticRateTable;
use remit_ledger::store::{AccountStore, LedgerStore, PgLedgerStore, StoreError, UnitOfWork};
use remit_ledger::LedgerEngine;

mod common;

fn transfer_command(owner: Uuid, amount: &str) -> CreateTransferCommand {
    CreateTransferCommand {
        owner_id: owner,
        source_currency: "USD".to_string(),
        destination_currency: "EUR".to_string(),
        source_amount: amount.to_string(),
        recipient: RecipientInput {
            name: "Ana Souza".to_string(),
            account_number: "DE89370400440532013000".to_string(),
            bank_name: None,
            country: "DE".to_string(),
        },
        purpose: "family support".to_string(),
    }
}

#[tokio::test]
async fn test_pg_concurrent_transfers_never_overdraw() {
    let Some(pool) = common::test_pool().await else {
        return;
    };
    let engine = Arc::new(
        LedgerEngine::new(
            Arc::new(PgLedgerStore::new(pool)),
            Arc::new(StaticRateTable::with_defaults()),
        )
        .with_settings(EngineSettings {
            max_retries: 10,
            ..EngineSettings::default()
        }),
    );
    let context = OperationContext::new();
    let owner = Uuid::new_v4();

    engine.create_account(owner, "USD", &context).await.unwrap();
    engine
        .create_transaction(
            CreateTransactionCommand::new(owner, "USD", "100.00", "DEPOSIT"),
            &context,
        )
        .await
        .unwrap();

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .create_transfer(transfer_command(owner, "60.00"), &OperationContext::new())
                    .await
            })
        })
        .collect();

    let mut succeeded = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            succeeded += 1;
        }
    }
    assert_eq!(succeeded, 1);

    let account = engine.get_account(owner, "USD", &context).await.unwrap();
    assert_eq!(account.balance().value(), dec!(40.00));
}

#[tokio::test]
async fn test_pg_commit_is_all_or_nothing() {
    let Some(pool) = common::test_pool().await else {
        return;
    };
    let store = PgLedgerStore::new(pool);
    let usd = Currency::new("USD").unwrap();

    let payer = store.create_account(Uuid::new_v4(), &usd).await.unwrap();
    let payee = store.create_account(Uuid::new_v4(), &usd).await.unwrap();

    // Debit of an empty account alongside a credit: neither may land
    let amount = Amount::new(dec!(25.00)).unwrap();
    let entry = LedgerTransaction::new(
        payee.id(),
        payee.owner_id(),
        usd.clone(),
        TransactionType::Deposit,
        EntryDirection::Credit,
        &amount,
        format!("TXN-TEST-{}", Uuid::new_v4().simple()),
    );
    let work = UnitOfWork::new()
        .debit(&payer, amount.value())
        .credit(payee.id(), amount.value())
        .record(entry);

    let err = store.commit(work).await.unwrap_err();
    assert!(matches!(err, StoreError::InsufficientFunds { .. }));

    let payee_after = store.get_account_by_id(payee.id()).await.unwrap().unwrap();
    assert_eq!(payee_after.balance().value(), Decimal::ZERO);
    assert!(store
        .transactions_by_account(payee.id())
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_pg_duplicate_account_rejected() {
    let Some(pool) = common::test_pool().await else {
        return;
    };
    let store = PgLedgerStore::new(pool);
    let eur = Currency::new("EUR").unwrap();
    let owner = Uuid::new_v4();

    store.create_account(owner, &eur).await.unwrap();
    let err = store.create_account(owner, &eur).await.unwrap_err();
    assert!(matches!(err, StoreError::DuplicateAccount { .. }));
}
