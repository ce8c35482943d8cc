//! Load Testing Tool
//!
//! Hammers a small set of accounts with concurrent transfers, processing and
//! cancellations, then checks that no money was created or lost.
//!
//! Run with: cargo run --bin load_test --release -- --users 8 --transfers 200
//! Add `--postgres` to run against DATABASE_URL instead of the in-memory store.

use std::sync::Arc;
use std::time::Instant;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

use remit_ledger::aggregate::Aggregate;
use remit_ledger::domain::{OperationContext, TransferStatus};
use remit_ledger::engine::{
    CreateTransactionCommand, CreateTransferCommand, EngineSettings, LedgerEngine, RecipientInput,
    FEE_SINK_OWNER, PAYOUT_CLEARING_OWNER,
};
use remit_ledger::fx::StaticRateTable;
use remit_ledger::store::{InMemoryLedgerStore, LedgerStore, PgLedgerStore};

const OPENING_BALANCE: Decimal = dec!(1000.00);

fn arg<T: std::str::FromStr>(args: &[String], name: &str, default: T) -> T {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().collect();
    let user_count: usize = arg(&args, "--users", 8);
    let transfers_per_user: usize = arg(&args, "--transfers", 100);

    let store: Arc<dyn LedgerStore> = if args.iter().any(|a| a == "--postgres") {
        let database_url = std::env::var("DATABASE_URL")?;
        println!("Connecting to database...");
        let pool = remit_ledger::db::create_pool(&database_url, 20).await?;
        Arc::new(PgLedgerStore::new(pool))
    } else {
        Arc::new(InMemoryLedgerStore::new())
    };

    let engine = Arc::new(
        LedgerEngine::new(store, Arc::new(StaticRateTable::with_defaults())).with_settings(
            EngineSettings {
                max_retries: 50,
                ..EngineSettings::default()
            },
        ),
    );
    let context = OperationContext::system();

    println!(
        "Load Test - {} users x {} transfers",
        user_count, transfers_per_user
    );

    let users: Vec<Uuid> = (0..user_count).map(|_| Uuid::new_v4()).collect();
    for user in &users {
        engine.create_account(*user, "USD", &context).await?;
        engine
            .create_transaction(
                CreateTransactionCommand::new(*user, "USD", &OPENING_BALANCE.to_string(), "DEPOSIT"),
                &context,
            )
            .await?;
    }

    let start = Instant::now();
    let handles: Vec<_> = users
        .iter()
        .copied()
        .map(|user| {
            let engine = engine.clone();
            tokio::spawn(async move {
                let context = OperationContext::new().with_request_user(user);
                let mut created = 0u64;
                let mut rejected = 0u64;
                for i in 0..transfers_per_user {
                    let command = CreateTransferCommand {
                        owner_id: user,
                        source_currency: "USD".to_string(),
                        destination_currency: "EUR".to_string(),
                        source_amount: format!("{}.00", 10 + i % 40),
                        recipient: RecipientInput {
                            name: "Load Test".to_string(),
                            account_number: "DE89370400440532013000".to_string(),
                            bank_name: None,
                            country: "DE".to_string(),
                        },
                        purpose: "load test".to_string(),
                    };
                    match engine.create_transfer(command, &context).await {
                        Ok(transfer) => {
                            created += 1;
                            let _ = if i % 3 == 0 {
                                engine.cancel_transfer(transfer.id, &context).await
                            } else {
                                engine.process_transfer(transfer.id, &context).await
                            };
                        }
                        Err(_) => rejected += 1,
                    }
                }
                (created, rejected)
            })
        })
        .collect();

    let (mut created, mut rejected) = (0u64, 0u64);
    for handle in handles {
        let (c, r) = handle.await?;
        created += c;
        rejected += r;
    }
    let elapsed = start.elapsed();

    // Conservation: every deposited unit sits in a user, fee or clearing
    // account, or in a still-pending reservation.
    let mut held = Decimal::ZERO;
    let mut reserved = Decimal::ZERO;
    for owner in users.iter().copied().chain([FEE_SINK_OWNER, PAYOUT_CLEARING_OWNER]) {
        for account in engine.list_accounts(owner, &context).await? {
            if account.balance().value() < Decimal::ZERO {
                anyhow::bail!("account {} is overdrawn", account.id());
            }
            held += account.balance().value();
        }
    }
    for user in &users {
        for transfer in engine.list_transfers(*user, &context).await? {
            if transfer.status() == TransferStatus::Pending {
                reserved += transfer.source_amount;
            }
        }
    }
    let deposited = OPENING_BALANCE * Decimal::from(user_count as u64);

    println!("\n=== Load Test Results ===");
    println!("Transfers created: {}", created);
    println!("Transfers rejected: {}", rejected);
    println!("Time: {:.2}s", elapsed.as_secs_f64());
    println!(
        "Rate: {:.0} transfers/sec",
        created as f64 / elapsed.as_secs_f64()
    );
    println!("Deposited: {}  Held: {}  Reserved: {}", deposited, held, reserved);

    if held + reserved != deposited {
        anyhow::bail!(
            "conservation violated: deposited {}, accounted for {}",
            deposited,
            held + reserved
        );
    }
    println!("Conservation holds");

    Ok(())
}
