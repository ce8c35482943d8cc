//! remit_ledger - multi-currency remittance ledger API
//!
//! Transfers abroad, deposits and withdrawals, and money requests between
//! users, with every balance change committed atomically.

use std::net::SocketAddr;
use std::sync::Arc;

use sqlx::PgPool;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use remit_ledger::api::{self, AppState};
use remit_ledger::audit::PgAuditSink;
use remit_ledger::domain::FeeSchedule;
use remit_ledger::engine::{EngineSettings, LedgerEngine};
use remit_ledger::fx::{ExchangeRateProvider, FallbackRateProvider, HttpRateSource, StaticRateTable};
use remit_ledger::jobs::{JobScheduler, JobSchedulerConfig};
use remit_ledger::store::{InMemoryLedgerStore, LedgerStore, PgLedgerStore};
use remit_ledger::{db, Config};

/// Initialize tracing/logging. `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "remit_ledger=debug,tower_http=debug".into());
    let json = std::env::var("LOG_FORMAT").map(|v| v == "json").unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Live rates with the static table behind them, or the table alone
fn build_rate_provider(config: &Config) -> anyhow::Result<Arc<dyn ExchangeRateProvider>> {
    let table = StaticRateTable::with_defaults();
    match &config.fx_api_url {
        Some(url) => {
            tracing::info!(fx_api_url = %url, "Using live exchange rates with static fallback");
            let live = HttpRateSource::new(url.clone(), config.fx_timeout)?;
            Ok(Arc::new(
                FallbackRateProvider::new(Arc::new(live), table).with_timeout(config.fx_timeout),
            ))
        }
        None => {
            tracing::warn!("FX_API_URL not set, pricing from the static rate table");
            Ok(Arc::new(table))
        }
    }
}

async fn connect(config: &Config, database_url: &str) -> anyhow::Result<PgPool> {
    tracing::info!("Connecting to database...");
    let pool = db::create_pool(database_url, config.database_max_connections).await?;
    db::verify_connection(&pool).await?;

    if !db::check_schema(&pool).await? {
        tracing::error!("Database schema is not complete. Please run migrations.");
        return Err(anyhow::anyhow!("Database schema incomplete"));
    }

    tracing::info!("Database connected successfully");
    Ok(pool)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing();

    let config = Config::from_env()?;
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    tracing::info!(environment = %config.environment, "Starting remit_ledger server");

    let pool = match &config.database_url {
        Some(url) => Some(connect(&config, url).await?),
        None => {
            tracing::warn!("DATABASE_URL not set, using the in-memory store; balances are lost on exit");
            None
        }
    };

    let store: Arc<dyn LedgerStore> = match &pool {
        Some(pool) => Arc::new(PgLedgerStore::new(pool.clone())),
        None => Arc::new(InMemoryLedgerStore::new()),
    };

    let mut engine = LedgerEngine::new(store, build_rate_provider(&config)?)
        .with_fee_schedule(FeeSchedule::new(config.fee_percentage, config.fee_minimum))
        .with_settings(EngineSettings {
            max_retries: config.max_commit_retries,
            payment_link_base_url: config.payment_link_base_url.clone(),
        });
    if let Some(pool) = &pool {
        engine = engine.with_audit_sink(Arc::new(PgAuditSink::new(pool.clone())));
    }
    let engine = Arc::new(engine);

    let scheduler = JobScheduler::with_config(
        engine.clone(),
        JobSchedulerConfig {
            expiry_sweep_interval: config.expiry_sweep_interval,
        },
    )
    .start();

    let app = api::build_router(AppState::new(engine));

    tracing::info!("Listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Cleanup
    tracing::info!("Server shutting down...");
    scheduler.abort();
    if let Some(pool) = pool {
        pool.close().await;
        tracing::info!("Database connections closed. Goodbye!");
    }

    Ok(())
}

/// Shutdown signal handler for graceful shutdown
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}
