//! Database module
//!
//! Connection pool and schema checks. The schema itself lives in
//! `migrations/` as raw SQL.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Tables the Postgres store reads and writes
const REQUIRED_TABLES: [&str; 5] = [
    "accounts",
    "transfers",
    "money_requests",
    "ledger_transactions",
    "audit_logs",
];

pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

/// Simple connectivity check
pub async fn verify_connection(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Check if required tables exist
pub async fn check_schema(pool: &PgPool) -> Result<bool, sqlx::Error> {
    for table in REQUIRED_TABLES {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = 'public' AND table_name = $1
            )
            "#,
        )
        .bind(table)
        .fetch_one(pool)
        .await?;

        if !exists {
            tracing::error!("Required table '{}' does not exist. Apply migrations/0001_ledger.sql.", table);
            return Ok(false);
        }
    }

    Ok(true)
}
