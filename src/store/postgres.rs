//! Postgres ledger store
//!
//! One database transaction per unit of work. Touched accounts are locked
//! with `SELECT ... FOR UPDATE` one at a time in ascending id order, so two
//! commits over overlapping accounts can never deadlock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::aggregate::{Account, Aggregate, MoneyRequest, Recipient, Transfer};
use crate::domain::{CountryCode, Currency, LedgerTransaction};

use super::{
    apply_adjustment, AccountStore, BalanceAdjustment, EntityWrite, LedgerStore,
    MoneyRequestWrite, StoreError, TransferWrite, UnitOfWork,
};

const ACCOUNT_COLUMNS: &str =
    "id, owner_id, currency, balance, status, version, created_at, updated_at";

const TRANSFER_COLUMNS: &str = r#"
    id, owner_id, source_account_id, recipient_name, recipient_account_number,
    recipient_bank_name, recipient_country, source_currency, destination_currency,
    source_amount, destination_amount, exchange_rate, rate_is_fallback, fee, purpose,
    status, reference_number, payout_reference, payout_submitted_at, failure_reason,
    estimated_arrival, processed_at, created_at, updated_at
"#;

const MONEY_REQUEST_COLUMNS: &str = r#"
    id, requester_id, recipient_id, amount, currency, description, status,
    reference_number, payment_link_token, expires_at, paid_at, paid_by,
    created_at, updated_at
"#;

const TRANSACTION_COLUMNS: &str = r#"
    id, account_id, user_id, transaction_type, direction, amount, currency,
    transfer_id, money_request_id, reference_number, status, description, processed_at
"#;

// =========================================================================
// Row mapping
// =========================================================================

fn corrupt(entity: &str, id: Uuid, err: impl std::fmt::Display) -> StoreError {
    StoreError::Corrupt(format!("{entity} {id}: {err}"))
}

#[derive(Debug, sqlx::FromRow)]
struct AccountRow {
    id: Uuid,
    owner_id: Uuid,
    currency: String,
    balance: Decimal,
    status: String,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<AccountRow> for Account {
    type Error = StoreError;

    fn try_from(row: AccountRow) -> Result<Self, Self::Error> {
        let currency = Currency::new(&row.currency).map_err(|e| corrupt("account", row.id, e))?;
        let status = row.status.parse().map_err(|e| corrupt("account", row.id, e))?;
        Account::from_db_state(
            row.id,
            row.owner_id,
            currency,
            row.balance,
            status,
            row.version,
            row.created_at,
            row.updated_at,
        )
        .map_err(|e| corrupt("account", row.id, e))
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TransferRow {
    id: Uuid,
    owner_id: Uuid,
    source_account_id: Uuid,
    recipient_name: String,
    recipient_account_number: String,
    recipient_bank_name: Option<String>,
    recipient_country: String,
    source_currency: String,
    destination_currency: String,
    source_amount: Decimal,
    destination_amount: Decimal,
    exchange_rate: Decimal,
    rate_is_fallback: bool,
    fee: Decimal,
    purpose: String,
    status: String,
    reference_number: String,
    payout_reference: Option<String>,
    payout_submitted_at: Option<DateTime<Utc>>,
    failure_reason: Option<String>,
    estimated_arrival: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TransferRow> for Transfer {
    type Error = StoreError;

    fn try_from(row: TransferRow) -> Result<Self, Self::Error> {
        let id = row.id;
        Ok(Transfer {
            id,
            owner_id: row.owner_id,
            source_account_id: row.source_account_id,
            recipient: Recipient {
                name: row.recipient_name,
                account_number: row.recipient_account_number,
                bank_name: row.recipient_bank_name,
                country: CountryCode::new(&row.recipient_country)
                    .map_err(|e| corrupt("transfer", id, e))?,
            },
            source_currency: Currency::new(&row.source_currency)
                .map_err(|e| corrupt("transfer", id, e))?,
            destination_currency: Currency::new(&row.destination_currency)
                .map_err(|e| corrupt("transfer", id, e))?,
            source_amount: row.source_amount,
            destination_amount: row.destination_amount,
            exchange_rate: row.exchange_rate,
            rate_is_fallback: row.rate_is_fallback,
            fee: row.fee,
            purpose: row.purpose,
            status: row.status.parse().map_err(|e| corrupt("transfer", id, e))?,
            reference_number: row.reference_number,
            payout_reference: row.payout_reference,
            payout_submitted_at: row.payout_submitted_at,
            failure_reason: row.failure_reason,
            estimated_arrival: row.estimated_arrival,
            processed_at: row.processed_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct MoneyRequestRow {
    id: Uuid,
    requester_id: Uuid,
    recipient_id: Option<Uuid>,
    amount: Decimal,
    currency: String,
    description: Option<String>,
    status: String,
    reference_number: String,
    payment_link_token: Option<String>,
    expires_at: DateTime<Utc>,
    paid_at: Option<DateTime<Utc>>,
    paid_by: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<MoneyRequestRow> for MoneyRequest {
    type Error = StoreError;

    fn try_from(row: MoneyRequestRow) -> Result<Self, Self::Error> {
        let id = row.id;
        Ok(MoneyRequest {
            id,
            requester_id: row.requester_id,
            recipient_id: row.recipient_id,
            amount: row.amount,
            currency: Currency::new(&row.currency).map_err(|e| corrupt("money request", id, e))?,
            description: row.description,
            status: row
                .status
                .parse()
                .map_err(|e| corrupt("money request", id, e))?,
            reference_number: row.reference_number,
            payment_link_token: row.payment_link_token,
            expires_at: row.expires_at,
            paid_at: row.paid_at,
            paid_by: row.paid_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TransactionRow {
    id: Uuid,
    account_id: Uuid,
    user_id: Uuid,
    transaction_type: String,
    direction: String,
    amount: Decimal,
    currency: String,
    transfer_id: Option<Uuid>,
    money_request_id: Option<Uuid>,
    reference_number: String,
    status: String,
    description: Option<String>,
    processed_at: DateTime<Utc>,
}

impl TryFrom<TransactionRow> for LedgerTransaction {
    type Error = StoreError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        let id = row.id;
        Ok(LedgerTransaction {
            id,
            account_id: row.account_id,
            user_id: row.user_id,
            transaction_type: row
                .transaction_type
                .parse()
                .map_err(|e| corrupt("transaction", id, e))?,
            direction: row.direction.parse().map_err(|e| corrupt("transaction", id, e))?,
            amount: row.amount,
            currency: Currency::new(&row.currency).map_err(|e| corrupt("transaction", id, e))?,
            transfer_id: row.transfer_id,
            money_request_id: row.money_request_id,
            reference_number: row.reference_number,
            status: row.status.parse().map_err(|e| corrupt("transaction", id, e))?,
            description: row.description,
            processed_at: row.processed_at,
        })
    }
}

fn collect<R, T>(rows: Vec<R>) -> Result<Vec<T>, StoreError>
where
    T: TryFrom<R, Error = StoreError>,
{
    rows.into_iter().map(T::try_from).collect()
}

/// Unique-key violations surface as duplicate references
fn map_write_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return StoreError::DuplicateReference(
                db.constraint().unwrap_or("unique key").to_string(),
            );
        }
    }
    StoreError::Database(err)
}

// =========================================================================
// Store
// =========================================================================

/// sqlx/Postgres-backed [`LedgerStore`]
#[derive(Debug, Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Lock one account row for the rest of the transaction
    async fn lock_account(
        tx: &mut Transaction<'_, Postgres>,
        account_id: Uuid,
    ) -> Result<Account, StoreError> {
        let row: Option<AccountRow> = sqlx::query_as(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1 FOR UPDATE"
        ))
        .bind(account_id)
        .fetch_optional(&mut **tx)
        .await?;

        row.ok_or(StoreError::AccountNotFound(account_id))?
            .try_into()
    }

    async fn write_account(
        tx: &mut Transaction<'_, Postgres>,
        account: &Account,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE accounts
            SET balance = $2, version = $3, status = $4, updated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(account.id())
        .bind(account.balance().value())
        .bind(account.version())
        .bind(account.status().as_str())
        .bind(account.updated_at())
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn apply_locked(
        tx: &mut Transaction<'_, Postgres>,
        adjustment: &BalanceAdjustment,
    ) -> Result<Account, StoreError> {
        let account = Self::lock_account(tx, adjustment.account_id).await?;
        let next = apply_adjustment(&account, adjustment)?;
        Self::write_account(tx, &next).await?;
        Ok(next)
    }

    async fn write_transfer(
        tx: &mut Transaction<'_, Postgres>,
        write: &TransferWrite,
    ) -> Result<(), StoreError> {
        match write {
            EntityWrite::Insert(t) => {
                sqlx::query(&format!(
                    r#"
                    INSERT INTO transfers ({TRANSFER_COLUMNS})
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12,
                            $13, $14, $15, $16, $17, $18, $19, $20, $21, $22, $23, $24)
                    "#
                ))
                .bind(t.id)
                .bind(t.owner_id)
                .bind(t.source_account_id)
                .bind(&t.recipient.name)
                .bind(&t.recipient.account_number)
                .bind(&t.recipient.bank_name)
                .bind(t.recipient.country.as_str())
                .bind(t.source_currency.as_str())
                .bind(t.destination_currency.as_str())
                .bind(t.source_amount)
                .bind(t.destination_amount)
                .bind(t.exchange_rate)
                .bind(t.rate_is_fallback)
                .bind(t.fee)
                .bind(&t.purpose)
                .bind(t.status().as_str())
                .bind(&t.reference_number)
                .bind(&t.payout_reference)
                .bind(t.payout_submitted_at)
                .bind(&t.failure_reason)
                .bind(t.estimated_arrival)
                .bind(t.processed_at)
                .bind(t.created_at)
                .bind(t.updated_at)
                .execute(&mut **tx)
                .await
                .map_err(map_write_error)?;
                Ok(())
            }
            EntityWrite::Update {
                entity: t,
                expected_status,
            } => {
                let updated = sqlx::query(
                    r#"
                    UPDATE transfers
                    SET status = $3, payout_reference = $4, failure_reason = $5,
                        processed_at = $6, updated_at = $7, payout_submitted_at = $8
                    WHERE id = $1 AND status = $2
                      AND (payout_submitted_at IS NULL OR $8 IS NOT NULL)
                    "#,
                )
                .bind(t.id)
                .bind(expected_status.as_str())
                .bind(t.status().as_str())
                .bind(&t.payout_reference)
                .bind(&t.failure_reason)
                .bind(t.processed_at)
                .bind(t.updated_at)
                .bind(t.payout_submitted_at)
                .execute(&mut **tx)
                .await?
                .rows_affected();

                if updated == 0 {
                    let actual: Option<String> = sqlx::query_scalar(
                        r#"
                        SELECT CASE WHEN payout_submitted_at IS NULL THEN status
                                    ELSE status || ' (payout submitted)' END
                        FROM transfers WHERE id = $1
                        "#,
                    )
                    .bind(t.id)
                    .fetch_optional(&mut **tx)
                    .await?;
                    return Err(match actual {
                        None => StoreError::EntityNotFound {
                            entity: "transfer",
                            id: t.id,
                        },
                        Some(actual) => StoreError::StatusConflict {
                            entity: "transfer",
                            id: t.id,
                            expected: expected_status.to_string(),
                            actual,
                        },
                    });
                }
                Ok(())
            }
        }
    }

    async fn write_money_request(
        tx: &mut Transaction<'_, Postgres>,
        write: &MoneyRequestWrite,
    ) -> Result<(), StoreError> {
        match write {
            EntityWrite::Insert(r) => {
                sqlx::query(&format!(
                    r#"
                    INSERT INTO money_requests ({MONEY_REQUEST_COLUMNS})
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
                    "#
                ))
                .bind(r.id)
                .bind(r.requester_id)
                .bind(r.recipient_id)
                .bind(r.amount)
                .bind(r.currency.as_str())
                .bind(&r.description)
                .bind(r.stored_status().as_str())
                .bind(&r.reference_number)
                .bind(&r.payment_link_token)
                .bind(r.expires_at)
                .bind(r.paid_at)
                .bind(r.paid_by)
                .bind(r.created_at)
                .bind(r.updated_at)
                .execute(&mut **tx)
                .await
                .map_err(map_write_error)?;
                Ok(())
            }
            EntityWrite::Update {
                entity: r,
                expected_status,
            } => {
                let updated = sqlx::query(
                    r#"
                    UPDATE money_requests
                    SET status = $3, paid_at = $4, paid_by = $5, updated_at = $6
                    WHERE id = $1 AND status = $2
                    "#,
                )
                .bind(r.id)
                .bind(expected_status.as_str())
                .bind(r.stored_status().as_str())
                .bind(r.paid_at)
                .bind(r.paid_by)
                .bind(r.updated_at)
                .execute(&mut **tx)
                .await?
                .rows_affected();

                if updated == 0 {
                    let actual: Option<String> =
                        sqlx::query_scalar("SELECT status FROM money_requests WHERE id = $1")
                            .bind(r.id)
                            .fetch_optional(&mut **tx)
                            .await?;
                    return Err(match actual {
                        None => StoreError::EntityNotFound {
                            entity: "money request",
                            id: r.id,
                        },
                        Some(actual) => StoreError::StatusConflict {
                            entity: "money request",
                            id: r.id,
                            expected: expected_status.to_string(),
                            actual,
                        },
                    });
                }
                Ok(())
            }
        }
    }

    async fn insert_transaction(
        tx: &mut Transaction<'_, Postgres>,
        entry: &LedgerTransaction,
    ) -> Result<(), StoreError> {
        sqlx::query(&format!(
            r#"
            INSERT INTO ledger_transactions ({TRANSACTION_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#
        ))
        .bind(entry.id)
        .bind(entry.account_id)
        .bind(entry.user_id)
        .bind(entry.transaction_type.as_str())
        .bind(entry.direction.as_str())
        .bind(entry.amount)
        .bind(entry.currency.as_str())
        .bind(entry.transfer_id)
        .bind(entry.money_request_id)
        .bind(&entry.reference_number)
        .bind(entry.status.as_str())
        .bind(&entry.description)
        .bind(entry.processed_at)
        .execute(&mut **tx)
        .await
        .map_err(map_write_error)?;
        Ok(())
    }
}

#[async_trait]
impl AccountStore for PgLedgerStore {
    async fn find_account(
        &self,
        owner_id: Uuid,
        currency: &Currency,
    ) -> Result<Option<Account>, StoreError> {
        let row: Option<AccountRow> = sqlx::query_as(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE owner_id = $1 AND currency = $2"
        ))
        .bind(owner_id)
        .bind(currency.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Account::try_from).transpose()
    }

    async fn get_account_by_id(&self, account_id: Uuid) -> Result<Option<Account>, StoreError> {
        let row: Option<AccountRow> =
            sqlx::query_as(&format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1"))
                .bind(account_id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(Account::try_from).transpose()
    }

    async fn list_accounts(&self, owner_id: Uuid) -> Result<Vec<Account>, StoreError> {
        let rows: Vec<AccountRow> = sqlx::query_as(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE owner_id = $1 ORDER BY currency"
        ))
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        collect(rows)
    }

    async fn create_account(&self, owner_id: Uuid, currency: &Currency) -> Result<Account, StoreError> {
        let account = Account::open(owner_id, currency.clone());
        let row: Option<AccountRow> = sqlx::query_as(&format!(
            r#"
            INSERT INTO accounts ({ACCOUNT_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (owner_id, currency) DO NOTHING
            RETURNING {ACCOUNT_COLUMNS}
            "#
        ))
        .bind(account.id())
        .bind(owner_id)
        .bind(currency.as_str())
        .bind(account.balance().value())
        .bind(account.status().as_str())
        .bind(account.version())
        .bind(account.created_at())
        .bind(account.updated_at())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row.try_into(),
            None => Err(StoreError::DuplicateAccount {
                owner_id,
                currency: currency.to_string(),
            }),
        }
    }

    async fn adjust_balance(
        &self,
        account_id: Uuid,
        delta: Decimal,
        expected_version: i64,
    ) -> Result<Account, StoreError> {
        let mut tx = self.pool.begin().await?;
        let next = Self::apply_locked(
            &mut tx,
            &BalanceAdjustment {
                account_id,
                delta,
                expected_version: Some(expected_version),
            },
        )
        .await?;
        tx.commit().await?;
        Ok(next)
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn commit(&self, work: UnitOfWork) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        for adjustment in work.ordered_adjustments() {
            Self::apply_locked(&mut tx, &adjustment).await?;
        }
        // Parent rows first: ledger entries reference transfers and requests
        if let Some(write) = work.transfer() {
            Self::write_transfer(&mut tx, write).await?;
        }
        if let Some(write) = work.money_request() {
            Self::write_money_request(&mut tx, write).await?;
        }
        for entry in work.transactions() {
            Self::insert_transaction(&mut tx, entry).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_transfer(&self, transfer_id: Uuid) -> Result<Option<Transfer>, StoreError> {
        let row: Option<TransferRow> =
            sqlx::query_as(&format!("SELECT {TRANSFER_COLUMNS} FROM transfers WHERE id = $1"))
                .bind(transfer_id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(Transfer::try_from).transpose()
    }

    async fn list_transfers(&self, owner_id: Uuid) -> Result<Vec<Transfer>, StoreError> {
        let rows: Vec<TransferRow> = sqlx::query_as(&format!(
            "SELECT {TRANSFER_COLUMNS} FROM transfers WHERE owner_id = $1 ORDER BY created_at DESC"
        ))
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        collect(rows)
    }

    async fn get_money_request(&self, request_id: Uuid) -> Result<Option<MoneyRequest>, StoreError> {
        let row: Option<MoneyRequestRow> = sqlx::query_as(&format!(
            "SELECT {MONEY_REQUEST_COLUMNS} FROM money_requests WHERE id = $1"
        ))
        .bind(request_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(MoneyRequest::try_from).transpose()
    }

    async fn get_money_request_by_token(
        &self,
        token: &str,
    ) -> Result<Option<MoneyRequest>, StoreError> {
        let row: Option<MoneyRequestRow> = sqlx::query_as(&format!(
            "SELECT {MONEY_REQUEST_COLUMNS} FROM money_requests WHERE payment_link_token = $1"
        ))
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        row.map(MoneyRequest::try_from).transpose()
    }

    async fn transactions_by_account(
        &self,
        account_id: Uuid,
    ) -> Result<Vec<LedgerTransaction>, StoreError> {
        let rows: Vec<TransactionRow> = sqlx::query_as(&format!(
            r#"
            SELECT {TRANSACTION_COLUMNS} FROM ledger_transactions
            WHERE account_id = $1
            ORDER BY processed_at DESC
            "#
        ))
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        collect(rows)
    }

    async fn transactions_by_user(&self, user_id: Uuid) -> Result<Vec<LedgerTransaction>, StoreError> {
        let rows: Vec<TransactionRow> = sqlx::query_as(&format!(
            r#"
            SELECT {TRANSACTION_COLUMNS} FROM ledger_transactions
            WHERE user_id = $1
            ORDER BY processed_at DESC
            "#
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        collect(rows)
    }

    async fn reference_exists(&self, reference: &str) -> Result<bool, StoreError> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (SELECT 1 FROM transfers WHERE reference_number = $1)
                OR EXISTS (SELECT 1 FROM ledger_transactions WHERE reference_number = $1)
                OR EXISTS (SELECT 1 FROM money_requests WHERE reference_number = $1)
            "#,
        )
        .bind(reference)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn expire_money_requests(&self, now: DateTime<Utc>) -> Result<Vec<MoneyRequest>, StoreError> {
        let rows: Vec<MoneyRequestRow> = sqlx::query_as(&format!(
            r#"
            UPDATE money_requests
            SET status = 'expired', updated_at = $1
            WHERE status = 'pending' AND expires_at <= $1
            RETURNING {MONEY_REQUEST_COLUMNS}
            "#
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        collect(rows)
    }
}
