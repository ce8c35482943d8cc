//! In-memory ledger store
//!
//! A single mutex guards the whole ledger, so every commit is trivially
//! serializable. Used in tests, the load-test binary and development mode.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::aggregate::{Account, Aggregate, MoneyRequest, Transfer};
use crate::domain::{Currency, LedgerTransaction, MoneyRequestStatus};

use super::{
    apply_adjustment, AccountStore, BalanceAdjustment, EntityWrite, LedgerStore, StoreError,
    UnitOfWork,
};

#[derive(Debug, Default)]
struct MemoryState {
    accounts: HashMap<Uuid, Account>,
    account_index: HashMap<(Uuid, Currency), Uuid>,
    transfers: HashMap<Uuid, Transfer>,
    money_requests: HashMap<Uuid, MoneyRequest>,
    link_tokens: HashMap<String, Uuid>,
    /// Append-only, oldest first
    transactions: Vec<LedgerTransaction>,
    references: HashSet<String>,
}

impl MemoryState {
    fn check_references(&self, work: &UnitOfWork) -> Result<(), StoreError> {
        let mut seen = HashSet::new();
        for reference in work.new_references() {
            if self.references.contains(reference) || !seen.insert(reference) {
                return Err(StoreError::DuplicateReference(reference.to_string()));
            }
        }
        Ok(())
    }

    fn check_transfer(&self, work: &UnitOfWork) -> Result<(), StoreError> {
        match work.transfer() {
            None => Ok(()),
            Some(EntityWrite::Insert(transfer)) => {
                if self.transfers.contains_key(&transfer.id) {
                    return Err(StoreError::DuplicateReference(transfer.id.to_string()));
                }
                Ok(())
            }
            Some(EntityWrite::Update {
                entity,
                expected_status,
            }) => {
                let current = self.transfers.get(&entity.id).ok_or(StoreError::EntityNotFound {
                    entity: "transfer",
                    id: entity.id,
                })?;
                if current.status() != *expected_status {
                    return Err(StoreError::StatusConflict {
                        entity: "transfer",
                        id: entity.id,
                        expected: expected_status.to_string(),
                        actual: current.status().to_string(),
                    });
                }
                // A writer that never saw the payout go out may not clear it
                if current.payout_submitted() && !entity.payout_submitted() {
                    return Err(StoreError::StatusConflict {
                        entity: "transfer",
                        id: entity.id,
                        expected: expected_status.to_string(),
                        actual: format!("{} (payout submitted)", current.status()),
                    });
                }
                Ok(())
            }
        }
    }

    fn check_money_request(&self, work: &UnitOfWork) -> Result<(), StoreError> {
        match work.money_request() {
            None => Ok(()),
            Some(EntityWrite::Insert(request)) => {
                if self.money_requests.contains_key(&request.id) {
                    return Err(StoreError::DuplicateReference(request.id.to_string()));
                }
                if let Some(token) = &request.payment_link_token {
                    if self.link_tokens.contains_key(token) {
                        return Err(StoreError::DuplicateReference(token.clone()));
                    }
                }
                Ok(())
            }
            Some(EntityWrite::Update {
                entity,
                expected_status,
            }) => {
                let current =
                    self.money_requests
                        .get(&entity.id)
                        .ok_or(StoreError::EntityNotFound {
                            entity: "money request",
                            id: entity.id,
                        })?;
                if current.stored_status() != *expected_status {
                    return Err(StoreError::StatusConflict {
                        entity: "money request",
                        id: entity.id,
                        expected: expected_status.to_string(),
                        actual: current.stored_status().to_string(),
                    });
                }
                Ok(())
            }
        }
    }
}

/// Mutex-guarded, process-local [`LedgerStore`]
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    state: Mutex<MemoryState>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountStore for InMemoryLedgerStore {
    async fn find_account(
        &self,
        owner_id: Uuid,
        currency: &Currency,
    ) -> Result<Option<Account>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .account_index
            .get(&(owner_id, currency.clone()))
            .and_then(|id| state.accounts.get(id))
            .cloned())
    }

    async fn get_account_by_id(&self, account_id: Uuid) -> Result<Option<Account>, StoreError> {
        Ok(self.state.lock().await.accounts.get(&account_id).cloned())
    }

    async fn list_accounts(&self, owner_id: Uuid) -> Result<Vec<Account>, StoreError> {
        let state = self.state.lock().await;
        let mut accounts: Vec<Account> = state
            .accounts
            .values()
            .filter(|a| a.owner_id() == owner_id)
            .cloned()
            .collect();
        accounts.sort_by(|a, b| a.currency().cmp(b.currency()));
        Ok(accounts)
    }

    async fn create_account(&self, owner_id: Uuid, currency: &Currency) -> Result<Account, StoreError> {
        let mut state = self.state.lock().await;
        let key = (owner_id, currency.clone());
        if state.account_index.contains_key(&key) {
            return Err(StoreError::DuplicateAccount {
                owner_id,
                currency: currency.to_string(),
            });
        }

        let account = Account::open(owner_id, currency.clone());
        state.account_index.insert(key, account.id());
        state.accounts.insert(account.id(), account.clone());
        Ok(account)
    }

    async fn adjust_balance(
        &self,
        account_id: Uuid,
        delta: Decimal,
        expected_version: i64,
    ) -> Result<Account, StoreError> {
        let mut state = self.state.lock().await;
        let account = state
            .accounts
            .get(&account_id)
            .ok_or(StoreError::AccountNotFound(account_id))?;

        let next = apply_adjustment(
            account,
            &BalanceAdjustment {
                account_id,
                delta,
                expected_version: Some(expected_version),
            },
        )?;
        state.accounts.insert(account_id, next.clone());
        Ok(next)
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn commit(&self, work: UnitOfWork) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;

        // Validate everything before touching anything
        let mut next_accounts = Vec::new();
        for adjustment in work.ordered_adjustments() {
            let account = state
                .accounts
                .get(&adjustment.account_id)
                .ok_or(StoreError::AccountNotFound(adjustment.account_id))?;
            next_accounts.push(apply_adjustment(account, &adjustment)?);
        }
        state.check_references(&work)?;
        state.check_transfer(&work)?;
        state.check_money_request(&work)?;

        for account in next_accounts {
            state.accounts.insert(account.id(), account);
        }
        for reference in work.new_references() {
            state.references.insert(reference.to_string());
        }
        if let Some(write) = work.transfer() {
            let transfer = write.entity().clone();
            state.transfers.insert(transfer.id, transfer);
        }
        if let Some(write) = work.money_request() {
            let request = write.entity().clone();
            if let Some(token) = &request.payment_link_token {
                state.link_tokens.insert(token.clone(), request.id);
            }
            state.money_requests.insert(request.id, request);
        }
        state.transactions.extend(work.transactions().iter().cloned());

        Ok(())
    }

    async fn get_transfer(&self, transfer_id: Uuid) -> Result<Option<Transfer>, StoreError> {
        Ok(self.state.lock().await.transfers.get(&transfer_id).cloned())
    }

    async fn list_transfers(&self, owner_id: Uuid) -> Result<Vec<Transfer>, StoreError> {
        let state = self.state.lock().await;
        let mut transfers: Vec<Transfer> = state
            .transfers
            .values()
            .filter(|t| t.owner_id == owner_id)
            .cloned()
            .collect();
        transfers.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(transfers)
    }

    async fn get_money_request(&self, request_id: Uuid) -> Result<Option<MoneyRequest>, StoreError> {
        Ok(self.state.lock().await.money_requests.get(&request_id).cloned())
    }

    async fn get_money_request_by_token(
        &self,
        token: &str,
    ) -> Result<Option<MoneyRequest>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .link_tokens
            .get(token)
            .and_then(|id| state.money_requests.get(id))
            .cloned())
    }

    async fn transactions_by_account(
        &self,
        account_id: Uuid,
    ) -> Result<Vec<LedgerTransaction>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .transactions
            .iter()
            .rev()
            .filter(|t| t.account_id == account_id)
            .cloned()
            .collect())
    }

    async fn transactions_by_user(&self, user_id: Uuid) -> Result<Vec<LedgerTransaction>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .transactions
            .iter()
            .rev()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn reference_exists(&self, reference: &str) -> Result<bool, StoreError> {
        Ok(self.state.lock().await.references.contains(reference))
    }

    async fn expire_money_requests(&self, now: DateTime<Utc>) -> Result<Vec<MoneyRequest>, StoreError> {
        let mut state = self.state.lock().await;
        let expired: Vec<MoneyRequest> = state
            .money_requests
            .values()
            .filter(|r| r.stored_status() == MoneyRequestStatus::Pending)
            .filter_map(|r| r.expire(now).ok())
            .collect();

        for request in &expired {
            state.money_requests.insert(request.id, request.clone());
        }
        Ok(expired)
    }
}
