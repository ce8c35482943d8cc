//! Scheduled Jobs
//!
//! Background maintenance for the ledger. Runs on its own task and only
//! talks to the engine, so it works against either store.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

use crate::domain::{LedgerError, OperationContext};
use crate::engine::LedgerEngine;

// =========================================================================
// Money request expiry sweep
// =========================================================================

/// Store `expired` on every pending money request past its expiry
pub async fn expire_money_requests(engine: &LedgerEngine) -> Result<u64, JobError> {
    let context = OperationContext::system();
    let expired = engine
        .expire_stale_money_requests(Utc::now(), &context)
        .await?;

    Ok(expired.len() as u64)
}

// =========================================================================
// Job Scheduler
// =========================================================================

/// Configuration for job scheduler
#[derive(Debug, Clone)]
pub struct JobSchedulerConfig {
    /// Interval for the money request expiry sweep (default: 5 minutes)
    pub expiry_sweep_interval: Duration,
}

impl Default for JobSchedulerConfig {
    fn default() -> Self {
        Self {
            expiry_sweep_interval: Duration::from_secs(300),
        }
    }
}

/// Job Scheduler - runs periodic maintenance tasks
pub struct JobScheduler {
    engine: Arc<LedgerEngine>,
    config: JobSchedulerConfig,
}

impl JobScheduler {
    pub fn new(engine: Arc<LedgerEngine>) -> Self {
        Self {
            engine,
            config: JobSchedulerConfig::default(),
        }
    }

    pub fn with_config(engine: Arc<LedgerEngine>, config: JobSchedulerConfig) -> Self {
        Self { engine, config }
    }

    /// Start the job scheduler in the background.
    /// Returns a handle that can be used to abort the scheduler.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&self) {
        tracing::info!(
            expiry_sweep_secs = self.config.expiry_sweep_interval.as_secs(),
            "Job scheduler started"
        );

        let mut expiry_interval = interval(self.config.expiry_sweep_interval);

        loop {
            expiry_interval.tick().await;
            if let Err(e) = expire_money_requests(&self.engine).await {
                tracing::error!(error = %e, "Money request expiry sweep failed");
            }
        }
    }

    /// Run all maintenance jobs once (for manual trigger or testing)
    pub async fn run_all_once(&self) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();

        match expire_money_requests(&self.engine).await {
            Ok(count) => report.money_requests_expired = count,
            Err(e) => report.errors.push(format!("Money request expiry: {}", e)),
        }

        report.completed_at = Utc::now();
        report
    }
}

/// Report from running maintenance jobs
#[derive(Debug, Clone, Default)]
pub struct MaintenanceReport {
    pub money_requests_expired: u64,
    pub errors: Vec<String>,
    pub completed_at: DateTime<Utc>,
}

/// Job execution errors
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::MoneyRequest;
    use crate::domain::{Currency, MoneyRequestStatus};
    use crate::fx::StaticRateTable;
    use crate::store::{InMemoryLedgerStore, LedgerStore, UnitOfWork};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn overdue_request() -> MoneyRequest {
        let created = Utc::now() - chrono::Duration::days(45);
        MoneyRequest {
            id: Uuid::new_v4(),
            requester_id: Uuid::new_v4(),
            recipient_id: None,
            amount: dec!(12.00),
            currency: Currency::new("GBP").unwrap(),
            description: None,
            status: MoneyRequestStatus::Pending,
            reference_number: format!("REQ-{}", Uuid::new_v4().simple()),
            payment_link_token: Some("feed".repeat(16)),
            expires_at: MoneyRequest::expiry_from(created),
            paid_at: None,
            paid_by: None,
            created_at: created,
            updated_at: created,
        }
    }

    #[test]
    fn test_job_scheduler_config_default() {
        let config = JobSchedulerConfig::default();
        assert_eq!(config.expiry_sweep_interval, Duration::from_secs(300));
    }

    #[test]
    fn test_maintenance_report_default() {
        let report = MaintenanceReport::default();
        assert_eq!(report.money_requests_expired, 0);
        assert_eq!(report.errors.len(), 0);
    }

    #[tokio::test]
    async fn test_run_all_once_expires_overdue_requests() {
        let store = Arc::new(InMemoryLedgerStore::new());
        store
            .commit(UnitOfWork::new().insert_money_request(overdue_request()))
            .await
            .unwrap();
        let engine = Arc::new(LedgerEngine::new(
            store,
            Arc::new(StaticRateTable::with_defaults()),
        ));
        let scheduler = JobScheduler::new(engine);

        let report = scheduler.run_all_once().await;
        assert_eq!(report.money_requests_expired, 1);
        assert!(report.errors.is_empty());

        let report = scheduler.run_all_once().await;
        assert_eq!(report.money_requests_expired, 0);
    }
}
