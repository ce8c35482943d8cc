//! Audit Log
//!
//! Before/after snapshots of every ledger state change, tagged with the
//! operation's correlation id. Recording is best-effort: the engine
//! dispatches records after commit and only logs sink failures.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use std::net::IpAddr;
use uuid::Uuid;

use crate::domain::OperationContext;

/// Audit action types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    AccountCreated,
    TransactionRecorded,
    TransferCreated,
    TransferCompleted,
    TransferCancelled,
    TransferFailed,
    MoneyRequestCreated,
    MoneyRequestPaid,
    MoneyRequestCancelled,
    MoneyRequestExpired,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::AccountCreated => "account.created",
            AuditAction::TransactionRecorded => "transaction.recorded",
            AuditAction::TransferCreated => "transfer.created",
            AuditAction::TransferCompleted => "transfer.completed",
            AuditAction::TransferCancelled => "transfer.cancelled",
            AuditAction::TransferFailed => "transfer.failed",
            AuditAction::MoneyRequestCreated => "money_request.created",
            AuditAction::MoneyRequestPaid => "money_request.paid",
            AuditAction::MoneyRequestCancelled => "money_request.cancelled",
            AuditAction::MoneyRequestExpired => "money_request.expired",
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A finished audit entry, ready for a sink
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub correlation_id: Uuid,
    pub request_user_id: Option<Uuid>,
    pub client_ip: Option<IpAddr>,
    pub action: String,
    pub resource_type: Option<String>,
    pub resource_id: Option<Uuid>,
    pub before_state: Option<serde_json::Value>,
    pub after_state: Option<serde_json::Value>,
    pub changed_fields: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Builder for creating audit log entries
#[derive(Debug, Clone)]
pub struct AuditLogBuilder {
    action: AuditAction,
    resource_type: Option<String>,
    resource_id: Option<Uuid>,
    before_state: Option<serde_json::Value>,
    after_state: Option<serde_json::Value>,
}

impl AuditLogBuilder {
    pub fn new(action: AuditAction) -> Self {
        Self {
            action,
            resource_type: None,
            resource_id: None,
            before_state: None,
            after_state: None,
        }
    }

    /// Set the resource type
    pub fn resource_type(mut self, resource_type: &str) -> Self {
        self.resource_type = Some(resource_type.to_string());
        self
    }

    /// Set the resource ID
    pub fn resource_id(mut self, resource_id: Uuid) -> Self {
        self.resource_id = Some(resource_id);
        self
    }

    /// Set the before state
    pub fn before_state<T: Serialize>(mut self, state: &T) -> Self {
        self.before_state = serde_json::to_value(state).ok();
        self
    }

    /// Set the after state
    pub fn after_state<T: Serialize>(mut self, state: &T) -> Self {
        self.after_state = serde_json::to_value(state).ok();
        self
    }

    /// Top-level fields whose value differs between before and after
    fn changed_fields(&self) -> Vec<String> {
        let (Some(serde_json::Value::Object(before)), Some(serde_json::Value::Object(after))) =
            (&self.before_state, &self.after_state)
        else {
            return Vec::new();
        };

        let mut fields: Vec<String> = after
            .iter()
            .filter(|(key, value)| before.get(*key) != Some(*value))
            .map(|(key, _)| key.clone())
            .collect();
        fields.sort();
        fields
    }

    pub fn build(self, context: &OperationContext) -> AuditRecord {
        let changed_fields = self.changed_fields();
        AuditRecord {
            id: Uuid::new_v4(),
            correlation_id: context.correlation_id,
            request_user_id: context.request_user_id,
            client_ip: context.client_ip,
            action: self.action.as_str().to_string(),
            resource_type: self.resource_type,
            resource_id: self.resource_id,
            before_state: self.before_state,
            after_state: self.after_state,
            changed_fields,
            created_at: Utc::now(),
        }
    }
}

/// Audit log errors
#[derive(Debug, thiserror::Error)]
pub enum AuditLogError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Destination for audit records
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, record: AuditRecord) -> Result<(), AuditLogError>;
}

/// Writes audit records to the `audit_logs` table
#[derive(Debug, Clone)]
pub struct PgAuditSink {
    pool: PgPool,
}

impl PgAuditSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditSink for PgAuditSink {
    async fn record(&self, record: AuditRecord) -> Result<(), AuditLogError> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs (
                id, correlation_id, request_user_id,
                action, resource_type, resource_id,
                before_state, after_state, changed_fields, client_ip, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10::inet, $11)
            "#,
        )
        .bind(record.id)
        .bind(record.correlation_id)
        .bind(record.request_user_id)
        .bind(&record.action)
        .bind(&record.resource_type)
        .bind(record.resource_id)
        .bind(&record.before_state)
        .bind(&record.after_state)
        .bind(&record.changed_fields)
        .bind(record.client_ip.map(|ip| ip.to_string()))
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;

        tracing::debug!(
            audit_id = %record.id,
            action = %record.action,
            "Audit log entry created"
        );

        Ok(())
    }
}

/// Emits audit records as structured log lines
#[derive(Debug, Default, Clone)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, record: AuditRecord) -> Result<(), AuditLogError> {
        let after = record
            .after_state
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        tracing::info!(
            target: "audit",
            audit_id = %record.id,
            correlation_id = %record.correlation_id,
            action = %record.action,
            resource_type = ?record.resource_type,
            resource_id = ?record.resource_id,
            changed_fields = ?record.changed_fields,
            after = ?after,
            "Audit record"
        );
        Ok(())
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_audit_action_as_str() {
        assert_eq!(AuditAction::TransferCompleted.as_str(), "transfer.completed");
        assert_eq!(AuditAction::MoneyRequestPaid.as_str(), "money_request.paid");
        assert_eq!(AuditAction::AccountCreated.to_string(), "account.created");
    }

    #[test]
    fn test_builder_computes_changed_fields() {
        let context = OperationContext::new();
        let record = AuditLogBuilder::new(AuditAction::TransferCancelled)
            .resource_type("Transfer")
            .resource_id(Uuid::new_v4())
            .before_state(&json!({"status": "pending", "fee": "2.50", "updated_at": 1}))
            .after_state(&json!({"status": "cancelled", "fee": "2.50", "updated_at": 2}))
            .build(&context);

        assert_eq!(record.action, "transfer.cancelled");
        assert_eq!(record.correlation_id, context.correlation_id);
        assert_eq!(record.changed_fields, vec!["status", "updated_at"]);
    }

    #[test]
    fn test_builder_without_before_state() {
        let record = AuditLogBuilder::new(AuditAction::AccountCreated)
            .after_state(&json!({"balance": "0.00"}))
            .build(&OperationContext::system());

        assert!(record.before_state.is_none());
        assert!(record.changed_fields.is_empty());
    }

    #[tokio::test]
    async fn test_tracing_sink_accepts_records() {
        let record = AuditLogBuilder::new(AuditAction::MoneyRequestExpired).build(&OperationContext::system());
        assert!(TracingAuditSink.record(record).await.is_ok());
    }
}
