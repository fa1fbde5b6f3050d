//! Audit log writes

use serde_json::Value;
use sqlx::PgExecutor;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "audit_action", rename_all = "snake_case")]
pub enum AuditAction {
    UserRegistered,
    UserLogin,
    UserLogout,
    StockUpdated,
    StockChecked,
    RequestCreated,
    RequestApproved,
    RequestRejected,
    SlotCreated,
    SlotDeleted,
    SlotBooked,
    SlotCancelled,
    DonationRecorded,
    RemindersSent,
    WeeklySummarySent,
}

#[derive(Debug, Clone)]
pub struct AuditEntry<'a> {
    pub action: AuditAction,
    pub entity_type: &'a str,
    pub entity_id: Option<Uuid>,
    pub actor_id: Option<Uuid>,
    pub actor_ip: Option<&'a str>,
    pub details: Option<Value>,
}

impl<'a> AuditEntry<'a> {
    pub fn new(action: AuditAction, entity_type: &'a str, entity_id: Option<Uuid>) -> Self {
        Self {
            action,
            entity_type,
            entity_id,
            actor_id: None,
            actor_ip: None,
            details: None,
        }
    }

    pub fn actor(mut self, actor_id: Uuid) -> Self {
        self.actor_id = Some(actor_id);
        self
    }

    pub fn ip(mut self, ip: &'a str) -> Self {
        self.actor_ip = Some(ip);
        self
    }

    pub fn details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Write an audit entry, inside a transaction when one is passed
pub async fn record<'e, E: PgExecutor<'e>>(
    executor: E,
    entry: AuditEntry<'_>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO audit_log (action, entity_type, entity_id, actor_id, actor_ip, details)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(entry.action)
    .bind(entry.entity_type)
    .bind(entry.entity_id)
    .bind(entry.actor_id)
    .bind(entry.actor_ip)
    .bind(entry.details)
    .execute(executor)
    .await?;
    Ok(())
}

/// Best-effort audit write outside a transaction; failures are logged only
pub async fn record_best_effort<'e, E: PgExecutor<'e>>(executor: E, entry: AuditEntry<'_>) {
    let action = entry.action;
    if let Err(e) = record(executor, entry).await {
        tracing::warn!("Failed to write audit entry {:?}: {}", action, e);
    }
}
