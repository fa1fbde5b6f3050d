//! Notification runs against the database
//!
//! Each run queries what it needs, emits its events, writes one audit entry
//! and returns what it found. Admin endpoints and the scheduler share them.

use super::{
    emit, emit_reminders, emit_weekly_summary, stock_alerts, DonorReminder, StockAlert,
    WeeklySummary,
};
use crate::db::audit::{self, AuditAction, AuditEntry};
use crate::models::{BloodStock, RequestCounts, RequestStatus, StockThresholds};
use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use sqlx::PgPool;
use uuid::Uuid;

/// Who started a notification run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Admin(Uuid),
    Scheduler,
}

impl Trigger {
    fn entry(self, action: AuditAction, entity_type: &str, details: Value) -> AuditEntry<'_> {
        let entry = AuditEntry::new(action, entity_type, None).details(details);
        match self {
            Trigger::Admin(id) => entry.actor(id),
            Trigger::Scheduler => entry,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Trigger::Admin(_) => "admin",
            Trigger::Scheduler => "scheduler",
        }
    }
}

async fn load_stocks(pool: &PgPool) -> Result<Vec<BloodStock>, sqlx::Error> {
    sqlx::query_as::<_, BloodStock>("SELECT * FROM blood_stocks ORDER BY blood_type")
        .fetch_all(pool)
        .await
}

/// Check every stock against the thresholds
pub async fn stock_check(
    pool: &PgPool,
    thresholds: &StockThresholds,
    trigger: Trigger,
) -> Result<Vec<StockAlert>, sqlx::Error> {
    let alerts = stock_alerts(&load_stocks(pool).await?, thresholds);
    emit(&alerts);

    audit::record_best_effort(
        pool,
        trigger.entry(
            AuditAction::StockChecked,
            "blood_stock",
            json!({ "alerts": alerts, "trigger": trigger.label() }),
        ),
    )
    .await;

    tracing::info!(trigger = trigger.label(), alerts = alerts.len(), "Stock check finished");
    Ok(alerts)
}

/// Remind donors whose booked slot starts within `window` from `now`
pub async fn donor_reminders(
    pool: &PgPool,
    now: DateTime<Utc>,
    window: Duration,
    trigger: Trigger,
) -> Result<Vec<DonorReminder>, sqlx::Error> {
    let reminders = sqlx::query_as::<_, DonorReminder>(
        r#"
        SELECT u.id AS donor_id, u.name AS donor_name, u.email AS donor_email,
               s.id AS slot_id, s.slot_start, s.location
        FROM donation_slots s
        JOIN users u ON u.id = s.booked_by
        WHERE s.slot_start > $1 AND s.slot_start <= $2 AND u.is_active = true
        ORDER BY s.slot_start ASC
        "#,
    )
    .bind(now)
    .bind(now + window)
    .fetch_all(pool)
    .await?;

    emit_reminders(&reminders);

    let slot_ids: Vec<Uuid> = reminders.iter().map(|r| r.slot_id).collect();
    audit::record_best_effort(
        pool,
        trigger.entry(
            AuditAction::RemindersSent,
            "donation_slot",
            json!({
                "slots": slot_ids,
                "window_hours": window.num_hours(),
                "trigger": trigger.label()
            }),
        ),
    )
    .await;

    tracing::info!(
        trigger = trigger.label(),
        reminders = reminders.len(),
        "Donor reminders sent"
    );
    Ok(reminders)
}

/// Summarise the seven days before `now`
pub async fn weekly_summary(
    pool: &PgPool,
    thresholds: &StockThresholds,
    now: DateTime<Utc>,
    trigger: Trigger,
) -> Result<WeeklySummary, sqlx::Error> {
    let period_start = now - Duration::days(7);

    let rows: Vec<(RequestStatus, i64)> = sqlx::query_as(
        r#"
        SELECT status, COUNT(*) FROM blood_requests
        WHERE requested_at >= $1 AND requested_at < $2
        GROUP BY status
        "#,
    )
    .bind(period_start)
    .bind(now)
    .fetch_all(pool)
    .await?;

    let bags_issued: i64 = sqlx::query_scalar(
        r#"
        SELECT COALESCE(SUM(bags_requested), 0)::BIGINT FROM blood_requests
        WHERE status = 'approved' AND decided_at >= $1 AND decided_at < $2
        "#,
    )
    .bind(period_start)
    .bind(now)
    .fetch_one(pool)
    .await?;

    let (donations, bags_donated): (i64, i64) = sqlx::query_as(
        r#"
        SELECT COUNT(*), COALESCE(SUM(bags), 0)::BIGINT FROM donation_records
        WHERE donated_at >= $1 AND donated_at < $2
        "#,
    )
    .bind(period_start)
    .bind(now)
    .fetch_one(pool)
    .await?;

    let summary = WeeklySummary {
        period_start,
        period_end: now,
        requests: RequestCounts::from_rows(&rows),
        bags_issued,
        donations,
        bags_donated,
        alerts: stock_alerts(&load_stocks(pool).await?, thresholds),
    };

    emit_weekly_summary(&summary);

    audit::record_best_effort(
        pool,
        trigger.entry(
            AuditAction::WeeklySummarySent,
            "summary",
            json!({
                "period_start": summary.period_start,
                "period_end": summary.period_end,
                "requests": summary.requests,
                "bags_issued": summary.bags_issued,
                "donations": summary.donations,
                "trigger": trigger.label()
            }),
        ),
    )
    .await;

    Ok(summary)
}
