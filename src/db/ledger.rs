//! Transactional stock ledger and request queue on PostgreSQL
//!
//! Approval locks the request row, then the stock row (`FOR UPDATE`), in that
//! order. Stock updates lock only the stock row, so approvals for the same
//! blood type serialize and no lock cycle can form.

use crate::db::audit::{self, AuditAction, AuditEntry};
use crate::models::{BloodRequest, BloodStock, BloodType, CreateBloodRequest, RequestStatus};
use crate::workflow::{
    check_approval, check_quantity, ensure_pending, Ledger, RequestScope, WorkflowError,
};
use serde_json::json;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

#[derive(Clone)]
pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

async fn lock_request(
    tx: &mut Transaction<'_, Postgres>,
    request_id: Uuid,
) -> Result<BloodRequest, WorkflowError> {
    sqlx::query_as::<_, BloodRequest>("SELECT * FROM blood_requests WHERE id = $1 FOR UPDATE")
        .bind(request_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| WorkflowError::NotFound(format!("Request {}", request_id)))
}

async fn lock_stock(
    tx: &mut Transaction<'_, Postgres>,
    blood_type: BloodType,
) -> Result<BloodStock, WorkflowError> {
    sqlx::query_as::<_, BloodStock>("SELECT * FROM blood_stocks WHERE blood_type = $1 FOR UPDATE")
        .bind(blood_type)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| WorkflowError::NotFound(format!("Stock for blood type {}", blood_type)))
}

impl Ledger for PgLedger {
    async fn list_stocks(&self) -> Result<Vec<BloodStock>, WorkflowError> {
        let stocks =
            sqlx::query_as::<_, BloodStock>("SELECT * FROM blood_stocks ORDER BY blood_type")
                .fetch_all(&self.pool)
                .await?;
        Ok(stocks)
    }

    async fn set_stock_quantity(
        &self,
        blood_type: BloodType,
        bag_count: i32,
        actor_id: Uuid,
    ) -> Result<(i32, BloodStock), WorkflowError> {
        check_quantity(bag_count)?;

        let mut tx = self.pool.begin().await?;
        let previous = lock_stock(&mut tx, blood_type).await?;

        let stock = sqlx::query_as::<_, BloodStock>(
            r#"
            UPDATE blood_stocks
            SET bag_count = $1, updated_at = NOW()
            WHERE blood_type = $2
            RETURNING *
            "#,
        )
        .bind(bag_count)
        .bind(blood_type)
        .fetch_one(&mut *tx)
        .await?;

        audit::record(
            &mut *tx,
            AuditEntry::new(AuditAction::StockUpdated, "blood_stock", None)
                .actor(actor_id)
                .details(json!({
                    "blood_type": blood_type,
                    "previous": previous.bag_count,
                    "bag_count": bag_count
                })),
        )
        .await?;

        tx.commit().await?;
        Ok((previous.bag_count, stock))
    }

    async fn list_requests(
        &self,
        scope: RequestScope,
        status: Option<RequestStatus>,
    ) -> Result<Vec<BloodRequest>, WorkflowError> {
        let requests = sqlx::query_as::<_, BloodRequest>(
            r#"
            SELECT * FROM blood_requests
            WHERE ($1::uuid IS NULL OR requester_id = $1)
              AND ($2::request_status IS NULL OR status = $2)
            ORDER BY requested_at DESC
            "#,
        )
        .bind(scope.owner())
        .bind(status)
        .fetch_all(&self.pool)
        .await?;
        Ok(requests)
    }

    async fn create_request(
        &self,
        requester_id: Uuid,
        input: CreateBloodRequest,
        hospital: String,
    ) -> Result<BloodRequest, WorkflowError> {
        let mut tx = self.pool.begin().await?;

        let request = sqlx::query_as::<_, BloodRequest>(
            r#"
            INSERT INTO blood_requests
                (requester_id, patient_name, blood_type, bags_requested, purpose, hospital)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(requester_id)
        .bind(input.patient_name.trim())
        .bind(input.blood_type)
        .bind(input.bags_requested)
        .bind(input.purpose.trim())
        .bind(&hospital)
        .fetch_one(&mut *tx)
        .await?;

        audit::record(
            &mut *tx,
            AuditEntry::new(AuditAction::RequestCreated, "blood_request", Some(request.id))
                .actor(requester_id)
                .details(json!({
                    "blood_type": request.blood_type,
                    "bags_requested": request.bags_requested
                })),
        )
        .await?;

        tx.commit().await?;
        Ok(request)
    }

    async fn approve(
        &self,
        request_id: Uuid,
        actor_id: Uuid,
        note: Option<String>,
    ) -> Result<(BloodRequest, BloodStock), WorkflowError> {
        let mut tx = self.pool.begin().await?;

        let request = lock_request(&mut tx, request_id).await?;
        ensure_pending(&request)?;
        let stock = lock_stock(&mut tx, request.blood_type).await?;
        let remaining = check_approval(&request, &stock)?;

        let stock = sqlx::query_as::<_, BloodStock>(
            r#"
            UPDATE blood_stocks
            SET bag_count = $1, updated_at = NOW()
            WHERE blood_type = $2
            RETURNING *
            "#,
        )
        .bind(remaining)
        .bind(request.blood_type)
        .fetch_one(&mut *tx)
        .await?;

        let request = sqlx::query_as::<_, BloodRequest>(
            r#"
            UPDATE blood_requests
            SET status = 'approved', admin_note = $1, decided_at = NOW(), decided_by = $2
            WHERE id = $3
            RETURNING *
            "#,
        )
        .bind(&note)
        .bind(actor_id)
        .bind(request_id)
        .fetch_one(&mut *tx)
        .await?;

        audit::record(
            &mut *tx,
            AuditEntry::new(AuditAction::RequestApproved, "blood_request", Some(request_id))
                .actor(actor_id)
                .details(json!({
                    "blood_type": request.blood_type,
                    "bags_requested": request.bags_requested,
                    "remaining": stock.bag_count,
                    "note": note
                })),
        )
        .await?;

        tx.commit().await?;
        Ok((request, stock))
    }

    async fn reject(
        &self,
        request_id: Uuid,
        actor_id: Uuid,
        note: Option<String>,
    ) -> Result<BloodRequest, WorkflowError> {
        let mut tx = self.pool.begin().await?;

        let request = lock_request(&mut tx, request_id).await?;
        ensure_pending(&request)?;

        let request = sqlx::query_as::<_, BloodRequest>(
            r#"
            UPDATE blood_requests
            SET status = 'rejected', admin_note = $1, decided_at = NOW(), decided_by = $2
            WHERE id = $3
            RETURNING *
            "#,
        )
        .bind(&note)
        .bind(actor_id)
        .bind(request_id)
        .fetch_one(&mut *tx)
        .await?;

        audit::record(
            &mut *tx,
            AuditEntry::new(AuditAction::RequestRejected, "blood_request", Some(request_id))
                .actor(actor_id)
                .details(json!({ "note": note })),
        )
        .await?;

        tx.commit().await?;
        Ok(request)
    }
}
