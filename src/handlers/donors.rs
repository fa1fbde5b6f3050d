//! Donor records, donation history and user listings

use crate::db::audit::{self, AuditAction, AuditEntry};
use crate::models::*;
use crate::validation::validate_donation_record;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Extension, Json};
use chrono::{DateTime, Months, Utc};
use serde_json::json;
use sqlx::{FromRow, PgExecutor};
use uuid::Uuid;

use super::AppState;

/// Minimum gap between two donations
pub const DONATION_INTERVAL_MONTHS: u32 = 3;

/// Eligibility of a donor at a given moment, from their most recent donation
pub fn eligibility_at(last_donation: Option<DateTime<Utc>>, at: DateTime<Utc>) -> DonorEligibility {
    let Some(last) = last_donation else {
        return DonorEligibility::Ready;
    };
    match last.checked_add_months(Months::new(DONATION_INTERVAL_MONTHS)) {
        Some(eligible_from) if eligible_from > at => DonorEligibility::Waiting { eligible_from },
        _ => DonorEligibility::Ready,
    }
}

pub async fn last_donation_at<'e, E: PgExecutor<'e>>(
    executor: E,
    donor_id: Uuid,
) -> Result<Option<DateTime<Utc>>, sqlx::Error> {
    sqlx::query_scalar("SELECT MAX(donated_at) FROM donation_records WHERE donor_id = $1")
        .bind(donor_id)
        .fetch_one(executor)
        .await
}

#[derive(Debug, FromRow)]
struct DonorRow {
    id: Uuid,
    name: String,
    email: String,
    blood_type: Option<BloodType>,
    phone: Option<String>,
    last_donation_at: Option<DateTime<Utc>>,
    total_donations: i64,
}

impl DonorRow {
    fn into_summary(self, now: DateTime<Utc>) -> DonorSummary {
        DonorSummary {
            eligibility: eligibility_at(self.last_donation_at, now),
            id: self.id,
            name: self.name,
            email: self.email,
            blood_type: self.blood_type,
            phone: self.phone,
            last_donation_at: self.last_donation_at,
            total_donations: self.total_donations,
        }
    }
}

/// All donors with their last donation and eligibility (admin)
pub async fn list_donors(State(state): State<AppState>) -> impl IntoResponse {
    let rows = sqlx::query_as::<_, DonorRow>(
        r#"
        SELECT u.id, u.name, u.email, u.blood_type, u.phone,
               MAX(d.donated_at) AS last_donation_at,
               COUNT(d.id) AS total_donations
        FROM users u
        LEFT JOIN donation_records d ON d.donor_id = u.id
        WHERE u.role = 'donor'
        GROUP BY u.id
        ORDER BY u.name ASC
        "#,
    )
    .fetch_all(&state.pool)
    .await;

    match rows {
        Ok(rows) => {
            let now = Utc::now();
            let donors: Vec<DonorSummary> = rows.into_iter().map(|r| r.into_summary(now)).collect();
            (StatusCode::OK, Json(ApiResponse::success(donors)))
        }
        Err(e) => {
            tracing::error!("Failed to list donors: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ApiResponse::error("Failed to list donors")),
            )
        }
    }
}

/// All registered accounts (admin)
pub async fn list_users(State(state): State<AppState>) -> impl IntoResponse {
    let users = sqlx::query_as::<_, User>("SELECT * FROM users ORDER BY created_at DESC")
        .fetch_all(&state.pool)
        .await;

    match users {
        Ok(users) => {
            let responses: Vec<UserResponse> = users.into_iter().map(UserResponse::from).collect();
            (StatusCode::OK, Json(ApiResponse::success(responses)))
        }
        Err(e) => {
            tracing::error!("Failed to list users: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ApiResponse::error("Failed to list users")),
            )
        }
    }
}

/// Donation history: admins see every record, everyone else their own
pub async fn list_donation_history(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> impl IntoResponse {
    let donor_filter = (!session.user.is_admin()).then_some(session.user.id);

    let records = sqlx::query_as::<_, DonationRecord>(
        r#"
        SELECT * FROM donation_records
        WHERE ($1::uuid IS NULL OR donor_id = $1)
        ORDER BY donated_at DESC
        "#,
    )
    .bind(donor_filter)
    .fetch_all(&state.pool)
    .await;

    match records {
        Ok(records) => (StatusCode::OK, Json(ApiResponse::success(records))),
        Err(e) => {
            tracing::error!("Failed to list donation history: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ApiResponse::error("Failed to list donation history")),
            )
        }
    }
}

/// Record a completed donation, optionally crediting the bags to stock (admin)
pub async fn record_donation(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Json(input): Json<CreateDonationRecord>,
) -> impl IntoResponse {
    let now = Utc::now();
    if let Err(e) = validate_donation_record(&input, now) {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::<DonationRecord>::error(e.to_string())),
        );
    }

    let donor = sqlx::query_as::<_, User>(
        "SELECT * FROM users WHERE id = $1 AND role = 'donor' AND is_active = true",
    )
    .bind(input.donor_id)
    .fetch_optional(&state.pool)
    .await;

    let (donor, blood_type) = match donor {
        Ok(Some(User {
            blood_type: Some(blood_type),
            ..
        })) => (input.donor_id, blood_type),
        Ok(_) => {
            return (
                StatusCode::NOT_FOUND,
                Json(ApiResponse::error("Donor not found")),
            )
        }
        Err(e) => {
            tracing::error!("Database error: {}", e);
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ApiResponse::error("Database error")),
            );
        }
    };

    let admin = &session.user;
    let donated_at = input.donated_at.unwrap_or(now);

    let result: Result<DonationRecord, sqlx::Error> = async {
        let mut tx = state.pool.begin().await?;

        let record = sqlx::query_as::<_, DonationRecord>(
            r#"
            INSERT INTO donation_records (donor_id, blood_type, bags, donated_at, location, notes, recorded_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(donor)
        .bind(blood_type)
        .bind(input.bags)
        .bind(donated_at)
        .bind(&input.location)
        .bind(&input.notes)
        .bind(admin.id)
        .fetch_one(&mut *tx)
        .await?;

        if input.credit_stock {
            sqlx::query(
                r#"
                UPDATE blood_stocks
                SET bag_count = bag_count + $1, updated_at = NOW()
                WHERE blood_type = $2
                "#,
            )
            .bind(record.bags)
            .bind(blood_type)
            .execute(&mut *tx)
            .await?;
        }

        audit::record(
            &mut *tx,
            AuditEntry::new(AuditAction::DonationRecorded, "donation_record", Some(record.id))
                .actor(admin.id)
                .details(json!({
                    "donor_id": donor,
                    "blood_type": blood_type,
                    "bags": record.bags,
                    "credited_stock": input.credit_stock
                })),
        )
        .await?;

        tx.commit().await?;
        Ok(record)
    }
    .await;

    match result {
        Ok(record) => {
            tracing::info!(
                "Admin {} recorded donation of {} bags {} by donor {}",
                admin.email,
                record.bags,
                record.blood_type,
                donor
            );
            (StatusCode::CREATED, Json(ApiResponse::success(record)))
        }
        Err(e) => {
            tracing::error!("Failed to record donation: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ApiResponse::error(
                    "Failed to record donation; nothing was changed. Please retry.",
                )),
            )
        }
    }
}
