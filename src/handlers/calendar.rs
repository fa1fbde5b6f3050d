//! Donation slot scheduling handlers

use crate::db::audit::{self, AuditAction, AuditEntry};
use crate::handlers::donors::{eligibility_at, last_donation_at};
use crate::models::*;
use crate::validation::validate_slots;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::json;
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use super::AppState;

// =============================================================================
// Query Parameters
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct SlotWindowQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

// =============================================================================
// Donor Endpoints
// =============================================================================

/// Available future donation slots in a window (default: next 30 days)
pub async fn list_available_slots(
    State(state): State<AppState>,
    Query(query): Query<SlotWindowQuery>,
) -> impl IntoResponse {
    let from = query.from.unwrap_or_else(Utc::now).max(Utc::now());
    let to = query.to.unwrap_or_else(|| from + Duration::days(30));

    let slots = sqlx::query_as::<_, DonationSlot>(
        r#"
        SELECT * FROM donation_slots
        WHERE is_available = true
          AND slot_start >= $1
          AND slot_start <= $2
        ORDER BY slot_start ASC
        "#,
    )
    .bind(from)
    .bind(to)
    .fetch_all(&state.pool)
    .await;

    match slots {
        Ok(slots) => {
            let responses: Vec<DonationSlotResponse> =
                slots.into_iter().map(DonationSlotResponse::from).collect();
            (StatusCode::OK, Json(ApiResponse::success(responses)))
        }
        Err(e) => {
            tracing::error!("Failed to list donation slots: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ApiResponse::error("Failed to list donation slots")),
            )
        }
    }
}

#[derive(Debug, Error)]
pub enum BookingError {
    #[error("Donor not found")]
    DonorNotFound,
    #[error("Slot not found")]
    SlotNotFound,
    #[error("Not eligible to donate until {}", .0.format("%Y-%m-%d"))]
    NotEligible(DateTime<Utc>),
    #[error("You already have an upcoming booking")]
    AlreadyBooked,
    #[error("Slot is no longer available")]
    SlotUnavailable,
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl BookingError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            BookingError::DonorNotFound | BookingError::SlotNotFound => StatusCode::NOT_FOUND,
            BookingError::NotEligible(_)
            | BookingError::AlreadyBooked
            | BookingError::SlotUnavailable => StatusCode::CONFLICT,
            BookingError::Database(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

/// Book a slot for a donor in one transaction
///
/// The donor's user row is locked first, so two bookings by the same donor
/// run one after the other and the second sees the first.
pub async fn book_for_donor(
    pool: &PgPool,
    donor_id: Uuid,
    slot_id: Uuid,
) -> Result<DonationSlot, BookingError> {
    let mut tx = pool.begin().await?;

    let donor: Option<Uuid> = sqlx::query_scalar(
        "SELECT id FROM users WHERE id = $1 AND role = 'donor' AND is_active = true FOR UPDATE",
    )
    .bind(donor_id)
    .fetch_optional(&mut *tx)
    .await?;
    if donor.is_none() {
        return Err(BookingError::DonorNotFound);
    }

    let slot = sqlx::query_as::<_, DonationSlot>("SELECT * FROM donation_slots WHERE id = $1")
        .bind(slot_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(BookingError::SlotNotFound)?;

    let last_donation = last_donation_at(&mut *tx, donor_id).await?;
    if let DonorEligibility::Waiting { eligible_from } = eligibility_at(last_donation, slot.slot_start) {
        return Err(BookingError::NotEligible(eligible_from));
    }

    let has_upcoming: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM donation_slots WHERE booked_by = $1 AND slot_start > NOW())",
    )
    .bind(donor_id)
    .fetch_one(&mut *tx)
    .await?;
    if has_upcoming {
        return Err(BookingError::AlreadyBooked);
    }

    // Other donors may race for the same slot; the row lock taken here decides
    let booked = sqlx::query_as::<_, DonationSlot>(
        r#"
        UPDATE donation_slots
        SET is_available = false, booked_by = $1
        WHERE id = $2 AND is_available = true AND slot_start > NOW()
        RETURNING *
        "#,
    )
    .bind(donor_id)
    .bind(slot_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(BookingError::SlotUnavailable)?;

    audit::record(
        &mut *tx,
        AuditEntry::new(AuditAction::SlotBooked, "donation_slot", Some(booked.id))
            .actor(donor_id)
            .details(json!({
                "slot_start": booked.slot_start,
                "slot_end": booked.slot_end
            })),
    )
    .await?;

    tx.commit().await?;
    Ok(booked)
}

/// Book a donation slot (donor)
pub async fn book_slot(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(slot_id): Path<Uuid>,
) -> impl IntoResponse {
    let donor = &session.user;
    if donor.role != UserRole::Donor {
        return (
            StatusCode::FORBIDDEN,
            Json(ApiResponse::<DonationSlotResponse>::error(
                "Only donors can book donation slots",
            )),
        );
    }

    match book_for_donor(&state.pool, donor.id, slot_id).await {
        Ok(slot) => {
            tracing::info!("Slot {} booked by donor {}", slot.id, donor.id);
            (
                StatusCode::OK,
                Json(ApiResponse::success(DonationSlotResponse::from(slot))),
            )
        }
        Err(BookingError::Database(e)) => {
            tracing::error!("Failed to book slot: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ApiResponse::error("Failed to book slot")),
            )
        }
        Err(e) => (e.status_code(), Json(ApiResponse::error(e.to_string()))),
    }
}

/// Cancel the donor's upcoming booking
pub async fn cancel_booking(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> impl IntoResponse {
    let result = sqlx::query_as::<_, DonationSlot>(
        r#"
        UPDATE donation_slots
        SET is_available = true, booked_by = NULL
        WHERE booked_by = $1 AND slot_start > NOW()
        RETURNING *
        "#,
    )
    .bind(session.user.id)
    .fetch_optional(&state.pool)
    .await;

    match result {
        Ok(Some(slot)) => {
            audit::record_best_effort(
                &state.pool,
                AuditEntry::new(AuditAction::SlotCancelled, "donation_slot", Some(slot.id))
                    .actor(session.user.id),
            )
            .await;

            (StatusCode::OK, Json(ApiResponse::success(())))
        }
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error("No upcoming booking found")),
        ),
        Err(e) => {
            tracing::error!("Failed to cancel booking: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ApiResponse::error("Failed to cancel booking")),
            )
        }
    }
}

// =============================================================================
// Admin Endpoints
// =============================================================================

/// List all slots in a window, booked or not (admin)
pub async fn list_slots_admin(
    State(state): State<AppState>,
    Query(query): Query<SlotWindowQuery>,
) -> impl IntoResponse {
    let from = query.from.unwrap_or_else(|| Utc::now() - Duration::days(7));
    let to = query.to.unwrap_or_else(|| Utc::now() + Duration::days(60));

    let slots = sqlx::query_as::<_, DonationSlot>(
        r#"
        SELECT * FROM donation_slots
        WHERE slot_start >= $1 AND slot_start <= $2
        ORDER BY slot_start ASC
        "#,
    )
    .bind(from)
    .bind(to)
    .fetch_all(&state.pool)
    .await;

    match slots {
        Ok(slots) => (StatusCode::OK, Json(ApiResponse::success(slots))),
        Err(e) => {
            tracing::error!("Failed to list donation slots: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ApiResponse::error("Failed to list donation slots")),
            )
        }
    }
}

/// Publish donation slots, all or none (admin)
pub async fn create_slots(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Json(input): Json<Vec<CreateDonationSlot>>,
) -> impl IntoResponse {
    if let Err(e) = validate_slots(&input, Utc::now()) {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::<Vec<DonationSlotResponse>>::error(e.to_string())),
        );
    }

    let admin = &session.user;
    let result: Result<Vec<DonationSlot>, sqlx::Error> = async {
        let mut tx = state.pool.begin().await?;
        let mut created = Vec::with_capacity(input.len());

        for slot in &input {
            let location = slot
                .location
                .as_deref()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .unwrap_or(state.default_hospital.as_str());

            let row = sqlx::query_as::<_, DonationSlot>(
                r#"
                INSERT INTO donation_slots (slot_start, slot_end, location, created_by, notes)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING *
                "#,
            )
            .bind(slot.slot_start)
            .bind(slot.slot_end)
            .bind(location)
            .bind(admin.id)
            .bind(&slot.notes)
            .fetch_one(&mut *tx)
            .await?;

            audit::record(
                &mut *tx,
                AuditEntry::new(AuditAction::SlotCreated, "donation_slot", Some(row.id))
                    .actor(admin.id),
            )
            .await?;

            created.push(row);
        }

        tx.commit().await?;
        Ok(created)
    }
    .await;

    match result {
        Ok(created) => {
            tracing::info!("Admin {} created {} donation slots", admin.email, created.len());
            (
                StatusCode::CREATED,
                Json(ApiResponse::success(
                    created.into_iter().map(DonationSlotResponse::from).collect(),
                )),
            )
        }
        Err(e) => {
            tracing::error!("Failed to create slots: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ApiResponse::error("Failed to create slots")),
            )
        }
    }
}

/// Delete an unbooked slot (admin)
pub async fn delete_slot(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(slot_id): Path<Uuid>,
) -> impl IntoResponse {
    let deleted: Result<Option<Uuid>, sqlx::Error> = sqlx::query_scalar(
        "DELETE FROM donation_slots WHERE id = $1 AND booked_by IS NULL RETURNING id",
    )
    .bind(slot_id)
    .fetch_optional(&state.pool)
    .await;

    match deleted {
        Ok(Some(id)) => {
            audit::record_best_effort(
                &state.pool,
                AuditEntry::new(AuditAction::SlotDeleted, "donation_slot", Some(id))
                    .actor(session.user.id),
            )
            .await;
            tracing::info!("Admin {} deleted donation slot {}", session.user.email, id);
            (StatusCode::OK, Json(ApiResponse::success(())))
        }
        Ok(None) => {
            let exists: bool =
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM donation_slots WHERE id = $1)")
                    .bind(slot_id)
                    .fetch_one(&state.pool)
                    .await
                    .unwrap_or(false);
            if exists {
                (
                    StatusCode::CONFLICT,
                    Json(ApiResponse::error(
                        "Cannot delete a booked slot. Cancel the booking first.",
                    )),
                )
            } else {
                (
                    StatusCode::NOT_FOUND,
                    Json(ApiResponse::error("Slot not found")),
                )
            }
        }
        Err(e) => {
            tracing::error!("Database error: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ApiResponse::error("Database error")),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::{insert_user, test_db};

    async fn insert_slot(pool: &PgPool, starts_in: Duration) -> Uuid {
        let start = Utc::now() + starts_in;
        sqlx::query_scalar(
            r#"
            INSERT INTO donation_slots (slot_start, slot_end, location)
            VALUES ($1, $2, 'UTD Test')
            RETURNING id
            "#,
        )
        .bind(start)
        .bind(start + Duration::hours(1))
        .fetch_one(pool)
        .await
        .unwrap()
    }

    async fn upcoming_bookings(pool: &PgPool, donor: Uuid) -> i64 {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM donation_slots WHERE booked_by = $1 AND slot_start > NOW()",
        )
        .bind(donor)
        .fetch_one(pool)
        .await
        .unwrap()
    }

    #[test]
    fn test_booking_error_status_codes() {
        assert_eq!(BookingError::SlotNotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(BookingError::AlreadyBooked.status_code(), StatusCode::CONFLICT);
        assert_eq!(
            BookingError::NotEligible(Utc::now()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            BookingError::Database(sqlx::Error::PoolTimedOut).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn test_second_booking_is_refused() {
        let Some(db) = test_db().await else { return };
        let donor = insert_user(&db.pool, UserRole::Donor, Some(BloodType::APos)).await;
        let first = insert_slot(&db.pool, Duration::days(2)).await;
        let second = insert_slot(&db.pool, Duration::days(3)).await;

        let booked = book_for_donor(&db.pool, donor, first).await.unwrap();
        assert_eq!(booked.booked_by, Some(donor));
        assert!(!booked.is_available);

        let err = book_for_donor(&db.pool, donor, second).await.unwrap_err();
        assert!(matches!(err, BookingError::AlreadyBooked));
        assert_eq!(upcoming_bookings(&db.pool, donor).await, 1);
    }

    #[tokio::test]
    async fn test_taken_slot_is_unavailable_to_another_donor() {
        let Some(db) = test_db().await else { return };
        let first = insert_user(&db.pool, UserRole::Donor, Some(BloodType::BPos)).await;
        let second = insert_user(&db.pool, UserRole::Donor, Some(BloodType::OPos)).await;
        let slot = insert_slot(&db.pool, Duration::days(2)).await;

        book_for_donor(&db.pool, first, slot).await.unwrap();
        let err = book_for_donor(&db.pool, second, slot).await.unwrap_err();
        assert!(matches!(err, BookingError::SlotUnavailable));
    }

    #[tokio::test]
    async fn test_recent_donor_is_not_eligible() {
        let Some(db) = test_db().await else { return };
        let donor = insert_user(&db.pool, UserRole::Donor, Some(BloodType::ANeg)).await;
        sqlx::query(
            "INSERT INTO donation_records (donor_id, blood_type, bags, donated_at) VALUES ($1, 'A-', 1, $2)",
        )
        .bind(donor)
        .bind(Utc::now() - Duration::days(30))
        .execute(&db.pool)
        .await
        .unwrap();
        let slot = insert_slot(&db.pool, Duration::days(7)).await;

        let err = book_for_donor(&db.pool, donor, slot).await.unwrap_err();
        assert!(matches!(err, BookingError::NotEligible(_)));
        assert_eq!(upcoming_bookings(&db.pool, donor).await, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_bookings_by_one_donor_keep_one() {
        let Some(db) = test_db().await else { return };

        for _ in 0..10 {
            let donor = insert_user(&db.pool, UserRole::Donor, Some(BloodType::OPos)).await;
            let slot_a = insert_slot(&db.pool, Duration::days(2)).await;
            let slot_b = insert_slot(&db.pool, Duration::days(4)).await;

            let (a, b) = tokio::join!(
                tokio::spawn({
                    let pool = db.pool.clone();
                    async move { book_for_donor(&pool, donor, slot_a).await }
                }),
                tokio::spawn({
                    let pool = db.pool.clone();
                    async move { book_for_donor(&pool, donor, slot_b).await }
                }),
            );
            let results = [a.unwrap(), b.unwrap()];

            assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
            assert!(results
                .iter()
                .any(|r| matches!(r, Err(BookingError::AlreadyBooked))));
            assert_eq!(upcoming_bookings(&db.pool, donor).await, 1);
        }
    }
}
