//! Dashboard summaries for admins and donors

use crate::handlers::donors::{eligibility_at, last_donation_at};
use crate::models::*;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Extension, Json};
use chrono::{DateTime, Datelike, Duration, NaiveTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use super::AppState;

#[derive(Debug, Serialize)]
pub struct AdminDashboard {
    pub total_donors: i64,
    pub critical_stocks: usize,
    pub low_stocks: usize,
    pub requests: RequestCounts,
    pub booked_slots_this_week: i64,
    pub stocks: Vec<BloodStockResponse>,
}

#[derive(Debug, Serialize)]
pub struct DonorDashboard {
    pub profile: UserResponse,
    pub last_donation_at: Option<DateTime<Utc>>,
    pub eligibility: Option<DonorEligibility>,
    pub upcoming_booking: Option<DonationSlotResponse>,
    pub requests: RequestCounts,
    pub stocks: Vec<BloodStockResponse>,
}

async fn request_counts(pool: &PgPool, requester: Option<Uuid>) -> Result<RequestCounts, sqlx::Error> {
    let rows: Vec<(RequestStatus, i64)> = sqlx::query_as(
        r#"
        SELECT status, COUNT(*) FROM blood_requests
        WHERE ($1::uuid IS NULL OR requester_id = $1)
        GROUP BY status
        "#,
    )
    .bind(requester)
    .fetch_all(pool)
    .await?;
    Ok(RequestCounts::from_rows(&rows))
}

async fn load_stocks(state: &AppState) -> Result<Vec<BloodStockResponse>, sqlx::Error> {
    let stocks = sqlx::query_as::<_, BloodStock>("SELECT * FROM blood_stocks ORDER BY blood_type")
        .fetch_all(&state.pool)
        .await?;
    Ok(stocks
        .into_iter()
        .map(|s| BloodStockResponse::new(s, &state.stock_thresholds))
        .collect())
}

/// Monday 00:00 UTC of the week containing `now`, and the Monday after
pub fn current_week(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let days_since_monday = i64::from(now.weekday().num_days_from_monday());
    let monday = now.date_naive() - Duration::days(days_since_monday);
    let start = monday.and_time(NaiveTime::MIN).and_utc();
    (start, start + Duration::days(7))
}

fn count_status(stocks: &[BloodStockResponse], status: StockStatus) -> usize {
    stocks.iter().filter(|s| s.status == status).count()
}

async fn load_admin_dashboard(state: &AppState) -> Result<AdminDashboard, sqlx::Error> {
    let stocks = load_stocks(state).await?;

    let total_donors: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE role = 'donor' AND is_active = true")
            .fetch_one(&state.pool)
            .await?;

    let (week_start, week_end) = current_week(Utc::now());
    let booked_slots_this_week: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM donation_slots
        WHERE booked_by IS NOT NULL AND slot_start >= $1 AND slot_start < $2
        "#,
    )
    .bind(week_start)
    .bind(week_end)
    .fetch_one(&state.pool)
    .await?;

    Ok(AdminDashboard {
        total_donors,
        critical_stocks: count_status(&stocks, StockStatus::Critical),
        low_stocks: count_status(&stocks, StockStatus::Low),
        requests: request_counts(&state.pool, None).await?,
        booked_slots_this_week,
        stocks,
    })
}

/// Stock, request and donor overview (admin)
pub async fn admin_dashboard(State(state): State<AppState>) -> impl IntoResponse {
    match load_admin_dashboard(&state).await {
        Ok(dashboard) => (StatusCode::OK, Json(ApiResponse::success(dashboard))),
        Err(e) => {
            tracing::error!("Failed to load admin dashboard: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ApiResponse::error("Failed to load dashboard")),
            )
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UserCounts {
    pub admins: i64,
    pub donors: i64,
    pub requesters: i64,
}

impl UserCounts {
    pub fn from_rows(rows: &[(UserRole, i64)]) -> Self {
        rows.iter().fold(Self::default(), |mut counts, (role, n)| {
            match role {
                UserRole::Admin => counts.admins += n,
                UserRole::Donor => counts.donors += n,
                UserRole::Requester => counts.requesters += n,
            }
            counts
        })
    }
}

/// All-time totals for the admin statistics page
#[derive(Debug, Serialize)]
pub struct SystemStatistics {
    pub users: UserCounts,
    pub requests: RequestCounts,
    pub bags_issued: i64,
    pub donations: i64,
    pub bags_donated: i64,
    pub upcoming_slots: i64,
    pub upcoming_bookings: i64,
    pub bags_in_stock: i64,
    pub stocks: Vec<BloodStockResponse>,
}

async fn load_statistics(state: &AppState) -> Result<SystemStatistics, sqlx::Error> {
    let user_rows: Vec<(UserRole, i64)> = sqlx::query_as(
        "SELECT role, COUNT(*) FROM users WHERE is_active = true GROUP BY role",
    )
    .fetch_all(&state.pool)
    .await?;

    let bags_issued: i64 = sqlx::query_scalar(
        "SELECT COALESCE(SUM(bags_requested), 0)::BIGINT FROM blood_requests WHERE status = 'approved'",
    )
    .fetch_one(&state.pool)
    .await?;

    let (donations, bags_donated): (i64, i64) =
        sqlx::query_as("SELECT COUNT(*), COALESCE(SUM(bags), 0)::BIGINT FROM donation_records")
            .fetch_one(&state.pool)
            .await?;

    let (upcoming_slots, upcoming_bookings): (i64, i64) = sqlx::query_as(
        r#"
        SELECT COUNT(*), COUNT(booked_by) FROM donation_slots
        WHERE slot_start > NOW()
        "#,
    )
    .fetch_one(&state.pool)
    .await?;

    let stocks = load_stocks(state).await?;

    Ok(SystemStatistics {
        users: UserCounts::from_rows(&user_rows),
        requests: request_counts(&state.pool, None).await?,
        bags_issued,
        donations,
        bags_donated,
        upcoming_slots,
        upcoming_bookings,
        bags_in_stock: stocks.iter().map(|s| i64::from(s.bag_count)).sum(),
        stocks,
    })
}

/// System-wide totals (admin)
pub async fn admin_statistics(State(state): State<AppState>) -> impl IntoResponse {
    match load_statistics(&state).await {
        Ok(stats) => (StatusCode::OK, Json(ApiResponse::success(stats))),
        Err(e) => {
            tracing::error!("Failed to load statistics: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ApiResponse::error("Failed to load statistics")),
            )
        }
    }
}

async fn load_donor_dashboard(
    state: &AppState,
    user: &User,
) -> Result<DonorDashboard, sqlx::Error> {
    let last_donation = last_donation_at(&state.pool, user.id).await?;
    let eligibility =
        (user.role == UserRole::Donor).then(|| eligibility_at(last_donation, Utc::now()));

    let upcoming_booking = sqlx::query_as::<_, DonationSlot>(
        r#"
        SELECT * FROM donation_slots
        WHERE booked_by = $1 AND slot_start > NOW()
        ORDER BY slot_start ASC
        LIMIT 1
        "#,
    )
    .bind(user.id)
    .fetch_optional(&state.pool)
    .await?;

    let stocks = load_stocks(state).await?;

    Ok(DonorDashboard {
        profile: UserResponse::from(user.clone()),
        last_donation_at: last_donation,
        eligibility,
        upcoming_booking: upcoming_booking.map(DonationSlotResponse::from),
        requests: request_counts(&state.pool, Some(user.id)).await?,
        stocks,
    })
}

/// Personal overview for the signed-in donor or requester
pub async fn donor_dashboard(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> impl IntoResponse {
    match load_donor_dashboard(&state, &session.user).await {
        Ok(dashboard) => (StatusCode::OK, Json(ApiResponse::success(dashboard))),
        Err(e) => {
            tracing::error!("Failed to load dashboard for {}: {}", session.user.id, e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ApiResponse::error("Failed to load dashboard")),
            )
        }
    }
}
