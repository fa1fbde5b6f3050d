//! Admin notification endpoints

use crate::models::*;
use crate::notifications::dispatch::{self, Trigger};
use crate::notifications::{DonorReminder, StockAlert, WeeklySummary};
use axum::{extract::State, http::StatusCode, response::IntoResponse, Extension, Json};
use chrono::{Duration, Utc};

use super::AppState;

fn dispatch_failure<T>(what: &str, e: sqlx::Error) -> (StatusCode, Json<ApiResponse<T>>) {
    tracing::error!("Failed to run {}: {}", what, e);
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ApiResponse::error(format!("Failed to run {}", what))),
    )
}

/// Whether the background jobs run and when each runs next (admin)
pub async fn notification_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(state.scheduler.status().await))
}

/// Run a stock check now, logging and auditing every alert (admin)
pub async fn run_stock_check(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> impl IntoResponse {
    match dispatch::stock_check(
        &state.pool,
        &state.stock_thresholds,
        Trigger::Admin(session.user.id),
    )
    .await
    {
        Ok(alerts) => {
            tracing::info!(
                "Admin {} ran stock check: {} alerts",
                session.user.email,
                alerts.len()
            );
            (StatusCode::OK, Json(ApiResponse::success(alerts)))
        }
        Err(e) => dispatch_failure::<Vec<StockAlert>>("stock check", e),
    }
}

/// Remind donors whose booked slot starts within the reminder window (admin)
pub async fn trigger_reminders(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> impl IntoResponse {
    match dispatch::donor_reminders(
        &state.pool,
        Utc::now(),
        Duration::hours(state.reminder_window_hours),
        Trigger::Admin(session.user.id),
    )
    .await
    {
        Ok(reminders) => {
            tracing::info!(
                "Admin {} sent {} donor reminders",
                session.user.email,
                reminders.len()
            );
            (StatusCode::OK, Json(ApiResponse::success(reminders)))
        }
        Err(e) => dispatch_failure::<Vec<DonorReminder>>("donor reminders", e),
    }
}

/// Summarise the last seven days now (admin)
pub async fn trigger_weekly_summary(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> impl IntoResponse {
    match dispatch::weekly_summary(
        &state.pool,
        &state.stock_thresholds,
        Utc::now(),
        Trigger::Admin(session.user.id),
    )
    .await
    {
        Ok(summary) => {
            tracing::info!("Admin {} ran the weekly summary", session.user.email);
            (StatusCode::OK, Json(ApiResponse::success(summary)))
        }
        Err(e) => dispatch_failure::<WeeklySummary>("weekly summary", e),
    }
}
