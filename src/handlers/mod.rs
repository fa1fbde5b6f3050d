//! HTTP request handlers

pub mod auth;
pub mod calendar;
pub mod dashboard;
pub mod donors;
pub mod middleware;
pub mod notify;
pub mod requests;
pub mod stocks;

pub use auth::*;
pub use calendar::*;
pub use dashboard::*;
pub use donors::*;
pub use notify::*;
pub use requests::*;
pub use stocks::*;

use crate::db::PgLedger;
use crate::models::StockThresholds;
use crate::notifications::scheduler::SchedulerHandle;
use sqlx::PgPool;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub is_production: bool,
    /// Trusted proxy IP prefixes for X-Forwarded-For validation
    pub trusted_proxies: Vec<String>,
    pub session_expiry_hours: i64,
    pub stock_thresholds: StockThresholds,
    pub default_hospital: String,
    pub reminder_window_hours: i64,
    pub scheduler: SchedulerHandle,
}

impl AppState {
    pub fn ledger(&self) -> PgLedger {
        PgLedger::new(self.pool.clone())
    }
}

/// Map a workflow error to a response, logging storage failures
pub(crate) fn workflow_failure<T>(
    e: crate::workflow::WorkflowError,
) -> (axum::http::StatusCode, axum::Json<crate::models::ApiResponse<T>>) {
    if let crate::workflow::WorkflowError::Transient(ref source) = e {
        tracing::error!("Storage failure: {}", source);
    }
    (
        e.status_code(),
        axum::Json(crate::models::ApiResponse::error(e.public_message())),
    )
}
