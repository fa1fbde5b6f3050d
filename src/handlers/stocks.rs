//! Blood stock ledger handlers

use crate::models::*;
use crate::notifications;
use crate::workflow::Ledger;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};

use super::{workflow_failure, AppState};

/// List all stocks with derived status (public)
pub async fn list_blood_stocks(State(state): State<AppState>) -> impl IntoResponse {
    match state.ledger().list_stocks().await {
        Ok(stocks) => {
            let responses: Vec<BloodStockResponse> = stocks
                .into_iter()
                .map(|s| BloodStockResponse::new(s, &state.stock_thresholds))
                .collect();
            (StatusCode::OK, Json(ApiResponse::success(responses)))
        }
        Err(e) => workflow_failure(e),
    }
}

/// Set the bag count of one blood type (admin)
pub async fn update_blood_stock(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(blood_type): Path<String>,
    Json(input): Json<SetStockQuantity>,
) -> impl IntoResponse {
    let blood_type = match blood_type.parse::<BloodType>() {
        Ok(t) => t,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ApiResponse::<BloodStockResponse>::error(e.to_string())),
            )
        }
    };

    match state
        .ledger()
        .set_stock_quantity(blood_type, input.bag_count, session.user.id)
        .await
    {
        Ok((previous, stock)) => {
            tracing::info!(
                "Admin {} set {} stock from {} to {} bags",
                session.user.email,
                blood_type,
                previous,
                stock.bag_count
            );
            notifications::check_after_change(previous, &stock, &state.stock_thresholds);
            (
                StatusCode::OK,
                Json(ApiResponse::success(BloodStockResponse::new(
                    stock,
                    &state.stock_thresholds,
                ))),
            )
        }
        Err(e) => workflow_failure(e),
    }
}
