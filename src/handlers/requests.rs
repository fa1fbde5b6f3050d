//! Blood request queue and approval handlers

use crate::models::*;
use crate::notifications;
use crate::validation::{validate_create_request, validate_note};
use crate::workflow::{decide, Decision, Ledger, RequestScope};
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use serde::Deserialize;
use uuid::Uuid;

use super::{workflow_failure, AppState};

#[derive(Debug, Deserialize)]
pub struct ListRequestsQuery {
    pub status: Option<RequestStatus>,
}

fn scope_for(session: &Session) -> RequestScope {
    if session.user.is_admin() {
        RequestScope::All
    } else {
        RequestScope::OwnedBy(session.user.id)
    }
}

/// Trimmed note, empty notes dropped
fn clean_note(note: Option<String>) -> Option<String> {
    note.map(|n| n.trim().to_string()).filter(|n| !n.is_empty())
}

/// Optional decision note from a request body
///
/// An empty body means no note. Anything else must be a JSON object sent as
/// `application/json`.
fn parse_decision_body(headers: &HeaderMap, body: &Bytes) -> Result<Option<String>, String> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }

    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("application/json"));
    if !is_json {
        return Err("Expected request with `Content-Type: application/json`".to_string());
    }

    let Json(decision) = Json::<DecisionRequest>::from_bytes(body).map_err(|e| e.body_text())?;
    Ok(clean_note(decision.note))
}

/// List blood requests: admins see all, everyone else their own
pub async fn list_blood_requests(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Query(query): Query<ListRequestsQuery>,
) -> impl IntoResponse {
    match state
        .ledger()
        .list_requests(scope_for(&session), query.status)
        .await
    {
        Ok(requests) => (StatusCode::OK, Json(ApiResponse::success(requests))),
        Err(e) => workflow_failure(e),
    }
}

/// Submit a new blood request
pub async fn create_blood_request(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Json(input): Json<CreateBloodRequest>,
) -> impl IntoResponse {
    if let Err(e) = validate_create_request(&input) {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::<BloodRequest>::error(e.to_string())),
        );
    }

    let hospital = input
        .hospital
        .as_deref()
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .unwrap_or(state.default_hospital.as_str())
        .to_string();

    match state
        .ledger()
        .create_request(session.user.id, input, hospital)
        .await
    {
        Ok(request) => {
            tracing::info!(
                "User {} requested {} bags of {}",
                session.user.id,
                request.bags_requested,
                request.blood_type
            );
            (StatusCode::CREATED, Json(ApiResponse::success(request)))
        }
        Err(e) => workflow_failure(e),
    }
}

/// Approve a pending request and decrement stock in one transaction (admin)
pub async fn approve_blood_request(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let note = match parse_decision_body(&headers, &body) {
        Ok(note) => note,
        Err(message) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ApiResponse::<ApprovalOutcome>::error(message)),
            )
        }
    };
    if let Err(e) = validate_note(note.as_deref()) {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::<ApprovalOutcome>::error(e.to_string())),
        );
    }

    match state.ledger().approve(id, session.user.id, note).await {
        Ok((request, stock)) => {
            tracing::info!(
                "Admin {} approved request {} ({} bags of {}, {} left)",
                session.user.email,
                id,
                request.bags_requested,
                request.blood_type,
                stock.bag_count
            );
            notifications::check_after_change(
                stock.bag_count + request.bags_requested,
                &stock,
                &state.stock_thresholds,
            );
            (
                StatusCode::OK,
                Json(ApiResponse::success(ApprovalOutcome {
                    request,
                    stock: BloodStockResponse::new(stock, &state.stock_thresholds),
                })),
            )
        }
        Err(e) => {
            tracing::info!("Admin {} could not approve request {}: {}", session.user.email, id, e);
            workflow_failure(e)
        }
    }
}

/// Reject a pending request; stock is untouched (admin)
pub async fn reject_blood_request(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let note = match parse_decision_body(&headers, &body) {
        Ok(note) => note,
        Err(message) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ApiResponse::<BloodRequest>::error(message)),
            )
        }
    };
    if let Err(e) = validate_note(note.as_deref()) {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::<BloodRequest>::error(e.to_string())),
        );
    }

    match state.ledger().reject(id, session.user.id, note).await {
        Ok(request) => {
            tracing::info!("Admin {} rejected request {}", session.user.email, id);
            (StatusCode::OK, Json(ApiResponse::success(request)))
        }
        Err(e) => workflow_failure(e),
    }
}

/// Move a pending request to approved or rejected (admin)
///
/// Approval through this endpoint runs the same transaction as
/// [`approve_blood_request`].
pub async fn update_blood_request_status(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(id): Path<Uuid>,
    Json(input): Json<UpdateRequestStatus>,
) -> impl IntoResponse {
    let note = clean_note(input.note);
    if let Err(e) = validate_note(note.as_deref()) {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::<BloodRequest>::error(e.to_string())),
        );
    }

    match decide(&state.ledger(), id, session.user.id, input.status, note).await {
        Ok(decision) => {
            if let Decision::Approved { request, stock } = &decision {
                notifications::check_after_change(
                    stock.bag_count + request.bags_requested,
                    stock,
                    &state.stock_thresholds,
                );
            }
            tracing::info!(
                "Admin {} changed request {} status to {:?}",
                session.user.email,
                id,
                input.status
            );
            (
                StatusCode::OK,
                Json(ApiResponse::success(decision.into_request())),
            )
        }
        Err(e) => workflow_failure(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_note() {
        assert_eq!(clean_note(None), None);
        assert_eq!(clean_note(Some("   ".to_string())), None);
        assert_eq!(
            clean_note(Some("  stok tidak cukup ".to_string())).as_deref(),
            Some("stok tidak cukup")
        );
    }

    fn json_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, "application/json; charset=utf-8".parse().unwrap());
        headers
    }

    #[test]
    fn test_empty_decision_body_has_no_note() {
        assert_eq!(parse_decision_body(&HeaderMap::new(), &Bytes::new()), Ok(None));
        assert_eq!(parse_decision_body(&json_headers(), &Bytes::from_static(b"  \n")), Ok(None));
    }

    #[test]
    fn test_decision_body_note_is_trimmed() {
        let body = Bytes::from_static(br#"{"note": "  golongan darah tersedia "}"#);
        assert_eq!(
            parse_decision_body(&json_headers(), &body),
            Ok(Some("golongan darah tersedia".to_string()))
        );
        assert_eq!(parse_decision_body(&json_headers(), &Bytes::from_static(b"{}")), Ok(None));
    }

    #[test]
    fn test_malformed_decision_body_is_rejected() {
        assert!(parse_decision_body(&json_headers(), &Bytes::from_static(b"{\"note\": ")).is_err());
        assert!(parse_decision_body(&json_headers(), &Bytes::from_static(b"{\"note\": 5}")).is_err());
    }

    #[test]
    fn test_decision_body_requires_json_content_type() {
        let body = Bytes::from_static(br#"{"note": "ok"}"#);
        assert!(parse_decision_body(&HeaderMap::new(), &body).is_err());

        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, "text/plain".parse().unwrap());
        assert!(parse_decision_body(&headers, &body).is_err());
    }
}
