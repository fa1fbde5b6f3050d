//! Middleware for authentication and security headers

use crate::handlers::auth::{extract_session_token, load_session};
use crate::handlers::AppState;
use crate::models::{Session, UserRole};
use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;

fn reject(status: StatusCode, message: &str) -> Response {
    (
        status,
        axum::Json(json!({"success": false, "data": null, "error": message})),
    )
        .into_response()
}

/// Resolve the session and make it available via `Extension<Session>`
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let Some(token) = extract_session_token(request.headers()) else {
        return reject(StatusCode::UNAUTHORIZED, "Not authenticated");
    };

    let session = match load_session(&state.pool, &token).await {
        Ok(Some(session)) => session,
        Ok(None) => return reject(StatusCode::UNAUTHORIZED, "Session expired or invalid"),
        Err(e) => {
            tracing::error!("Database error during session validation: {}", e);
            return reject(StatusCode::SERVICE_UNAVAILABLE, "Authentication error");
        }
    };

    request.extensions_mut().insert(session);
    next.run(request).await
}

/// Must run after [`require_auth`]
pub async fn require_admin(request: Request<Body>, next: Next) -> Response {
    let role = request
        .extensions()
        .get::<Session>()
        .map(|session| session.user.role);

    match role {
        Some(UserRole::Admin) => next.run(request).await,
        Some(_) => reject(StatusCode::FORBIDDEN, "Admin access required"),
        None => reject(StatusCode::UNAUTHORIZED, "Not authenticated"),
    }
}

/// Security headers middleware
pub async fn security_headers(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
    headers.insert(
        "X-Content-Type-Options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        "Referrer-Policy",
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    headers.insert(
        "Content-Security-Policy",
        HeaderValue::from_static(
            "default-src 'self'; script-src 'self'; style-src 'self' 'unsafe-inline'; img-src 'self' data:; font-src 'self'; form-action 'self'; base-uri 'self'; frame-ancestors 'none'",
        ),
    );

    if state.is_production {
        headers.insert(
            header::STRICT_TRANSPORT_SECURITY,
            HeaderValue::from_static("max-age=63072000; includeSubDomains"),
        );
    }

    response
}
