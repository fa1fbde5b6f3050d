//! Registration, login and session handling

use crate::config::BootstrapAdmin;
use crate::db::audit::{self, AuditAction, AuditEntry};
use crate::models::*;
use crate::validation::validate_register;
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use chrono::{Duration, Utc};
use rand::Rng;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use std::net::{IpAddr, SocketAddr};

use super::AppState;

/// Session cookie name
pub const SESSION_COOKIE: &str = "bb_session";

/// Rate limit: max login attempts per IP per hour
pub const MAX_LOGIN_ATTEMPTS: i64 = 10;

/// Rate limit: max registrations per IP per hour
pub const MAX_REGISTER_ATTEMPTS: i64 = 5;

// =============================================================================
// Registration
// =============================================================================

/// Fields for a new account
pub struct NewUser<'a> {
    pub name: &'a str,
    pub email: &'a str,
    pub password: &'a str,
    pub role: UserRole,
    pub blood_type: Option<BloodType>,
    pub phone: Option<&'a str>,
    pub address: Option<&'a str>,
}

/// Register a donor or requester account
pub async fn register(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(input): Json<RegisterRequest>,
) -> impl IntoResponse {
    if let Err(e) = validate_register(&input) {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::<UserResponse>::error(e.to_string())),
        );
    }

    let client_ip = get_client_ip(
        &headers,
        connect.map(|ConnectInfo(addr)| addr.ip()),
        &state.trusted_proxies,
    );
    if !check_rate_limit(&state.pool, &client_ip, "register", MAX_REGISTER_ATTEMPTS).await {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(ApiResponse::error(
                "Too many registrations. Please try again later.",
            )),
        );
    }
    record_attempt(&state.pool, &client_ip, "register").await;

    let email = normalize_email(&input.email);
    let new_user = NewUser {
        name: input.name.trim(),
        email: &email,
        password: &input.password,
        role: input.role,
        blood_type: input.blood_type,
        phone: input.phone.as_deref().map(str::trim).filter(|p| !p.is_empty()),
        address: input.address.as_deref().map(str::trim).filter(|a| !a.is_empty()),
    };

    match create_user(&state.pool, new_user).await {
        Ok(user) => {
            audit::record_best_effort(
                &state.pool,
                AuditEntry::new(AuditAction::UserRegistered, "user", Some(user.id))
                    .actor(user.id)
                    .ip(&client_ip),
            )
            .await;

            tracing::info!("Registered {:?} account {}", user.role, user.id);
            (
                StatusCode::CREATED,
                Json(ApiResponse::success(UserResponse::from(user))),
            )
        }
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => (
            StatusCode::CONFLICT,
            Json(ApiResponse::error("Email is already registered")),
        ),
        Err(e) => {
            tracing::error!("Failed to register user: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error("Failed to register")),
            )
        }
    }
}

// =============================================================================
// Login / Logout
// =============================================================================

/// Log in with email and password
pub async fn login(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(input): Json<LoginRequest>,
) -> Response {
    let client_ip = get_client_ip(
        &headers,
        connect.map(|ConnectInfo(addr)| addr.ip()),
        &state.trusted_proxies,
    );

    if !check_rate_limit(&state.pool, &client_ip, "login", MAX_LOGIN_ATTEMPTS).await {
        return login_failure(
            StatusCode::TOO_MANY_REQUESTS,
            "Too many login attempts. Please try again later.",
        );
    }
    record_attempt(&state.pool, &client_ip, "login").await;

    let user = sqlx::query_as::<_, User>(
        "SELECT * FROM users WHERE email = $1 AND is_active = true",
    )
    .bind(normalize_email(&input.email))
    .fetch_optional(&state.pool)
    .await;

    let user = match user {
        Ok(Some(u)) => u,
        Ok(None) => {
            // Don't reveal whether the email exists
            return login_failure(StatusCode::UNAUTHORIZED, "Invalid email or password");
        }
        Err(e) => {
            tracing::error!("Database error during login: {}", e);
            return login_failure(
                StatusCode::SERVICE_UNAVAILABLE,
                "Authentication temporarily unavailable",
            );
        }
    };

    if !verify_password(&input.password, &user.password_hash) {
        return login_failure(StatusCode::UNAUTHORIZED, "Invalid email or password");
    }

    let token = generate_session_token();
    let token_hash = hash_token(&token);
    let expires_at = Utc::now() + Duration::hours(state.session_expiry_hours);

    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.chars().take(500).collect::<String>());

    let session_result = sqlx::query(
        r#"
        INSERT INTO sessions (user_id, token_hash, expires_at, ip_address, user_agent)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(user.id)
    .bind(&token_hash)
    .bind(expires_at)
    .bind(&client_ip)
    .bind(&user_agent)
    .execute(&state.pool)
    .await;

    if let Err(e) = session_result {
        tracing::error!("Failed to create session: {}", e);
        return login_failure(StatusCode::INTERNAL_SERVER_ERROR, "Failed to create session");
    }

    let _ = sqlx::query("UPDATE users SET last_login_at = NOW() WHERE id = $1")
        .bind(user.id)
        .execute(&state.pool)
        .await;

    audit::record_best_effort(
        &state.pool,
        AuditEntry::new(AuditAction::UserLogin, "user", Some(user.id))
            .actor(user.id)
            .ip(&client_ip),
    )
    .await;

    tracing::info!("User {} logged in as {:?}", user.id, user.role);

    let cookie = session_cookie(&token, state.session_expiry_hours * 3600, state.is_production);
    (
        StatusCode::OK,
        [(header::SET_COOKIE, cookie)],
        Json(ApiResponse::success(LoginResponse {
            token,
            expires_at,
            user: UserResponse::from(user),
        })),
    )
        .into_response()
}

fn login_failure(status: StatusCode, message: &str) -> Response {
    (status, Json(ApiResponse::<LoginResponse>::error(message))).into_response()
}

/// Log out, destroying the server-side session
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    if let Some(token) = extract_session_token(&headers) {
        let token_hash = hash_token(&token);

        let user_id: Option<uuid::Uuid> = sqlx::query_scalar(
            "DELETE FROM sessions WHERE token_hash = $1 RETURNING user_id",
        )
        .bind(&token_hash)
        .fetch_optional(&state.pool)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("Failed to delete session: {}", e);
            None
        });

        if let Some(user_id) = user_id {
            audit::record_best_effort(
                &state.pool,
                AuditEntry::new(AuditAction::UserLogout, "user", Some(user_id)).actor(user_id),
            )
            .await;
        }
    }

    (
        StatusCode::OK,
        [(header::SET_COOKIE, session_cookie("", 0, state.is_production))],
        Json(ApiResponse::success(())),
    )
}

/// Get the current user
pub async fn me(Extension(session): Extension<Session>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(ApiResponse::success(UserResponse::from(session.user))),
    )
}

// =============================================================================
// Session Validation
// =============================================================================

/// Resolve a raw session token to a live session
pub async fn load_session(pool: &PgPool, token: &str) -> Result<Option<Session>, sqlx::Error> {
    let token_hash = hash_token(token);

    let session = sqlx::query_as::<_, SessionRow>(
        "SELECT * FROM sessions WHERE token_hash = $1 AND expires_at > NOW()",
    )
    .bind(&token_hash)
    .fetch_optional(pool)
    .await?;

    let Some(session) = session else {
        return Ok(None);
    };

    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1 AND is_active = true")
        .bind(session.user_id)
        .fetch_optional(pool)
        .await?;

    Ok(user.map(|user| Session {
        user,
        token_hash,
        expires_at: session.expires_at,
    }))
}

// =============================================================================
// Accounts
// =============================================================================

/// Hash a password using Argon2
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default().hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

pub fn verify_password(password: &str, password_hash: &str) -> bool {
    match PasswordHash::new(password_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => {
            tracing::error!("Invalid password hash in database");
            false
        }
    }
}

/// Insert a user with a freshly hashed password
pub async fn create_user(pool: &PgPool, user: NewUser<'_>) -> Result<User, sqlx::Error> {
    let password_hash =
        hash_password(user.password).map_err(|e| sqlx::Error::Protocol(e.to_string()))?;

    sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (name, email, password_hash, role, blood_type, phone, address)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING *
        "#,
    )
    .bind(user.name)
    .bind(user.email)
    .bind(password_hash)
    .bind(user.role)
    .bind(user.blood_type)
    .bind(user.phone)
    .bind(user.address)
    .fetch_one(pool)
    .await
}

/// Create the configured admin account unless its email is already taken
pub async fn ensure_bootstrap_admin(pool: &PgPool, admin: &BootstrapAdmin) -> Result<(), sqlx::Error> {
    let email = normalize_email(&admin.email);
    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE email = $1)")
        .bind(&email)
        .fetch_one(pool)
        .await?;

    if exists {
        tracing::info!("Bootstrap admin {} already exists", email);
        return Ok(());
    }

    let user = create_user(
        pool,
        NewUser {
            name: &admin.name,
            email: &email,
            password: &admin.password,
            role: UserRole::Admin,
            blood_type: None,
            phone: None,
            address: None,
        },
    )
    .await?;
    tracing::info!("Created bootstrap admin {} ({})", email, user.id);
    Ok(())
}

// =============================================================================
// Helper Functions
// =============================================================================

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Token from `Authorization: Bearer` or the session cookie
pub fn extract_session_token(headers: &HeaderMap) -> Option<String> {
    if let Some(auth) = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        if let Some(token) = auth.strip_prefix("Bearer ") {
            let token = token.trim();
            if !token.is_empty() {
                return Some(token.to_string());
            }
        }
    }

    let cookie_header = headers.get(header::COOKIE)?.to_str().ok()?;
    let prefix = format!("{}=", SESSION_COOKIE);
    cookie_header
        .split(';')
        .filter_map(|cookie| cookie.trim().strip_prefix(&prefix))
        .find(|value| !value.is_empty())
        .map(str::to_string)
}

fn session_cookie(token: &str, max_age_secs: i64, secure: bool) -> String {
    let mut cookie = format!(
        "{}={}; Path=/; HttpOnly; SameSite=Strict; Max-Age={}",
        SESSION_COOKIE, token, max_age_secs
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

fn generate_session_token() -> String {
    let bytes: [u8; 32] = rand::thread_rng().gen();
    hex::encode(bytes)
}

pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Client IP, trusting forwarding headers only from configured proxies
pub fn get_client_ip(
    headers: &HeaderMap,
    peer: Option<IpAddr>,
    trusted_proxies: &[String],
) -> String {
    let peer = peer.map(|ip| ip.to_string());
    let from_trusted_proxy = peer
        .as_deref()
        .map(|p| trusted_proxies.iter().any(|t| p.starts_with(t.as_str())))
        .unwrap_or(false);

    if from_trusted_proxy {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(ip) = forwarded {
            return ip.to_string();
        }
        if let Some(ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
            return ip.trim().to_string();
        }
    }

    peer.unwrap_or_else(|| "unknown".to_string())
}

pub async fn check_rate_limit(pool: &PgPool, ip: &str, endpoint: &str, max_attempts: i64) -> bool {
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM rate_limit_attempts
        WHERE ip_address = $1 AND endpoint = $2
        AND attempted_at > NOW() - INTERVAL '1 hour'
        "#,
    )
    .bind(ip)
    .bind(endpoint)
    .fetch_one(pool)
    .await
    .unwrap_or(0);

    count < max_attempts
}

pub async fn record_attempt(pool: &PgPool, ip: &str, endpoint: &str) {
    let _ = sqlx::query("INSERT INTO rate_limit_attempts (ip_address, endpoint) VALUES ($1, $2)")
        .bind(ip)
        .bind(endpoint)
        .execute(pool)
        .await;
}
