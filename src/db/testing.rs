//! Fixtures for tests that need PostgreSQL
//!
//! Tests call [`test_db`] and return early when `DATABASE_URL` is unset. The
//! returned guard serializes them, since stock rows are shared. Point
//! `DATABASE_URL` at a scratch database: the tests write to it.

use super::run_migrations;
use crate::models::{BloodType, UserRole};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::sync::OnceLock;
use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

static DB_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

pub struct TestDb {
    pub pool: PgPool,
    _guard: MutexGuard<'static, ()>,
}

/// Migrated pool, or `None` when no database is configured
pub async fn test_db() -> Option<TestDb> {
    let url = std::env::var("DATABASE_URL").ok()?;
    let guard = DB_LOCK.get_or_init(|| Mutex::new(())).lock().await;

    let pool = PgPoolOptions::new()
        .max_connections(8)
        .connect(&url)
        .await
        .expect("connect to DATABASE_URL");
    run_migrations(&pool).await.expect("run migrations");

    Some(TestDb {
        pool,
        _guard: guard,
    })
}

/// Insert an active account without going through registration
pub async fn insert_user(pool: &PgPool, role: UserRole, blood_type: Option<BloodType>) -> Uuid {
    let tag = Uuid::new_v4();
    sqlx::query_scalar(
        r#"
        INSERT INTO users (name, email, password_hash, role, blood_type)
        VALUES ($1, $2, 'not-a-real-hash', $3, $4)
        RETURNING id
        "#,
    )
    .bind(format!("Test {}", tag))
    .bind(format!("{}@test.invalid", tag))
    .bind(role)
    .bind(blood_type)
    .fetch_one(pool)
    .await
    .expect("insert test user")
}
