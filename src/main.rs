//! Blood Bank Service
//!
//! Web service for a hospital blood bank: a per-type stock ledger, a queue of
//! blood requests that admins approve or reject, and donor scheduling.
//!
//! ## Features
//!
//! - **Stock Ledger**: Bag counts per blood type with critical/low alerts
//! - **Request Approval**: Approving a request decrements stock atomically
//! - **Donor Portal**: Book donation slots, view eligibility and history

mod config;
mod db;
mod handlers;
mod models;
mod notifications;
mod validation;
mod workflow;

use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get, post, put},
    Router,
};
use handlers::middleware::{require_admin, require_auth, security_headers};
use handlers::AppState;
use std::net::SocketAddr;
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    services::ServeDir,
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bloodbank=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::from_env()?;
    tracing::info!("Starting Blood Bank Service");
    tracing::info!("Environment: {:?}", config.environment);

    // Create database pool
    tracing::info!("Connecting to database...");
    let pool = db::create_pool(&config.database_url).await?;
    tracing::info!("Database connected");

    // Run migrations
    tracing::info!("Running database migrations...");
    db::run_migrations(&pool).await?;

    if let Some(admin) = &config.bootstrap_admin {
        handlers::ensure_bootstrap_admin(&pool, admin).await?;
    }

    // Log the stock situation once at startup
    let stocks = sqlx::query_as::<_, models::BloodStock>("SELECT * FROM blood_stocks")
        .fetch_all(&pool)
        .await?;
    notifications::emit(&notifications::stock_alerts(
        &stocks,
        &config.stock_thresholds,
    ));

    let scheduler = notifications::scheduler::SchedulerHandle::default();
    if config.scheduler_enabled {
        notifications::scheduler::spawn(
            scheduler.clone(),
            pool.clone(),
            config.stock_thresholds,
            chrono::Duration::hours(config.reminder_window_hours),
        )
        .await;
    } else {
        tracing::info!("Notification scheduler disabled");
    }

    let state = AppState {
        pool,
        is_production: config.is_production(),
        trusted_proxies: config.trusted_proxies.clone(),
        session_expiry_hours: config.session_expiry_hours,
        stock_thresholds: config.stock_thresholds,
        default_hospital: config.default_hospital.clone(),
        reminder_window_hours: config.reminder_window_hours,
        scheduler,
    };

    let app = build_router(state, &config);

    // Start server
    let addr = config.server_addr();
    tracing::info!("Server listening on http://{}", addr);
    tracing::info!("Frontend served from: {}", config.frontend_dir);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

fn build_router(state: AppState, config: &config::Config) -> Router {
    // Build CORS layer
    let cors = if config.is_production() {
        CorsLayer::new()
            .allow_origin(
                config
                    .cors_origins
                    .iter()
                    .filter_map(|o| o.parse().ok())
                    .collect::<Vec<_>>(),
            )
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        CorsLayer::permissive()
    };

    let public_routes = Router::new()
        .route("/register", post(handlers::register))
        .route("/login", post(handlers::login))
        .route("/logout", post(handlers::logout))
        .route("/blood-stocks", get(handlers::list_blood_stocks));

    let user_routes = Router::new()
        .route("/me", get(handlers::me))
        .route(
            "/blood-requests",
            get(handlers::list_blood_requests).post(handlers::create_blood_request),
        )
        .route("/pendonor/dashboard", get(handlers::donor_dashboard))
        .route("/donor-histories", get(handlers::list_donation_history))
        .route("/donation-slots", get(handlers::list_available_slots))
        .route("/donation-slots/:id/book", post(handlers::book_slot))
        .route("/donation-slots/cancel", post(handlers::cancel_booking))
        .route_layer(from_fn_with_state(state.clone(), require_auth));

    let admin_routes = Router::new()
        .route(
            "/admin/blood-stocks/:blood_type",
            put(handlers::update_blood_stock),
        )
        .route(
            "/admin/blood-requests/:id",
            put(handlers::update_blood_request_status),
        )
        .route(
            "/admin/blood-requests/:id/approve",
            post(handlers::approve_blood_request),
        )
        .route(
            "/admin/blood-requests/:id/reject",
            post(handlers::reject_blood_request),
        )
        .route("/admin/dashboard", get(handlers::admin_dashboard))
        .route("/admin/statistics", get(handlers::admin_statistics))
        .route("/admin/pendonors", get(handlers::list_donors))
        .route("/admin/users", get(handlers::list_users))
        .route("/admin/donor-histories", post(handlers::record_donation))
        .route(
            "/admin/donation-slots",
            get(handlers::list_slots_admin).post(handlers::create_slots),
        )
        .route("/admin/donation-slots/:id", delete(handlers::delete_slot))
        .route(
            "/admin/notifications/status",
            get(handlers::notification_status),
        )
        .route(
            "/admin/notifications/stock-check",
            post(handlers::run_stock_check),
        )
        .route(
            "/admin/notifications/reminders",
            post(handlers::trigger_reminders),
        )
        .route(
            "/admin/notifications/weekly-summary",
            post(handlers::trigger_weekly_summary),
        )
        .route_layer(from_fn(require_admin))
        .route_layer(from_fn_with_state(state.clone(), require_auth));

    let api_routes = public_routes.merge(user_routes).merge(admin_routes);

    Router::new()
        .nest("/api", api_routes)
        .fallback_service(ServeDir::new(&config.frontend_dir))
        .layer(from_fn_with_state(state.clone(), security_headers))
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(config.max_body_size))
        .layer(cors)
        .with_state(state)
}
