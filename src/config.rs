//! Application configuration
//!
//! Loads configuration from environment variables with sensible defaults.

use crate::models::StockThresholds;
use std::env;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host address
    pub host: String,
    /// Server port
    pub port: u16,
    /// Database connection URL
    pub database_url: String,
    /// Frontend assets directory
    pub frontend_dir: String,
    /// Session expiration in hours
    pub session_expiry_hours: i64,
    /// Maximum request body size in bytes
    pub max_body_size: usize,
    /// CORS allowed origins
    pub cors_origins: Vec<String>,
    /// Environment (development/production)
    pub environment: Environment,
    /// Trusted proxy IP prefixes (e.g., ["10.0.0.", "172.16."])
    /// Only trust X-Forwarded-For headers from these IPs
    pub trusted_proxies: Vec<String>,
    /// Bag-count limits for critical/low stock
    pub stock_thresholds: StockThresholds,
    /// Hospital used when a request does not name one
    pub default_hospital: String,
    /// Admin account created at startup when absent
    pub bootstrap_admin: Option<BootstrapAdmin>,
    /// Run the periodic notification jobs
    pub scheduler_enabled: bool,
    /// How far ahead donor reminders look, in hours
    pub reminder_window_hours: i64,
}

/// Upper bound for `SESSION_EXPIRY_HOURS` (30 days)
pub const MAX_SESSION_EXPIRY_HOURS: i64 = 720;

/// Upper bound for `REMINDER_WINDOW_HOURS` (one week)
pub const MAX_REMINDER_WINDOW_HOURS: i64 = 168;

#[derive(Debug, Clone, PartialEq)]
pub enum Environment {
    Development,
    Production,
}

#[derive(Clone)]
pub struct BootstrapAdmin {
    pub name: String,
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for BootstrapAdmin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BootstrapAdmin")
            .field("name", &self.name)
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = match env::var("ENVIRONMENT")
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
            .as_str()
        {
            "production" | "prod" => Environment::Production,
            _ => Environment::Development,
        };

        // DATABASE_URL, or the individual DATABASE_* components
        let database_url = env::var("DATABASE_URL")
            .or_else(|_| -> Result<String, env::VarError> {
                let host = env::var("DATABASE_HOST")?;
                let port = env::var("DATABASE_PORT").unwrap_or_else(|_| "5432".to_string());
                let user = env::var("DATABASE_USER")?;
                let password = env::var("DATABASE_PASSWORD")?;
                let db = env::var("DATABASE_DB")?;
                Ok(format!(
                    "postgres://{}:{}@{}:{}/{}",
                    user, password, host, port, db
                ))
            })
            .map_err(|_| {
                ConfigError::Missing(
                    "DATABASE_URL or DATABASE_HOST + DATABASE_USER + DATABASE_PASSWORD + DATABASE_DB is required".to_string(),
                )
            })?;

        let stock_thresholds = parse_thresholds(
            env::var("STOCK_CRITICAL_MAX").ok().as_deref(),
            env::var("STOCK_LOW_MAX").ok().as_deref(),
        )?;

        let bootstrap_admin = match (env::var("ADMIN_EMAIL"), env::var("ADMIN_PASSWORD")) {
            (Ok(email), Ok(password)) => {
                if password.len() < 8 {
                    return Err(ConfigError::Invalid(
                        "ADMIN_PASSWORD must be at least 8 characters".to_string(),
                    ));
                }
                Some(BootstrapAdmin {
                    name: env::var("ADMIN_NAME").unwrap_or_else(|_| "Administrator".to_string()),
                    email,
                    password,
                })
            }
            (Ok(_), Err(_)) => {
                return Err(ConfigError::Missing(
                    "ADMIN_PASSWORD is required when ADMIN_EMAIL is set".to_string(),
                ))
            }
            _ => None,
        };

        Ok(Config {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8000),
            database_url,
            frontend_dir: env::var("FRONTEND_DIR").unwrap_or_else(|_| "./frontend".to_string()),
            session_expiry_hours: parse_hours(
                "SESSION_EXPIRY_HOURS",
                env::var("SESSION_EXPIRY_HOURS").ok().as_deref(),
                8,
                MAX_SESSION_EXPIRY_HOURS,
            )?,
            max_body_size: env::var("MAX_BODY_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1024 * 1024), // 1 MiB default
            cors_origins: env::var("CORS_ORIGINS")
                .map(|s| s.split(',').map(|o| o.trim().to_string()).collect())
                .unwrap_or_else(|_| vec!["http://localhost:5173".to_string()]),
            environment,
            trusted_proxies: env::var("TRUSTED_PROXIES")
                .map(|s| {
                    s.split(',')
                        .map(|p| p.trim().to_string())
                        .filter(|p| !p.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            stock_thresholds,
            default_hospital: env::var("DEFAULT_HOSPITAL")
                .unwrap_or_else(|_| "RS Sentra Medika Minahasa Utara".to_string()),
            bootstrap_admin,
            scheduler_enabled: env::var("SCHEDULER_ENABLED")
                .map(|v| !matches!(v.trim().to_lowercase().as_str(), "false" | "0" | "no"))
                .unwrap_or(true),
            reminder_window_hours: parse_hours(
                "REMINDER_WINDOW_HOURS",
                env::var("REMINDER_WINDOW_HOURS").ok().as_deref(),
                24,
                MAX_REMINDER_WINDOW_HOURS,
            )?,
        })
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    /// Get the server address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Parse the stock thresholds, falling back to defaults for unset values
fn parse_thresholds(
    critical: Option<&str>,
    low: Option<&str>,
) -> Result<StockThresholds, ConfigError> {
    let defaults = StockThresholds::default();
    let parse = |name: &str, value: Option<&str>, default: i32| -> Result<i32, ConfigError> {
        match value {
            None => Ok(default),
            Some(v) => v
                .trim()
                .parse::<i32>()
                .ok()
                .filter(|n| *n >= 0)
                .ok_or_else(|| {
                    ConfigError::Invalid(format!("{} must be a non-negative integer", name))
                }),
        }
    };

    let thresholds = StockThresholds {
        critical_max: parse("STOCK_CRITICAL_MAX", critical, defaults.critical_max)?,
        low_max: parse("STOCK_LOW_MAX", low, defaults.low_max)?,
    };

    if thresholds.critical_max >= thresholds.low_max {
        return Err(ConfigError::Invalid(
            "STOCK_CRITICAL_MAX must be below STOCK_LOW_MAX".to_string(),
        ));
    }

    Ok(thresholds)
}

/// Parse a whole number of hours in `1..=max`, or the default when unset
fn parse_hours(
    name: &str,
    value: Option<&str>,
    default: i64,
    max: i64,
) -> Result<i64, ConfigError> {
    match value {
        None => Ok(default),
        Some(v) => v
            .trim()
            .parse::<i64>()
            .ok()
            .filter(|h| (1..=max).contains(h))
            .ok_or_else(|| {
                ConfigError::Invalid(format!("{} must be between 1 and {} hours", name, max))
            }),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing configuration: {0}")]
    Missing(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
