//! Application configuration loaded from environment variables.

use std::time::Duration;

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl LogFormat {
    fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Text
        }
    }
}

/// Server configuration.
///
/// | Variable | Default |
/// |---|---|
/// | `HOST` | `0.0.0.0` |
/// | `PORT` | `3000` |
/// | `RUST_LOG` | `info` |
/// | `LOG_FORMAT` | `text` (`json` for structured output) |
/// | `JWT_SECRET` | `dev-secret` |
/// | `DATABASE_URL` | unset: in-memory ledger |
/// | `CATALOG_SERVICE_URL` | unset: built-in demo catalog |
/// | `NOTIFICATION_SERVICE_URL` | unset: notifications are only logged |
/// | `PAYMENT_SETTLEMENT_DELAY_MS` | `1000` |
/// | `NOTIFICATION_QUEUE_CAPACITY` | `256` |
/// | `RATE_LIMIT_MAX_REQUESTS` | `30` |
/// | `RATE_LIMIT_WINDOW_SECS` | `60` |
/// | `HTTP_CLIENT_TIMEOUT_MS` | `5000` |
/// | `IDEMPOTENCY_KEY_RETENTION_SECS` | `86400` |
///
/// Unparseable numbers fall back to the default.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub jwt_secret: String,
    pub database_url: Option<String>,
    pub catalog_url: Option<String>,
    pub notification_url: Option<String>,
    pub settlement_delay: Duration,
    pub notification_queue_capacity: usize,
    pub rate_limit_max_requests: usize,
    pub rate_limit_window: Duration,
    pub http_client_timeout: Duration,
    /// How long the inventory ledger remembers applied idempotency keys.
    pub idempotency_key_retention: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let number = |key: &str| non_empty(key).and_then(|v| v.trim().parse::<u64>().ok());

        Self {
            host: non_empty("HOST").unwrap_or(defaults.host),
            port: non_empty("PORT")
                .and_then(|p| p.trim().parse().ok())
                .unwrap_or(defaults.port),
            log_level: non_empty("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: non_empty("LOG_FORMAT")
                .map(|v| LogFormat::parse(&v))
                .unwrap_or(defaults.log_format),
            jwt_secret: non_empty("JWT_SECRET").unwrap_or(defaults.jwt_secret),
            database_url: non_empty("DATABASE_URL"),
            catalog_url: non_empty("CATALOG_SERVICE_URL"),
            notification_url: non_empty("NOTIFICATION_SERVICE_URL"),
            settlement_delay: number("PAYMENT_SETTLEMENT_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.settlement_delay),
            notification_queue_capacity: number("NOTIFICATION_QUEUE_CAPACITY")
                .filter(|n| *n > 0)
                .map(|n| n as usize)
                .unwrap_or(defaults.notification_queue_capacity),
            rate_limit_max_requests: number("RATE_LIMIT_MAX_REQUESTS")
                .map(|n| n as usize)
                .unwrap_or(defaults.rate_limit_max_requests),
            rate_limit_window: number("RATE_LIMIT_WINDOW_SECS")
                .filter(|n| *n > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.rate_limit_window),
            http_client_timeout: number("HTTP_CLIENT_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.http_client_timeout),
            idempotency_key_retention: number("IDEMPOTENCY_KEY_RETENTION_SECS")
                .filter(|n| *n > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.idempotency_key_retention),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            jwt_secret: "dev-secret".to_string(),
            database_url: None,
            catalog_url: None,
            notification_url: None,
            settlement_delay: payments::DEFAULT_SETTLEMENT_DELAY,
            notification_queue_capacity: 256,
            rate_limit_max_requests: 30,
            rate_limit_window: Duration::from_secs(60),
            http_client_timeout: Duration::from_millis(5000),
            idempotency_key_retention: Duration::from_secs(24 * 60 * 60),
        }
    }
}
