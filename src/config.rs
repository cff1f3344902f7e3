//! Application configuration loaded from environment variables.
//!
//! All configuration is loaded from environment variables with defaults that
//! match the demo deployment. A `.env` file is honoured when present.
//!
//! # Rate Limiting
//!
//! - `RATE_LIMIT_REQUESTS`: Requests admitted per client per window (default: 60, 0 = disabled)
//! - `RATE_LIMIT_WINDOW_SECS`: Window length in seconds (default: 60)
//! - `RATE_LIMIT_SWEEP_INTERVAL_SECS`: How often expired windows are evicted (default: 60, 0 = never)
//!
//! # Security
//!
//! - `AUTH_TOKEN`: The single accepted bearer token (default: `demo-token`)
//! - `AUTH_PRINCIPAL`: Identity attached to requests presenting that token (default: `demo-user`)
//! - `CORS_ALLOWED_ORIGINS`: Comma-separated list of allowed origins (default: `*`)

use std::env;
use std::time::Duration;

use crate::error::{AppError, AppResult};
use crate::middleware::MAX_WINDOW;

/// Default bearer token accepted by the authorization gate.
pub const DEFAULT_AUTH_TOKEN: &str = "demo-token";

/// Default principal attached to authenticated requests.
pub const DEFAULT_AUTH_PRINCIPAL: &str = "demo-user";

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Server host address (default: "0.0.0.0")
    pub host: String,

    /// Server port (default: 8080)
    pub port: u16,

    /// Maximum request body size in bytes (default: 1MB)
    pub max_request_body_size: usize,

    // =========================================================================
    // Rate Limiting Configuration
    // =========================================================================
    /// Requests admitted per client key in one window (default: 60).
    /// Set to 0 to disable rate limiting.
    pub rate_limit_requests: u32,

    /// Length of one rate limit window (default: 60 seconds)
    pub rate_limit_window: Duration,

    /// Interval between sweeps of expired rate limit windows (default: 60 seconds).
    /// Zero disables the sweeper.
    pub rate_limit_sweep_interval: Duration,

    // =========================================================================
    // Security Configuration
    // =========================================================================
    /// The single bearer token accepted by the authorization gate
    pub auth_token: String,

    /// Principal name attached to requests that present `auth_token`
    pub auth_principal: String,

    /// Allowed CORS origins; "*" allows any origin
    pub cors_allowed_origins: Vec<String>,

    // =========================================================================
    // Observability Configuration
    // =========================================================================
    /// Log level filter (e.g., "info", "debug")
    pub log_level: String,

    /// Port for Prometheus metrics endpoint (default: 9090, 0 = disabled)
    pub metrics_port: u16,
}

impl Config {
    /// Load configuration from environment variables with defaults.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if a variable cannot be parsed or the
    /// resulting configuration is inconsistent.
    pub fn from_env() -> AppResult<Self> {
        // Load an .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let config = Self {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: Self::parse_env("PORT", 8080)?,
            max_request_body_size: Self::parse_env("MAX_REQUEST_BODY_SIZE", 1024 * 1024)?,

            rate_limit_requests: Self::parse_env("RATE_LIMIT_REQUESTS", 60)?,
            rate_limit_window: Duration::from_secs(Self::parse_env("RATE_LIMIT_WINDOW_SECS", 60)?),
            rate_limit_sweep_interval: Duration::from_secs(Self::parse_env(
                "RATE_LIMIT_SWEEP_INTERVAL_SECS",
                60,
            )?),

            auth_token: env::var("AUTH_TOKEN").unwrap_or_else(|_| DEFAULT_AUTH_TOKEN.to_string()),
            auth_principal: env::var("AUTH_PRINCIPAL")
                .unwrap_or_else(|_| DEFAULT_AUTH_PRINCIPAL.to_string()),
            cors_allowed_origins: Self::parse_cors_origins(),

            log_level: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            metrics_port: Self::parse_env("METRICS_PORT", 9090)?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values for consistency and correctness.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if validation fails.
    pub fn validate(&self) -> AppResult<()> {
        if self.rate_limiting_enabled() && self.rate_limit_window.is_zero() {
            return Err(AppError::ConfigError(
                "RATE_LIMIT_WINDOW_SECS must be greater than 0 when rate limiting is enabled"
                    .to_string(),
            ));
        }

        if self.rate_limiting_enabled() && self.rate_limit_window > MAX_WINDOW {
            return Err(AppError::ConfigError(format!(
                "RATE_LIMIT_WINDOW_SECS must not exceed {}",
                MAX_WINDOW.as_secs()
            )));
        }

        // A token containing whitespace could never arrive as `Bearer <token>`
        if self.auth_token.is_empty() || self.auth_token.contains(char::is_whitespace) {
            return Err(AppError::ConfigError(
                "AUTH_TOKEN must be non-empty and contain no whitespace".to_string(),
            ));
        }

        if self.auth_principal.trim().is_empty() {
            return Err(AppError::ConfigError(
                "AUTH_PRINCIPAL must not be empty".to_string(),
            ));
        }

        if self.max_request_body_size == 0 {
            return Err(AppError::ConfigError(
                "MAX_REQUEST_BODY_SIZE must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Get the full server address for binding.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if rate limiting is enabled.
    pub fn rate_limiting_enabled(&self) -> bool {
        self.rate_limit_requests > 0
    }

    /// Check if the expired-window sweeper should run.
    pub fn sweeper_enabled(&self) -> bool {
        self.rate_limiting_enabled() && !self.rate_limit_sweep_interval.is_zero()
    }

    /// Check if Prometheus metrics export is enabled.
    pub fn metrics_enabled(&self) -> bool {
        self.metrics_port > 0
    }

    /// Get the metrics endpoint address, or `None` when metrics are disabled.
    pub fn metrics_addr(&self) -> Option<std::net::SocketAddr> {
        self.metrics_enabled()
            .then(|| std::net::SocketAddr::from(([0, 0, 0, 0], self.metrics_port)))
    }

    /// Parse an environment variable into the specified type with a default value.
    fn parse_env<T>(name: &str, default: T) -> AppResult<T>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match env::var(name) {
            Ok(val) => val
                .trim()
                .parse()
                .map_err(|e| AppError::ConfigError(format!("Invalid {name}: {e}"))),
            Err(_) => Ok(default),
        }
    }

    fn parse_cors_origins() -> Vec<String> {
        env::var("CORS_ALLOWED_ORIGINS")
            .unwrap_or_else(|_| "*".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

/// Default configuration for testing and development.
///
/// Production deployments should use `Config::from_env()` instead.
impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            max_request_body_size: 1024 * 1024,
            rate_limit_requests: 60,
            rate_limit_window: Duration::from_secs(60),
            rate_limit_sweep_interval: Duration::from_secs(60),
            auth_token: DEFAULT_AUTH_TOKEN.to_string(),
            auth_principal: DEFAULT_AUTH_PRINCIPAL.to_string(),
            cors_allowed_origins: vec!["*".to_string()],
            log_level: "info".to_string(),
            metrics_port: 9090,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = Config::default();

        assert_eq!(config.port, 8080);
        assert_eq!(config.rate_limit_requests, 60);
        assert_eq!(config.rate_limit_window, Duration::from_secs(60));
        assert_eq!(config.auth_token, "demo-token");
        assert_eq!(config.auth_principal, "demo-user");
    }

    #[test]
    fn test_server_addr_format() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 3000,
            ..Config::default()
        };

        assert_eq!(config.server_addr(), "127.0.0.1:3000");
    }

    #[test]
    fn test_rate_limiting_enabled() {
        assert!(Config::default().rate_limiting_enabled());

        let config = Config {
            rate_limit_requests: 0,
            ..Config::default()
        };
        assert!(!config.rate_limiting_enabled());
        assert!(!config.sweeper_enabled());
    }

    #[test]
    fn test_sweeper_disabled_by_zero_interval() {
        let config = Config {
            rate_limit_sweep_interval: Duration::ZERO,
            ..Config::default()
        };
        assert!(config.rate_limiting_enabled());
        assert!(!config.sweeper_enabled());
    }

    #[test]
    fn test_metrics_addr() {
        assert!(Config::default().metrics_addr().is_some());

        let config = Config {
            metrics_port: 0,
            ..Config::default()
        };
        assert!(config.metrics_addr().is_none());
    }

    #[test]
    fn test_validate_zero_window() {
        let config = Config {
            rate_limit_window: Duration::ZERO,
            ..Config::default()
        };

        let result = config.validate();
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("RATE_LIMIT_WINDOW_SECS")
        );
    }

    #[test]
    fn test_validate_window_longer_than_a_day() {
        let config = Config {
            rate_limit_window: Duration::from_secs(u64::MAX),
            ..Config::default()
        };
        assert!(
            config
                .validate()
                .unwrap_err()
                .to_string()
                .contains("must not exceed 86400")
        );

        let config = Config {
            rate_limit_window: MAX_WINDOW,
            ..Config::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_zero_window_ignored_when_disabled() {
        let config = Config {
            rate_limit_requests: 0,
            rate_limit_window: Duration::ZERO,
            ..Config::default()
        };

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_token_with_whitespace() {
        let config = Config {
            auth_token: "demo token".to_string(),
            ..Config::default()
        };

        assert!(config.validate().unwrap_err().to_string().contains("AUTH_TOKEN"));
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(Config::default().validate().is_ok());
    }
}
