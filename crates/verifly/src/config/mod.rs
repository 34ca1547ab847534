use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub verification: VerificationSettings,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            verification: VerificationSettings::from_env()?,
        })
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Knobs for the run pipeline: source-call bounds, worker pool sizing, and
/// the notification retry schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationSettings {
    pub provider_timeout: Duration,
    pub max_concurrent_checks: usize,
    pub workers: usize,
    pub queue_capacity: usize,
    pub notify_retry_delays: Vec<Duration>,
}

impl Default for VerificationSettings {
    fn default() -> Self {
        Self {
            provider_timeout: Duration::from_millis(30_000),
            max_concurrent_checks: 16,
            workers: 4,
            queue_capacity: 256,
            notify_retry_delays: vec![
                Duration::from_secs(5 * 60),
                Duration::from_secs(30 * 60),
                Duration::from_secs(2 * 60 * 60),
            ],
        }
    }
}

impl VerificationSettings {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let provider_timeout = match env::var("VERIFY_PROVIDER_TIMEOUT_MS") {
            Ok(raw) => Duration::from_millis(parse_positive("VERIFY_PROVIDER_TIMEOUT_MS", &raw)?),
            Err(_) => defaults.provider_timeout,
        };
        let max_concurrent_checks = match env::var("VERIFY_MAX_CONCURRENT_CHECKS") {
            Ok(raw) => parse_positive("VERIFY_MAX_CONCURRENT_CHECKS", &raw)? as usize,
            Err(_) => defaults.max_concurrent_checks,
        };
        let workers = match env::var("VERIFY_WORKERS") {
            Ok(raw) => parse_positive("VERIFY_WORKERS", &raw)? as usize,
            Err(_) => defaults.workers,
        };
        let queue_capacity = match env::var("VERIFY_QUEUE_CAPACITY") {
            Ok(raw) => parse_positive("VERIFY_QUEUE_CAPACITY", &raw)? as usize,
            Err(_) => defaults.queue_capacity,
        };
        let notify_retry_delays = match env::var("VERIFY_NOTIFY_RETRY_DELAYS_MS") {
            Ok(raw) => parse_delays(&raw)?,
            Err(_) => defaults.notify_retry_delays,
        };

        Ok(Self {
            provider_timeout,
            max_concurrent_checks,
            workers,
            queue_capacity,
            notify_retry_delays,
        })
    }
}

fn parse_positive(variable: &'static str, raw: &str) -> Result<u64, ConfigError> {
    match raw.trim().parse::<u64>() {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(ConfigError::InvalidNumber {
            variable,
            value: raw.to_string(),
        }),
    }
}

fn parse_delays(raw: &str) -> Result<Vec<Duration>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| ConfigError::InvalidNumber {
                    variable: "VERIFY_NOTIFY_RETRY_DELAYS_MS",
                    value: raw.to_string(),
                })
        })
        .collect()
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidNumber { variable: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidNumber { variable, value } => {
                write!(f, "{variable} must be a positive integer (found '{value}')")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidPort | ConfigError::InvalidNumber { .. } => None,
            ConfigError::InvalidHost { source } => Some(source),
        }
    }
}
