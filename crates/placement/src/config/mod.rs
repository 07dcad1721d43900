use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
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
    pub auth: AuthConfig,
    pub registry: RegistryConfig,
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
        let log_dir = env::var("APP_LOG_DIR")
            .ok()
            .map(|dir| dir.trim().to_string())
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from);

        let api_version = env::var("API_VERSION").unwrap_or_else(|_| "/api/v1".to_string());
        let api_prefix = normalize_prefix(&api_version)?;
        let super_auth_token = env::var("SUPER_AUTH_TOKEN")
            .ok()
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty());

        let defaults = RegistryConfig::default();
        let registry = RegistryConfig {
            page_size: positive_var("DEFAULT_PAGE_SIZE", defaults.page_size)?,
            write_max_attempts: positive_var("WRITE_MAX_ATTEMPTS", defaults.write_max_attempts)?,
            cleanup: CleanupPolicy {
                max_attempts: positive_var("CLEANUP_MAX_ATTEMPTS", defaults.cleanup.max_attempts)?,
                retry_backoff: Duration::from_millis(numeric_var(
                    "CLEANUP_RETRY_BACKOFF_MS",
                    defaults.cleanup.retry_backoff.as_millis() as u64,
                )?),
            },
        };

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level, log_dir },
            auth: AuthConfig {
                api_prefix,
                super_auth_token,
            },
            registry,
        })
    }
}

fn numeric_var<T>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidNumber { name }),
        Err(_) => Ok(default),
    }
}

fn positive_var<T>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    let value = numeric_var(name, default)?;
    if value > T::default() {
        Ok(value)
    } else {
        Err(ConfigError::InvalidNumber { name })
    }
}

fn normalize_prefix(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim();
    if !trimmed.starts_with('/') {
        return Err(ConfigError::InvalidApiPrefix {
            value: trimmed.to_string(),
        });
    }
    Ok(trimmed.trim_end_matches('/').to_string())
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
    /// Directory for the daily-rotated JSON log file; console only when unset.
    pub log_dir: Option<PathBuf>,
}

/// Route prefix and the shared secret guarding every registry route.
///
/// An empty `api_prefix` mounts the routes at the root.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub api_prefix: String,
    pub super_auth_token: Option<String>,
}

/// Tunables for the registry services.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryConfig {
    pub page_size: usize,
    pub write_max_attempts: u32,
    pub cleanup: CleanupPolicy,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            page_size: 10,
            write_max_attempts: 3,
            cleanup: CleanupPolicy::default(),
        }
    }
}

/// Retry budget for cascade cleanup jobs before they are dead-lettered.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanupPolicy {
    pub max_attempts: u32,
    pub retry_backoff: Duration,
}

impl Default for CleanupPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_backoff: Duration::from_millis(500),
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidApiPrefix { value: String },
    InvalidNumber { name: &'static str },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidApiPrefix { value } => {
                write!(f, "API_VERSION must start with '/', got '{value}'")
            }
            ConfigError::InvalidNumber { name } => write!(f, "{name} must be a positive number"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::InvalidPort
            | ConfigError::InvalidApiPrefix { .. }
            | ConfigError::InvalidNumber { .. } => None,
        }
    }
}
