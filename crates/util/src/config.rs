use std::{env, fmt, net::SocketAddr, time::Duration};

use super::server_bind_address;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://task_board.db?mode=rwc";
pub const DEFAULT_STORAGE_TIMEOUT_MS: u64 = 5_000;

/// Application runtime environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    fn from_str(value: &str) -> Result<Self, ConfigError> {
        match value {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            "test" => Ok(Self::Test),
            other => Err(ConfigError::InvalidEnvironment(other.to_string())),
        }
    }

    /// Returns the canonical name used for logging/metrics labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Test => "test",
        }
    }
}

/// Runtime configuration resolved from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub environment: Environment,
    pub database_url: String,
    pub storage_timeout: Duration,
}

impl AppConfig {
    /// Constructs the configuration by reading and validating environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let env_value = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
        let environment = Environment::from_str(&env_value)?;
        let bind_addr = server_bind_address().map_err(ConfigError::BindAddress)?;
        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string());
        if database_url.trim().is_empty() {
            return Err(ConfigError::EmptyDatabaseUrl);
        }
        let storage_timeout = storage_timeout()?;

        Ok(Self {
            bind_addr,
            environment,
            database_url,
            storage_timeout,
        })
    }
}

fn storage_timeout() -> Result<Duration, ConfigError> {
    let Ok(raw) = env::var("STORAGE_TIMEOUT_MS") else {
        return Ok(Duration::from_millis(DEFAULT_STORAGE_TIMEOUT_MS));
    };
    match raw.trim().parse::<u64>() {
        Ok(value) if value > 0 => Ok(Duration::from_millis(value)),
        _ => Err(ConfigError::InvalidStorageTimeout(raw)),
    }
}

/// Errors that can occur during configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    InvalidEnvironment(String),
    BindAddress(std::net::AddrParseError),
    EmptyDatabaseUrl,
    InvalidStorageTimeout(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEnvironment(value) => write!(
                f,
                "APP_ENV must be one of 'development', 'production', or 'test' (got {value})"
            ),
            Self::BindAddress(err) => write!(f, "invalid APP_BIND_ADDR value: {err}"),
            Self::EmptyDatabaseUrl => write!(f, "DATABASE_URL must not be empty"),
            Self::InvalidStorageTimeout(value) => write!(
                f,
                "STORAGE_TIMEOUT_MS must be a positive integer (got {value})"
            ),
        }
    }
}

impl std::error::Error for ConfigError {}
