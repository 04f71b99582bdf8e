//! Configuration management for the loan ledger
//!
//! Loads and validates configuration from environment variables, with
//! sensible defaults for everything except the database URL.

use std::env;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Ledger configuration
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Database connection URL
    pub database_url: String,

    /// Maximum database connections
    pub db_max_connections: u32,

    /// Flat interest rate applied once at loan creation (0.05 = 5%)
    pub default_interest_rate: f64,

    /// Fraction of the historical peak balance a system loan may reach
    pub system_loan_ratio: f64,

    /// Days until a system loan falls due
    pub system_loan_period_days: i64,

    /// Log level (RUST_LOG)
    pub log_level: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        LedgerConfig {
            database_url: "sqlite::memory:".to_string(),
            db_max_connections: 5,
            default_interest_rate: 0.05,
            system_loan_ratio: 0.10,
            system_loan_period_days: 7,
            log_level: "info".to_string(),
        }
    }
}

impl LedgerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors)
        dotenvy::dotenv().ok();

        let database_url = env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingEnvVar("DATABASE_URL".to_string()))?;

        let db_max_connections = env::var("DB_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "5".to_string())
            .parse::<u32>()
            .map_err(|_| {
                ConfigError::InvalidValue("DB_MAX_CONNECTIONS must be a number".to_string())
            })?;

        let default_interest_rate = env::var("LOAN_DEFAULT_INTEREST_RATE")
            .unwrap_or_else(|_| "0.05".to_string())
            .parse::<f64>()
            .map_err(|_| {
                ConfigError::InvalidValue("LOAN_DEFAULT_INTEREST_RATE must be a number".to_string())
            })?;

        let system_loan_ratio = env::var("SYSTEM_LOAN_RATIO")
            .unwrap_or_else(|_| "0.10".to_string())
            .parse::<f64>()
            .map_err(|_| {
                ConfigError::InvalidValue("SYSTEM_LOAN_RATIO must be a number".to_string())
            })?;

        let system_loan_period_days = env::var("SYSTEM_LOAN_PERIOD_DAYS")
            .unwrap_or_else(|_| "7".to_string())
            .parse::<i64>()
            .map_err(|_| {
                ConfigError::InvalidValue("SYSTEM_LOAN_PERIOD_DAYS must be a number".to_string())
            })?;

        let log_level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        let config = LedgerConfig {
            database_url,
            db_max_connections,
            default_interest_rate,
            system_loan_ratio,
            system_loan_period_days,
            log_level,
        };
        config.validate()?;

        Ok(config)
    }

    /// Check that the numeric settings are usable
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_interest_rate < 0.0 {
            return Err(ConfigError::InvalidValue(
                "default interest rate must not be negative".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.system_loan_ratio) {
            return Err(ConfigError::InvalidValue(
                "system loan ratio must be between 0 and 1".to_string(),
            ));
        }
        if self.system_loan_period_days < 1 {
            return Err(ConfigError::InvalidValue(
                "system loan period must be at least 1 day".to_string(),
            ));
        }
        Ok(())
    }
}
