//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub log_level: Level,
    pub openai_api_key: Option<String>,
    pub commentary_model: String,
    pub generation_timeout_secs: u64,
    /// Optional JSON file overriding the built-in masters roster and
    /// question bank.
    pub catalog_path: Option<PathBuf>,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        // --- Load Server and Database Settings ---
        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingVar("DATABASE_URL".to_string()))?;

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Load API Keys (as optional) ---
        let openai_api_key = std::env::var("OPENAI_API_KEY").ok();

        // --- Load Adapter-specific Settings ---
        let commentary_model =
            std::env::var("COMMENTARY_MODEL").unwrap_or_else(|_| "gpt-4o".to_string());

        let generation_timeout_secs = match std::env::var("GENERATION_TIMEOUT_SECS") {
            Ok(raw) => raw.parse::<u64>().map_err(|_| {
                ConfigError::InvalidValue(
                    "GENERATION_TIMEOUT_SECS".to_string(),
                    format!("'{}' is not a number of seconds", raw),
                )
            })?,
            Err(_) => 30,
        };

        let catalog_path = std::env::var("CATALOG_PATH").map(PathBuf::from).ok();

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            openai_api_key,
            commentary_model,
            generation_timeout_secs,
            catalog_path,
        })
    }
}
