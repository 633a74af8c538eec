//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;
use std::time::Duration;
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
    pub story_model: String,
    pub image_model: String,
    pub image_batch_size: usize,
    pub auto_advance_delay: Duration,
    pub cors_origin: String,
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
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key/value source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // --- Load Server and Database Settings ---
        let bind_address_str = lookup("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str.parse::<SocketAddr>().map_err(|e| {
            ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string())
        })?;

        let database_url =
            lookup("DATABASE_URL").ok_or_else(|| ConfigError::MissingVar("DATABASE_URL".to_string()))?;

        let log_level_str = lookup("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Load API Keys (as optional) ---
        let openai_api_key = lookup("OPENAI_API_KEY");

        // --- Load Generation Settings ---
        let story_model = lookup("STORY_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string());
        let image_model = lookup("IMAGE_MODEL").unwrap_or_else(|| "dall-e-3".to_string());
        if !matches!(image_model.as_str(), "dall-e-2" | "dall-e-3") {
            return Err(ConfigError::InvalidValue(
                "IMAGE_MODEL".to_string(),
                format!("'{}' is not a supported image model", image_model),
            ));
        }

        let image_batch_size = parse_number(&lookup, "IMAGE_BATCH_SIZE", 3)?;
        if image_batch_size == 0 {
            return Err(ConfigError::InvalidValue(
                "IMAGE_BATCH_SIZE".to_string(),
                "the batch size must be at least 1".to_string(),
            ));
        }
        let auto_advance_delay =
            Duration::from_millis(parse_number(&lookup, "AUTO_ADVANCE_DELAY_MS", 3000)? as u64);

        let cors_origin =
            lookup("CORS_ORIGIN").unwrap_or_else(|| "http://localhost:3000".to_string());

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            openai_api_key,
            story_model,
            image_model,
            image_batch_size,
            auto_advance_delay,
            cors_origin,
        })
    }
}

fn parse_number<F>(lookup: &F, key: &str, default: usize) -> Result<usize, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse::<usize>().map_err(|e| {
            ConfigError::InvalidValue(key.to_string(), format!("'{}': {}", raw, e))
        }),
        None => Ok(default),
    }
}
