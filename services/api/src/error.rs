//! services/api/src/error.rs
//!
//! Defines the primary error type for the entire API service, and the mapping
//! from core port errors to HTTP responses.

use crate::config::ConfigError;
use axum::http::StatusCode;
use guardian_kids_core::ports::PortError;

/// The primary error type for the `api` service.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Represents an error that propagated up from one of the core service ports.
    #[error("Service Port Error: {0}")]
    Port(#[from] PortError),

    /// Represents an error from the underlying database library.
    #[error("Database Error: {0}")]
    Database(#[from] sqlx::Error),

    /// Represents a failure while applying database migrations.
    #[error("Migration Error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Represents a standard Input/Output error (e.g., binding to a network socket).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}

/// The HTTP status a port error is reported with.
pub fn port_error_status(error: &PortError) -> StatusCode {
    match error {
        PortError::NotFound(_) => StatusCode::NOT_FOUND,
        PortError::Conflict(_) => StatusCode::CONFLICT,
        PortError::Generation(_) => StatusCode::BAD_GATEWAY,
        PortError::Unauthorized => StatusCode::UNAUTHORIZED,
        PortError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Turns a port error into the `(StatusCode, String)` pair handlers return.
///
/// Internal details stay in the logs; the client gets `context` plus enough to
/// know whether retrying makes sense.
pub fn port_error_response(context: &str, error: PortError) -> (StatusCode, String) {
    let status = port_error_status(&error);
    let message = match &error {
        PortError::NotFound(what) => what.clone(),
        PortError::Conflict(why) => why.clone(),
        PortError::Generation(_) => format!("{}: story generation failed, please try again", context),
        PortError::Unauthorized => "Unauthorized".to_string(),
        PortError::Unexpected(_) => context.to_string(),
    };
    (status, message)
}
