//! Leadflow Worker: startup error types.

use thiserror::Error;

/// Startup and runtime errors for the worker binary.
#[derive(Debug, Error)]
pub enum AppError {
    /// A required environment variable is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// Database connection or pool error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration failed.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Signal handling or other I/O error.
    #[error("server error: {0}")]
    Server(#[from] std::io::Error),
}

impl AppError {
    pub(crate) fn invalid(key: &str, value: &str, reason: impl std::fmt::Display) -> Self {
        Self::Config(format!("{key}={value:?} is invalid: {reason}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_names_key_and_value() {
        let err = AppError::invalid("TASK_MAX_ATTEMPTS", "zero", "expected a positive integer");
        assert_eq!(
            err.to_string(),
            "configuration error: TASK_MAX_ATTEMPTS=\"zero\" is invalid: expected a positive integer"
        );
    }

    #[test]
    fn test_io_error_converts_to_server_error() {
        let err: AppError = std::io::Error::other("signal handler unavailable").into();
        assert!(matches!(err, AppError::Server(_)));
    }
}
