//! Error types for the batch engine.
//!
//! A single top-level [`AppError`] wraps category-specific enums so callers
//! can match on the failure domain without string inspection.

use thiserror::Error;

/// Top-level application error
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Blockchain error: {0}")]
    Blockchain(#[from] BlockchainError),

    #[error("Signer error: {0}")]
    Signer(#[from] SignerError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Batch cancelled before the item was dispatched
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Not supported: {0}")]
    NotSupported(String),
}

/// Input validation failures
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Validation failed: {0}")]
    Multiple(String),
}

/// Relational store failures
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// The schema lacks the uniqueness guarantee a conflict-aware write needs.
    /// Surfaced by Postgres as SQLSTATE 42P10 on `ON CONFLICT`.
    #[error("Unique constraint missing: {0}")]
    ConstraintMissing(String),
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        if let Some(db_err) = err.as_database_error() {
            if db_err.code().as_deref() == Some("42P10") {
                return DatabaseError::ConstraintMissing(db_err.to_string());
            }
        }
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                DatabaseError::Connection(err.to_string())
            }
            sqlx::Error::RowNotFound => DatabaseError::NotFound(err.to_string()),
            other => DatabaseError::Query(other.to_string()),
        }
    }
}

/// Blockchain RPC failures
#[derive(Debug, Error)]
pub enum BlockchainError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Invalid address '{address}': {message}")]
    InvalidAddress { address: String, message: String },

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    #[error("RPC error: {0}")]
    Rpc(String),
}

/// Signing material resolution failures
#[derive(Debug, Error)]
pub enum SignerError {
    #[error("No signing key for owner {0}")]
    MissingKey(String),

    #[error("Invalid signing key: {0}")]
    InvalidKey(String),
}

/// Configuration failures
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing configuration: {0}")]
    Missing(String),

    #[error("Invalid configuration '{key}': {message}")]
    Invalid { key: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_includes_category() {
        let err = AppError::Database(DatabaseError::Query("syntax".to_string()));
        assert!(err.to_string().contains("Database error"));
        assert!(err.to_string().contains("syntax"));

        let err = AppError::Signer(SignerError::MissingKey("owner1".to_string()));
        assert!(err.to_string().contains("owner1"));
    }

    #[test]
    fn test_validation_error_field_message() {
        let err = ValidationError::InvalidField {
            field: "amount".to_string(),
            message: "must be greater than zero".to_string(),
        };
        let display = err.to_string();
        assert!(display.contains("amount"));
        assert!(display.contains("greater than zero"));
    }

    #[test]
    fn test_sqlx_row_not_found_maps_to_not_found() {
        let err: DatabaseError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, DatabaseError::NotFound(_)));
    }
}
