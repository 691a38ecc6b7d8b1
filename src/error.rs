//! Error types for dbaccess.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! Variants follow the failure points of the data-access core: connecting,
//! transaction control, statement execution, streaming and decoding rows.

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum DbError {
    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("Transaction error: {message} (transaction: {transaction_id})")]
    Transaction {
        message: String,
        transaction_id: String,
    },

    #[error(
        "Rollback failed after error: {cause}; rollback error: {rollback} (transaction: {transaction_id})"
    )]
    RollbackFailed {
        cause: String,
        rollback: String,
        transaction_id: String,
    },

    #[error("No rows in result set")]
    NoRows,

    #[error("Decode error: {message}")]
    Decode { message: String },

    #[error("Cursor error: {message}")]
    Cursor { message: String },

    #[error("Timeout: {operation} exceeded {elapsed_secs}s")]
    Timeout {
        operation: String,
        elapsed_secs: u32,
    },

    #[error("Cancelled: {operation}")]
    Cancelled { operation: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a database error with optional SQL state.
    pub fn database(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    /// Create a transaction error.
    pub fn transaction(message: impl Into<String>, transaction_id: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
            transaction_id: transaction_id.into(),
        }
    }

    /// Create a composite error keeping both the triggering error and the
    /// rollback failure.
    pub fn rollback_failed(
        cause: &DbError,
        rollback: &DbError,
        transaction_id: impl Into<String>,
    ) -> Self {
        Self::RollbackFailed {
            cause: cause.to_string(),
            rollback: rollback.to_string(),
            transaction_id: transaction_id.into(),
        }
    }

    /// Create a decode error.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Create a cursor error.
    pub fn cursor(message: impl Into<String>) -> Self {
        Self::Cursor {
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed_secs: u32) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_secs,
        }
    }

    /// Create a cancellation error.
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Map an error raised while a cursor was streaming rows.
    ///
    /// Transport failures become [`DbError::Cursor`]; decode failures stay
    /// [`DbError::Decode`] and server errors stay [`DbError::Database`].
    pub fn from_stream(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(io_err) => DbError::cursor(format!("I/O error: {}", io_err)),
            sqlx::Error::Protocol(msg) => DbError::cursor(format!("Protocol error: {}", msg)),
            sqlx::Error::Tls(tls_err) => DbError::cursor(format!("TLS error: {}", tls_err)),
            sqlx::Error::PoolClosed => DbError::cursor("Connection pool closed mid-stream"),
            sqlx::Error::WorkerCrashed => DbError::cursor("Database worker crashed"),
            other => DbError::from(other),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Database { suggestion, .. } => Some(suggestion),
            _ => None,
        }
    }

    /// Check if this error is retryable by the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout { .. })
    }

    /// Check if this is the "no rows" condition rather than a failure.
    pub fn is_no_rows(&self) -> bool {
        matches!(self, Self::NoRows)
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the connection string format and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::database(
                    db_err.message(),
                    code,
                    "Check the SQL syntax and referenced objects",
                )
            }
            sqlx::Error::RowNotFound => DbError::NoRows,
            sqlx::Error::PoolTimedOut => DbError::timeout("connection pool acquire", 30),
            sqlx::Error::PoolClosed => {
                DbError::connection("Connection pool is closed", "Reconnect to the database")
            }
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::TypeNotFound { type_name } => {
                DbError::decode(format!("Type not found: {}", type_name))
            }
            sqlx::Error::ColumnNotFound(col) => {
                DbError::decode(format!("Column not found: {}", col))
            }
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => DbError::decode(format!(
                "Column index {} out of bounds (len: {})",
                index, len
            )),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::decode(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::decode(source.to_string()),
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;
