use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Serialize, Deserialize)]
pub enum AppError {
    #[error("Internal error: {0}")]
    Internal(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("LLM error: {0}")]
    LLMError(String),
    #[error("Security error: {0}")]
    SecurityError(String),
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("IO error: {0}")]
    IoError(String),
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::IoError(err.to_string())
    }
}

impl From<PoolError> for AppError {
    fn from(err: PoolError) -> Self {
        AppError::DatabaseError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

/// Failure of the AI SQL generator. Always recovered by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenError {
    #[error("SQL generation timed out")]
    Timeout,
    #[error("SQL generation unavailable: {0}")]
    Unavailable(String),
    #[error("model output did not contain a SQL statement")]
    MalformedOutput,
    #[error("SQL generation cancelled")]
    Cancelled,
}

/// Reason a SQL string was rejected by the validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum ValidationError {
    #[error("statement must start with SELECT or WITH")]
    NotSelect,
    #[error("multiple statements are not allowed")]
    MultipleStatements,
    #[error("statement has no LIMIT clause")]
    MissingLimit,
    #[error("forbidden keyword '{0}'")]
    ForbiddenKeyword(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    /// No connection became free before the acquire timeout elapsed.
    #[error("connection pool exhausted")]
    Exhausted,
    /// New connections could not be established after the configured retries.
    #[error("database unavailable: {0}")]
    Unavailable(String),
    #[error("connection pool closed")]
    Closed,
}

/// Failure reported by a single live connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct DbFailure {
    /// SQLSTATE when the server reported one.
    pub code: Option<String>,
    pub message: String,
    /// The connection can no longer be trusted and must not return to the pool.
    pub connection_lost: bool,
}

impl DbFailure {
    pub fn statement(code: Option<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            connection_lost: false,
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
            connection_lost: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecError {
    #[error("connection pool exhausted")]
    PoolExhausted,
    #[error("query timed out")]
    Timeout,
    #[error("database error ({}): {message}", .code.as_deref().unwrap_or("unknown"))]
    DbError {
        code: Option<String>,
        message: String,
    },
    #[error("query cancelled")]
    Cancelled,
}

impl ExecError {
    /// SQLSTATE class 42: syntax error or reference to an unknown table/column.
    pub fn is_invalid_statement(&self) -> bool {
        matches!(self, ExecError::DbError { code: Some(code), .. } if code.starts_with("42"))
    }
}

impl From<PoolError> for ExecError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Exhausted => ExecError::PoolExhausted,
            // 08001: sqlclient_unable_to_establish_sqlconnection
            PoolError::Unavailable(message) => ExecError::DbError {
                code: Some("08001".to_string()),
                message,
            },
            PoolError::Closed => ExecError::DbError {
                code: Some("08003".to_string()),
                message: "connection pool closed".to_string(),
            },
        }
    }
}

/// Error returned by the external completion capability.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompletionError {
    #[error("completion timed out")]
    Timeout,
    #[error("completion service unavailable: {0}")]
    Unavailable(String),
}

impl From<CompletionError> for GenError {
    fn from(err: CompletionError) -> Self {
        match err {
            CompletionError::Timeout => GenError::Timeout,
            CompletionError::Unavailable(msg) => GenError::Unavailable(msg),
        }
    }
}

impl From<CompletionError> for AppError {
    fn from(err: CompletionError) -> Self {
        AppError::LLMError(err.to_string())
    }
}
