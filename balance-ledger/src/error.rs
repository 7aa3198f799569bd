//! Error types for the ledger

use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use rust_decimal::Decimal;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Classification of every failure the ledger can report.
///
/// Callers dispatch on the kind, never on the rendered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed transaction ID, amount, direction or source type
    InvalidArgument,
    /// The referenced account does not exist
    AccountNotFound,
    /// The idempotency token was already applied
    DuplicateTransaction,
    /// A debit would take the balance below zero
    InsufficientBalance,
    /// Transient storage failure while serving a request
    StorageUnavailable,
    /// Startup retries exhausted; the process cannot serve traffic
    StorageUnreachable,
    /// Invalid startup configuration
    Config,
}

impl ErrorKind {
    /// Stable snake_case label, used in response bodies and metric labels
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::AccountNotFound => "account_not_found",
            ErrorKind::DuplicateTransaction => "duplicate_transaction",
            ErrorKind::InsufficientBalance => "insufficient_balance",
            ErrorKind::StorageUnavailable => "storage_unavailable",
            ErrorKind::StorageUnreachable => "storage_unreachable",
            ErrorKind::Config => "config_error",
        }
    }
}

/// Ledger errors
#[derive(Error, Debug)]
pub enum LedgerError {
    /// Caller supplied a malformed argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Account does not exist
    #[error("Account not found: {0}")]
    AccountNotFound(u64),

    /// Transaction ID already committed
    #[error("Transaction already processed: {0}")]
    DuplicateTransaction(Uuid),

    /// Debit larger than the current balance
    #[error("Insufficient balance: balance {balance}, requested {requested}")]
    InsufficientBalance { balance: Decimal, requested: Decimal },

    /// Query or connectivity failure
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(#[from] sqlx::Error),

    /// Caller deadline passed before the storage transaction committed
    #[error("Deadline exceeded after {0:?}")]
    DeadlineExceeded(std::time::Duration),

    /// Schema migration failed at startup
    #[error("Migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Connection supervisor gave up
    #[error("Storage unreachable after {attempts} attempts: {last_error}")]
    StorageUnreachable { attempts: u32, last_error: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl LedgerError {
    /// Taxonomy kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            LedgerError::AccountNotFound(_) => ErrorKind::AccountNotFound,
            LedgerError::DuplicateTransaction(_) => ErrorKind::DuplicateTransaction,
            LedgerError::InsufficientBalance { .. } => ErrorKind::InsufficientBalance,
            LedgerError::StorageUnavailable(_)
            | LedgerError::DeadlineExceeded(_)
            | LedgerError::Migration(_) => ErrorKind::StorageUnavailable,
            LedgerError::StorageUnreachable { .. } => ErrorKind::StorageUnreachable,
            LedgerError::Config(_) => ErrorKind::Config,
        }
    }

    /// True for errors caused by the request itself rather than the server
    pub fn is_client_fault(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::InvalidArgument
                | ErrorKind::AccountNotFound
                | ErrorKind::DuplicateTransaction
                | ErrorKind::InsufficientBalance
        )
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        LedgerError::InvalidArgument(msg.into())
    }
}

impl From<config::ConfigError> for LedgerError {
    fn from(err: config::ConfigError) -> Self {
        LedgerError::Config(err.to_string())
    }
}

impl ResponseError for LedgerError {
    fn error_response(&self) -> HttpResponse {
        let status_code = self.status_code();

        // Storage internals stay in the logs
        let message = if self.is_client_fault() {
            self.to_string()
        } else {
            "storage temporarily unavailable".to_string()
        };

        HttpResponse::build(status_code).json(json!({
            "error": {
                "code": status_code.as_u16(),
                "type": self.kind().as_str(),
                "message": message
            }
        }))
    }

    fn status_code(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::InvalidArgument => StatusCode::BAD_REQUEST,
            ErrorKind::AccountNotFound => StatusCode::NOT_FOUND,
            ErrorKind::DuplicateTransaction => StatusCode::CONFLICT,
            ErrorKind::InsufficientBalance => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::StorageUnavailable | ErrorKind::StorageUnreachable => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ErrorKind::Config => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
