use thiserror::Error;
use std::fmt;
use reqwest::StatusCode;

use autopilot_types::{TaskId, TaskStatus};

mod utils;
pub use utils::*;

#[derive(Error, Debug)]
pub enum AutopilotError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Malformed condition or action. The trigger is never persisted.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Bad payload signature or unusable permit. No state changes.
    #[error("Authorization error: {kind} - {message}")]
    Authorization {
        kind: AuthErrorKind,
        message: String,
    },

    /// Position, price or gas read failed. The task is retried next cycle.
    #[error("Transient read error: {source_name} - {message}")]
    TransientRead {
        source_name: String,
        message: String,
    },

    /// A chain call reverted or timed out. Retried up to the attempt budget.
    #[error("Execution failure: {kind} - {message}")]
    Execution {
        kind: ExecutionErrorKind,
        message: String,
    },

    /// The task can never succeed. Moves straight to INVALID.
    #[error("Unrecoverable error: {0}")]
    Unrecoverable(String),

    #[error("Task {owner_addr}/{chain_id}/{task_id} not found")]
    TaskNotFound {
        owner_addr: String,
        chain_id: u64,
        task_id: TaskId,
    },

    #[error("Stale transition: expected {expected}, found {actual}")]
    StaleTransition {
        expected: TaskStatus,
        actual: TaskStatus,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {status} - {message}")]
    HttpError {
        status: StatusCode,
        message: String,
    },

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Timeout error: {0}")]
    Timeout(String),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum AuthErrorKind {
    InvalidSignature,
    PermitExpired,
    PermitRejected,
    MissingPermit,
    NotPositionOwner,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionErrorKind {
    Reverted,
    Timeout,
    RpcError,
}

impl fmt::Display for AuthErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSignature => write!(f, "Invalid signature"),
            Self::PermitExpired => write!(f, "Permit expired"),
            Self::PermitRejected => write!(f, "Permit rejected"),
            Self::MissingPermit => write!(f, "Permit required"),
            Self::NotPositionOwner => write!(f, "Not the position owner"),
        }
    }
}

impl fmt::Display for ExecutionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reverted => write!(f, "Transaction reverted"),
            Self::Timeout => write!(f, "Transaction timeout"),
            Self::RpcError => write!(f, "RPC error"),
        }
    }
}

pub type Result<T> = std::result::Result<T, AutopilotError>;

impl AutopilotError {
    pub fn validation(message: impl Into<String>) -> Self {
        AutopilotError::Validation(message.into())
    }

    pub fn authorization(kind: AuthErrorKind, message: impl Into<String>) -> Self {
        AutopilotError::Authorization {
            kind,
            message: message.into(),
        }
    }

    pub fn transient(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        AutopilotError::TransientRead {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    pub fn execution(kind: ExecutionErrorKind, message: impl Into<String>) -> Self {
        AutopilotError::Execution {
            kind,
            message: message.into(),
        }
    }

    pub fn unrecoverable(message: impl Into<String>) -> Self {
        AutopilotError::Unrecoverable(message.into())
    }

    /// Errors that leave the task in the pool for another cycle.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AutopilotError::TransientRead { .. }
                | AutopilotError::Timeout(_)
                | AutopilotError::NetworkError(_)
                | AutopilotError::Execution { .. }
        ) || matches!(self, AutopilotError::HttpError { status, .. } if status.is_server_error())
    }

    /// Errors surfaced to the caller of create/delete rather than kept internal.
    pub fn is_caller_facing(&self) -> bool {
        matches!(
            self,
            AutopilotError::Validation(_)
                | AutopilotError::Authorization { .. }
                | AutopilotError::TaskNotFound { .. }
        )
    }
}

impl From<reqwest::Error> for AutopilotError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            AutopilotError::HttpError {
                status,
                message: err.to_string(),
            }
        } else {
            AutopilotError::NetworkError(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_constructors() {
        let err = AutopilotError::validation("gte and lte both set");
        assert!(matches!(err, AutopilotError::Validation(_)));
        assert!(err.is_caller_facing());

        let err = AutopilotError::authorization(AuthErrorKind::InvalidSignature, "bad sig");
        assert!(matches!(err, AutopilotError::Authorization { .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_retryable_errors() {
        let err = AutopilotError::transient("price_history", "503");
        assert!(err.is_retryable());

        let err = AutopilotError::execution(ExecutionErrorKind::Reverted, "STF");
        assert!(err.is_retryable());

        let err = AutopilotError::HttpError {
            status: StatusCode::BAD_GATEWAY,
            message: "upstream".to_string(),
        };
        assert!(err.is_retryable());

        let err = AutopilotError::unrecoverable("position burned");
        assert!(!err.is_retryable());
        assert!(!err.is_caller_facing());
    }
}
