//! Error types and handling for the CBS refresh scheduler

use std::fmt;
use thiserror::Error;

/// Result type alias for refresh scheduler operations
pub type Result<T> = std::result::Result<T, RefreshError>;

/// Condition code reported by the peer when a token negotiation fails
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolCondition {
    /// The link or session no longer exists on the server
    NotFound,
    /// The presented token was not accepted
    UnauthorizedAccess,
    /// The server is throttling or out of capacity
    ResourceLimitExceeded,
    /// Server-side failure
    InternalError,
    /// Any condition this crate has no special handling for
    Other(String),
}

impl ProtocolCondition {
    /// Parse a symbolic condition code such as `amqp:not-found`
    pub fn from_code(code: &str) -> Self {
        match code {
            "amqp:not-found" => Self::NotFound,
            "amqp:unauthorized-access" => Self::UnauthorizedAccess,
            "amqp:resource-limit-exceeded" => Self::ResourceLimitExceeded,
            "amqp:internal-error" => Self::InternalError,
            other => Self::Other(other.to_string()),
        }
    }

    /// Symbolic code for this condition
    pub fn code(&self) -> &str {
        match self {
            Self::NotFound => "amqp:not-found",
            Self::UnauthorizedAccess => "amqp:unauthorized-access",
            Self::ResourceLimitExceeded => "amqp:resource-limit-exceeded",
            Self::InternalError => "amqp:internal-error",
            Self::Other(code) => code,
        }
    }
}

impl fmt::Display for ProtocolCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Main error type for the refresh scheduler
#[derive(Error, Debug)]
pub enum RefreshError {
    /// Gate acquisition or negotiation exceeded its time budget
    #[error("Timeout: {message}")]
    Timeout { message: String },

    /// The server granted a token that has already expired
    #[error("Credential rejected: {message}")]
    CredentialRejected { message: String },

    /// Token negotiation failed at the protocol level
    #[error("Protocol error ({condition}): {message}")]
    Protocol {
        condition: ProtocolCondition,
        message: String,
    },

    /// The operation observed cancellation
    #[error("Operation cancelled")]
    Cancelled,

    /// The scheduler has been disposed
    #[error("Refresh scheduler has been disposed")]
    Disposed,

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing errors
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Generic errors
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl RefreshError {
    /// Create a timeout error
    pub fn timeout<S: Into<String>>(message: S) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Create a credential rejected error
    pub fn credential_rejected<S: Into<String>>(message: S) -> Self {
        Self::CredentialRejected {
            message: message.into(),
        }
    }

    /// Create a protocol error with the given condition
    pub fn protocol<S: Into<String>>(condition: ProtocolCondition, message: S) -> Self {
        Self::Protocol {
            condition,
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// True when the peer reported that the link or session is gone
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            RefreshError::Protocol {
                condition: ProtocolCondition::NotFound,
                ..
            }
        )
    }

    /// Whether the background renewal loop should retry after this error.
    ///
    /// Protocol failures other than `not-found` are retried. Per-call
    /// timeouts are retried as well, a deliberate widening: a renewal that
    /// overran its buffer period is treated like a busy peer rather than a
    /// dead link. Everything else ends the loop.
    pub fn is_transient(&self) -> bool {
        match self {
            RefreshError::Protocol { condition, .. } => *condition != ProtocolCondition::NotFound,
            RefreshError::Timeout { .. } => true,
            _ => false,
        }
    }

    /// Get the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            RefreshError::Timeout { .. } => "timeout",
            RefreshError::CredentialRejected { .. } => "credential_rejected",
            RefreshError::Protocol {
                condition: ProtocolCondition::NotFound,
                ..
            } => "protocol_not_found",
            RefreshError::Protocol { .. } => "protocol",
            RefreshError::Cancelled => "cancelled",
            RefreshError::Disposed => "disposed",
            RefreshError::Config { .. } => "config",
            RefreshError::Io(_) => "io",
            RefreshError::Yaml(_) => "yaml",
            RefreshError::Internal(_) => "internal",
        }
    }
}

impl Clone for RefreshError {
    fn clone(&self) -> Self {
        match self {
            RefreshError::Timeout { message } => RefreshError::Timeout { message: message.clone() },
            RefreshError::CredentialRejected { message } => RefreshError::CredentialRejected {
                message: message.clone(),
            },
            RefreshError::Protocol { condition, message } => RefreshError::Protocol {
                condition: condition.clone(),
                message: message.clone(),
            },
            RefreshError::Cancelled => RefreshError::Cancelled,
            RefreshError::Disposed => RefreshError::Disposed,
            RefreshError::Config { message } => RefreshError::Config { message: message.clone() },

            // For non-cloneable types, convert to string representation
            RefreshError::Io(e) => RefreshError::Io(std::io::Error::new(e.kind(), e.to_string())),
            RefreshError::Yaml(e) => RefreshError::config(format!("YAML error: {}", e)),
            RefreshError::Internal(e) => RefreshError::Internal(anyhow::anyhow!(e.to_string())),
        }
    }
}
