use std::fmt;

use serde::{Deserialize, Serialize};

/// Error codes used across the tool surface
pub mod codes {
    pub const AUTH_ERROR: &str = "auth_error";
    pub const CONFIG_ERROR: &str = "config_error";
    pub const UNKNOWN_TOOL: &str = "unknown_tool";
    pub const INVALID_ARGUMENTS: &str = "invalid_arguments";
    pub const VALIDATION_ERROR: &str = "validation_error";
    pub const REMOTE_TRANSIENT: &str = "remote_transient";
    pub const REMOTE_PERMANENT: &str = "remote_permanent";
    pub const CANCELLED: &str = "cancelled";
    pub const INTERNAL: &str = "internal";
}

/// Closed set of error kinds a client can branch on.
///
/// Only `RemoteTransient` is retryable; everything else is terminal for the
/// call that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    AuthError,
    ConfigError,
    UnknownTool,
    InvalidArguments,
    ValidationError,
    RemoteTransient,
    RemotePermanent,
    Cancelled,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::AuthError => codes::AUTH_ERROR,
            ErrorKind::ConfigError => codes::CONFIG_ERROR,
            ErrorKind::UnknownTool => codes::UNKNOWN_TOOL,
            ErrorKind::InvalidArguments => codes::INVALID_ARGUMENTS,
            ErrorKind::ValidationError => codes::VALIDATION_ERROR,
            ErrorKind::RemoteTransient => codes::REMOTE_TRANSIENT,
            ErrorKind::RemotePermanent => codes::REMOTE_PERMANENT,
            ErrorKind::Cancelled => codes::CANCELLED,
            ErrorKind::Internal => codes::INTERNAL,
        }
    }

    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::RemoteTransient)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured error body returned to the client.
/// Every error carries enough information for an agent to decide whether to
/// retry, fix its arguments, or ask the user to sign in again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable error kind
    pub kind: ErrorKind,
    /// Human/agent-readable description of what went wrong
    pub message: String,
    /// Whether repeating the same call may succeed
    pub retryable: bool,
    /// Which argument or field caused the error (if applicable)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// Hint about how to recover
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docs_hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorBody {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable: kind.is_retryable(),
            field: None,
            docs_hint: None,
            details: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_remote_errors_are_retryable() {
        assert!(ErrorKind::RemoteTransient.is_retryable());
        assert!(!ErrorKind::RemotePermanent.is_retryable());
        assert!(!ErrorKind::AuthError.is_retryable());
        assert!(!ErrorKind::Cancelled.is_retryable());
    }

    #[test]
    fn error_body_serializes_kind_as_snake_case() {
        let body = ErrorBody::new(ErrorKind::InvalidArguments, "bad limit");
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["kind"], "invalid_arguments");
        assert_eq!(value["retryable"], false);
        assert!(value.get("field").is_none());
        assert_eq!(ErrorKind::InvalidArguments.as_str(), codes::INVALID_ARGUMENTS);
    }
}
