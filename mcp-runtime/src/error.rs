use evo_core::error::{ErrorBody, ErrorKind};
use serde_json::{Value, json};

use crate::config::ConfigError;
use crate::platform::{PlatformError, RemoteCategory};
use crate::registry::RegistryError;
use crate::session::AuthError;

/// JSON-RPC protocol level error (malformed requests, unknown methods).
#[derive(Debug)]
pub(crate) struct RpcError {
    pub(crate) code: i64,
    pub(crate) message: String,
    pub(crate) data: Option<Value>,
}

impl RpcError {
    pub(crate) fn parse_error(message: impl Into<String>) -> Self {
        Self {
            code: -32700,
            message: message.into(),
            data: None,
        }
    }

    pub(crate) fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            code: -32600,
            message: message.into(),
            data: None,
        }
    }

    pub(crate) fn method_not_found(method: &str) -> Self {
        Self {
            code: -32601,
            message: format!("Method not found: {method}"),
            data: None,
        }
    }

    pub(crate) fn invalid_params(message: impl Into<String>) -> Self {
        Self {
            code: -32602,
            message: message.into(),
            data: None,
        }
    }
}

/// Failure of a single tool invocation, surfaced to the client as a
/// structured [`ErrorBody`].
#[derive(Debug, Clone, PartialEq)]
pub struct ToolError {
    pub kind: ErrorKind,
    pub message: String,
    pub field: Option<String>,
    pub docs_hint: Option<String>,
    pub details: Option<Value>,
}

impl ToolError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            field: None,
            docs_hint: None,
            details: None,
        }
    }

    pub fn invalid_arguments(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArguments, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn unknown_tool(name: &str) -> Self {
        Self::new(ErrorKind::UnknownTool, format!("Unknown tool: {name}"))
            .with_docs_hint("Call tools/list to see the tools available under the active filter.")
    }

    pub fn cancelled(possibly_partially_applied: bool) -> Self {
        Self::new(ErrorKind::Cancelled, "Tool call was cancelled by the client").with_details(
            json!({ "possibly_partially_applied": possibly_partially_applied }),
        )
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn with_docs_hint(mut self, docs_hint: impl Into<String>) -> Self {
        self.docs_hint = Some(docs_hint.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            kind: self.kind,
            message: self.message.clone(),
            retryable: self.kind.is_retryable(),
            field: self.field.clone(),
            docs_hint: self.docs_hint.clone(),
            details: self.details.clone(),
        }
    }

    /// Envelope placed in `structuredContent` of an error result.
    pub fn to_value(&self) -> Value {
        json!({ "error": self.to_body() })
    }
}

impl From<AuthError> for ToolError {
    fn from(err: AuthError) -> Self {
        if let AuthError::Transport(_) = err {
            return ToolError::new(ErrorKind::RemoteTransient, err.to_string()).with_docs_hint(
                "The identity provider could not be reached; cached credentials were kept and the call may be retried.",
            );
        }
        let hint = match &err {
            AuthError::TokenExpired => {
                "The explicit access token has expired. Restart with a fresh EVO_ACCESS_TOKEN or sign in with `evo-mcp login`."
            }
            _ => "Sign in again with `evo-mcp login`, then retry the call.",
        };
        ToolError::new(ErrorKind::AuthError, err.to_string()).with_docs_hint(hint)
    }
}

impl From<PlatformError> for ToolError {
    fn from(err: PlatformError) -> Self {
        match &err {
            PlatformError::NoInstance => ToolError::invalid_arguments(err.to_string())
                .with_docs_hint("Call list_my_instances and select_instance first."),
            PlatformError::Remote {
                category, status, ..
            } => {
                let kind = match category {
                    RemoteCategory::Transient => ErrorKind::RemoteTransient,
                    RemoteCategory::Unauthorized => ErrorKind::AuthError,
                    _ => ErrorKind::RemotePermanent,
                };
                let mut tool_err = ToolError::new(kind, err.to_string())
                    .with_details(json!({ "category": category, "status": status }));
                if *category == RemoteCategory::Transient {
                    tool_err = tool_err.with_docs_hint(
                        "The Evo platform could not be reached or is overloaded; the call may be retried.",
                    );
                }
                tool_err
            }
        }
    }
}

impl From<ConfigError> for ToolError {
    fn from(err: ConfigError) -> Self {
        ToolError::new(ErrorKind::ConfigError, err.to_string())
    }
}

impl From<RegistryError> for ToolError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::UnknownTool(name) => ToolError::unknown_tool(&name),
            other => ToolError::internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_platform_errors_are_retryable() {
        let err: ToolError = PlatformError::Remote {
            category: RemoteCategory::Transient,
            status: Some(503),
            operation: "list_workspaces".into(),
            message: "service unavailable".into(),
        }
        .into();
        let body = err.to_body();
        assert_eq!(body.kind, ErrorKind::RemoteTransient);
        assert!(body.retryable);
        assert_eq!(body.details.unwrap()["category"], "transient");
    }

    #[test]
    fn conflict_maps_to_permanent_remote_error() {
        let err: ToolError = PlatformError::Remote {
            category: RemoteCategory::Conflict,
            status: Some(409),
            operation: "create_object".into(),
            message: "path exists".into(),
        }
        .into();
        assert_eq!(err.kind, ErrorKind::RemotePermanent);
        assert!(!err.to_body().retryable);
    }

    #[test]
    fn unreachable_identity_provider_is_retryable() {
        let err: ToolError = AuthError::Transport("connection reset".into()).into();
        assert_eq!(err.kind, ErrorKind::RemoteTransient);
        assert!(err.to_body().retryable);

        let err: ToolError = AuthError::RefreshRejected("invalid_grant".into()).into();
        assert_eq!(err.kind, ErrorKind::AuthError);
        assert!(!err.to_body().retryable);
    }

    #[test]
    fn error_envelope_nests_body_under_error_key() {
        let value = ToolError::invalid_arguments("limit must be positive")
            .with_field("limit")
            .to_value();
        assert_eq!(value["error"]["kind"], "invalid_arguments");
        assert_eq!(value["error"]["field"], "limit");
    }
}
