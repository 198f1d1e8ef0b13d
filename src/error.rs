//! Gateway error types — JSON-RPC error codes plus machine-readable kinds.
//!
//! Every error the RPC surface can produce maps to one of the five JSON-RPC
//! codes; validation and internal errors additionally carry an [`ErrorKind`]
//! that is surfaced to clients as `error.data.kind`.

use serde::{Deserialize, Serialize};

use crate::runtime::RuntimeError;

// ---------------------------------------------------------------------------
// JSON-RPC 2.0 error codes
// ---------------------------------------------------------------------------

/// Invalid JSON was received by the server.
pub const PARSE_ERROR: i64 = -32700;

/// The JSON sent is not a valid Request object.
pub const INVALID_REQUEST: i64 = -32600;

/// The method does not exist / is not available.
pub const METHOD_NOT_FOUND: i64 = -32601;

/// Invalid method parameter(s).
pub const INVALID_PARAMS: i64 = -32602;

/// Internal JSON-RPC error.
pub const INTERNAL_ERROR: i64 = -32603;

// ---------------------------------------------------------------------------
// Machine-readable error kinds
// ---------------------------------------------------------------------------

/// Machine-readable discriminator carried in `error.data.kind`.
///
/// Validation errors (`-32602`) use the first five; internal errors
/// (`-32603`) use the last two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The addressed agent is not routable.
    AgentNotFound,
    /// No record of the task in the cache or the workflow runtime.
    TaskNotFound,
    /// `message/stream` against an agent without the streaming capability.
    StreamingUnsupported,
    /// A required parameter is absent or empty.
    MissingField,
    /// A parameter is present but has the wrong type or an inconsistent value.
    BadFieldType,
    /// The workflow runtime or registry stayed unreachable through retries.
    DownstreamUnavailable,
    /// The workflow runtime rejected the start (e.g. duplicate workflow id).
    WorkflowRejected,
}

// ---------------------------------------------------------------------------
// GatewayError
// ---------------------------------------------------------------------------

/// Unified error type for the gateway's RPC surface.
///
/// Each variant carries the human-readable message; validation and internal
/// variants also carry the machine kind that lands in `error.data.kind`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    /// Malformed JSON payload (code -32700).
    #[error("Parse error: {message}")]
    Parse {
        /// Human-readable error message.
        message: String,
    },

    /// Invalid request envelope (code -32600).
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// Human-readable error message.
        message: String,
    },

    /// Method not found (code -32601).
    #[error("Method not found: {message}")]
    MethodNotFound {
        /// Human-readable error message.
        message: String,
    },

    /// Invalid parameters (code -32602).
    #[error("Invalid params: {message}")]
    InvalidParams {
        /// Human-readable error message.
        message: String,
        /// Machine-readable discriminator.
        kind: ErrorKind,
    },

    /// Internal error (code -32603).
    #[error("Internal error: {message}")]
    Internal {
        /// Human-readable error message.
        message: String,
        /// Machine-readable discriminator, when one applies.
        kind: Option<ErrorKind>,
    },
}

/// Convenience result type for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

impl GatewayError {
    /// Create a `Parse` error.
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }

    /// Create an `InvalidRequest` error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Create a `MethodNotFound` error.
    pub fn method_not_found(message: impl Into<String>) -> Self {
        Self::MethodNotFound {
            message: message.into(),
        }
    }

    /// `-32602` with `data.kind = "agent_not_found"`.
    pub fn agent_not_found(agent_id: &str) -> Self {
        Self::InvalidParams {
            message: format!("unknown agent '{}'", agent_id),
            kind: ErrorKind::AgentNotFound,
        }
    }

    /// `-32602` with `data.kind = "task_not_found"`.
    pub fn task_not_found(task_id: &str) -> Self {
        Self::InvalidParams {
            message: format!("unknown task '{}'", task_id),
            kind: ErrorKind::TaskNotFound,
        }
    }

    /// `-32602` with `data.kind = "streaming_unsupported"`.
    pub fn streaming_unsupported(agent_id: &str) -> Self {
        Self::InvalidParams {
            message: format!("agent '{}' does not support streaming", agent_id),
            kind: ErrorKind::StreamingUnsupported,
        }
    }

    /// `-32602` with `data.kind = "missing_field"`.
    pub fn missing_field(field: &str) -> Self {
        Self::InvalidParams {
            message: format!("missing or empty field '{}'", field),
            kind: ErrorKind::MissingField,
        }
    }

    /// `-32602` with `data.kind = "bad_field_type"`.
    pub fn bad_field_type(message: impl Into<String>) -> Self {
        Self::InvalidParams {
            message: message.into(),
            kind: ErrorKind::BadFieldType,
        }
    }

    /// `-32603` with `data.kind = "downstream_unavailable"`.
    pub fn downstream_unavailable(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            kind: Some(ErrorKind::DownstreamUnavailable),
        }
    }

    /// `-32603` with `data.kind = "workflow_rejected"`.
    pub fn workflow_rejected(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            kind: Some(ErrorKind::WorkflowRejected),
        }
    }

    /// `-32603` without a machine kind.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            kind: None,
        }
    }

    /// The JSON-RPC error code for this variant.
    pub fn code(&self) -> i64 {
        match self {
            GatewayError::Parse { .. } => PARSE_ERROR,
            GatewayError::InvalidRequest { .. } => INVALID_REQUEST,
            GatewayError::MethodNotFound { .. } => METHOD_NOT_FOUND,
            GatewayError::InvalidParams { .. } => INVALID_PARAMS,
            GatewayError::Internal { .. } => INTERNAL_ERROR,
        }
    }

    /// The machine-readable kind, when this variant carries one.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            GatewayError::InvalidParams { kind, .. } => Some(*kind),
            GatewayError::Internal { kind, .. } => *kind,
            _ => None,
        }
    }

    /// The `data` payload for the JSON-RPC error object.
    pub fn data(&self) -> Option<serde_json::Value> {
        self.kind()
            .map(|kind| serde_json::json!({ "kind": kind }))
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::parse(err.to_string())
    }
}

impl From<RuntimeError> for GatewayError {
    fn from(err: RuntimeError) -> Self {
        match err {
            RuntimeError::NotFound(id) => GatewayError::task_not_found(&id),
            RuntimeError::AlreadyStarted(id) => {
                GatewayError::workflow_rejected(format!("workflow '{}' already exists", id))
            }
            RuntimeError::UnknownQuery(name) => {
                GatewayError::internal(format!("query '{}' not registered", name))
            }
            RuntimeError::Unavailable(message) => GatewayError::downstream_unavailable(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_match_jsonrpc_spec() {
        assert_eq!(PARSE_ERROR, -32700);
        assert_eq!(INVALID_REQUEST, -32600);
        assert_eq!(METHOD_NOT_FOUND, -32601);
        assert_eq!(INVALID_PARAMS, -32602);
        assert_eq!(INTERNAL_ERROR, -32603);
    }

    #[test]
    fn kinds_serialize_snake_case() {
        let data = GatewayError::agent_not_found("nope").data().unwrap();
        assert_eq!(data["kind"], "agent_not_found");

        let data = GatewayError::streaming_unsupported("echo").data().unwrap();
        assert_eq!(data["kind"], "streaming_unsupported");

        let data = GatewayError::downstream_unavailable("timeout").data().unwrap();
        assert_eq!(data["kind"], "downstream_unavailable");
    }

    #[test]
    fn validation_errors_use_invalid_params_code() {
        assert_eq!(GatewayError::task_not_found("t1").code(), INVALID_PARAMS);
        assert_eq!(GatewayError::missing_field("message").code(), INVALID_PARAMS);
        assert_eq!(
            GatewayError::bad_field_type("contextId must be a string").code(),
            INVALID_PARAMS
        );
    }

    #[test]
    fn runtime_errors_map_to_gateway_kinds() {
        let err: GatewayError = RuntimeError::AlreadyStarted("t1".into()).into();
        assert_eq!(err.code(), INTERNAL_ERROR);
        assert_eq!(err.kind(), Some(ErrorKind::WorkflowRejected));

        let err: GatewayError = RuntimeError::Unavailable("connect refused".into()).into();
        assert_eq!(err.kind(), Some(ErrorKind::DownstreamUnavailable));

        let err: GatewayError = RuntimeError::NotFound("t1".into()).into();
        assert_eq!(err.code(), INVALID_PARAMS);
        assert_eq!(err.kind(), Some(ErrorKind::TaskNotFound));
    }

    #[test]
    fn plain_internal_has_no_data() {
        assert!(GatewayError::internal("boom").data().is_none());
    }
}
