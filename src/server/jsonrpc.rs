//! JSON-RPC 2.0 framing — envelope parsing, parameter validation, and
//! response encoding.
//!
//! Framing is pure functions over bytes and `serde_json::Value`s so the
//! axum layer stays a thin shell and the error paths are unit-testable:
//! malformed JSON yields `-32700`, a broken envelope `-32600`, bad
//! parameters `-32602` with a machine kind, unknown methods `-32601`.

use serde::Serialize;
use serde_json::Value;

use crate::error::{GatewayError, GatewayResult};
use crate::registry::DiscoverParams;
use crate::types::Message;

/// A validated JSON-RPC request envelope.
#[derive(Debug, Clone)]
pub struct JsonRpcRequest {
    /// Request id, echoed verbatim on the response. String or number.
    pub id: Value,

    /// Method name.
    pub method: String,

    /// Raw params value; `Null` when absent.
    pub params: Value,
}

/// Envelope parse failure, carrying the best-effort request id so error
/// responses can still echo it.
#[derive(Debug)]
pub struct FrameError {
    /// The protocol error to surface.
    pub error: GatewayError,

    /// The request id when one was recoverable; `Null` otherwise.
    pub id: Value,
}

/// Parse and validate a JSON-RPC request envelope.
///
/// Enforces `jsonrpc == "2.0"`, a string `method`, and a string-or-number
/// `id` (this protocol has no notifications, so `id` is mandatory).
pub fn parse_request(body: &[u8]) -> Result<JsonRpcRequest, FrameError> {
    let value: Value = serde_json::from_slice(body).map_err(|e| FrameError {
        error: GatewayError::parse(format!("invalid JSON: {e}")),
        id: Value::Null,
    })?;

    let Some(object) = value.as_object() else {
        return Err(FrameError {
            error: GatewayError::invalid_request("request must be a JSON object"),
            id: Value::Null,
        });
    };

    // Best-effort id for error responses; validated for real below.
    let id = object.get("id").cloned().unwrap_or(Value::Null);
    let echo_id = if id.is_string() || id.is_number() {
        id.clone()
    } else {
        Value::Null
    };

    match object.get("jsonrpc").and_then(Value::as_str) {
        Some("2.0") => {}
        Some(other) => {
            return Err(FrameError {
                error: GatewayError::invalid_request(format!(
                    "jsonrpc must be \"2.0\", got \"{other}\""
                )),
                id: echo_id,
            })
        }
        None => {
            return Err(FrameError {
                error: GatewayError::invalid_request("missing 'jsonrpc' field"),
                id: echo_id,
            })
        }
    }

    let method = match object.get("method").and_then(Value::as_str) {
        Some(method) if !method.is_empty() => method.to_string(),
        _ => {
            return Err(FrameError {
                error: GatewayError::invalid_request("missing 'method' field"),
                id: echo_id,
            })
        }
    };

    if !(id.is_string() || id.is_number()) {
        return Err(FrameError {
            error: GatewayError::invalid_request(
                "missing 'id' field — notifications are not supported",
            ),
            id: Value::Null,
        });
    }

    Ok(JsonRpcRequest {
        id,
        method,
        params: object.get("params").cloned().unwrap_or(Value::Null),
    })
}

// ---------------------------------------------------------------------------
// Response envelope
// ---------------------------------------------------------------------------

/// JSON-RPC error object.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcError {
    /// Error code.
    pub code: i64,

    /// Human-readable message.
    pub message: String,

    /// Machine-readable payload (`{"kind": …}`), when one applies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl From<&GatewayError> for JsonRpcError {
    fn from(err: &GatewayError) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
            data: err.data(),
        }
    }
}

/// JSON-RPC response envelope.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponse {
    /// Always "2.0".
    pub jsonrpc: &'static str,

    /// Mirrors the request id.
    pub id: Value,

    /// Result payload on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Error object on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Build a success response.
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Build an error response from a gateway error.
    pub fn failure(id: Value, err: &GatewayError) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(err.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Parameter parsing
// ---------------------------------------------------------------------------

/// Parsed params of `message/send` and `message/stream`.
#[derive(Debug, Clone)]
pub struct SendParams {
    /// The message to dispatch.
    pub message: Message,

    /// Request metadata, forwarded to the task workflow.
    pub metadata: Option<Value>,
}

/// Parse `message/send` / `message/stream` params.
pub fn parse_send_params(params: &Value) -> GatewayResult<SendParams> {
    let object = params_object(params)?;

    let message_value = object
        .get("message")
        .filter(|v| !v.is_null())
        .ok_or_else(|| GatewayError::missing_field("message"))?;

    let parts_present = message_value
        .get("parts")
        .and_then(Value::as_array)
        .map(|parts| !parts.is_empty())
        .unwrap_or(false);
    if !parts_present {
        return Err(GatewayError::missing_field("message.parts"));
    }

    let message: Message = serde_json::from_value(message_value.clone())
        .map_err(|e| GatewayError::bad_field_type(format!("invalid message: {e}")))?;

    let metadata = object
        .get("metadata")
        .filter(|v| !v.is_null())
        .cloned();

    Ok(SendParams { message, metadata })
}

/// Parse `tasks/get` / `tasks/cancel` params: a `taskId` string.
pub fn parse_task_id_params(params: &Value) -> GatewayResult<String> {
    let object = params_object(params)?;
    match object.get("taskId") {
        None | Some(Value::Null) => Err(GatewayError::missing_field("taskId")),
        Some(Value::String(id)) if !id.is_empty() => Ok(id.clone()),
        Some(Value::String(_)) => Err(GatewayError::missing_field("taskId")),
        Some(_) => Err(GatewayError::bad_field_type("taskId must be a string")),
    }
}

/// Parse `x-a2a.discoverAgents` params.
pub fn parse_discover_params(params: &Value) -> GatewayResult<DiscoverParams> {
    if params.is_null() {
        return Ok(DiscoverParams::default());
    }
    let object = params_object(params)?;

    let string_field = |name: &str| -> GatewayResult<Option<String>> {
        match object.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(_) => Err(GatewayError::bad_field_type(format!(
                "{name} must be a string"
            ))),
        }
    };

    let limit = match object.get("limit") {
        None | Some(Value::Null) => None,
        Some(value) => Some(value.as_u64().and_then(|n| u32::try_from(n).ok()).ok_or_else(
            || GatewayError::bad_field_type("limit must be a non-negative integer"),
        )?),
    };

    let min_score = match object.get("min_score") {
        None | Some(Value::Null) => None,
        Some(value) => Some(
            value
                .as_f64()
                .ok_or_else(|| GatewayError::bad_field_type("min_score must be a number"))?,
        ),
    };

    Ok(DiscoverParams {
        capability: string_field("capability")?,
        keyword: string_field("keyword")?,
        limit,
        min_score,
    })
}

/// The `agentId` param, when present. Used by the legacy endpoint and for
/// path/params consistency checks.
pub fn agent_id_param(params: &Value) -> GatewayResult<Option<String>> {
    match params.get("agentId") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(id)) if !id.is_empty() => Ok(Some(id.clone())),
        Some(Value::String(_)) => Err(GatewayError::missing_field("agentId")),
        Some(_) => Err(GatewayError::bad_field_type("agentId must be a string")),
    }
}

fn params_object(params: &Value) -> GatewayResult<&serde_json::Map<String, Value>> {
    if params.is_null() {
        return Err(GatewayError::missing_field("params"));
    }
    params
        .as_object()
        .ok_or_else(|| GatewayError::bad_field_type("params must be an object"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, INVALID_REQUEST, PARSE_ERROR};

    #[test]
    fn malformed_json_is_parse_error() {
        let err = parse_request(b"{not json").unwrap_err();
        assert_eq!(err.error.code(), PARSE_ERROR);
        assert_eq!(err.id, Value::Null);
    }

    #[test]
    fn wrong_version_is_invalid_request() {
        let body = serde_json::json!({"jsonrpc": "1.0", "id": 1, "method": "tasks/get"});
        let err = parse_request(body.to_string().as_bytes()).unwrap_err();
        assert_eq!(err.error.code(), INVALID_REQUEST);
        // The id is still recoverable for the error response.
        assert_eq!(err.id, serde_json::json!(1));
    }

    #[test]
    fn missing_id_is_invalid_request() {
        let body = serde_json::json!({"jsonrpc": "2.0", "method": "tasks/get"});
        let err = parse_request(body.to_string().as_bytes()).unwrap_err();
        assert_eq!(err.error.code(), INVALID_REQUEST);
    }

    #[test]
    fn null_id_is_invalid_request() {
        let body = serde_json::json!({"jsonrpc": "2.0", "id": null, "method": "tasks/get"});
        let err = parse_request(body.to_string().as_bytes()).unwrap_err();
        assert_eq!(err.error.code(), INVALID_REQUEST);
    }

    #[test]
    fn string_and_number_ids_accepted() {
        for id in [serde_json::json!("abc"), serde_json::json!(7)] {
            let body = serde_json::json!({
                "jsonrpc": "2.0", "id": id, "method": "message/send", "params": {}
            });
            let request = parse_request(body.to_string().as_bytes()).unwrap();
            assert_eq!(request.id, id);
            assert_eq!(request.method, "message/send");
        }
    }

    #[test]
    fn send_params_require_message_parts() {
        let err = parse_send_params(&serde_json::json!({})).unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::MissingField));

        let err = parse_send_params(&serde_json::json!({"message": {"parts": []}})).unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::MissingField));

        let ok = parse_send_params(&serde_json::json!({
            "message": {"parts": [{"kind": "text", "text": "hi"}]}
        }))
        .unwrap();
        assert_eq!(ok.message.text_content(" "), "hi");
        assert!(ok.metadata.is_none());
    }

    #[test]
    fn send_params_reject_unknown_part_kind() {
        let err = parse_send_params(&serde_json::json!({
            "message": {"parts": [{"kind": "hologram", "data": {}}]}
        }))
        .unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::BadFieldType));
    }

    #[test]
    fn task_id_params_validated() {
        assert_eq!(
            parse_task_id_params(&serde_json::json!({"taskId": "t-1"})).unwrap(),
            "t-1"
        );
        let err = parse_task_id_params(&serde_json::json!({})).unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::MissingField));
        let err = parse_task_id_params(&serde_json::json!({"taskId": 9})).unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::BadFieldType));
    }

    #[test]
    fn discover_params_parse_and_validate() {
        let params = parse_discover_params(&serde_json::json!({
            "capability": "streaming", "limit": 5, "min_score": 0.4
        }))
        .unwrap();
        assert_eq!(params.capability.as_deref(), Some("streaming"));
        assert_eq!(params.limit, Some(5));
        assert_eq!(params.min_score, Some(0.4));

        assert!(parse_discover_params(&Value::Null).is_ok());
        let err = parse_discover_params(&serde_json::json!({"limit": "many"})).unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::BadFieldType));
    }

    #[test]
    fn response_skips_absent_fields() {
        let success = JsonRpcResponse::success(serde_json::json!(1), serde_json::json!({"ok": true}));
        let json = serde_json::to_value(&success).unwrap();
        assert!(json.get("error").is_none());
        assert_eq!(json["jsonrpc"], "2.0");

        let failure =
            JsonRpcResponse::failure(serde_json::json!(1), &GatewayError::task_not_found("t"));
        let json = serde_json::to_value(&failure).unwrap();
        assert!(json.get("result").is_none());
        assert_eq!(json["error"]["code"], -32602);
        assert_eq!(json["error"]["data"]["kind"], "task_not_found");
    }
}
