//! HTTP routes — per-agent JSON-RPC dispatch, discovery surface, health,
//! and the deprecated legacy endpoint.
//!
//! Routes:
//! - `POST /{agent_id}` — all JSON-RPC methods for that agent
//! - `POST /a2a` — legacy path; requires `params.agentId`, answers with
//!   `Deprecation` and `Sunset` headers
//! - `GET /health` — liveness
//! - `GET /.well-known/agent.json` — gateway card
//! - `GET /{agent_id}/.well-known/agent.json` — per-agent card

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::header::{HeaderName, HeaderValue};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde_json::Value;
use tower_http::cors::CorsLayer;
use tracing::{debug, warn};

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::registry::RegistryClient;
use crate::routing::{AgentRoute, AgentRouter};
use crate::runtime::WorkflowRuntime;
use crate::types::{AgentCapabilities, AgentCard};

use super::jsonrpc::{self, FrameError, JsonRpcRequest, JsonRpcResponse};
use super::lifecycle::TaskLifecycle;
use super::streaming::{self, stream_workflow_id, StreamRegistry};

/// Shared state behind every route.
pub struct GatewayState {
    /// Loaded configuration.
    pub config: Arc<GatewayConfig>,

    /// Task lifecycle manager.
    pub lifecycle: Arc<TaskLifecycle>,

    /// Agent router.
    pub router: Arc<AgentRouter>,

    /// Registry client, when discovery is configured.
    pub registry: Option<RegistryClient>,

    /// Live stream registrations.
    pub stream_registry: Arc<StreamRegistry>,

    /// Workflow runtime handle (stream teardown needs it directly).
    pub runtime: Arc<dyn WorkflowRuntime>,
}

/// Build the gateway's axum router.
pub fn gateway_router(state: Arc<GatewayState>) -> Router {
    let body_limit = state.config.server.max_body_bytes;
    Router::new()
        .route("/health", get(handle_health))
        .route("/.well-known/agent.json", get(handle_gateway_card))
        .route("/a2a", post(handle_legacy_rpc))
        .route("/{agent_id}", post(handle_agent_rpc))
        .route("/{agent_id}/.well-known/agent.json", get(handle_agent_card))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Liveness endpoint.
async fn handle_health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "a2a-gateway",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Gateway-level agent card.
async fn handle_gateway_card(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let base_url = state.config.server.base_url();
    Json(AgentCard {
        name: "a2a-gateway".to_string(),
        description: "Gateway dispatching A2A messages onto durable agent workflows".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        url: base_url,
        capabilities: AgentCapabilities {
            streaming: true,
            push_notifications: Some(false),
        },
        skills: Vec::new(),
        default_input_modes: vec!["text/plain".to_string()],
        default_output_modes: vec!["text/plain".to_string()],
        security_schemes: None,
        protocol_version: Some("0.3.0".to_string()),
    })
}

/// Per-agent card, served for statically routed and registry-resolved
/// agents alike.
async fn handle_agent_card(
    State(state): State<Arc<GatewayState>>,
    Path(agent_id): Path<String>,
) -> Response {
    match state.router.resolve(&agent_id).await {
        Ok(route) => Json(card_for_route(&route, &state.config.server.base_url())).into_response(),
        Err(err) => {
            debug!(agent_id = %agent_id, error = %err, "Agent card lookup failed");
            (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({"error": {"kind": "agent_not_found", "agentId": agent_id}})),
            )
                .into_response()
        }
    }
}

/// Modern per-agent JSON-RPC endpoint.
async fn handle_agent_rpc(
    State(state): State<Arc<GatewayState>>,
    Path(agent_id): Path<String>,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let request = match read_request(&state, body) {
        Ok(request) => request,
        Err(frame) => return json_error(frame.id, &frame.error),
    };
    dispatch(&state, &agent_id, request).await
}

/// Legacy `/a2a` endpoint: the agent comes from `params.agentId`, and the
/// response carries deprecation headers during the sunset window.
async fn handle_legacy_rpc(
    State(state): State<Arc<GatewayState>>,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let sunset = state.config.server.legacy_sunset.clone();

    let mut response = match read_request(&state, body) {
        Err(frame) => json_error(frame.id, &frame.error),
        Ok(request) => match jsonrpc::agent_id_param(&request.params) {
            Ok(Some(agent_id)) => dispatch(&state, &agent_id, request).await,
            Ok(None) => json_error(
                request.id,
                &GatewayError::missing_field("agentId"),
            ),
            Err(err) => json_error(request.id, &err),
        },
    };

    let headers = response.headers_mut();
    headers.insert(
        HeaderName::from_static("deprecation"),
        HeaderValue::from_static("true"),
    );
    if let Ok(value) = HeaderValue::from_str(&sunset) {
        headers.insert(HeaderName::from_static("sunset"), value);
    }
    response
}

/// Enforce the body size cap and parse the envelope.
fn read_request(
    state: &GatewayState,
    body: Result<Bytes, BytesRejection>,
) -> Result<JsonRpcRequest, FrameError> {
    let body = body.map_err(|rejection| FrameError {
        error: GatewayError::invalid_request(format!("unreadable request body: {rejection}")),
        id: Value::Null,
    })?;

    if body.len() > state.config.server.max_body_bytes {
        return Err(FrameError {
            error: GatewayError::invalid_request(format!(
                "request body exceeds {} bytes",
                state.config.server.max_body_bytes
            )),
            id: Value::Null,
        });
    }

    jsonrpc::parse_request(&body)
}

/// Method dispatch for one agent-addressed request.
async fn dispatch(state: &Arc<GatewayState>, agent_id: &str, request: JsonRpcRequest) -> Response {
    // A params.agentId that contradicts the addressed agent is rejected
    // rather than silently preferring either.
    match jsonrpc::agent_id_param(&request.params) {
        Ok(Some(ref param_agent)) if param_agent.as_str() != agent_id => {
            return json_error(
                request.id,
                &GatewayError::bad_field_type(format!(
                    "params.agentId '{param_agent}' does not match addressed agent '{agent_id}'"
                )),
            );
        }
        Ok(_) => {}
        Err(err) => return json_error(request.id, &err),
    }

    debug!(agent_id = %agent_id, method = %request.method, "JSON-RPC request");

    // Streaming responses live past the request deadline by design; every
    // other method answers within it.
    if request.method == "message/stream" {
        return handle_message_stream(state, agent_id, request).await;
    }

    let deadline = state.config.server.request_timeout();
    let id = request.id.clone();
    let handled = tokio::time::timeout(deadline, async {
        match request.method.as_str() {
            "message/send" => handle_message_send(state, agent_id, request).await,
            "tasks/get" => handle_tasks_get(state, request).await,
            "tasks/cancel" => handle_tasks_cancel(state, request).await,
            "x-a2a.discoverAgents" => handle_discover_agents(state, request).await,
            method => {
                warn!(method = %method, "Unknown JSON-RPC method");
                json_error(
                    request.id,
                    &GatewayError::method_not_found(format!("unknown method '{method}'")),
                )
            }
        }
    })
    .await;

    match handled {
        Ok(response) => response,
        Err(_) => json_error(
            id,
            &GatewayError::downstream_unavailable("request deadline exceeded"),
        ),
    }
}

async fn handle_message_send(
    state: &Arc<GatewayState>,
    agent_id: &str,
    request: JsonRpcRequest,
) -> Response {
    let params = match jsonrpc::parse_send_params(&request.params) {
        Ok(params) => params,
        Err(err) => return json_error(request.id, &err),
    };

    match state
        .lifecycle
        .submit(agent_id, params.message, params.metadata)
        .await
    {
        Ok(task) => json_result(request.id, &task),
        Err(err) => json_error(request.id, &err),
    }
}

/// `message/stream`: validates and starts both workflows before any SSE
/// byte is written, so rejections stay ordinary JSON-RPC errors.
async fn handle_message_stream(
    state: &Arc<GatewayState>,
    agent_id: &str,
    request: JsonRpcRequest,
) -> Response {
    let params = match jsonrpc::parse_send_params(&request.params) {
        Ok(params) => params,
        Err(err) => return json_error(request.id, &err),
    };

    let task_id = TaskLifecycle::allocate_task_id();
    let stream_id = stream_workflow_id(&task_id);

    // The sink must exist before the workflows run: the task workflow may
    // signal progress immediately.
    let receiver = state.stream_registry.register(&stream_id);

    match state
        .lifecycle
        .submit_for_stream(&task_id, agent_id, params.message, params.metadata)
        .await
    {
        Ok((task, stream_id)) => streaming::sse_response(
            Arc::clone(&state.stream_registry),
            Arc::clone(&state.runtime),
            &state.config.streaming,
            task.id,
            stream_id,
            receiver,
        ),
        Err(err) => {
            state.stream_registry.deregister(&stream_id);
            json_error(request.id, &err)
        }
    }
}

async fn handle_tasks_get(state: &Arc<GatewayState>, request: JsonRpcRequest) -> Response {
    let task_id = match jsonrpc::parse_task_id_params(&request.params) {
        Ok(task_id) => task_id,
        Err(err) => return json_error(request.id, &err),
    };

    match state.lifecycle.get(&task_id).await {
        Ok(task) => json_result(request.id, &task),
        Err(err) => json_error(request.id, &err),
    }
}

async fn handle_tasks_cancel(state: &Arc<GatewayState>, request: JsonRpcRequest) -> Response {
    let task_id = match jsonrpc::parse_task_id_params(&request.params) {
        Ok(task_id) => task_id,
        Err(err) => return json_error(request.id, &err),
    };

    match state.lifecycle.cancel(&task_id).await {
        Ok(cancelled) => json_result(request.id, &serde_json::json!({ "cancelled": cancelled })),
        Err(err) => json_error(request.id, &err),
    }
}

async fn handle_discover_agents(state: &Arc<GatewayState>, request: JsonRpcRequest) -> Response {
    let params = match jsonrpc::parse_discover_params(&request.params) {
        Ok(params) => params,
        Err(err) => return json_error(request.id, &err),
    };

    let Some(ref registry) = state.registry else {
        return json_error(
            request.id,
            &GatewayError::downstream_unavailable("no agent registry is configured"),
        );
    };

    match registry.discover(&params).await {
        Ok(agents) => json_result(request.id, &serde_json::json!({ "agents": agents })),
        Err(err) => json_error(request.id, &err),
    }
}

/// Build the public card for a routed agent.
fn card_for_route(route: &AgentRoute, base_url: &str) -> AgentCard {
    AgentCard {
        name: route.agent_id.clone(),
        description: route
            .description
            .clone()
            .unwrap_or_else(|| format!("Agent '{}'", route.agent_id)),
        version: env!("CARGO_PKG_VERSION").to_string(),
        url: format!("{}/{}", base_url.trim_end_matches('/'), route.agent_id),
        capabilities: route.capabilities.clone(),
        skills: route.skills.clone(),
        default_input_modes: vec!["text/plain".to_string()],
        default_output_modes: vec!["text/plain".to_string()],
        security_schemes: None,
        protocol_version: Some("0.3.0".to_string()),
    }
}

fn json_result<T: serde::Serialize>(id: Value, result: &T) -> Response {
    match serde_json::to_value(result) {
        Ok(value) => Json(JsonRpcResponse::success(id, value)).into_response(),
        Err(e) => {
            let err = GatewayError::internal(format!("result not serializable: {e}"));
            Json(JsonRpcResponse::failure(id, &err)).into_response()
        }
    }
}

fn json_error(id: Value, err: &GatewayError) -> Response {
    Json(JsonRpcResponse::failure(id, err)).into_response()
}
