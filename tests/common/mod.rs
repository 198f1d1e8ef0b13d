//! Shared test utilities: a gateway over the embedded runtime with the
//! echo agents plus a cancellable slow agent, and SSE reading helpers.
#![allow(dead_code)]

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use a2a_gateway::config::GatewayConfig;
use a2a_gateway::runtime::LocalRuntime;
use a2a_gateway::types::{Artifact, Part};
use a2a_gateway::worker::echo::register_echo_agents;
use a2a_gateway::worker::{
    AgentError, AgentHandler, AgentTaskWorkflow, HandlerContext, ProgressReporter,
};

/// Agent that produces one artifact chunk and then blocks until cancelled.
pub struct SleepyHandler;

#[async_trait]
impl AgentHandler for SleepyHandler {
    async fn handle(
        &self,
        _ctx: &HandlerContext,
        progress: &ProgressReporter,
    ) -> Result<(), AgentError> {
        let artifact = Artifact {
            artifact_id: progress.new_artifact_id().await,
            name: Some("partial".to_string()),
            description: None,
            parts: vec![Part::text("working on it")],
        };
        progress
            .add_artifact(artifact, false, false)
            .await
            .map_err(|e| AgentError::new("agent_error", e.to_string()))?;

        // Cancellation interrupts this sleep through the workflow harness.
        tokio::time::sleep(Duration::from_secs(120)).await;
        Ok(())
    }
}

/// A running test gateway.
pub struct TestGateway {
    /// Base URL of the listening server.
    pub base_url: String,
    /// The embedded runtime, for direct workflow inspection.
    pub runtime: Arc<LocalRuntime>,
    _routing_file: tempfile::NamedTempFile,
    _server: tokio::task::JoinHandle<()>,
}

/// Routing file covering the echo agents and the sleepy agent.
fn routing_file() -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("temp routing file");
    let routes = serde_json::json!({
        "agents": [
            {
                "agentId": "echo-agent",
                "taskQueue": "echo-agent-queue",
                "workflow": "echo",
                "capabilities": {"streaming": false},
                "description": "Echoes the message back in one artifact"
            },
            {
                "agentId": "streaming-echo-agent",
                "taskQueue": "streaming-echo-agent-queue",
                "workflow": "streaming-echo",
                "streamingWorkflow": "streaming-echo",
                "capabilities": {"streaming": true}
            },
            {
                "agentId": "sleepy-agent",
                "taskQueue": "sleepy-agent-queue",
                "workflow": "sleepy",
                "streamingWorkflow": "sleepy",
                "capabilities": {"streaming": true}
            }
        ]
    });
    file.write_all(routes.to_string().as_bytes())
        .expect("write routing file");
    file
}

/// Start a gateway on an ephemeral port with default test settings.
pub async fn start_gateway() -> TestGateway {
    start_gateway_with(|_| {}).await
}

/// Start a gateway with a configuration tweak applied before bootstrap.
pub async fn start_gateway_with(tweak: impl FnOnce(&mut GatewayConfig)) -> TestGateway {
    let routing = routing_file();

    let mut config = GatewayConfig::default();
    config.routing.file = Some(routing.path().to_string_lossy().into_owned());
    config.streaming.heartbeat_secs = 1;
    config.streaming.max_session_secs = 30;
    config.cache.ttl_secs = 1;
    tweak(&mut config);

    let runtime = LocalRuntime::new();
    register_echo_agents(&runtime).await;
    runtime
        .register_workflow(
            "sleepy-agent-queue",
            Arc::new(AgentTaskWorkflow::new("sleepy", Arc::new(SleepyHandler))),
        )
        .await;

    let app = a2a_gateway::bootstrap(Arc::new(config), Arc::clone(&runtime))
        .await
        .expect("bootstrap gateway");

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let base_url = format!("http://{addr}");

    let server = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Brief wait for the server to start accepting connections.
    tokio::time::sleep(Duration::from_millis(50)).await;

    TestGateway {
        base_url,
        runtime,
        _routing_file: routing,
        _server: server,
    }
}

/// Build a JSON-RPC request body.
pub fn jsonrpc_request(
    id: serde_json::Value,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params
    })
}

/// Build a message/send body with a single text part.
pub fn send_request(id: i64, text: &str) -> serde_json::Value {
    jsonrpc_request(
        serde_json::json!(id),
        "message/send",
        serde_json::json!({
            "message": {"parts": [{"kind": "text", "text": text}]}
        }),
    )
}

/// Build a message/stream body with a single text part.
pub fn stream_request(id: i64, text: &str) -> serde_json::Value {
    jsonrpc_request(
        serde_json::json!(id),
        "message/stream",
        serde_json::json!({
            "message": {"parts": [{"kind": "text", "text": text}]}
        }),
    )
}

/// POST a JSON-RPC body to an agent path and parse the JSON response.
pub async fn rpc(
    base_url: &str,
    agent_path: &str,
    body: &serde_json::Value,
) -> serde_json::Value {
    reqwest::Client::new()
        .post(format!("{base_url}/{agent_path}"))
        .json(body)
        .send()
        .await
        .expect("rpc request")
        .json()
        .await
        .expect("rpc response body")
}

/// Poll `tasks/get` until the task reaches `state` (or panic after ~10s).
pub async fn wait_for_task_state(
    base_url: &str,
    agent_path: &str,
    task_id: &str,
    state: &str,
) -> serde_json::Value {
    for _ in 0..200 {
        let response = rpc(
            base_url,
            agent_path,
            &jsonrpc_request(
                serde_json::json!("poll"),
                "tasks/get",
                serde_json::json!({"taskId": task_id}),
            ),
        )
        .await;
        if response["result"]["status"]["state"] == state {
            return response["result"].clone();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("task '{task_id}' never reached state '{state}'");
}

/// Read SSE `data:` frames until a `final: true` status update or stream
/// end. Returns the parsed frames in arrival order.
pub async fn read_sse_frames(response: reqwest::Response) -> Vec<serde_json::Value> {
    use futures::StreamExt;

    assert!(response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("text/event-stream"))
        .unwrap_or(false));

    let mut stream = response.bytes_stream();
    let mut buffer = String::new();
    let mut frames = Vec::new();

    loop {
        let chunk = match tokio::time::timeout(Duration::from_secs(10), stream.next()).await {
            Ok(Some(Ok(chunk))) => chunk,
            Ok(Some(Err(_))) | Ok(None) => break,
            Err(_) => panic!("timed out waiting for SSE frames"),
        };
        buffer.push_str(&String::from_utf8_lossy(&chunk));

        while let Some(boundary) = buffer.find("\n\n") {
            let raw = buffer[..boundary].to_string();
            buffer.drain(..boundary + 2);
            for line in raw.lines() {
                if let Some(data) = line.strip_prefix("data: ") {
                    if let Ok(value) = serde_json::from_str::<serde_json::Value>(data) {
                        frames.push(value);
                    }
                }
            }
        }

        if frames
            .last()
            .map(|frame| frame["final"] == true)
            .unwrap_or(false)
        {
            break;
        }
    }

    frames
}
