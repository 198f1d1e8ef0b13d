//! # a2a-gateway — A2A front end for durable agent workflows
//!
//! A gateway that speaks the Agent-to-Agent (A2A) JSON-RPC 2.0 protocol on
//! one side and a durable-workflow orchestrator on the other. Clients
//! address messages to logical agents; the gateway starts a task workflow
//! per message on the agent's task queue, tracks it through the
//! `submitted → working → {completed, failed, canceled}` lifecycle, and
//! returns results either as single JSON-RPC responses or as a Server-Sent
//! Events stream fed by cross-workflow progress signals.
//!
//! ## Architecture
//!
//! - [`server::routes`] — axum routes: `POST /{agent_id}` for JSON-RPC,
//!   discovery cards, health, and the deprecated `/a2a` path
//! - [`server::jsonrpc`] — envelope and parameter framing
//! - [`routing`] — agent id → task queue / workflow resolution, static
//!   table plus TTL-cached registry overlay
//! - [`server::lifecycle`] — `submit`, `submit_for_stream`, `get`, `cancel`
//! - [`server::task_cache`] — read-through task status cache with
//!   single-flight misses and terminal pinning
//! - [`server::streaming`] — stream registry, the stream-relay workflow,
//!   and the SSE write loop
//! - [`runtime`] — the orchestrator seam (`start` / `signal` / `query` /
//!   `cancel`) plus the embedded in-process implementation
//! - [`worker`] — the task-workflow contract worker pools implement, the
//!   progress reporter, and the reference echo agents
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use a2a_gateway::config::GatewayConfig;
//! use a2a_gateway::runtime::LocalRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = GatewayConfig::load()?;
//!     let runtime = LocalRuntime::new();
//!     a2a_gateway::worker::echo::register_echo_agents(&runtime).await;
//!
//!     let app = a2a_gateway::bootstrap(Arc::new(config), runtime).await?;
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:7420").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod registry;
pub mod routing;
pub mod runtime;
pub mod server;
pub mod types;
pub mod worker;

use std::sync::Arc;

use crate::config::GatewayConfig;
use crate::registry::RegistryClient;
use crate::routing::AgentRouter;
use crate::runtime::{LocalRuntime, RetryPolicy, WorkflowRuntime};
use crate::server::{
    gateway_router, GatewayState, StreamRegistry, StreamRelayWorkflow, TaskCache, TaskLifecycle,
};

/// Prelude of the most commonly used types.
pub mod prelude {
    pub use crate::error::{ErrorKind, GatewayError, GatewayResult};
    pub use crate::routing::{AgentRoute, AgentRouter};
    pub use crate::runtime::{LocalRuntime, StartWorkflowRequest, WorkflowRuntime};
    pub use crate::server::{GatewayState, StreamRegistry, TaskCache, TaskLifecycle};
    pub use crate::types::{
        AgentCard, Artifact, Message, Part, ProgressEvent, Task, TaskState, TaskStatus,
    };
    pub use crate::worker::{AgentHandler, AgentTaskWorkflow, ProgressReporter};
}

/// Wire the gateway together over an embedded runtime: build the router,
/// cache, lifecycle, and stream registry, and register the stream-relay
/// workflow on the runtime.
///
/// Static routes come from the configured routing file when present,
/// otherwise the embedded echo agents are routed so the gateway is usable
/// out of the box.
pub async fn bootstrap(
    config: Arc<GatewayConfig>,
    runtime: Arc<LocalRuntime>,
) -> anyhow::Result<axum::Router> {
    let retry = RetryPolicy {
        attempts: config.runtime.retry_attempts.max(1),
        base_delay: std::time::Duration::from_millis(config.runtime.retry_base_ms),
        ..RetryPolicy::default()
    };

    let registry = config
        .registry
        .endpoint
        .as_deref()
        .map(|endpoint| RegistryClient::new(endpoint, retry.clone()));

    let static_routes = match config.routing.file.as_deref() {
        Some(path) => crate::routing::load_routing_file(std::path::Path::new(path))
            .map_err(|e| anyhow::anyhow!("{e}"))?,
        None => crate::worker::echo::echo_routes(),
    };

    let router = Arc::new(AgentRouter::new(
        static_routes,
        registry.clone(),
        config.registry.cache_ttl(),
        config.routing.clone(),
    ));

    let cache = Arc::new(TaskCache::new(config.cache.clone()));

    // Reads already treat expired entries as misses; the sweep just keeps
    // the map from accumulating them.
    let sweep = Arc::clone(&cache);
    let sweep_period = config.cache.ttl().max(std::time::Duration::from_secs(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_period);
        loop {
            interval.tick().await;
            sweep.evict_expired().await;
        }
    });

    let stream_registry = Arc::new(StreamRegistry::new());

    runtime
        .register_workflow(
            &config.streaming.task_queue,
            Arc::new(StreamRelayWorkflow::new(
                Arc::clone(&stream_registry),
                Arc::clone(&cache),
                config.streaming.clone(),
            )),
        )
        .await;

    let runtime_dyn: Arc<dyn WorkflowRuntime> = runtime;
    let lifecycle = Arc::new(TaskLifecycle::new(
        Arc::clone(&runtime_dyn),
        Arc::clone(&router),
        Arc::clone(&cache),
        retry,
        config.streaming.task_queue.clone(),
    ));

    let state = Arc::new(GatewayState {
        config,
        lifecycle,
        router,
        registry,
        stream_registry,
        runtime: runtime_dyn,
    });

    Ok(gateway_router(state))
}
