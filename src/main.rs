//! Gateway binary: load configuration, install tracing, wire the gateway
//! over the embedded runtime, and serve.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use a2a_gateway::config::GatewayConfig;
use a2a_gateway::runtime::LocalRuntime;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = GatewayConfig::load().context("loading gateway configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone())),
        )
        .init();

    if let Some(ref endpoint) = config.runtime.endpoint {
        warn!(
            endpoint = %endpoint,
            namespace = %config.runtime.namespace,
            "External workflow-runtime connectors are not bundled; \
             continuing with the embedded runtime"
        );
    }
    if let Some(ref endpoint) = config.cache.endpoint {
        warn!(endpoint = %endpoint, "External cache backends are not bundled; using the in-process cache");
    }

    let runtime = LocalRuntime::new();
    // Demo worker pools; real deployments run their own workers against the
    // orchestrator and only share the routing file with the gateway.
    if config.routing.file.is_none() {
        a2a_gateway::worker::echo::register_echo_agents(&runtime).await;
        info!("No routing file configured; embedded echo agents registered");
    }

    let config = Arc::new(config);
    let app = a2a_gateway::bootstrap(Arc::clone(&config), runtime).await?;

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;

    info!(
        addr = %addr,
        namespace = %config.runtime.namespace,
        "A2A gateway listening"
    );
    axum::serve(listener, app).await.context("serving")?;
    Ok(())
}
