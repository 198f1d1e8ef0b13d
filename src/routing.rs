//! Agent routing — maps an agent id to the task queue, workflow names, and
//! capabilities used to dispatch work for it.
//!
//! Resolution order: the static routing table loaded at startup, then a
//! TTL-cached registry lookup. The static table is a copy-on-write snapshot
//! replaced atomically on refresh, so readers never block a reload.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::config::RoutingConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::registry::RegistryClient;
use crate::types::{AgentCapabilities, AgentCard, AgentSkill};

/// Dispatch target for one agent.
#[derive(Debug, Clone)]
pub struct AgentRoute {
    /// The agent id this route serves.
    pub agent_id: String,

    /// Task queue the agent's worker pool polls.
    pub task_queue: String,

    /// Workflow type started for `message/send`.
    pub workflow: String,

    /// Workflow type started for `message/stream`, when the agent runs a
    /// dedicated streaming variant. Falls back to `workflow`.
    pub streaming_workflow: Option<String>,

    /// Declared capabilities; `streaming` gates `message/stream`.
    pub capabilities: AgentCapabilities,

    /// Card description, when the routing entry supplies one.
    pub description: Option<String>,

    /// Card skills, when the routing entry supplies them.
    pub skills: Vec<AgentSkill>,
}

impl AgentRoute {
    /// The workflow type to start for a streaming submission.
    pub fn workflow_for_stream(&self) -> &str {
        self.streaming_workflow.as_deref().unwrap_or(&self.workflow)
    }
}

/// One entry of the static routing file.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RouteEntry {
    agent_id: String,
    task_queue: String,
    workflow: String,
    #[serde(default)]
    streaming_workflow: Option<String>,
    #[serde(default)]
    capabilities: AgentCapabilities,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    skills: Vec<AgentSkill>,
}

/// Wire shape of the routing file.
#[derive(Debug, Deserialize)]
struct RoutingFile {
    agents: Vec<RouteEntry>,
}

/// Load static routes from a JSON routing file.
pub fn load_routing_file(path: &Path) -> GatewayResult<Vec<AgentRoute>> {
    let raw = std::fs::read(path).map_err(|e| {
        GatewayError::internal(format!("cannot read routing file {}: {e}", path.display()))
    })?;
    let file: RoutingFile = serde_json::from_slice(&raw).map_err(|e| {
        GatewayError::internal(format!("invalid routing file {}: {e}", path.display()))
    })?;

    Ok(file
        .agents
        .into_iter()
        .map(|entry| AgentRoute {
            agent_id: entry.agent_id,
            task_queue: entry.task_queue,
            workflow: entry.workflow,
            streaming_workflow: entry.streaming_workflow,
            capabilities: entry.capabilities,
            description: entry.description,
            skills: entry.skills,
        })
        .collect())
}

/// A registry-derived route with its expiry.
struct CachedRoute {
    route: AgentRoute,
    expires_at: Instant,
}

/// Resolves agent ids to routes.
pub struct AgentRouter {
    /// Copy-on-write static table; replaced wholesale on refresh.
    static_routes: RwLock<Arc<HashMap<String, AgentRoute>>>,

    /// Registry client for dynamic resolution; `None` disables it.
    registry: Option<RegistryClient>,

    /// TTL cache over registry lookups.
    dynamic: RwLock<HashMap<String, CachedRoute>>,
    registry_ttl: Duration,

    defaults: RoutingConfig,
}

impl AgentRouter {
    /// Build a router over a static table and an optional registry client.
    pub fn new(
        routes: Vec<AgentRoute>,
        registry: Option<RegistryClient>,
        registry_ttl: Duration,
        defaults: RoutingConfig,
    ) -> Self {
        let table: HashMap<String, AgentRoute> = routes
            .into_iter()
            .map(|route| (route.agent_id.clone(), route))
            .collect();
        info!(static_agents = table.len(), "Agent router initialized");
        Self {
            static_routes: RwLock::new(Arc::new(table)),
            registry,
            dynamic: RwLock::new(HashMap::new()),
            registry_ttl,
            defaults,
        }
    }

    /// Resolve a route for `agent_id`.
    ///
    /// Statically configured agents win; otherwise the registry is
    /// consulted (through the TTL cache). An agent unknown to both yields
    /// `agent_not_found`.
    pub async fn resolve(&self, agent_id: &str) -> GatewayResult<AgentRoute> {
        if let Some(route) = self.static_snapshot().await.get(agent_id) {
            return Ok(route.clone());
        }

        // Fresh cached registry lookup?
        {
            let dynamic = self.dynamic.read().await;
            if let Some(cached) = dynamic.get(agent_id) {
                if cached.expires_at > Instant::now() {
                    return Ok(cached.route.clone());
                }
            }
        }

        let Some(ref registry) = self.registry else {
            return Err(GatewayError::agent_not_found(agent_id));
        };

        let card = registry
            .get_agent(agent_id)
            .await?
            .ok_or_else(|| GatewayError::agent_not_found(agent_id))?;

        let route = self.route_from_card(agent_id, &card);
        debug!(
            agent_id = %agent_id,
            task_queue = %route.task_queue,
            streaming = route.capabilities.streaming,
            "Registry-resolved route cached"
        );

        let mut dynamic = self.dynamic.write().await;
        dynamic.insert(
            agent_id.to_string(),
            CachedRoute {
                route: route.clone(),
                expires_at: Instant::now() + self.registry_ttl,
            },
        );
        Ok(route)
    }

    /// The current static table snapshot.
    pub async fn static_snapshot(&self) -> Arc<HashMap<String, AgentRoute>> {
        Arc::clone(&*self.static_routes.read().await)
    }

    /// Replace the static table atomically.
    pub async fn replace_static(&self, routes: Vec<AgentRoute>) {
        let table: HashMap<String, AgentRoute> = routes
            .into_iter()
            .map(|route| (route.agent_id.clone(), route))
            .collect();
        let count = table.len();
        *self.static_routes.write().await = Arc::new(table);
        info!(static_agents = count, "Static routing table replaced");
    }

    /// Derive a route from a registry card using the configured defaults:
    /// queue `<agentId><suffix>`, the default workflow type, capabilities
    /// from the card.
    fn route_from_card(&self, agent_id: &str, card: &AgentCard) -> AgentRoute {
        AgentRoute {
            agent_id: agent_id.to_string(),
            task_queue: format!("{}{}", agent_id, self.defaults.queue_suffix),
            workflow: self.defaults.default_workflow.clone(),
            streaming_workflow: None,
            capabilities: card.capabilities.clone(),
            description: Some(card.description.clone()),
            skills: card.skills.clone(),
        }
    }
}
