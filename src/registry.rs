//! Agent-registry client.
//!
//! The registry is the discovery backend behind dynamic agent resolution
//! and the `x-a2a.discoverAgents` method. Two endpoints are consumed:
//! `GET /agents/{id}` for a single card and `GET /agents/discover` for
//! filtered search. Transient transport failures are retried with the
//! caller-supplied backoff policy; exhausted retries surface as
//! `downstream_unavailable`.

use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{GatewayError, GatewayResult};
use crate::runtime::RetryPolicy;
use crate::types::AgentCard;

/// Parameters for a registry discovery query.
#[derive(Debug, Clone, Default)]
pub struct DiscoverParams {
    /// Capability filter, e.g. `"streaming"`.
    pub capability: Option<String>,

    /// Free-text keyword filter.
    pub keyword: Option<String>,

    /// Maximum number of results.
    pub limit: Option<u32>,

    /// Minimum similarity score.
    pub min_score: Option<f64>,
}

/// Wire shape of the registry's discover response.
#[derive(Debug, Deserialize)]
struct DiscoverResponse {
    #[serde(default)]
    agents: Vec<AgentCard>,
}

/// HTTP client for the agent-registry service.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    client: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
}

impl RegistryClient {
    /// Create a client for the registry at `base_url`.
    pub fn new(base_url: impl Into<String>, retry: RetryPolicy) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            retry,
        }
    }

    /// Fetch the card for a single agent.
    ///
    /// Returns `Ok(None)` when the registry answers 404 — an unknown agent
    /// is a resolution miss, not a failure.
    pub async fn get_agent(&self, agent_id: &str) -> GatewayResult<Option<AgentCard>> {
        let url = format!("{}/agents/{}", self.base_url, agent_id);
        debug!(agent_id = %agent_id, url = %url, "Registry lookup");

        let response = self.get_with_retries(&url, &[]).await?;
        let Some(response) = response else {
            return Ok(None);
        };

        let card: AgentCard = response
            .json()
            .await
            .map_err(|e| GatewayError::internal(format!("invalid registry card payload: {e}")))?;
        Ok(Some(card))
    }

    /// Run a discovery query and return matching agent cards.
    pub async fn discover(&self, params: &DiscoverParams) -> GatewayResult<Vec<AgentCard>> {
        let url = format!("{}/agents/discover", self.base_url);

        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(ref capability) = params.capability {
            query.push(("capability", capability.clone()));
        }
        if let Some(ref keyword) = params.keyword {
            query.push(("keyword", keyword.clone()));
        }
        if let Some(limit) = params.limit {
            query.push(("limit", limit.to_string()));
        }
        if let Some(min_score) = params.min_score {
            query.push(("min_score", min_score.to_string()));
        }

        let response = self
            .get_with_retries(&url, &query)
            .await?
            .ok_or_else(|| GatewayError::downstream_unavailable("registry discover returned 404"))?;

        let body: DiscoverResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::internal(format!("invalid registry discover payload: {e}")))?;
        Ok(body.agents)
    }

    /// GET with bounded retries on transport errors and 5xx responses.
    ///
    /// `Ok(None)` signals a 404; other non-success statuses after retries
    /// become `downstream_unavailable`.
    async fn get_with_retries(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> GatewayResult<Option<reqwest::Response>> {
        let mut attempt = 1;
        loop {
            let result = self
                .client
                .get(url)
                .query(query)
                .header("Accept", "application/json")
                .send()
                .await;

            let retryable = match result {
                Ok(response) if response.status().is_success() => return Ok(Some(response)),
                Ok(response) if response.status() == reqwest::StatusCode::NOT_FOUND => {
                    return Ok(None)
                }
                Ok(response) if response.status().is_server_error() => {
                    format!("registry answered {}", response.status())
                }
                Ok(response) => {
                    return Err(GatewayError::downstream_unavailable(format!(
                        "registry answered {}",
                        response.status()
                    )))
                }
                Err(e) => format!("registry request failed: {e}"),
            };

            if attempt >= self.retry.attempts {
                return Err(GatewayError::downstream_unavailable(retryable));
            }
            let delay = self
                .retry
                .base_delay
                .saturating_mul(2u32.saturating_pow(attempt - 1))
                .min(self.retry.max_delay);
            warn!(
                url = %url,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %retryable,
                "Registry call failed, backing off"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
