//! Reference agents: a plain echo and a chunked streaming echo.
//!
//! These double as the embedded-mode demo agents and the fixtures the
//! integration tests drive end to end.

use std::sync::Arc;

use async_trait::async_trait;

use crate::routing::AgentRoute;
use crate::runtime::LocalRuntime;
use crate::types::{AgentCapabilities, AgentSkill, Artifact, Part};

use super::{AgentError, AgentHandler, AgentTaskWorkflow, HandlerContext, ProgressReporter};

/// Agent id of the non-streaming echo agent.
pub const ECHO_AGENT_ID: &str = "echo-agent";

/// Agent id of the streaming echo agent.
pub const STREAMING_ECHO_AGENT_ID: &str = "streaming-echo-agent";

/// Completes with a single `Echo: <text>` artifact.
pub struct EchoHandler;

#[async_trait]
impl AgentHandler for EchoHandler {
    async fn handle(
        &self,
        ctx: &HandlerContext,
        progress: &ProgressReporter,
    ) -> Result<(), AgentError> {
        let text = ctx.text();
        let artifact = Artifact {
            artifact_id: progress.new_artifact_id().await,
            name: Some("echo".to_string()),
            description: None,
            parts: vec![Part::text(format!("Echo: {text}"))],
        };
        progress
            .add_artifact(artifact, false, true)
            .await
            .map_err(|e| AgentError::new("agent_error", e.to_string()))?;
        progress
            .complete()
            .await
            .map_err(|e| AgentError::new("agent_error", e.to_string()))
    }
}

/// Echoes word by word: a replacing `Echo:` chunk, then one appending chunk
/// per word with the last chunk flagged, then completion.
pub struct StreamingEchoHandler;

#[async_trait]
impl AgentHandler for StreamingEchoHandler {
    async fn handle(
        &self,
        ctx: &HandlerContext,
        progress: &ProgressReporter,
    ) -> Result<(), AgentError> {
        let text = ctx.text();
        let words: Vec<&str> = text.split_whitespace().collect();
        let artifact_id = progress.new_artifact_id().await;

        let chunk = |parts: Vec<Part>| Artifact {
            artifact_id: artifact_id.clone(),
            name: Some("echo".to_string()),
            description: None,
            parts,
        };

        progress
            .add_artifact(chunk(vec![Part::text("Echo:")]), false, words.is_empty())
            .await
            .map_err(|e| AgentError::new("agent_error", e.to_string()))?;

        for (index, word) in words.iter().enumerate() {
            if ctx.is_cancelled() {
                return Ok(());
            }
            let last = index + 1 == words.len();
            progress
                .add_artifact(chunk(vec![Part::text(format!(" {word}"))]), true, last)
                .await
                .map_err(|e| AgentError::new("agent_error", e.to_string()))?;
        }

        progress
            .complete()
            .await
            .map_err(|e| AgentError::new("agent_error", e.to_string()))
    }
}

/// Register both echo agents' workflows on the runtime's demo queues.
pub async fn register_echo_agents(runtime: &LocalRuntime) {
    runtime
        .register_workflow(
            "echo-agent-queue",
            Arc::new(AgentTaskWorkflow::new("echo", Arc::new(EchoHandler))),
        )
        .await;
    runtime
        .register_workflow(
            "streaming-echo-agent-queue",
            Arc::new(AgentTaskWorkflow::new(
                "streaming-echo",
                Arc::new(StreamingEchoHandler),
            )),
        )
        .await;
}

/// Static routes for the two echo agents, used when no routing file is
/// configured.
pub fn echo_routes() -> Vec<AgentRoute> {
    vec![
        AgentRoute {
            agent_id: ECHO_AGENT_ID.to_string(),
            task_queue: "echo-agent-queue".to_string(),
            workflow: "echo".to_string(),
            streaming_workflow: None,
            capabilities: AgentCapabilities {
                streaming: false,
                push_notifications: None,
            },
            description: Some("Echoes the message back in one artifact".to_string()),
            skills: vec![AgentSkill {
                id: "echo".to_string(),
                name: "Echo".to_string(),
                description: "Returns `Echo: <text>` for any text message".to_string(),
                tags: vec!["demo".to_string()],
                examples: None,
            }],
        },
        AgentRoute {
            agent_id: STREAMING_ECHO_AGENT_ID.to_string(),
            task_queue: "streaming-echo-agent-queue".to_string(),
            workflow: "streaming-echo".to_string(),
            streaming_workflow: Some("streaming-echo".to_string()),
            capabilities: AgentCapabilities {
                streaming: true,
                push_notifications: None,
            },
            description: Some("Echoes the message back word by word over SSE".to_string()),
            skills: vec![AgentSkill {
                id: "streaming-echo".to_string(),
                name: "Streaming echo".to_string(),
                description: "Streams `Echo: <text>` as incremental artifact chunks".to_string(),
                tags: vec!["demo".to_string(), "streaming".to_string()],
                examples: None,
            }],
        },
    ]
}
