//! Worker-side task-workflow contract.
//!
//! Every agent's worker pool hosts a task workflow whose id equals the task
//! id. [`AgentTaskWorkflow`] is the harness implementing that contract on
//! top of the runtime seam: it decodes the input, transitions the task to
//! `working` promptly, exposes the Task snapshot through the task query,
//! relays progress to a paired streaming workflow, maps handler errors to a
//! `failed` terminal outcome with a populated `Task.error`, and honors
//! cancellation with a `canceled` terminal outcome. Agent authors implement
//! [`AgentHandler`] only.

pub mod echo;
pub mod progress;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::runtime::{WorkflowContext, WorkflowDefinition, WorkflowFailure};
use crate::types::{Message, Task, TaskStatus, TaskState};

pub use progress::{ProgressError, ProgressReporter};

/// Input handed to a task workflow at start.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskWorkflowInput {
    /// The agent the task is addressed to.
    pub agent_id: String,

    /// Conversation grouping identifier.
    pub context_id: String,

    /// The original client message.
    pub message: Message,

    /// Request metadata, passed through untouched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,

    /// Streaming workflow to address progress signals to, present for
    /// `message/stream` submissions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_workflow_id: Option<String>,
}

/// Context handed to an [`AgentHandler`].
pub struct HandlerContext {
    input: TaskWorkflowInput,
    cancellation: CancellationToken,
}

impl HandlerContext {
    /// The full workflow input.
    pub fn input(&self) -> &TaskWorkflowInput {
        &self.input
    }

    /// The incoming message.
    pub fn message(&self) -> &Message {
        &self.input.message
    }

    /// Concatenated text content of the incoming message.
    pub fn text(&self) -> String {
        self.input.message.text_content("\n")
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Token tripped when the gateway requests cancellation; long-running
    /// handlers should select against it.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancellation.clone()
    }
}

/// A failure returned by agent business logic. The harness records the code
/// and message on the task and terminates with `failed`.
#[derive(Debug, Clone, thiserror::Error)]
#[error("[{code}] {message}")]
pub struct AgentError {
    /// Stable machine code.
    pub code: String,

    /// Human-readable description.
    pub message: String,
}

impl AgentError {
    /// Build an error from a code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Agent business logic, driven by the harness.
///
/// Handlers produce output exclusively through the [`ProgressReporter`]'s
/// artifact model. A handler that returns `Ok` without reaching a terminal
/// state is completed by the harness.
#[async_trait]
pub trait AgentHandler: Send + Sync {
    /// Process one task.
    async fn handle(
        &self,
        ctx: &HandlerContext,
        progress: &ProgressReporter,
    ) -> Result<(), AgentError>;
}

/// Workflow harness wrapping an [`AgentHandler`] into the task-workflow
/// contract.
pub struct AgentTaskWorkflow {
    name: String,
    handler: Arc<dyn AgentHandler>,
}

impl AgentTaskWorkflow {
    /// Wrap `handler` as the workflow type `name`.
    pub fn new(name: impl Into<String>, handler: Arc<dyn AgentHandler>) -> Self {
        Self {
            name: name.into(),
            handler,
        }
    }
}

#[async_trait]
impl WorkflowDefinition for AgentTaskWorkflow {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &mut WorkflowContext, input: Value) -> Result<Value, WorkflowFailure> {
        let input: TaskWorkflowInput = serde_json::from_value(input)
            .map_err(|e| WorkflowFailure::new("bad_input", format!("invalid task input: {e}")))?;

        let task = Task {
            id: ctx.workflow_id().to_string(),
            context_id: input.context_id.clone(),
            agent_id: input.agent_id.clone(),
            kind: "task".to_string(),
            status: TaskStatus::now(TaskState::Submitted),
            input: input.message.clone(),
            artifacts: Vec::new(),
            error: None,
            metadata: input.metadata.clone(),
            created_at: crate::types::utc_timestamp_millis(),
        };

        let reporter = ProgressReporter::new(
            task,
            input.stream_workflow_id.clone(),
            ctx.runtime(),
            ctx.query_publisher(),
        );
        reporter.publish_snapshot().await;

        // Fresh task: this transition cannot fail.
        let _ = reporter.working().await;

        let cancellation = ctx.cancellation();
        let handler_ctx = HandlerContext {
            input,
            cancellation: cancellation.clone(),
        };

        tokio::select! {
            result = self.handler.handle(&handler_ctx, &reporter) => {
                match result {
                    Ok(()) => {
                        if !reporter.is_terminal().await {
                            let _ = reporter.complete().await;
                        }
                    }
                    Err(err) => {
                        warn!(
                            task_id = %ctx.workflow_id(),
                            code = %err.code,
                            error = %err.message,
                            "Agent handler failed"
                        );
                        // A no-op when the handler already reached a terminal
                        // state; the recorded outcome stands.
                        let _ = reporter.fail(&err.code, &err.message).await;
                    }
                }
            }
            _ = cancellation.cancelled() => {
                let _ = reporter.cancel().await;
            }
        }

        let task = reporter.snapshot().await;
        serde_json::to_value(&task)
            .map_err(|e| WorkflowFailure::new("bad_output", format!("task not serializable: {e}")))
    }
}
