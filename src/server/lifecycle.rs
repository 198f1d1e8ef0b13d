//! Task lifecycle manager — admission, dispatch, lookup, and cancellation.
//!
//! `submit` turns a validated message into a Task record and a task
//! workflow start; `submit_for_stream` additionally starts the paired
//! stream-relay workflow first, so the task workflow can address progress
//! signals from its very first transition. `get` reads through the cache;
//! `cancel` is idempotent over terminal tasks.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{GatewayError, GatewayResult};
use crate::routing::{AgentRoute, AgentRouter};
use crate::runtime::{
    with_retries, RetryPolicy, RuntimeError, StartWorkflowRequest, WorkflowRuntime, TASK_QUERY,
};
use crate::types::{Message, Task, TaskStatus, TaskState};
use crate::worker::TaskWorkflowInput;

use super::streaming::{stream_workflow_id, StreamRelayInput, STREAM_RELAY_WORKFLOW};
use super::task_cache::TaskCache;

/// Length of the context-id prefix derived from a task id when the client
/// does not supply one.
const DERIVED_CONTEXT_LEN: usize = 8;

/// Coordinates task admission and state against the workflow runtime.
pub struct TaskLifecycle {
    runtime: Arc<dyn WorkflowRuntime>,
    router: Arc<AgentRouter>,
    cache: Arc<TaskCache>,
    retry: RetryPolicy,
    /// Task queue the gateway's stream-relay workflow is registered on.
    stream_queue: String,
}

impl TaskLifecycle {
    /// Build the lifecycle manager.
    pub fn new(
        runtime: Arc<dyn WorkflowRuntime>,
        router: Arc<AgentRouter>,
        cache: Arc<TaskCache>,
        retry: RetryPolicy,
        stream_queue: impl Into<String>,
    ) -> Self {
        Self {
            runtime,
            router,
            cache,
            retry,
            stream_queue: stream_queue.into(),
        }
    }

    /// Allocate a fresh globally unique task id.
    pub fn allocate_task_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// Admit a message for an agent and start its task workflow.
    pub async fn submit(
        &self,
        agent_id: &str,
        message: Message,
        metadata: Option<Value>,
    ) -> GatewayResult<Task> {
        let route = self.resolve_and_validate(agent_id, &message).await?;
        let task_id = Self::allocate_task_id();
        let context_id = derive_context_id(&task_id, metadata.as_ref())?;
        self.start_task(&route, &task_id, context_id, message, metadata, None, false)
            .await
    }

    /// Admit a streaming submission: start the stream-relay workflow under
    /// the derived id, then the task workflow carrying that id.
    ///
    /// The caller allocates `task_id` up front (via
    /// [`allocate_task_id`](Self::allocate_task_id)) so it can register the
    /// SSE sink before any workflow runs.
    pub async fn submit_for_stream(
        &self,
        task_id: &str,
        agent_id: &str,
        message: Message,
        metadata: Option<Value>,
    ) -> GatewayResult<(Task, String)> {
        let route = self.resolve_and_validate(agent_id, &message).await?;
        if !route.capabilities.streaming {
            return Err(GatewayError::streaming_unsupported(agent_id));
        }

        let context_id = derive_context_id(task_id, metadata.as_ref())?;
        let stream_id = stream_workflow_id(task_id);

        let relay_input = serde_json::to_value(StreamRelayInput {
            task_id: task_id.to_string(),
            context_id: context_id.clone(),
        })
        .map_err(|e| GatewayError::internal(format!("relay input not serializable: {e}")))?;

        with_retries(&self.retry, || {
            self.runtime.start_workflow(StartWorkflowRequest {
                workflow: STREAM_RELAY_WORKFLOW.to_string(),
                workflow_id: stream_id.clone(),
                task_queue: self.stream_queue.clone(),
                input: relay_input.clone(),
            })
        })
        .await
        .map_err(GatewayError::from)?;

        match self
            .start_task(
                &route,
                task_id,
                context_id,
                message,
                metadata,
                Some(stream_id.clone()),
                true,
            )
            .await
        {
            Ok(task) => Ok((task, stream_id)),
            Err(err) => {
                // Don't leave the relay waiting for a task that never
                // started; the watchdog would eventually fire, but there is
                // no client either.
                if let Err(e) = self.runtime.cancel_workflow(&stream_id).await {
                    warn!(stream_id = %stream_id, error = %e, "Orphaned relay cancel failed");
                }
                Err(err)
            }
        }
    }

    /// Fetch a task: cache first, then the workflow runtime's task query.
    pub async fn get(&self, task_id: &str) -> GatewayResult<Task> {
        let runtime = Arc::clone(&self.runtime);
        let retry = self.retry.clone();
        let id = task_id.to_string();
        self.cache
            .get_or_fetch(task_id, || async move {
                let value = with_retries(&retry, || runtime.query_workflow(&id, TASK_QUERY))
                    .await
                    .map_err(|e| match e {
                        RuntimeError::NotFound(_) | RuntimeError::UnknownQuery(_) => {
                            GatewayError::task_not_found(&id)
                        }
                        other => other.into(),
                    })?;
                serde_json::from_value(value)
                    .map_err(|e| GatewayError::internal(format!("invalid task snapshot: {e}")))
            })
            .await
    }

    /// Request cancellation of a task workflow.
    ///
    /// Returns `true` when a cancellation request was delivered, `false`
    /// when the task was already terminal (idempotent). The final state is
    /// whatever the workflow settles on.
    pub async fn cancel(&self, task_id: &str) -> GatewayResult<bool> {
        let task = self.get(task_id).await?;
        if task.status.state.is_terminal() {
            debug!(task_id = %task_id, state = %task.status.state, "Cancel on terminal task is a no-op");
            return Ok(false);
        }

        match with_retries(&self.retry, || self.runtime.cancel_workflow(task_id)).await {
            Ok(()) => {
                info!(task_id = %task_id, "Task cancellation requested");
                Ok(true)
            }
            // The workflow already left the runtime's books; nothing to
            // cancel.
            Err(RuntimeError::NotFound(_)) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn resolve_and_validate(
        &self,
        agent_id: &str,
        message: &Message,
    ) -> GatewayResult<AgentRoute> {
        if agent_id.trim().is_empty() {
            return Err(GatewayError::missing_field("agentId"));
        }
        if message.parts.is_empty() {
            return Err(GatewayError::missing_field("message.parts"));
        }
        self.router.resolve(agent_id).await
    }

    /// Record the initial Task and start the task workflow on the agent's
    /// queue.
    #[allow(clippy::too_many_arguments)]
    async fn start_task(
        &self,
        route: &AgentRoute,
        task_id: &str,
        context_id: String,
        message: Message,
        metadata: Option<Value>,
        stream_workflow_id: Option<String>,
        streaming: bool,
    ) -> GatewayResult<Task> {
        let task = Task {
            id: task_id.to_string(),
            context_id: context_id.clone(),
            agent_id: route.agent_id.clone(),
            kind: "task".to_string(),
            status: TaskStatus::now(TaskState::Submitted),
            input: message.clone(),
            artifacts: Vec::new(),
            error: None,
            metadata: metadata.clone(),
            created_at: crate::types::utc_timestamp_millis(),
        };

        let input = serde_json::to_value(TaskWorkflowInput {
            agent_id: route.agent_id.clone(),
            context_id,
            message,
            metadata,
            stream_workflow_id,
        })
        .map_err(|e| GatewayError::internal(format!("task input not serializable: {e}")))?;

        let workflow = if streaming {
            route.workflow_for_stream().to_string()
        } else {
            route.workflow.clone()
        };

        with_retries(&self.retry, || {
            self.runtime.start_workflow(StartWorkflowRequest {
                workflow: workflow.clone(),
                workflow_id: task_id.to_string(),
                task_queue: route.task_queue.clone(),
                input: input.clone(),
            })
        })
        .await
        .map_err(GatewayError::from)?;

        info!(
            task_id = %task_id,
            agent_id = %route.agent_id,
            task_queue = %route.task_queue,
            workflow = %workflow,
            streaming,
            "Task workflow started"
        );

        self.cache.insert(task.clone()).await;
        Ok(task)
    }
}

/// Derive the context id: `metadata.contextId` when supplied (must be a
/// non-empty string), else a deterministic short prefix of the task id.
///
/// A declared `contextId` that is not a string — including an explicit
/// `null` — is rejected; only an absent field selects the derived prefix.
fn derive_context_id(task_id: &str, metadata: Option<&Value>) -> GatewayResult<String> {
    match metadata.and_then(|m| m.get("contextId")) {
        None => Ok(task_id.chars().take(DERIVED_CONTEXT_LEN).collect()),
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(Value::String(_)) => Err(GatewayError::bad_field_type(
            "metadata.contextId must be a non-empty string",
        )),
        Some(_) => Err(GatewayError::bad_field_type(
            "metadata.contextId must be a string",
        )),
    }
}
