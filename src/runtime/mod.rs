//! Workflow-runtime seam — the four primitives the gateway consumes from a
//! durable-workflow orchestrator, plus a bounded-backoff retry helper.
//!
//! The gateway never talks to a concrete orchestrator directly; everything
//! goes through [`WorkflowRuntime`]. Production deployments implement the
//! trait against their orchestrator's SDK. [`local::LocalRuntime`] is the
//! in-process implementation used by the binary's embedded mode and by
//! tests.

pub mod local;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

pub use local::{
    LocalRuntime, QueryPublisher, Signal, WorkflowContext, WorkflowDefinition, WorkflowFailure,
};

/// Signal name task workflows use to push progress at streaming workflows.
pub const PROGRESS_SIGNAL: &str = "progress_update";

/// Query name under which task workflows publish their Task snapshot.
pub const TASK_QUERY: &str = "task";

/// Request to start a workflow on a task queue.
#[derive(Debug, Clone)]
pub struct StartWorkflowRequest {
    /// Registered workflow type name.
    pub workflow: String,

    /// Workflow id. Task workflows use the task id; streaming workflows a
    /// deterministic derivation of it.
    pub workflow_id: String,

    /// Task queue the worker pool polls.
    pub task_queue: String,

    /// JSON input handed to the workflow.
    pub input: Value,
}

/// Errors surfaced by a workflow-runtime implementation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RuntimeError {
    /// No workflow with the given id is known to the runtime.
    #[error("workflow not found: {0}")]
    NotFound(String),

    /// A workflow with the given id already exists; duplicate starts are
    /// rejected rather than replayed.
    #[error("workflow already started: {0}")]
    AlreadyStarted(String),

    /// The workflow exists but has not registered the requested query.
    #[error("unknown query: {0}")]
    UnknownQuery(String),

    /// The runtime could not be reached or timed out. The only transient
    /// variant; callers retry it with bounded backoff.
    #[error("workflow runtime unavailable: {0}")]
    Unavailable(String),
}

impl RuntimeError {
    /// Whether retrying the call might succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, RuntimeError::Unavailable(_))
    }
}

/// The durable-workflow orchestrator, reduced to the primitives the gateway
/// consumes.
#[async_trait]
pub trait WorkflowRuntime: Send + Sync {
    /// Start a workflow. Fails with [`RuntimeError::AlreadyStarted`] when the
    /// id is already taken.
    async fn start_workflow(&self, request: StartWorkflowRequest) -> Result<(), RuntimeError>;

    /// Deliver a named signal to a running workflow. Signals to one workflow
    /// id are delivered in send order.
    async fn signal_workflow(
        &self,
        workflow_id: &str,
        signal: &str,
        payload: Value,
    ) -> Result<(), RuntimeError>;

    /// Read a named query from a workflow. Queries remain answerable after
    /// the workflow completes, until the runtime drops its history.
    async fn query_workflow(&self, workflow_id: &str, query: &str) -> Result<Value, RuntimeError>;

    /// Request cancellation of a workflow. The workflow decides how (and
    /// whether) to wind down; this call only delivers the request.
    async fn cancel_workflow(&self, workflow_id: &str) -> Result<(), RuntimeError>;
}

/// Bounded exponential backoff for transient runtime and registry calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,

    /// Delay before the second attempt; doubles per retry.
    pub base_delay: Duration,

    /// Upper bound on any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries. Used in tests and for calls where the
    /// caller owns retry semantics.
    pub fn none() -> Self {
        Self {
            attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// The delay preceding retry number `retry` (1-based).
    fn delay_for(&self, retry: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(retry.saturating_sub(1)));
        exp.min(self.max_delay)
    }
}

/// Run `op`, retrying transient [`RuntimeError`]s per `policy`.
///
/// Terminal errors (`NotFound`, `AlreadyStarted`, `UnknownQuery`) are
/// returned immediately; only `Unavailable` is retried.
pub async fn with_retries<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, RuntimeError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RuntimeError>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < policy.attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    attempt,
                    max_attempts = policy.attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient workflow-runtime error, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
