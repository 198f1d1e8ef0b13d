//! In-process workflow runtime.
//!
//! Hosts registered [`WorkflowDefinition`]s on named task queues inside the
//! gateway process: each started workflow runs as a tokio task with an
//! ordered signal channel, a cancellation token, and a query-state map.
//! Suitable for embedded deployments and tests; durable orchestrators plug
//! in behind the same [`WorkflowRuntime`] trait.
//!
//! Completed workflows keep their query state for the life of the process,
//! which stands in for the orchestrator's history retention window.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::{RuntimeError, StartWorkflowRequest, WorkflowRuntime};

/// Signal channel depth per workflow instance. Senders await free capacity,
/// so a slow workflow backpressures its signalers instead of buffering
/// without bound.
const SIGNAL_CHANNEL_CAPACITY: usize = 64;

/// A named signal delivered to a workflow instance.
#[derive(Debug, Clone)]
pub struct Signal {
    /// Signal name, e.g. `progress_update`.
    pub name: String,

    /// JSON payload.
    pub payload: Value,
}

/// Failure outcome of a workflow run.
#[derive(Debug, Clone, thiserror::Error)]
#[error("workflow failed [{code}]: {message}")]
pub struct WorkflowFailure {
    /// Stable machine code.
    pub code: String,

    /// Human-readable description.
    pub message: String,
}

impl WorkflowFailure {
    /// Build a failure from a code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Handle workflows use to publish query results readable through
/// [`WorkflowRuntime::query_workflow`].
#[derive(Clone)]
pub struct QueryPublisher {
    queries: Arc<RwLock<HashMap<String, Value>>>,
}

impl QueryPublisher {
    /// Publish (or replace) the value served for `query`.
    pub async fn publish(&self, query: &str, value: Value) {
        self.queries.write().await.insert(query.to_string(), value);
    }
}

/// Execution context handed to a running workflow.
///
/// Owns the inbound signal receiver (signals arrive in send order), the
/// cancellation token, and the query-state publisher. A handle back to the
/// runtime lets workflows signal or cancel other workflows by id — the only
/// way workflows refer to each other.
pub struct WorkflowContext {
    workflow_id: String,
    runtime: Arc<dyn WorkflowRuntime>,
    signals: mpsc::Receiver<Signal>,
    cancel: CancellationToken,
    queries: QueryPublisher,
}

impl WorkflowContext {
    /// This workflow's id.
    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    /// Handle to the hosting runtime, for cross-workflow signals and
    /// cancellation requests.
    pub fn runtime(&self) -> Arc<dyn WorkflowRuntime> {
        Arc::clone(&self.runtime)
    }

    /// Receive the next signal, in send order. Returns `None` once all
    /// senders are gone.
    pub async fn next_signal(&mut self) -> Option<Signal> {
        self.signals.recv().await
    }

    /// Cancellation token tripped by [`WorkflowRuntime::cancel_workflow`].
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Publisher for this workflow's query state.
    pub fn query_publisher(&self) -> QueryPublisher {
        self.queries.clone()
    }
}

/// A workflow type hosted by the runtime.
#[async_trait]
pub trait WorkflowDefinition: Send + Sync {
    /// Registered workflow type name.
    fn name(&self) -> &str;

    /// Run one workflow instance to completion.
    async fn run(&self, ctx: &mut WorkflowContext, input: Value) -> Result<Value, WorkflowFailure>;
}

/// Per-instance bookkeeping kept by the runtime.
struct InstanceHandle {
    signal_tx: mpsc::Sender<Signal>,
    cancel: CancellationToken,
    queries: Arc<RwLock<HashMap<String, Value>>>,
    done: Arc<AtomicBool>,
}

/// In-process [`WorkflowRuntime`] implementation.
pub struct LocalRuntime {
    self_ref: Weak<LocalRuntime>,
    /// task queue → workflow type name → definition.
    workers: RwLock<HashMap<String, HashMap<String, Arc<dyn WorkflowDefinition>>>>,
    /// workflow id → instance handle. Entries outlive completion so queries
    /// keep answering.
    instances: RwLock<HashMap<String, InstanceHandle>>,
}

impl LocalRuntime {
    /// Create a new runtime with no registered workers.
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            self_ref: weak.clone(),
            workers: RwLock::new(HashMap::new()),
            instances: RwLock::new(HashMap::new()),
        })
    }

    /// Register a workflow definition on a task queue.
    pub async fn register_workflow(&self, task_queue: &str, definition: Arc<dyn WorkflowDefinition>) {
        let mut workers = self.workers.write().await;
        workers
            .entry(task_queue.to_string())
            .or_default()
            .insert(definition.name().to_string(), definition);
    }

    /// Whether a workflow instance has finished.
    pub async fn is_done(&self, workflow_id: &str) -> bool {
        let instances = self.instances.read().await;
        instances
            .get(workflow_id)
            .map(|h| h.done.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    fn arc_self(&self) -> Arc<dyn WorkflowRuntime> {
        // The Weak always upgrades: it points at the Arc every caller holds.
        self.self_ref
            .upgrade()
            .expect("LocalRuntime accessed outside its Arc")
    }
}

#[async_trait]
impl WorkflowRuntime for LocalRuntime {
    async fn start_workflow(&self, request: StartWorkflowRequest) -> Result<(), RuntimeError> {
        let definition = {
            let workers = self.workers.read().await;
            workers
                .get(&request.task_queue)
                .and_then(|defs| defs.get(&request.workflow))
                .cloned()
                .ok_or_else(|| {
                    RuntimeError::Unavailable(format!(
                        "no worker serves workflow '{}' on task queue '{}'",
                        request.workflow, request.task_queue
                    ))
                })?
        };

        let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let queries = Arc::new(RwLock::new(HashMap::new()));
        let done = Arc::new(AtomicBool::new(false));

        {
            let mut instances = self.instances.write().await;
            if instances.contains_key(&request.workflow_id) {
                return Err(RuntimeError::AlreadyStarted(request.workflow_id));
            }
            instances.insert(
                request.workflow_id.clone(),
                InstanceHandle {
                    signal_tx,
                    cancel: cancel.clone(),
                    queries: Arc::clone(&queries),
                    done: Arc::clone(&done),
                },
            );
        }

        let mut ctx = WorkflowContext {
            workflow_id: request.workflow_id.clone(),
            runtime: self.arc_self(),
            signals: signal_rx,
            cancel,
            queries: QueryPublisher { queries },
        };

        let workflow_id = request.workflow_id;
        let workflow = request.workflow;
        let input = request.input;
        tokio::spawn(async move {
            debug!(workflow_id = %workflow_id, workflow = %workflow, "Workflow started");
            match definition.run(&mut ctx, input).await {
                Ok(_) => {
                    debug!(workflow_id = %workflow_id, "Workflow completed");
                }
                Err(failure) => {
                    error!(
                        workflow_id = %workflow_id,
                        code = %failure.code,
                        error = %failure.message,
                        "Workflow failed"
                    );
                }
            }
            done.store(true, Ordering::Release);
        });

        Ok(())
    }

    async fn signal_workflow(
        &self,
        workflow_id: &str,
        signal: &str,
        payload: Value,
    ) -> Result<(), RuntimeError> {
        let tx = {
            let instances = self.instances.read().await;
            let handle = instances
                .get(workflow_id)
                .ok_or_else(|| RuntimeError::NotFound(workflow_id.to_string()))?;
            handle.signal_tx.clone()
        };

        // A closed receiver means the workflow already completed; late
        // signals are discarded rather than failing the sender.
        if tx
            .send(Signal {
                name: signal.to_string(),
                payload,
            })
            .await
            .is_err()
        {
            debug!(
                workflow_id = %workflow_id,
                signal = %signal,
                "Signal dropped — workflow already completed"
            );
        }
        Ok(())
    }

    async fn query_workflow(&self, workflow_id: &str, query: &str) -> Result<Value, RuntimeError> {
        let queries = {
            let instances = self.instances.read().await;
            let handle = instances
                .get(workflow_id)
                .ok_or_else(|| RuntimeError::NotFound(workflow_id.to_string()))?;
            Arc::clone(&handle.queries)
        };

        let map = queries.read().await;
        map.get(query)
            .cloned()
            .ok_or_else(|| RuntimeError::UnknownQuery(query.to_string()))
    }

    async fn cancel_workflow(&self, workflow_id: &str) -> Result<(), RuntimeError> {
        let instances = self.instances.read().await;
        let handle = instances
            .get(workflow_id)
            .ok_or_else(|| RuntimeError::NotFound(workflow_id.to_string()))?;

        if handle.done.load(Ordering::Acquire) {
            warn!(workflow_id = %workflow_id, "Cancellation requested for completed workflow");
        }
        handle.cancel.cancel();
        Ok(())
    }
}
