//! Progress reporter — the state-machine guard worker workflows emit
//! through.
//!
//! Wraps the task snapshot, enforces the lifecycle DAG, publishes the
//! snapshot as the task query, and (for streaming submissions) sends
//! `progress_update` signals to the paired streaming workflow. Once a
//! terminal state is reached, further transitions are rejected; once an
//! artifact is closed with `lastChunk`, further updates to that artifact id
//! are rejected.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::runtime::{QueryPublisher, WorkflowRuntime, PROGRESS_SIGNAL, TASK_QUERY};
use crate::types::{
    Artifact, ProgressEvent, Task, TaskArtifactUpdateEvent, TaskError, TaskState, TaskStatus,
    TaskStatusUpdateEvent,
};

/// Violations of the progress contract.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProgressError {
    /// The requested state change has no edge in the lifecycle DAG.
    #[error("invalid transition {from} → {to}")]
    InvalidTransition {
        /// Current state.
        from: TaskState,
        /// Requested state.
        to: TaskState,
    },

    /// The artifact id was already closed with `lastChunk: true`.
    #[error("artifact '{0}' already received its last chunk")]
    ArtifactClosed(String),

    /// An artifact update arrived after the task reached a terminal state.
    #[error("task already terminal")]
    TerminalReached,
}

struct ReporterState {
    task: Task,
    closed_artifacts: HashSet<String>,
    artifact_counter: u64,
}

/// Emits a task's status and artifact progress.
pub struct ProgressReporter {
    runtime: Arc<dyn WorkflowRuntime>,
    queries: QueryPublisher,
    /// Streaming workflow to signal; `None` for non-streaming submissions.
    stream_workflow_id: Option<String>,
    state: Mutex<ReporterState>,
}

impl ProgressReporter {
    /// Create a reporter around the initial task snapshot.
    pub fn new(
        task: Task,
        stream_workflow_id: Option<String>,
        runtime: Arc<dyn WorkflowRuntime>,
        queries: QueryPublisher,
    ) -> Self {
        Self {
            runtime,
            queries,
            stream_workflow_id,
            state: Mutex::new(ReporterState {
                task,
                closed_artifacts: HashSet::new(),
                artifact_counter: 0,
            }),
        }
    }

    /// The current task snapshot.
    pub async fn snapshot(&self) -> Task {
        self.state.lock().await.task.clone()
    }

    /// Whether the task has reached a terminal state.
    pub async fn is_terminal(&self) -> bool {
        self.state.lock().await.task.status.state.is_terminal()
    }

    /// Allocate the next artifact id for this task.
    pub async fn new_artifact_id(&self) -> String {
        let mut state = self.state.lock().await;
        state.artifact_counter += 1;
        format!("artifact-{}", state.artifact_counter)
    }

    /// Publish the current snapshot as the task query.
    pub async fn publish_snapshot(&self) {
        let task = self.snapshot().await;
        match serde_json::to_value(&task) {
            Ok(value) => self.queries.publish(TASK_QUERY, value).await,
            Err(e) => warn!(task_id = %task.id, error = %e, "Task snapshot not serializable"),
        }
    }

    /// Transition to `working`.
    pub async fn working(&self) -> Result<(), ProgressError> {
        self.update_status(TaskState::Working).await
    }

    /// Terminate with `completed`.
    pub async fn complete(&self) -> Result<(), ProgressError> {
        self.update_status(TaskState::Completed).await
    }

    /// Terminate with `failed`, recording the outcome on the task.
    pub async fn fail(&self, code: &str, message: &str) -> Result<(), ProgressError> {
        {
            let mut state = self.state.lock().await;
            state.task.error = Some(TaskError {
                code: code.to_string(),
                message: message.to_string(),
            });
        }
        self.update_status(TaskState::Failed).await
    }

    /// Terminate with `canceled`.
    pub async fn cancel(&self) -> Result<(), ProgressError> {
        self.update_status(TaskState::Canceled).await
    }

    /// Apply a state change, publish the snapshot, and emit the status
    /// event to the paired streaming workflow.
    async fn update_status(&self, next: TaskState) -> Result<(), ProgressError> {
        let event = {
            let mut state = self.state.lock().await;
            let current = state.task.status.state;
            if !current.can_transition_to(next) {
                warn!(
                    task_id = %state.task.id,
                    from = %current,
                    to = %next,
                    "Rejected status transition"
                );
                return Err(ProgressError::InvalidTransition {
                    from: current,
                    to: next,
                });
            }

            let status = TaskStatus::now(next);
            state.task.status = status.clone();
            ProgressEvent::StatusUpdate(TaskStatusUpdateEvent {
                task_id: state.task.id.clone(),
                context_id: state.task.context_id.clone(),
                kind: "status-update".to_string(),
                status,
                r#final: next.is_terminal(),
            })
        };

        self.publish_snapshot().await;
        self.emit(event).await;
        Ok(())
    }

    /// Record an artifact update and emit it to the paired streaming
    /// workflow.
    ///
    /// `append: false` replaces (or creates) the artifact; `append: true`
    /// extends a previously sent artifact with the same id. An append
    /// without a base artifact is dropped with a warning. `last_chunk:
    /// true` closes the artifact id for further updates.
    pub async fn add_artifact(
        &self,
        artifact: Artifact,
        append: bool,
        last_chunk: bool,
    ) -> Result<(), ProgressError> {
        let event = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            if state.task.status.state.is_terminal() {
                return Err(ProgressError::TerminalReached);
            }
            if state.closed_artifacts.contains(&artifact.artifact_id) {
                return Err(ProgressError::ArtifactClosed(artifact.artifact_id));
            }

            let existing = state
                .task
                .artifacts
                .iter_mut()
                .find(|a| a.artifact_id == artifact.artifact_id);

            if append {
                match existing {
                    Some(base) => base.parts.extend(artifact.parts.iter().cloned()),
                    None => {
                        warn!(
                            task_id = %state.task.id,
                            artifact_id = %artifact.artifact_id,
                            "Append without a base artifact — dropping chunk"
                        );
                        return Ok(());
                    }
                }
            } else {
                match existing {
                    Some(base) => *base = artifact.clone(),
                    None => state.task.artifacts.push(artifact.clone()),
                }
            }

            if last_chunk {
                state.closed_artifacts.insert(artifact.artifact_id.clone());
            }

            ProgressEvent::ArtifactUpdate(TaskArtifactUpdateEvent {
                task_id: state.task.id.clone(),
                context_id: state.task.context_id.clone(),
                kind: "artifact-update".to_string(),
                artifact,
                append,
                last_chunk,
            })
        };

        self.publish_snapshot().await;
        self.emit(event).await;
        Ok(())
    }

    /// Send a progress signal to the streaming workflow, when one is
    /// attached. Delivery problems are logged, never surfaced: the task's
    /// own outcome must not depend on stream liveness.
    async fn emit(&self, event: ProgressEvent) {
        let Some(ref stream_id) = self.stream_workflow_id else {
            return;
        };

        let payload = match serde_json::to_value(&event) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(stream_id = %stream_id, error = %e, "Progress event not serializable");
                return;
            }
        };

        match self
            .runtime
            .signal_workflow(stream_id, PROGRESS_SIGNAL, payload)
            .await
        {
            Ok(()) => {}
            Err(e) => {
                debug!(
                    stream_id = %stream_id,
                    error = %e,
                    "Progress signal not delivered"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{LocalRuntime, StartWorkflowRequest, WorkflowContext, WorkflowDefinition};
    use crate::runtime::local::WorkflowFailure;
    use crate::types::{Message, Part};
    use async_trait::async_trait;
    use serde_json::Value;

    fn test_task(id: &str) -> Task {
        Task {
            id: id.to_string(),
            context_id: "ctx".to_string(),
            agent_id: "echo-agent".to_string(),
            kind: "task".to_string(),
            status: TaskStatus::now(TaskState::Submitted),
            input: Message::user_text("hi"),
            artifacts: Vec::new(),
            error: None,
            metadata: None,
            created_at: crate::types::utc_timestamp_millis(),
        }
    }

    /// Workflow that hands its context handles to the test body.
    struct Probe {
        tx: std::sync::Mutex<Option<tokio::sync::oneshot::Sender<(QueryPublisher, Arc<dyn WorkflowRuntime>)>>>,
    }

    #[async_trait]
    impl WorkflowDefinition for Probe {
        fn name(&self) -> &str {
            "probe"
        }

        async fn run(
            &self,
            ctx: &mut WorkflowContext,
            _input: Value,
        ) -> Result<Value, WorkflowFailure> {
            if let Some(tx) = self.tx.lock().unwrap().take() {
                let _ = tx.send((ctx.query_publisher(), ctx.runtime()));
            }
            // Stay alive until cancelled so queries remain inspectable.
            ctx.cancellation().cancelled().await;
            Ok(Value::Null)
        }
    }

    async fn reporter_fixture() -> (Arc<LocalRuntime>, ProgressReporter) {
        let runtime = LocalRuntime::new();
        let (tx, rx) = tokio::sync::oneshot::channel();
        runtime
            .register_workflow(
                "probe-queue",
                Arc::new(Probe {
                    tx: std::sync::Mutex::new(Some(tx)),
                }),
            )
            .await;
        runtime
            .start_workflow(StartWorkflowRequest {
                workflow: "probe".to_string(),
                workflow_id: "t1".to_string(),
                task_queue: "probe-queue".to_string(),
                input: Value::Null,
            })
            .await
            .unwrap();
        let (queries, rt) = rx.await.unwrap();
        let reporter = ProgressReporter::new(test_task("t1"), None, rt, queries);
        (runtime, reporter)
    }

    #[tokio::test]
    async fn lifecycle_happy_path() {
        let (runtime, reporter) = reporter_fixture().await;
        reporter.publish_snapshot().await;
        reporter.working().await.unwrap();
        reporter.complete().await.unwrap();
        assert!(reporter.is_terminal().await);

        let snapshot = runtime.query_workflow("t1", TASK_QUERY).await.unwrap();
        assert_eq!(snapshot["status"]["state"], "completed");
    }

    #[tokio::test]
    async fn no_transitions_out_of_terminal() {
        let (_runtime, reporter) = reporter_fixture().await;
        reporter.working().await.unwrap();
        reporter.cancel().await.unwrap();

        assert!(matches!(
            reporter.complete().await,
            Err(ProgressError::InvalidTransition { .. })
        ));
        assert!(matches!(
            reporter
                .add_artifact(
                    Artifact {
                        artifact_id: "a1".into(),
                        name: None,
                        description: None,
                        parts: vec![Part::text("late")],
                    },
                    false,
                    true
                )
                .await,
            Err(ProgressError::TerminalReached)
        ));
    }

    #[tokio::test]
    async fn fail_records_error() {
        let (_runtime, reporter) = reporter_fixture().await;
        reporter.working().await.unwrap();
        reporter.fail("agent_error", "boom").await.unwrap();

        let task = reporter.snapshot().await;
        assert_eq!(task.status.state, TaskState::Failed);
        let error = task.error.unwrap();
        assert_eq!(error.code, "agent_error");
        assert_eq!(error.message, "boom");
    }

    #[tokio::test]
    async fn artifact_append_and_close() {
        let (_runtime, reporter) = reporter_fixture().await;
        reporter.working().await.unwrap();

        let id = reporter.new_artifact_id().await;
        let base = Artifact {
            artifact_id: id.clone(),
            name: Some("output".into()),
            description: None,
            parts: vec![Part::text("Echo:")],
        };
        reporter.add_artifact(base, false, false).await.unwrap();

        let chunk = Artifact {
            artifact_id: id.clone(),
            name: None,
            description: None,
            parts: vec![Part::text(" hi")],
        };
        reporter.add_artifact(chunk.clone(), true, true).await.unwrap();

        let task = reporter.snapshot().await;
        assert_eq!(task.artifacts.len(), 1);
        assert_eq!(task.artifacts[0].parts.len(), 2);

        // Closed artifact rejects further chunks.
        assert!(matches!(
            reporter.add_artifact(chunk, true, false).await,
            Err(ProgressError::ArtifactClosed(_))
        ));
    }

    #[tokio::test]
    async fn append_without_base_is_dropped() {
        let (_runtime, reporter) = reporter_fixture().await;
        reporter.working().await.unwrap();

        let orphan = Artifact {
            artifact_id: "never-created".into(),
            name: None,
            description: None,
            parts: vec![Part::text("x")],
        };
        reporter.add_artifact(orphan, true, false).await.unwrap();
        assert!(reporter.snapshot().await.artifacts.is_empty());
    }
}
