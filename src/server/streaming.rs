//! Streaming engine — pairs each live SSE connection with a durable
//! stream-relay workflow.
//!
//! For every accepted `message/stream` the gateway registers an in-memory
//! [`StreamRegistration`]-style sink, starts a [`StreamRelayWorkflow`] whose
//! id is derived from the task id, and starts the task workflow with that id
//! in its input. The task workflow sends `progress_update` signals to the
//! relay; the relay pushes each one through the registry into the SSE
//! socket, in signal order, until a `final: true` status update arrives.
//!
//! Liveness is bidirectional: a dead HTTP writer cancels both workflows,
//! and a relay that never sees a final event synthesizes a `failed`
//! terminal frame when its watchdog fires.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::convert::Infallible;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use axum::http::header::{self, HeaderValue};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::config::StreamingConfig;
use crate::runtime::{
    WorkflowContext, WorkflowDefinition, WorkflowFailure, WorkflowRuntime, PROGRESS_SIGNAL,
};
use crate::types::{ProgressEvent, TaskStatus, TaskStatusUpdateEvent, TaskState};

use super::task_cache::TaskCache;

/// Workflow type name of the gateway's stream relay.
pub const STREAM_RELAY_WORKFLOW: &str = "stream-relay";

/// Shard count for the stream registry.
const REGISTRY_SHARDS: usize = 16;

/// Event channel depth per stream. Small on purpose: a slow client blocks
/// the relay's push, which blocks signal processing — the durable workflow
/// history is the buffer, not gateway memory.
const EVENT_CHANNEL_CAPACITY: usize = 8;

/// Deterministic streaming workflow id for a task.
pub fn stream_workflow_id(task_id: &str) -> String {
    format!("{task_id}-stream")
}

/// Push failure modes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PushError {
    /// No live registration for the stream id.
    #[error("no live stream registration")]
    Gone,

    /// The registration exists but its receiver is gone (client
    /// disconnected).
    #[error("stream client disconnected")]
    Closed,
}

struct StreamHandle {
    tx: mpsc::Sender<ProgressEvent>,
    alive: Arc<AtomicBool>,
}

/// Receiving half of a stream registration, consumed by the SSE write loop.
pub struct StreamReceiver {
    rx: mpsc::Receiver<ProgressEvent>,
}

/// Sharded map of live stream registrations, keyed by streaming workflow
/// id. Writes happen only on registration and teardown; every pushed event
/// is a read.
pub struct StreamRegistry {
    shards: Vec<RwLock<HashMap<String, StreamHandle>>>,
}

impl StreamRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            shards: (0..REGISTRY_SHARDS)
                .map(|_| RwLock::new(HashMap::new()))
                .collect(),
        }
    }

    fn shard(&self, stream_id: &str) -> &RwLock<HashMap<String, StreamHandle>> {
        let mut hasher = DefaultHasher::new();
        stream_id.hash(&mut hasher);
        &self.shards[hasher.finish() as usize % self.shards.len()]
    }

    /// Register a sink for a stream id, replacing any stale entry.
    pub fn register(&self, stream_id: &str) -> StreamReceiver {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let handle = StreamHandle {
            tx,
            alive: Arc::new(AtomicBool::new(true)),
        };
        let mut shard = self.shard(stream_id).write().expect("registry lock poisoned");
        if shard.insert(stream_id.to_string(), handle).is_some() {
            warn!(stream_id = %stream_id, "Replaced stale stream registration");
        }
        StreamReceiver { rx }
    }

    /// Remove a registration. The paired receiver then drains and closes.
    pub fn deregister(&self, stream_id: &str) {
        let mut shard = self.shard(stream_id).write().expect("registry lock poisoned");
        shard.remove(stream_id);
    }

    /// Flip a registration's liveness without removing it; subsequent
    /// pushes fail with [`PushError::Gone`].
    pub fn mark_dead(&self, stream_id: &str) {
        let shard = self.shard(stream_id).read().expect("registry lock poisoned");
        if let Some(handle) = shard.get(stream_id) {
            handle.alive.store(false, Ordering::Release);
        }
    }

    /// Whether a live registration exists. Test hook.
    pub fn is_live(&self, stream_id: &str) -> bool {
        let shard = self.shard(stream_id).read().expect("registry lock poisoned");
        shard
            .get(stream_id)
            .map(|h| h.alive.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    /// Write one event into the stream's sink.
    ///
    /// Blocks while the channel is full — that is the backpressure path: an
    /// unresponsive client slows the relay instead of growing a queue.
    pub async fn push(&self, stream_id: &str, event: ProgressEvent) -> Result<(), PushError> {
        let (tx, alive) = {
            let shard = self.shard(stream_id).read().expect("registry lock poisoned");
            let handle = shard.get(stream_id).ok_or(PushError::Gone)?;
            if !handle.alive.load(Ordering::Acquire) {
                return Err(PushError::Gone);
            }
            (handle.tx.clone(), Arc::clone(&handle.alive))
        };

        tx.send(event).await.map_err(|_| {
            alive.store(false, Ordering::Release);
            PushError::Closed
        })
    }
}

impl Default for StreamRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Stream-relay workflow
// ---------------------------------------------------------------------------

/// Input of the stream-relay workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamRelayInput {
    /// The task whose progress this relay carries.
    pub task_id: String,

    /// Context the task belongs to.
    pub context_id: String,
}

/// Gateway-side workflow owning the 1:1 link between a durable signal queue
/// and a live SSE connection.
///
/// Processes `progress_update` signals serially in arrival order, so the
/// client observes exactly the task workflow's send order. Completes at the
/// first final frame, on cancellation, when the client disappears, or when
/// the session watchdog fires.
pub struct StreamRelayWorkflow {
    registry: Arc<StreamRegistry>,
    cache: Arc<TaskCache>,
    settings: StreamingConfig,
}

impl StreamRelayWorkflow {
    /// Build the relay over the shared registry and task cache.
    pub fn new(registry: Arc<StreamRegistry>, cache: Arc<TaskCache>, settings: StreamingConfig) -> Self {
        Self {
            registry,
            cache,
            settings,
        }
    }

    /// Push with bounded attempts and a per-attempt write deadline. An
    /// attempt that cannot hand the event to the socket in time counts as
    /// a failure; persistent failure abandons the stream.
    async fn push_with_retries(&self, stream_id: &str, event: ProgressEvent) -> Result<(), PushError> {
        let deadline = self.settings.write_deadline();
        let mut attempt = 1;
        loop {
            let result = match tokio::time::timeout(
                deadline,
                self.registry.push(stream_id, event.clone()),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => {
                    warn!(
                        stream_id = %stream_id,
                        deadline_ms = deadline.as_millis() as u64,
                        "SSE write deadline exceeded"
                    );
                    Err(PushError::Closed)
                }
            };

            match result {
                Ok(()) => return Ok(()),
                Err(err) if attempt < self.settings.push_attempts => {
                    debug!(
                        stream_id = %stream_id,
                        attempt,
                        error = %err,
                        "SSE push failed, retrying"
                    );
                    tokio::time::sleep(self.settings.push_retry_delay()).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[async_trait]
impl WorkflowDefinition for StreamRelayWorkflow {
    fn name(&self) -> &str {
        STREAM_RELAY_WORKFLOW
    }

    async fn run(&self, ctx: &mut WorkflowContext, input: Value) -> Result<Value, WorkflowFailure> {
        let input: StreamRelayInput = serde_json::from_value(input)
            .map_err(|e| WorkflowFailure::new("bad_input", format!("invalid relay input: {e}")))?;
        let stream_id = ctx.workflow_id().to_string();
        let cancellation = ctx.cancellation();
        let runtime = ctx.runtime();

        let watchdog = tokio::time::sleep(self.settings.max_session());
        tokio::pin!(watchdog);

        let outcome = loop {
            tokio::select! {
                _ = cancellation.cancelled() => {
                    debug!(stream_id = %stream_id, "Stream relay cancelled");
                    break "cancelled";
                }

                _ = &mut watchdog => {
                    // Orphaned stream: the task workflow never delivered a
                    // final frame within the session limit.
                    warn!(
                        stream_id = %stream_id,
                        task_id = %input.task_id,
                        "Stream session exceeded maximum duration"
                    );
                    let status = TaskStatus::now(TaskState::Failed);
                    self.cache.observe_status(&input.task_id, status.clone()).await;
                    let event = ProgressEvent::StatusUpdate(TaskStatusUpdateEvent {
                        task_id: input.task_id.clone(),
                        context_id: input.context_id.clone(),
                        kind: "status-update".to_string(),
                        status,
                        r#final: true,
                    });
                    let _ = self.push_with_retries(&stream_id, event).await;
                    break "session_timeout";
                }

                signal = ctx.next_signal() => {
                    let Some(signal) = signal else {
                        break "signal_channel_closed";
                    };
                    if signal.name != PROGRESS_SIGNAL {
                        warn!(
                            stream_id = %stream_id,
                            signal = %signal.name,
                            "Ignoring unexpected signal"
                        );
                        continue;
                    }

                    let event: ProgressEvent = match serde_json::from_value(signal.payload) {
                        Ok(event) => event,
                        Err(e) => {
                            error!(
                                stream_id = %stream_id,
                                error = %e,
                                "Dropping malformed progress signal (producer bug)"
                            );
                            continue;
                        }
                    };
                    if let Err(reason) = event.validate() {
                        error!(
                            stream_id = %stream_id,
                            reason = %reason,
                            "Dropping contract-violating progress event (producer bug)"
                        );
                        continue;
                    }

                    // Status observations keep the task cache coherent
                    // without a runtime query.
                    if let ProgressEvent::StatusUpdate(ref update) = event {
                        self.cache
                            .observe_status(&input.task_id, update.status.clone())
                            .await;
                    }

                    let is_final = event.is_final();
                    match self.push_with_retries(&stream_id, event).await {
                        Ok(()) if is_final => break "final",
                        Ok(()) => {}
                        Err(err) => {
                            // The client is gone; the task should stop
                            // burning the worker pool.
                            warn!(
                                stream_id = %stream_id,
                                task_id = %input.task_id,
                                error = %err,
                                "Stream push failed, cancelling task workflow"
                            );
                            if let Err(e) = runtime.cancel_workflow(&input.task_id).await {
                                debug!(task_id = %input.task_id, error = %e, "Task cancel not delivered");
                            }
                            break "push_failed";
                        }
                    }
                }
            }
        };

        self.registry.deregister(&stream_id);
        debug!(stream_id = %stream_id, outcome = outcome, "Stream relay finished");
        Ok(Value::String(outcome.to_string()))
    }
}

// ---------------------------------------------------------------------------
// SSE write loop
// ---------------------------------------------------------------------------

/// Cleans up when the SSE body is dropped before the stream finished —
/// which is exactly the client-disconnect case. Marks the registration
/// dead and requests cancellation of both workflows.
struct DisconnectGuard {
    registry: Arc<StreamRegistry>,
    runtime: Arc<dyn WorkflowRuntime>,
    task_id: String,
    stream_id: String,
    completed: bool,
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        warn!(
            task_id = %self.task_id,
            stream_id = %self.stream_id,
            "SSE client disconnected mid-stream"
        );
        self.registry.mark_dead(&self.stream_id);

        let runtime = Arc::clone(&self.runtime);
        let task_id = std::mem::take(&mut self.task_id);
        let stream_id = std::mem::take(&mut self.stream_id);
        tokio::spawn(async move {
            if let Err(e) = runtime.cancel_workflow(&stream_id).await {
                debug!(stream_id = %stream_id, error = %e, "Relay cancel not delivered");
            }
            if let Err(e) = runtime.cancel_workflow(&task_id).await {
                debug!(task_id = %task_id, error = %e, "Task cancel not delivered");
            }
        });
    }
}

/// Build the SSE response for an accepted stream.
///
/// Each event is written as one `data: <json>` frame; heartbeat comments
/// flow while the stream idles; a final frame is followed by a terminating
/// comment and the socket closes.
pub fn sse_response(
    registry: Arc<StreamRegistry>,
    runtime: Arc<dyn WorkflowRuntime>,
    settings: &StreamingConfig,
    task_id: String,
    stream_id: String,
    receiver: StreamReceiver,
) -> Response {
    let heartbeat = settings.heartbeat();
    let mut guard = DisconnectGuard {
        registry,
        runtime,
        task_id,
        stream_id,
        completed: false,
    };
    let mut rx = receiver.rx;

    let stream = async_stream::stream! {
        while let Some(event) = rx.recv().await {
            let is_final = event.is_final();
            match serde_json::to_string(&event) {
                Ok(json) => yield Ok::<Event, Infallible>(Event::default().data(json)),
                Err(e) => {
                    error!(error = %e, "Progress event not serializable, skipping frame");
                }
            }
            if is_final {
                break;
            }
        }
        // Either the final frame was written or the relay tore the
        // registration down; neither is a client disconnect.
        guard.completed = true;
        yield Ok(Event::default().comment("stream closed"));
    };

    let mut response = Sse::new(stream)
        .keep_alive(KeepAlive::new().interval(heartbeat).text("heartbeat"))
        .into_response();
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;

    fn event(task_id: &str, state: TaskState) -> ProgressEvent {
        ProgressEvent::StatusUpdate(TaskStatusUpdateEvent {
            task_id: task_id.to_string(),
            context_id: "ctx".to_string(),
            kind: "status-update".to_string(),
            status: TaskStatus::now(state),
            r#final: state.is_terminal(),
        })
    }

    #[test]
    fn stream_ids_are_deterministic() {
        assert_eq!(stream_workflow_id("abc"), "abc-stream");
        assert_eq!(stream_workflow_id("abc"), stream_workflow_id("abc"));
    }

    #[tokio::test]
    async fn push_reaches_registered_receiver() {
        let registry = StreamRegistry::new();
        let mut receiver = registry.register("s1");

        registry.push("s1", event("t1", TaskState::Working)).await.unwrap();
        let got = receiver.rx.recv().await.unwrap();
        assert_eq!(got.task_id(), "t1");
    }

    #[tokio::test]
    async fn push_to_unknown_stream_is_gone() {
        let registry = StreamRegistry::new();
        let err = registry
            .push("nope", event("t1", TaskState::Working))
            .await
            .unwrap_err();
        assert_eq!(err, PushError::Gone);
    }

    #[tokio::test]
    async fn dead_registration_rejects_pushes() {
        let registry = StreamRegistry::new();
        let _receiver = registry.register("s1");
        assert!(registry.is_live("s1"));

        registry.mark_dead("s1");
        assert!(!registry.is_live("s1"));
        let err = registry
            .push("s1", event("t1", TaskState::Working))
            .await
            .unwrap_err();
        assert_eq!(err, PushError::Gone);
    }

    #[tokio::test]
    async fn dropped_receiver_surfaces_as_closed() {
        let registry = StreamRegistry::new();
        let receiver = registry.register("s1");
        drop(receiver);

        let err = registry
            .push("s1", event("t1", TaskState::Working))
            .await
            .unwrap_err();
        assert_eq!(err, PushError::Closed);
        // The failed push flips liveness for later callers.
        assert!(!registry.is_live("s1"));
    }

    #[tokio::test]
    async fn deregister_closes_receiver() {
        let registry = StreamRegistry::new();
        let mut receiver = registry.register("s1");
        registry.deregister("s1");
        assert!(receiver.rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn relay_watchdog_synthesizes_failed_final() {
        let registry = Arc::new(StreamRegistry::new());
        let cache = Arc::new(TaskCache::new(CacheConfig::default()));
        let settings = StreamingConfig {
            max_session_secs: 0,
            ..StreamingConfig::default()
        };

        let relay = StreamRelayWorkflow::new(Arc::clone(&registry), cache, settings);

        let runtime = crate::runtime::LocalRuntime::new();
        runtime.register_workflow("gw", Arc::new(relay)).await;

        let mut receiver = registry.register("t1-stream");
        runtime
            .start_workflow(crate::runtime::StartWorkflowRequest {
                workflow: STREAM_RELAY_WORKFLOW.to_string(),
                workflow_id: "t1-stream".to_string(),
                task_queue: "gw".to_string(),
                input: serde_json::to_value(StreamRelayInput {
                    task_id: "t1".to_string(),
                    context_id: "ctx".to_string(),
                })
                .unwrap(),
            })
            .await
            .unwrap();

        let frame = receiver.rx.recv().await.expect("watchdog frame");
        match frame {
            ProgressEvent::StatusUpdate(update) => {
                assert!(update.r#final);
                assert_eq!(update.status.state, TaskState::Failed);
            }
            other => panic!("expected status update, got {other:?}"),
        }
        // Registration is torn down after the synthesized frame.
        assert!(receiver.rx.recv().await.is_none());
    }
}
