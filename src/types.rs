//! Protocol data model — tasks, messages, artifacts, streaming events, and
//! agent cards, with their JSON wire shapes.
//!
//! Everything here serializes camelCase. Discriminated unions (`Part`,
//! `ProgressEvent`) are tagged by a `kind` field; parsers reject unknown
//! kinds rather than passing them through.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use chrono::{SecondsFormat, Utc};

// ============================================================================
// Task lifecycle
// ============================================================================

/// The lifecycle state of a task.
///
/// Transitions form a DAG: `submitted → working`, `submitted → canceled`,
/// `working → {completed, failed, canceled}`. Terminal states have no
/// outgoing edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskState {
    /// Task has been admitted but not yet picked up by a worker.
    Submitted,
    /// A worker is actively processing the task.
    Working,
    /// Task completed successfully.
    Completed,
    /// Task failed.
    Failed,
    /// Task was canceled.
    Canceled,
}

impl TaskState {
    /// Returns `true` for states with no outgoing transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Canceled
        )
    }

    /// Whether the state machine permits a direct edge `self → next`.
    ///
    /// Re-observing the current state is allowed (idempotent updates from
    /// the workflow runtime); edges out of terminal states are not.
    pub fn can_transition_to(self, next: TaskState) -> bool {
        if self == next {
            return true;
        }
        match self {
            TaskState::Submitted => matches!(next, TaskState::Working | TaskState::Canceled),
            TaskState::Working => next.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Submitted => "submitted",
            TaskState::Working => "working",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Canceled => "canceled",
        };
        write!(f, "{}", s)
    }
}

/// Current status of a task: state plus the instant it was observed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatus {
    /// The current state.
    pub state: TaskState,

    /// ISO-8601 UTC timestamp with millisecond precision
    /// (`YYYY-MM-DDTHH:MM:SS.sssZ`).
    pub timestamp: String,
}

impl TaskStatus {
    /// Create a status stamped with the current UTC time.
    pub fn now(state: TaskState) -> Self {
        Self {
            state,
            timestamp: utc_timestamp_millis(),
        }
    }
}

/// Outcome of a failed task: a stable machine code plus human text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskError {
    /// Stable error code (e.g. `"agent_error"`, `"session_timeout"`).
    pub code: String,

    /// Human-readable description.
    pub message: String,
}

/// A task — one unit of work addressed to an agent.
///
/// Created by the gateway on admission; thereafter mutated only by the
/// workflow runtime. The gateway reads task state through its cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Unique task identifier; doubles as the task workflow id.
    pub id: String,

    /// Conversation grouping identifier.
    pub context_id: String,

    /// The agent this task is addressed to.
    pub agent_id: String,

    /// Discriminator field — always "task".
    #[serde(default = "kind_task")]
    pub kind: String,

    /// Current status.
    pub status: TaskStatus,

    /// The original message that created the task.
    pub input: Message,

    /// Artifacts produced so far, in production order.
    #[serde(default)]
    pub artifacts: Vec<Artifact>,

    /// Failure outcome, populated when `status.state` is `failed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,

    /// Free-form metadata carried from the request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,

    /// ISO-8601 UTC creation instant with millisecond precision.
    pub created_at: String,
}

// ============================================================================
// Messages & parts
// ============================================================================

/// The role of a message sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Message from the user / client.
    #[default]
    User,
    /// Message from the agent.
    Agent,
}

/// A single message: an ordered list of content parts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Optional client-assigned message identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,

    /// Who sent this message. Defaults to `user` when omitted.
    #[serde(default)]
    pub role: Role,

    /// Discriminator field — always "message".
    #[serde(default = "kind_message")]
    pub kind: String,

    /// Content parts. Must be non-empty for submissions.
    pub parts: Vec<Part>,

    /// Free-form metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl Message {
    /// Build a single-text-part user message.
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            message_id: None,
            role: Role::User,
            kind: kind_message(),
            parts: vec![Part::text(text)],
            metadata: None,
        }
    }

    /// Concatenated text of all text parts, joined by `delimiter`.
    pub fn text_content(&self, delimiter: &str) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                Part::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join(delimiter)
    }
}

/// A file reference inside a file part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRef {
    /// Optional file name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// URI pointing at the file content.
    pub uri: String,
}

/// A content part within a message or artifact.
///
/// The `kind` tag is a closed set; deserialization of any other value
/// fails. Wire shapes:
/// - `{"kind": "text", "text": "hello"}`
/// - `{"kind": "file", "file": {"name": "report.pdf", "uri": "https://…"}}`
/// - `{"kind": "data", "data": {"key": "value"}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Part {
    /// A text part. Discriminator: `"text"`.
    #[serde(rename = "text")]
    Text {
        /// The text content.
        text: String,
    },
    /// A file reference part. Discriminator: `"file"`.
    #[serde(rename = "file")]
    File {
        /// The referenced file.
        file: FileRef,
    },
    /// A structured data part. Discriminator: `"data"`.
    #[serde(rename = "data")]
    Data {
        /// Arbitrary structured data.
        data: serde_json::Value,
    },
}

impl Part {
    /// Build a text part.
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text { text: text.into() }
    }
}

/// An artifact produced by a task, composed of ordered parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    /// Stable identifier across incremental updates of the same artifact.
    pub artifact_id: String,

    /// Human-readable name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Optional description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Content parts.
    pub parts: Vec<Part>,
}

// ============================================================================
// Streaming events
// ============================================================================

/// Progress signal payload: a task's status changed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatusUpdateEvent {
    /// The task whose status changed.
    pub task_id: String,

    /// Context the task belongs to.
    pub context_id: String,

    /// Discriminator field — always "status-update".
    #[serde(default = "kind_status_update")]
    pub kind: String,

    /// The new status.
    pub status: TaskStatus,

    /// `true` iff `status.state` is terminal; a stream always ends with a
    /// `final: true` status update.
    #[serde(rename = "final")]
    pub r#final: bool,
}

/// Progress signal payload: an artifact was created or extended.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskArtifactUpdateEvent {
    /// The task that produced the artifact.
    pub task_id: String,

    /// Context the task belongs to.
    pub context_id: String,

    /// Discriminator field — always "artifact-update".
    #[serde(default = "kind_artifact_update")]
    pub kind: String,

    /// The artifact payload for this update.
    pub artifact: Artifact,

    /// `true` to concatenate onto the previously sent artifact with the
    /// same `artifactId`; `false` to replace it.
    pub append: bool,

    /// `true` when no further updates will carry this `artifactId`.
    pub last_chunk: bool,
}

/// A progress signal as carried on the wire — either a status update or an
/// artifact update, discriminated by `kind`.
///
/// Serializes flat (no wrapper key). Deserialization is strict: any `kind`
/// outside the two literals is an error, because the gateway only ever
/// receives these from producers it defines the contract for.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// A status change.
    StatusUpdate(TaskStatusUpdateEvent),
    /// An artifact creation or extension.
    ArtifactUpdate(TaskArtifactUpdateEvent),
}

impl ProgressEvent {
    /// The task this event belongs to.
    pub fn task_id(&self) -> &str {
        match self {
            ProgressEvent::StatusUpdate(e) => &e.task_id,
            ProgressEvent::ArtifactUpdate(e) => &e.task_id,
        }
    }

    /// `true` for a status update flagged as the stream's last frame.
    pub fn is_final(&self) -> bool {
        matches!(self, ProgressEvent::StatusUpdate(e) if e.r#final)
    }

    /// Validate the event-shape contract.
    ///
    /// A status update must carry `final` exactly when its state is
    /// terminal, and the `kind` literals must match the variant. Violations
    /// indicate a producer bug.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            ProgressEvent::StatusUpdate(e) => {
                if e.kind != "status-update" {
                    return Err(format!("status update carries kind '{}'", e.kind));
                }
                if e.r#final != e.status.state.is_terminal() {
                    return Err(format!(
                        "final={} does not match state '{}'",
                        e.r#final, e.status.state
                    ));
                }
                Ok(())
            }
            ProgressEvent::ArtifactUpdate(e) => {
                if e.kind != "artifact-update" {
                    return Err(format!("artifact update carries kind '{}'", e.kind));
                }
                Ok(())
            }
        }
    }
}

impl Serialize for ProgressEvent {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ProgressEvent::StatusUpdate(inner) => inner.serialize(serializer),
            ProgressEvent::ArtifactUpdate(inner) => inner.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for ProgressEvent {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        let kind = value
            .get("kind")
            .and_then(|v| v.as_str())
            .ok_or_else(|| serde::de::Error::custom("missing 'kind' field"))?;

        match kind {
            "status-update" => {
                let event: TaskStatusUpdateEvent =
                    serde_json::from_value(value).map_err(serde::de::Error::custom)?;
                Ok(ProgressEvent::StatusUpdate(event))
            }
            "artifact-update" => {
                let event: TaskArtifactUpdateEvent =
                    serde_json::from_value(value).map_err(serde::de::Error::custom)?;
                Ok(ProgressEvent::ArtifactUpdate(event))
            }
            other => Err(serde::de::Error::custom(format!(
                "unknown kind '{}' — expected status-update or artifact-update",
                other
            ))),
        }
    }
}

// ============================================================================
// Agent cards
// ============================================================================

/// Public descriptor of an agent: identity, capabilities, skills, and the
/// transport URL clients should use.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCard {
    /// Human-readable name.
    pub name: String,

    /// What the agent does.
    pub description: String,

    /// Agent version string.
    pub version: String,

    /// Dedicated per-agent base URL. The agent identifier lives in the
    /// path, never in query parameters.
    pub url: String,

    /// Capability flags.
    #[serde(default)]
    pub capabilities: AgentCapabilities,

    /// Skills the agent advertises.
    #[serde(default)]
    pub skills: Vec<AgentSkill>,

    /// Default MIME types accepted as input.
    #[serde(default = "default_modes")]
    pub default_input_modes: Vec<String>,

    /// Default MIME types produced as output.
    #[serde(default = "default_modes")]
    pub default_output_modes: Vec<String>,

    /// Named security scheme definitions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security_schemes: Option<HashMap<String, SecurityScheme>>,

    /// Protocol version the agent speaks.
    #[serde(
        default = "default_protocol_version",
        skip_serializing_if = "Option::is_none"
    )]
    pub protocol_version: Option<String>,
}

/// Agent capability flags.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCapabilities {
    /// Whether the agent supports `message/stream`.
    #[serde(default)]
    pub streaming: bool,

    /// Whether the agent supports push notifications.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub push_notifications: Option<bool>,
}

/// A skill an agent advertises on its card.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSkill {
    /// Unique skill identifier.
    pub id: String,

    /// Human-readable skill name.
    pub name: String,

    /// What the skill does.
    pub description: String,

    /// Categorization tags.
    #[serde(default)]
    pub tags: Vec<String>,

    /// Example prompts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub examples: Option<Vec<String>>,
}

/// A security scheme declared on an agent card.
///
/// Discriminated by `type`, matching the OpenAPI security scheme subset
/// the A2A card format uses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SecurityScheme {
    /// API key authentication.
    #[serde(rename = "apiKey")]
    ApiKey {
        /// Header / query / cookie name carrying the key.
        name: String,
        /// Where the key is sent.
        #[serde(rename = "in")]
        location: String,
    },
    /// HTTP authentication (e.g. bearer).
    #[serde(rename = "http")]
    Http {
        /// The HTTP auth scheme, e.g. "bearer".
        scheme: String,
        /// Bearer token format hint.
        #[serde(skip_serializing_if = "Option::is_none")]
        bearer_format: Option<String>,
    },
    /// OpenID Connect discovery.
    #[serde(rename = "openIdConnect")]
    OpenIdConnect {
        /// Discovery document URL.
        open_id_connect_url: String,
    },
}

// ============================================================================
// Defaults & helpers
// ============================================================================

fn kind_task() -> String {
    "task".to_string()
}

fn kind_message() -> String {
    "message".to_string()
}

fn kind_status_update() -> String {
    "status-update".to_string()
}

fn kind_artifact_update() -> String {
    "artifact-update".to_string()
}

fn default_modes() -> Vec<String> {
    vec!["text/plain".to_string()]
}

fn default_protocol_version() -> Option<String> {
    Some("0.3.0".to_string())
}

/// Current UTC instant as `YYYY-MM-DDTHH:MM:SS.sssZ`.
///
/// Fractional seconds are truncated, not rounded, so repeated formatting of
/// one instant is deterministic.
pub fn utc_timestamp_millis() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_dag_edges() {
        use TaskState::*;
        assert!(Submitted.can_transition_to(Working));
        assert!(Submitted.can_transition_to(Canceled));
        assert!(Working.can_transition_to(Completed));
        assert!(Working.can_transition_to(Failed));
        assert!(Working.can_transition_to(Canceled));
        assert!(!Submitted.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Working));
        assert!(!Canceled.can_transition_to(Working));
        assert!(!Failed.can_transition_to(Canceled));
        // Re-observation of the same state is permitted.
        assert!(Working.can_transition_to(Working));
        assert!(Completed.can_transition_to(Completed));
    }

    #[test]
    fn part_unknown_kind_rejected() {
        let err = serde_json::from_value::<Part>(serde_json::json!({
            "kind": "video", "video": {"uri": "x"}
        }));
        assert!(err.is_err());
    }

    #[test]
    fn part_wire_shapes() {
        let text: Part = serde_json::from_value(serde_json::json!({
            "kind": "text", "text": "hello"
        }))
        .unwrap();
        assert_eq!(text, Part::text("hello"));

        let file: Part = serde_json::from_value(serde_json::json!({
            "kind": "file", "file": {"name": "r.pdf", "uri": "https://x/r.pdf"}
        }))
        .unwrap();
        match file {
            Part::File { file } => assert_eq!(file.uri, "https://x/r.pdf"),
            other => panic!("expected file part, got {:?}", other),
        }
    }

    #[test]
    fn progress_event_roundtrip_and_strictness() {
        let event = ProgressEvent::StatusUpdate(TaskStatusUpdateEvent {
            task_id: "t1".into(),
            context_id: "c1".into(),
            kind: "status-update".into(),
            status: TaskStatus::now(TaskState::Working),
            r#final: false,
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "status-update");
        assert_eq!(json["final"], false);

        let parsed: ProgressEvent = serde_json::from_value(json).unwrap();
        assert!(!parsed.is_final());

        let bogus = serde_json::json!({"kind": "telemetry", "taskId": "t1"});
        assert!(serde_json::from_value::<ProgressEvent>(bogus).is_err());
    }

    #[test]
    fn artifact_update_requires_flags() {
        // Both booleans are required on the wire.
        let missing = serde_json::json!({
            "taskId": "t1",
            "contextId": "c1",
            "kind": "artifact-update",
            "artifact": {"artifactId": "a1", "parts": [{"kind": "text", "text": "x"}]}
        });
        assert!(serde_json::from_value::<TaskArtifactUpdateEvent>(missing).is_err());
    }

    #[test]
    fn final_must_match_terminal_state() {
        let event = ProgressEvent::StatusUpdate(TaskStatusUpdateEvent {
            task_id: "t1".into(),
            context_id: "c1".into(),
            kind: "status-update".into(),
            status: TaskStatus::now(TaskState::Completed),
            r#final: false,
        });
        assert!(event.validate().is_err());
    }

    #[test]
    fn timestamp_shape() {
        let ts = utc_timestamp_millis();
        // YYYY-MM-DDTHH:MM:SS.sssZ
        assert_eq!(ts.len(), 24);
        assert!(ts.ends_with('Z'));
        assert_eq!(&ts[4..5], "-");
        assert_eq!(&ts[10..11], "T");
        assert_eq!(&ts[19..20], ".");
        assert!(ts[20..23].chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn message_defaults() {
        let msg: Message = serde_json::from_value(serde_json::json!({
            "parts": [{"kind": "text", "text": "Hello"}]
        }))
        .unwrap();
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.kind, "message");
        assert_eq!(msg.text_content(" "), "Hello");
    }
}
