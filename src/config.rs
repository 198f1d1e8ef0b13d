//! Gateway configuration.
//!
//! Loaded in three layers: built-in defaults, an optional `config/gateway.*`
//! file, then `GATEWAY__`-prefixed environment variables (`__` separates
//! nesting, e.g. `GATEWAY__SERVER__PORT=9090`). A `.env` file is honored
//! when present.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level gateway configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// HTTP listener settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Workflow-runtime connection settings.
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Agent-registry settings.
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Task status cache settings.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Streaming engine settings.
    #[serde(default)]
    pub streaming: StreamingConfig,

    /// Agent routing settings.
    #[serde(default)]
    pub routing: RoutingConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Listen port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Externally visible base URL used on agent cards. Defaults to
    /// `http://{host}:{port}` when unset.
    #[serde(default)]
    pub public_url: Option<String>,

    /// Maximum accepted request body size in bytes; larger bodies are
    /// rejected with `-32600`.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// RFC 3339 instant sent in the `Sunset` header of the legacy `/a2a`
    /// endpoint.
    #[serde(default = "default_legacy_sunset")]
    pub legacy_sunset: String,

    /// Deadline for non-streaming JSON-RPC methods, in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_url: None,
            max_body_bytes: default_max_body_bytes(),
            legacy_sunset: default_legacy_sunset(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl ServerConfig {
    /// The base URL advertised on agent cards.
    pub fn base_url(&self) -> String {
        self.public_url
            .clone()
            .unwrap_or_else(|| format!("http://{}:{}", self.host, self.port))
    }

    /// Deadline for non-streaming JSON-RPC methods.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Workflow-runtime connection settings.
///
/// `endpoint`/`namespace` describe an external orchestrator; when no
/// endpoint is configured the binary hosts the embedded in-process runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Orchestrator endpoint, e.g. `grpc://temporal:7233`. Unset selects
    /// the embedded runtime.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Orchestrator namespace.
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Retry attempts for transient runtime calls.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Base backoff delay between retries, in milliseconds.
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            namespace: default_namespace(),
            retry_attempts: default_retry_attempts(),
            retry_base_ms: default_retry_base_ms(),
        }
    }
}

/// Agent-registry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Registry base URL. Unset disables registry lookups; only statically
    /// routed agents resolve.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// How long registry-derived routes stay cached, in seconds.
    #[serde(default = "default_registry_ttl_secs")]
    pub cache_ttl_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            cache_ttl_secs: default_registry_ttl_secs(),
        }
    }
}

impl RegistryConfig {
    /// Registry route cache TTL.
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

/// Task status cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// External cache endpoint. Recognized for deployment parity; the
    /// shipped backend is in-process, so this is logged and otherwise
    /// unused.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Per-entry TTL for non-terminal tasks, in seconds.
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,

    /// Minimum retention for terminal entries, in seconds.
    #[serde(default = "default_terminal_retention_secs")]
    pub terminal_retention_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            ttl_secs: default_cache_ttl_secs(),
            terminal_retention_secs: default_terminal_retention_secs(),
        }
    }
}

impl CacheConfig {
    /// TTL for non-terminal entries.
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// Minimum retention window for terminal entries.
    pub fn terminal_retention(&self) -> Duration {
        Duration::from_secs(self.terminal_retention_secs)
    }
}

/// Streaming engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingConfig {
    /// Task queue the gateway's stream-relay workflow is registered on.
    #[serde(default = "default_stream_queue")]
    pub task_queue: String,

    /// Heartbeat comment interval while no events flow, in seconds.
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,

    /// Maximum streaming session duration before the watchdog synthesizes
    /// a failed terminal event, in seconds.
    #[serde(default = "default_max_session_secs")]
    pub max_session_secs: u64,

    /// Per-event write deadline for SSE pushes, in seconds. An attempt that
    /// cannot hand the event to the socket within this window counts as a
    /// failed push.
    #[serde(default = "default_write_deadline_secs")]
    pub write_deadline_secs: u64,

    /// Attempts per SSE push before the stream is abandoned.
    #[serde(default = "default_push_attempts")]
    pub push_attempts: u32,

    /// Delay between SSE push attempts, in milliseconds.
    #[serde(default = "default_push_retry_ms")]
    pub push_retry_ms: u64,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            task_queue: default_stream_queue(),
            heartbeat_secs: default_heartbeat_secs(),
            max_session_secs: default_max_session_secs(),
            write_deadline_secs: default_write_deadline_secs(),
            push_attempts: default_push_attempts(),
            push_retry_ms: default_push_retry_ms(),
        }
    }
}

impl StreamingConfig {
    /// Heartbeat interval.
    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }

    /// Watchdog session limit.
    pub fn max_session(&self) -> Duration {
        Duration::from_secs(self.max_session_secs)
    }

    /// Per-event write deadline.
    pub fn write_deadline(&self) -> Duration {
        Duration::from_secs(self.write_deadline_secs)
    }

    /// Delay between push attempts.
    pub fn push_retry_delay(&self) -> Duration {
        Duration::from_millis(self.push_retry_ms)
    }
}

/// Agent routing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Path to the static routing file (JSON). Unset starts the gateway
    /// with an empty static table.
    #[serde(default)]
    pub file: Option<String>,

    /// Suffix appended to the agent id to derive the task queue for
    /// registry-resolved agents.
    #[serde(default = "default_queue_suffix")]
    pub queue_suffix: String,

    /// Workflow type name assumed for registry-resolved agents.
    #[serde(default = "default_workflow_name")]
    pub default_workflow: String,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            file: None,
            queue_suffix: default_queue_suffix(),
            default_workflow: default_workflow_name(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `tracing` filter directive, e.g. `info` or `a2a_gateway=debug`.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl GatewayConfig {
    /// Load configuration from defaults, an optional config file, and the
    /// environment.
    pub fn load() -> anyhow::Result<Self> {
        // Pick up a .env file when present.
        let _ = dotenvy::dotenv();

        let raw = config::Config::builder()
            .add_source(config::File::with_name("config/gateway").required(false))
            .add_source(
                config::Environment::with_prefix("GATEWAY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: GatewayConfig = raw.try_deserialize()?;
        Ok(config)
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    7420
}

fn default_max_body_bytes() -> usize {
    1024 * 1024
}

fn default_legacy_sunset() -> String {
    "2026-12-31T00:00:00Z".to_string()
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_base_ms() -> u64 {
    100
}

fn default_registry_ttl_secs() -> u64 {
    60
}

// For non-streaming tasks the gateway observes no progress signals, so the
// TTL bounds how stale a `tasks/get` can be.
fn default_cache_ttl_secs() -> u64 {
    2
}

fn default_terminal_retention_secs() -> u64 {
    300
}

fn default_stream_queue() -> String {
    "gateway-streams".to_string()
}

fn default_heartbeat_secs() -> u64 {
    15
}

fn default_max_session_secs() -> u64 {
    600
}

fn default_write_deadline_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_push_attempts() -> u32 {
    3
}

fn default_push_retry_ms() -> u64 {
    50
}

fn default_queue_suffix() -> String {
    "-queue".to_string()
}

fn default_workflow_name() -> String {
    "agent-task".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}
