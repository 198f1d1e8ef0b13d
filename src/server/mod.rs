//! Gateway server — JSON-RPC framing, HTTP routes, task lifecycle, status
//! cache, and the streaming engine.

pub mod jsonrpc;
pub mod lifecycle;
pub mod routes;
pub mod streaming;
pub mod task_cache;

pub use jsonrpc::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, SendParams};
pub use lifecycle::TaskLifecycle;
pub use routes::{gateway_router, GatewayState};
pub use streaming::{
    stream_workflow_id, PushError, StreamRegistry, StreamRelayInput, StreamRelayWorkflow,
    STREAM_RELAY_WORKFLOW,
};
pub use task_cache::TaskCache;
