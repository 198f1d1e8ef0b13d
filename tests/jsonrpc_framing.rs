//! JSON-RPC framing behavior over real HTTP roundtrips: envelope
//! validation, error codes, id echoing, body limits, and the legacy path.

mod common;

use common::{jsonrpc_request, rpc, send_request, start_gateway, start_gateway_with};

#[tokio::test]
async fn malformed_json_yields_parse_error() {
    let gateway = start_gateway().await;

    let response = reqwest::Client::new()
        .post(format!("{}/echo-agent", gateway.base_url))
        .header("content-type", "application/json")
        .body("{not valid json")
        .send()
        .await
        .unwrap();
    let json: serde_json::Value = response.json().await.unwrap();

    assert_eq!(json["jsonrpc"], "2.0");
    assert_eq!(json["error"]["code"], -32700);
    assert_eq!(json["id"], serde_json::Value::Null);
}

#[tokio::test]
async fn wrong_version_yields_invalid_request() {
    let gateway = start_gateway().await;

    let body = serde_json::json!({
        "jsonrpc": "1.0", "id": 1, "method": "message/send", "params": {}
    });
    let json = rpc(&gateway.base_url, "echo-agent", &body).await;
    assert_eq!(json["error"]["code"], -32600);
    // The id is still echoed when it was recoverable.
    assert_eq!(json["id"], 1);
}

#[tokio::test]
async fn missing_id_yields_invalid_request() {
    let gateway = start_gateway().await;

    let body = serde_json::json!({
        "jsonrpc": "2.0", "method": "tasks/get", "params": {"taskId": "x"}
    });
    let json = rpc(&gateway.base_url, "echo-agent", &body).await;
    assert_eq!(json["error"]["code"], -32600);
}

#[tokio::test]
async fn unknown_method_yields_method_not_found() {
    let gateway = start_gateway().await;

    let body = jsonrpc_request(
        serde_json::json!("7"),
        "tasks/subscribe",
        serde_json::json!({}),
    );
    let json = rpc(&gateway.base_url, "echo-agent", &body).await;
    assert_eq!(json["error"]["code"], -32601);
    assert_eq!(json["id"], "7");
}

#[tokio::test]
async fn response_id_matches_request_id() {
    let gateway = start_gateway().await;

    // Number id.
    let json = rpc(&gateway.base_url, "echo-agent", &send_request(42, "hi")).await;
    assert_eq!(json["id"], 42);

    // String id.
    let body = jsonrpc_request(
        serde_json::json!("req-abc"),
        "message/send",
        serde_json::json!({"message": {"parts": [{"kind": "text", "text": "hi"}]}}),
    );
    let json = rpc(&gateway.base_url, "echo-agent", &body).await;
    assert_eq!(json["id"], "req-abc");
}

#[tokio::test]
async fn oversized_body_yields_invalid_request() {
    let gateway = start_gateway_with(|config| {
        config.server.max_body_bytes = 256;
    })
    .await;

    let big_text = "x".repeat(1024);
    let json = rpc(&gateway.base_url, "echo-agent", &send_request(1, &big_text)).await;
    assert_eq!(json["error"]["code"], -32600);
}

#[tokio::test]
async fn missing_message_parts_yields_missing_field() {
    let gateway = start_gateway().await;

    let body = jsonrpc_request(
        serde_json::json!(1),
        "message/send",
        serde_json::json!({"message": {"parts": []}}),
    );
    let json = rpc(&gateway.base_url, "echo-agent", &body).await;
    assert_eq!(json["error"]["code"], -32602);
    assert_eq!(json["error"]["data"]["kind"], "missing_field");
}

#[tokio::test]
async fn params_agent_mismatch_is_rejected() {
    let gateway = start_gateway().await;

    let body = serde_json::json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "message/send",
        "params": {
            "agentId": "streaming-echo-agent",
            "message": {"parts": [{"kind": "text", "text": "hi"}]}
        }
    });
    let json = rpc(&gateway.base_url, "echo-agent", &body).await;
    assert_eq!(json["error"]["code"], -32602);
    assert_eq!(json["error"]["data"]["kind"], "bad_field_type");
}

// ---- legacy /a2a path ----

#[tokio::test]
async fn legacy_path_carries_deprecation_headers() {
    let gateway = start_gateway().await;

    let body = serde_json::json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "message/send",
        "params": {
            "agentId": "echo-agent",
            "message": {"parts": [{"kind": "text", "text": "hi"}]}
        }
    });
    let response = reqwest::Client::new()
        .post(format!("{}/a2a", gateway.base_url))
        .json(&body)
        .send()
        .await
        .unwrap();

    assert_eq!(response.headers()["deprecation"], "true");
    let sunset = response.headers()["sunset"].to_str().unwrap();
    assert!(sunset.contains('T') && sunset.ends_with('Z'));

    let json: serde_json::Value = response.json().await.unwrap();
    assert!(json.get("error").is_none(), "unexpected error: {json}");
    assert_eq!(json["result"]["kind"], "task");
}

#[tokio::test]
async fn legacy_path_requires_agent_id_param() {
    let gateway = start_gateway().await;

    let body = serde_json::json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "message/send",
        "params": {"message": {"parts": [{"kind": "text", "text": "hi"}]}}
    });
    let json = rpc(&gateway.base_url, "a2a", &body).await;
    assert_eq!(json["error"]["code"], -32602);
    assert_eq!(json["error"]["data"]["kind"], "missing_field");
}

#[tokio::test]
async fn health_endpoint_reports_healthy() {
    let gateway = start_gateway().await;

    let json: serde_json::Value = reqwest::get(format!("{}/health", gateway.base_url))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(json["status"], "healthy");
}

#[tokio::test]
async fn agent_cards_are_served() {
    let gateway = start_gateway().await;

    let card: serde_json::Value =
        reqwest::get(format!("{}/.well-known/agent.json", gateway.base_url))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
    assert_eq!(card["name"], "a2a-gateway");
    assert_eq!(card["capabilities"]["streaming"], true);

    let card: serde_json::Value = reqwest::get(format!(
        "{}/streaming-echo-agent/.well-known/agent.json",
        gateway.base_url
    ))
    .await
    .unwrap()
    .json()
    .await
    .unwrap();
    assert_eq!(card["name"], "streaming-echo-agent");
    assert_eq!(card["capabilities"]["streaming"], true);
    // Dedicated per-agent base URL: the id is in the path, not a query.
    let url = card["url"].as_str().unwrap();
    assert!(url.ends_with("/streaming-echo-agent"));
    assert!(!url.contains('?'));

    let response = reqwest::get(format!(
        "{}/no-such-agent/.well-known/agent.json",
        gateway.base_url
    ))
    .await
    .unwrap();
    assert_eq!(response.status(), 404);
}
