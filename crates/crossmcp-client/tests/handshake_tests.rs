//! Client handshake tests against a hand-driven raw server side.

use std::sync::Arc;

use bytes::Bytes;
use serde_json::{json, Value};

use crossmcp_client::Client;
use crossmcp_core::request_handler;
use crossmcp_protocol::{ClientCapabilities, McpError};
use crossmcp_transport::{InMemoryTransport, Transport};

async fn send_json(transport: &InMemoryTransport, value: Value) {
    transport
        .send(Bytes::from(value.to_string()))
        .await
        .unwrap();
}

async fn recv_json(transport: &InMemoryTransport) -> Value {
    let frame = transport.receive().await.unwrap().expect("stream ended");
    serde_json::from_slice(&frame).unwrap()
}

fn initialize_result(id: &Value, protocol_version: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": {
            "protocolVersion": protocol_version,
            "capabilities": {"tools": {"listChanged": true}},
            "serverInfo": {"name": "s", "version": "1"}
        }
    })
}

#[tokio::test]
async fn initialize_handshake() {
    let (raw, transport) = InMemoryTransport::pair();
    raw.connect().await.unwrap();
    let client = Client::new(Arc::new(transport));

    let server = tokio::spawn(async move {
        let request = recv_json(&raw).await;
        assert_eq!(request["method"], "initialize");
        assert_eq!(request["params"]["protocolVersion"], "2025-11-25");
        assert_eq!(request["params"]["clientInfo"]["name"], "crossmcp-client");

        send_json(&raw, initialize_result(&request["id"], "2025-11-25")).await;

        let initialized = recv_json(&raw).await;
        assert_eq!(initialized["method"], "notifications/initialized");
        assert!(initialized.get("id").is_none());
        raw
    });

    let result = client.initialize().await.unwrap();
    assert_eq!(result.protocol_version, "2025-11-25");
    assert_eq!(result.server_info.name, "s");
    assert_eq!(
        client.peer().negotiated_version().as_deref(),
        Some("2025-11-25")
    );
    server.await.unwrap();
}

#[tokio::test]
async fn second_initialize_is_rejected_locally() {
    let (raw, transport) = InMemoryTransport::pair();
    raw.connect().await.unwrap();
    let client = Client::new(Arc::new(transport));

    tokio::spawn(async move {
        let request = recv_json(&raw).await;
        send_json(&raw, initialize_result(&request["id"], "2025-06-18")).await;
        let _initialized = recv_json(&raw).await;
        // Keep the raw side alive so the session stays open.
        std::mem::forget(raw);
    });

    client.initialize().await.unwrap();
    let err = client.initialize().await.unwrap_err();
    assert!(matches!(err, McpError::InvalidRequest(_)));
}

#[tokio::test]
async fn unsupported_server_version_aborts() {
    let (raw, transport) = InMemoryTransport::pair();
    raw.connect().await.unwrap();
    let client = Client::new(Arc::new(transport));

    tokio::spawn(async move {
        let request = recv_json(&raw).await;
        send_json(&raw, initialize_result(&request["id"], "1999-12-31")).await;
        std::mem::forget(raw);
    });

    let err = client.initialize().await.unwrap_err();
    assert!(matches!(err, McpError::InvalidRequest(_)));
    assert!(client.peer().is_closed());
}

#[tokio::test]
async fn requests_before_initialize_fail_locally() {
    let (_raw, transport) = InMemoryTransport::pair();
    let client = Client::new(Arc::new(transport));

    let err = client.list_tools(None).await.unwrap_err();
    assert!(matches!(err, McpError::InvalidRequest(_)));
}

#[tokio::test]
async fn strict_mode_gates_completions() {
    let (raw, transport) = InMemoryTransport::pair();
    raw.connect().await.unwrap();
    let client = Client::new(Arc::new(transport));
    client.set_strict(true);

    tokio::spawn(async move {
        let request = recv_json(&raw).await;
        // Server advertises tools only; no completions capability.
        send_json(&raw, initialize_result(&request["id"], "2025-06-18")).await;
        let _initialized = recv_json(&raw).await;
        std::mem::forget(raw);
    });

    client.initialize().await.unwrap();
    let err = client
        .complete(json!({"ref": {"type": "ref/prompt", "name": "p"}}))
        .await
        .unwrap_err();
    assert!(matches!(err, McpError::MethodNotFound(_)));
}

#[tokio::test]
async fn client_answers_server_initiated_roots_request() {
    let (raw, transport) = InMemoryTransport::pair();
    raw.connect().await.unwrap();
    let client = Client::with_capabilities(Arc::new(transport), ClientCapabilities::full());
    client.on_roots(request_handler(|_, _| async {
        Ok(json!({"roots": [{"uri": "file:///workspace"}]}))
    }));

    let server = tokio::spawn(async move {
        let request = recv_json(&raw).await;
        send_json(&raw, initialize_result(&request["id"], "2025-06-18")).await;
        let _initialized = recv_json(&raw).await;

        send_json(
            &raw,
            json!({"jsonrpc": "2.0", "id": "srv-1", "method": "roots/list"}),
        )
        .await;
        let response = recv_json(&raw).await;
        assert_eq!(response["id"], "srv-1");
        assert_eq!(response["result"]["roots"][0]["uri"], "file:///workspace");
    });

    client.initialize().await.unwrap();
    server.await.unwrap();
}
