//! End-to-end dispatcher tests over the in-memory transport.
//!
//! One side is usually a `Peer`; where the test needs to observe raw frames
//! (or their absence), the other side stays a bare `InMemoryTransport`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde_json::{json, Value};

use crossmcp_core::{notification_handler, request_handler, Peer, RequestOptions};
use crossmcp_protocol::{methods, notifications, McpError};
use crossmcp_transport::{InMemoryTransport, Transport};

async fn peer_pair() -> (Peer, Peer) {
    let (a, b) = InMemoryTransport::pair();
    let left = Peer::new(Arc::new(a));
    let right = Peer::new(Arc::new(b));
    left.start().await.unwrap();
    right.start().await.unwrap();
    (left, right)
}

async fn raw_and_peer() -> (InMemoryTransport, Peer) {
    let (raw, transport) = InMemoryTransport::pair();
    raw.connect().await.unwrap();
    let peer = Peer::new(Arc::new(transport));
    peer.start().await.unwrap();
    (raw, peer)
}

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

/// Sets a flag when dropped; lets a handler observe its own cancellation.
struct SetOnDrop(Arc<AtomicBool>);

impl Drop for SetOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn request_response_round_trip() {
    let (client, server) = peer_pair().await;

    server.on_request(
        "tools/list",
        request_handler(|_, _| async { Ok(json!({"tools": []})) }),
    );

    let result = client
        .send_request("tools/list", None, RequestOptions::default())
        .await
        .unwrap();
    assert_eq!(result, json!({"tools": []}));
}

#[tokio::test]
async fn unknown_method_gets_method_not_found() {
    let (client, _server) = peer_pair().await;

    let err = client
        .send_request("no/such/method", None, RequestOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, McpError::MethodNotFound(_)));
    assert_eq!(err.code(), -32601);
}

#[tokio::test]
async fn concurrent_requests_resolve_independently() {
    let (client, server) = peer_pair().await;

    server.on_request(
        "echo",
        request_handler(|params, _| async move {
            // Slow down even-numbered calls so completions interleave.
            let n = params
                .as_ref()
                .and_then(|p| p.get("n"))
                .and_then(Value::as_u64)
                .unwrap_or(0);
            if n % 2 == 0 {
                tokio::time::sleep(Duration::from_millis(30)).await;
            }
            Ok(json!({"n": n}))
        }),
    );

    let calls = (0..8u64).map(|n| {
        let client = client.clone();
        async move {
            client
                .send_request("echo", Some(json!({"n": n})), RequestOptions::default())
                .await
                .unwrap()
        }
    });
    let results = futures::future::join_all(calls).await;
    for (n, result) in results.into_iter().enumerate() {
        assert_eq!(result, json!({"n": n as u64}));
    }
}

#[tokio::test]
async fn cancellation_silences_response() {
    let (raw, server) = raw_and_peer().await;

    let handler_dropped = Arc::new(AtomicBool::new(false));
    let dropped = Arc::clone(&handler_dropped);
    server.on_request(
        "tools/call",
        request_handler(move |_, _| {
            let guard = SetOnDrop(Arc::clone(&dropped));
            async move {
                let _guard = guard;
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(json!({}))
            }
        }),
    );
    server.on_request(
        "tools/list",
        request_handler(|_, _| async { Ok(json!({"tools": []})) }),
    );

    send_json(
        &raw,
        json!({"jsonrpc": "2.0", "id": "X", "method": "tools/call", "params": {"name": "slow"}}),
    )
    .await;
    // Give the handler a moment to start before cancelling.
    tokio::time::sleep(Duration::from_millis(20)).await;
    send_json(
        &raw,
        json!({"jsonrpc": "2.0", "method": "notifications/cancelled",
               "params": {"requestId": "X", "reason": "user"}}),
    )
    .await;

    // The server must remain functional, and the next frame it emits must
    // answer the follow-up request: nothing with id "X" may ever appear.
    send_json(
        &raw,
        json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}),
    )
    .await;
    let response = recv_json(&raw).await;
    assert_eq!(response["id"], 2);
    assert_eq!(response["result"], json!({"tools": []}));

    // The handler task observed cancellation.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(handler_dropped.load(Ordering::SeqCst));
}

#[tokio::test]
async fn cancellation_for_unknown_id_is_noop() {
    let (raw, server) = raw_and_peer().await;
    server.on_request("ping", request_handler(|_, _| async { Ok(json!({})) }));

    send_json(
        &raw,
        json!({"jsonrpc": "2.0", "method": "notifications/cancelled",
               "params": {"requestId": "never-seen"}}),
    )
    .await;
    send_json(&raw, json!({"jsonrpc": "2.0", "id": 1, "method": "ping"})).await;

    let response = recv_json(&raw).await;
    assert_eq!(response["id"], 1);
}

#[tokio::test]
async fn timeout_fails_caller_and_emits_cancellation() {
    let (raw, client) = raw_and_peer().await;

    // The raw side never answers.
    let err = client
        .send_request(
            "tools/call",
            Some(json!({"name": "slow"})),
            RequestOptions::with_timeout(Duration::from_millis(100)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, McpError::RequestTimeout { timeout_ms: 100 }));

    let request = recv_json(&raw).await;
    assert_eq!(request["method"], "tools/call");
    let request_id = request["id"].clone();

    let cancelled = recv_json(&raw).await;
    assert_eq!(cancelled["method"], "notifications/cancelled");
    assert_eq!(cancelled["params"]["requestId"], request_id);
    assert!(cancelled["params"]["reason"]
        .as_str()
        .unwrap()
        .contains("timed out"));
}

#[tokio::test]
async fn late_response_after_timeout_is_dropped() {
    let (raw, client) = raw_and_peer().await;

    let err = client
        .send_request(
            "ping",
            None,
            RequestOptions::with_timeout(Duration::from_millis(50)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, McpError::RequestTimeout { .. }));

    let request = recv_json(&raw).await;
    let _cancelled = recv_json(&raw).await;

    // Answer anyway; the dispatcher must drop it and keep serving.
    send_json(
        &raw,
        json!({"jsonrpc": "2.0", "id": request["id"], "result": {"late": true}}),
    )
    .await;

    client.on_request("ping", request_handler(|_, _| async { Ok(json!({})) }));
    send_json(&raw, json!({"jsonrpc": "2.0", "id": 99, "method": "ping"})).await;
    let response = recv_json(&raw).await;
    assert_eq!(response["id"], 99);
}

#[tokio::test]
async fn dropping_caller_emits_cancellation() {
    let (raw, client) = raw_and_peer().await;

    let pending = client.send_request("tools/call", None, RequestOptions::default());
    tokio::pin!(pending);
    // Poll once so the frame goes out, then drop the future.
    let poll = futures::poll!(pending.as_mut());
    assert!(poll.is_pending());
    drop(pending);

    let request = recv_json(&raw).await;
    assert_eq!(request["method"], "tools/call");
    let cancelled = recv_json(&raw).await;
    assert_eq!(cancelled["method"], "notifications/cancelled");
    assert_eq!(cancelled["params"]["requestId"], request["id"]);
}

#[tokio::test]
async fn stop_fails_pending_requests() {
    let (_raw, client) = raw_and_peer().await;

    let stopper = client.clone();
    let pending = tokio::spawn(async move {
        stopper
            .send_request("tools/call", None, RequestOptions::default())
            .await
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    client.stop().await;

    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(err, McpError::ConnectionClosed));
    assert_eq!(err.code(), -32001);
}

#[tokio::test]
async fn cancel_request_fails_local_waiter() {
    let (raw, client) = raw_and_peer().await;

    let caller = client.clone();
    let pending = tokio::spawn(async move {
        caller
            .send_request("tools/call", None, RequestOptions::default())
            .await
    });

    let request = recv_json(&raw).await;
    let id: crossmcp_protocol::RequestId =
        serde_json::from_value(request["id"].clone()).unwrap();
    client
        .cancel_request(id, Some("changed my mind".to_string()))
        .await
        .unwrap();

    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(err, McpError::RequestCancelled { .. }));

    let cancelled = recv_json(&raw).await;
    assert_eq!(cancelled["method"], "notifications/cancelled");
    assert_eq!(cancelled["params"]["reason"], "changed my mind");
}

#[tokio::test]
async fn batch_collects_responses_and_skips_notifications() {
    let (raw, server) = raw_and_peer().await;
    server.on_request(
        "echo",
        request_handler(|params, _| async move { Ok(params.unwrap_or(Value::Null)) }),
    );

    send_json(
        &raw,
        json!([
            {"jsonrpc": "2.0", "id": 1, "method": "echo", "params": {"a": 1}},
            {"jsonrpc": "2.0", "method": "notifications/initialized"},
            {"jsonrpc": "2.0", "id": "two", "method": "echo", "params": {"b": 2}}
        ]),
    )
    .await;

    let batch = recv_json(&raw).await;
    let items = batch.as_array().expect("batch response");
    assert_eq!(items.len(), 2);
    // Order is unspecified; match responses to requests by id.
    for item in items {
        match &item["id"] {
            Value::Number(n) if n.as_u64() == Some(1) => {
                assert_eq!(item["result"], json!({"a": 1}));
            }
            Value::String(s) if s == "two" => {
                assert_eq!(item["result"], json!({"b": 2}));
            }
            other => panic!("unexpected response id: {other:?}"),
        }
    }
}

#[tokio::test]
async fn all_notification_batch_produces_no_frame() {
    let (raw, server) = raw_and_peer().await;
    server.on_request("ping", request_handler(|_, _| async { Ok(json!({})) }));

    send_json(
        &raw,
        json!([
            {"jsonrpc": "2.0", "method": "notifications/initialized"},
            {"jsonrpc": "2.0", "method": "notifications/progress",
             "params": {"progressToken": "t", "progress": 1.0}}
        ]),
    )
    .await;
    send_json(&raw, json!({"jsonrpc": "2.0", "id": "after", "method": "ping"})).await;

    // The very next frame answers the ping: the batch produced nothing.
    let response = recv_json(&raw).await;
    assert_eq!(response["id"], "after");
}

#[tokio::test]
async fn batched_initialize_is_rejected() {
    let (raw, _server) = raw_and_peer().await;

    send_json(
        &raw,
        json!([
            {"jsonrpc": "2.0", "id": 1, "method": "initialize",
             "params": {"protocolVersion": "2025-06-18", "capabilities": {},
                        "clientInfo": {"name": "c", "version": "1"}}}
        ]),
    )
    .await;

    let batch = recv_json(&raw).await;
    let items = batch.as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["error"]["code"], -32600);
}

#[tokio::test]
async fn empty_batch_yields_invalid_request_with_null_id() {
    let (raw, _server) = raw_and_peer().await;

    send_json(&raw, json!([])).await;
    let response = recv_json(&raw).await;
    assert_eq!(response["id"], Value::Null);
    assert_eq!(response["error"]["code"], -32600);
}

#[tokio::test]
async fn malformed_json_yields_parse_error_and_session_survives() {
    let (raw, server) = raw_and_peer().await;
    server.on_request("ping", request_handler(|_, _| async { Ok(json!({})) }));

    raw.send(Bytes::from_static(b"{not json")).await.unwrap();
    let response = recv_json(&raw).await;
    assert_eq!(response["id"], Value::Null);
    assert_eq!(response["error"]["code"], -32700);

    send_json(&raw, json!({"jsonrpc": "2.0", "id": 5, "method": "ping"})).await;
    let response = recv_json(&raw).await;
    assert_eq!(response["id"], 5);
}

#[tokio::test]
async fn listener_errors_do_not_kill_the_session() {
    let (raw, server) = raw_and_peer().await;
    let seen = Arc::new(AtomicBool::new(false));

    server
        .on_notification(
            notifications::PROGRESS,
            notification_handler(|_| async { Err(McpError::internal("listener blew up")) }),
        )
        .forget();
    let seen_clone = Arc::clone(&seen);
    server
        .on_notification(
            notifications::PROGRESS,
            notification_handler(move |_| {
                let seen = Arc::clone(&seen_clone);
                async move {
                    seen.store(true, Ordering::SeqCst);
                    Ok(())
                }
            }),
        )
        .forget();
    server.on_request("ping", request_handler(|_, _| async { Ok(json!({})) }));

    send_json(
        &raw,
        json!({"jsonrpc": "2.0", "method": "notifications/progress",
               "params": {"progressToken": 1, "progress": 0.5}}),
    )
    .await;
    send_json(&raw, json!({"jsonrpc": "2.0", "id": 1, "method": "ping"})).await;

    let response = recv_json(&raw).await;
    assert_eq!(response["id"], 1);
    assert!(seen.load(Ordering::SeqCst));
}

#[tokio::test]
async fn server_handler_calls_back_into_client() {
    let (client, server) = peer_pair().await;

    client.on_request(
        methods::LIST_ROOTS,
        request_handler(|_, _| async { Ok(json!({"roots": [{"uri": "file:///w"}]})) }),
    );
    server.on_request(
        "tools/call",
        request_handler(|_, ctx| async move {
            let roots = ctx.list_roots().await?;
            Ok(json!({"sawRoots": roots["roots"].as_array().unwrap().len()}))
        }),
    );

    let result = client
        .send_request("tools/call", None, RequestOptions::default())
        .await
        .unwrap();
    assert_eq!(result, json!({"sawRoots": 1}));
}

#[tokio::test]
async fn progress_flows_back_to_requester() {
    let (raw, server) = raw_and_peer().await;

    server.on_request(
        "tools/call",
        request_handler(|_, ctx| async move {
            ctx.send_progress(0.5, Some(1.0), None).await?;
            Ok(json!({"done": true}))
        }),
    );

    send_json(
        &raw,
        json!({"jsonrpc": "2.0", "id": 1, "method": "tools/call",
               "params": {"_meta": {"progressToken": "p-1"}}}),
    )
    .await;

    let progress = recv_json(&raw).await;
    assert_eq!(progress["method"], "notifications/progress");
    assert_eq!(progress["params"]["progressToken"], "p-1");
    assert_eq!(progress["params"]["progress"], 0.5);

    let response = recv_json(&raw).await;
    assert_eq!(response["result"], json!({"done": true}));
}

#[tokio::test]
async fn string_and_numeric_ids_do_not_collide() {
    let (raw, server) = raw_and_peer().await;
    server.on_request(
        "echo",
        request_handler(|params, _| async move { Ok(params.unwrap_or(Value::Null)) }),
    );

    send_json(
        &raw,
        json!({"jsonrpc": "2.0", "id": "1", "method": "echo", "params": {"kind": "string"}}),
    )
    .await;
    send_json(
        &raw,
        json!({"jsonrpc": "2.0", "id": 1, "method": "echo", "params": {"kind": "number"}}),
    )
    .await;

    let mut kinds = Vec::new();
    for _ in 0..2 {
        let response = recv_json(&raw).await;
        let kind = response["result"]["kind"].as_str().unwrap().to_string();
        match &response["id"] {
            Value::String(s) => {
                assert_eq!(s, "1");
                assert_eq!(kind, "string");
            }
            Value::Number(n) => {
                assert_eq!(n.as_u64(), Some(1));
                assert_eq!(kind, "number");
            }
            other => panic!("unexpected id {other:?}"),
        }
        kinds.push(kind);
    }
    assert_eq!(kinds.len(), 2);
}
