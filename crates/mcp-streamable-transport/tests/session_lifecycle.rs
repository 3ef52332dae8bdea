//! End-to-end session lifecycle: initialize, correlated POST response,
//! unsolicited server-to-client delivery over the standalone GET stream,
//! and resumption after a missed delivery window.

use std::sync::Arc;
use std::time::Duration;

use mcp_streamable_transport::model::{
    JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, JsonRpcVersion2_0,
    RequestId,
};
use mcp_streamable_transport::transport::event_store::RetentionPolicy;
use mcp_streamable_transport::transport::session::local::LocalSessionManager;
use mcp_streamable_transport::transport::session::stateless::StatelessSessionManager;
use mcp_streamable_transport::transport::session::{GetOutcome, PostOutcome, SessionManager};

fn manager() -> LocalSessionManager {
    LocalSessionManager::new(
        Duration::from_millis(50),
        Arc::new(|version: &str| version >= "2025-03-26"),
        RetentionPolicy::default(),
    )
}

#[tokio::test]
async fn initialize_then_request_round_trips_a_correlated_response() {
    let manager = manager();
    let (session, mut inbox) = manager.create_session().await;

    let initialize = JsonRpcMessage::Request(JsonRpcRequest {
        jsonrpc: JsonRpcVersion2_0,
        id: RequestId::Number(1),
        method: "initialize".into(),
        params: None,
    });
    session.on_initialize_received("2025-06-18").await;
    let PostOutcome::Streaming { post, mut rx } = session.handle_post(initialize).await.unwrap()
    else {
        panic!("initialize carries a pending request id");
    };

    let (_message, ctx) = inbox.recv().await.expect("initialize reached the inbox");
    let response = JsonRpcMessage::Response(JsonRpcResponse {
        jsonrpc: JsonRpcVersion2_0,
        id: RequestId::Number(1),
        result: serde_json::json!({"protocolVersion": "2025-06-18"}),
    });
    assert!(ctx.reply(response).await);

    let item = rx.recv().await.expect("POST body carried the response");
    assert!(item.data.is_some());
    assert!(post.is_finished());
    // The body closes once the last sender (held by `post`) is dropped.
    drop(post);
    assert!(rx.recv().await.is_none(), "body closes once correlated");
}

#[tokio::test]
async fn unsolicited_message_reaches_the_open_standalone_stream() {
    let manager = manager();
    let (session, _inbox) = manager.create_session().await;

    let GetOutcome::Standalone { writer, .. } = session.handle_get(None).await.unwrap() else {
        panic!("fresh GET always opens the standalone stream");
    };

    let progress = JsonRpcMessage::Notification(JsonRpcNotification {
        jsonrpc: JsonRpcVersion2_0,
        method: "notifications/progress".into(),
        params: None,
    });
    assert!(session.send_message(progress).await.unwrap());

    let delivered = writer.recv().await.expect("queued onto the standalone writer");
    match delivered.data {
        Some(JsonRpcMessage::Notification(n)) => assert_eq!(n.method, "notifications/progress"),
        other => panic!("unexpected item: {other:?}"),
    }
}

#[tokio::test]
async fn reconnect_with_last_event_id_replays_exactly_the_missed_messages() {
    let manager = manager();
    let (session, _inbox) = manager.create_session().await;
    session.on_initialize_received("2025-06-18").await;

    let GetOutcome::Standalone { priming, .. } = session.handle_get(None).await.unwrap() else {
        panic!("resumable protocol version opens a primed standalone stream");
    };
    let priming = priming.expect("resumable session primes the standalone stream");
    let first_event_id = priming.event_id.clone().expect("priming frame carries an id");

    for n in 0..3 {
        let notification = JsonRpcMessage::Notification(JsonRpcNotification {
            jsonrpc: JsonRpcVersion2_0,
            method: format!("notifications/step-{n}"),
            params: None,
        });
        session.send_message(notification).await.unwrap();
    }

    // Client disconnects without reading the three notifications, then
    // reconnects quoting the priming frame's event id.
    session.mark_get_closed().await;
    let GetOutcome::Standalone { mut replay, .. } = session
        .handle_get(Some(first_event_id))
        .await
        .unwrap()
    else {
        panic!("resuming the standalone stream id stays Standalone");
    };

    let (items, _status) = replay.as_mut().expect("resumed with a reader").drain_available();
    let methods: Vec<_> = items
        .into_iter()
        .filter_map(|item| match item.data {
            Some(JsonRpcMessage::Notification(n)) => Some(n.method),
            _ => None,
        })
        .collect();
    assert_eq!(
        methods,
        vec!["notifications/step-0", "notifications/step-1", "notifications/step-2"]
    );
}

#[tokio::test]
async fn a_second_concurrent_get_is_rejected() {
    let manager = manager();
    let (session, _inbox) = manager.create_session().await;
    let _first = session.handle_get(None).await.unwrap();
    let second = session.handle_get(None).await;
    assert!(second.is_err());
}

#[tokio::test]
async fn a_stateless_session_still_round_trips_a_request_but_is_never_registered() {
    let manager = StatelessSessionManager::new(Duration::from_millis(50));
    let (session, mut inbox) = manager.create_session().await;
    let id = session.id().clone();

    let request = JsonRpcMessage::Request(JsonRpcRequest {
        jsonrpc: JsonRpcVersion2_0,
        id: RequestId::Number(7),
        method: "tools/call".into(),
        params: None,
    });
    let PostOutcome::Streaming { post: _, mut rx } = session.handle_post(request).await.unwrap()
    else {
        panic!("expected Streaming");
    };
    let (_message, ctx) = inbox.recv().await.expect("request reached the inbox");
    let response = JsonRpcMessage::Response(JsonRpcResponse {
        jsonrpc: JsonRpcVersion2_0,
        id: RequestId::Number(7),
        result: serde_json::json!({}),
    });
    assert!(ctx.reply(response).await);
    assert!(rx.recv().await.is_some());

    assert!(manager.get_session(&id).await.is_none());
    assert!(session.handle_get(None).await.is_err());
}
