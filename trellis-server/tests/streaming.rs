//! Streaming scenarios over a real WebSocket connection.

mod common;

use common::*;
use futures_util::{SinkExt, StreamExt};
use http::StatusCode;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;

async fn bind_server(server: &TestServer) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    let app = server.app.clone();
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    format!("127.0.0.1:{}", addr.port())
}

fn parse_frame(message: Message) -> serde_json::Value {
    match message {
        Message::Text(text) => serde_json::from_str(&text).expect("json frame"),
        other => panic!("expected a text frame, got {other:?}"),
    }
}

#[tokio::test]
async fn replay_then_live_then_end_of_stream() {
    let server = open_server().await;
    let key = api_key_for(&server, "alice", false).await;
    let addr = bind_server(&server).await;

    // A streaming array node X with sequences 1..3 already written.
    let body = array_node_body("X", &[4], &[vec![4]]);
    let response = send(&server.app, "POST", "/metadata/", Some(&key), Some(body)).await;
    assert_eq!(response.status, StatusCode::OK);
    for base_value in 1..=3 {
        let payload = f64_bytes(&[base_value as f64; 4]);
        let response = send_bytes(&server.app, "PUT", "/array/full/X", &key, payload).await;
        assert_eq!(response.status, StatusCode::OK);
    }

    // Subscribe with start=1 and a JSON envelope.
    let mut request = format!("ws://{addr}/stream/single/X?start=1&envelope=json")
        .into_client_request()
        .expect("ws request");
    request.headers_mut().insert(
        "authorization",
        format!("Apikey {key}").parse().expect("header"),
    );
    let (mut socket, _) = tokio_tungstenite::connect_async(request)
        .await
        .expect("ws connect");

    // Schema frame first.
    let schema = parse_frame(socket.next().await.expect("schema").expect("schema"));
    assert_eq!(schema["metadata"]["type"], "schema");
    assert_eq!(schema["metadata"]["key"], "X");
    assert_eq!(
        schema["metadata"]["structure"]["family"],
        "array"
    );

    // Replay frames 1..3, in order.
    for expected in 1..=3u64 {
        let frame = parse_frame(socket.next().await.expect("frame").expect("frame"));
        assert_eq!(frame["sequence"], expected);
        assert_eq!(frame["metadata"]["type"], "array");
        assert!(frame["payload"].is_string());
    }

    // A live write arrives as sequence 4. The in-process router shares
    // the same state as the bound listener.
    let response = send_bytes(&server.app, "PUT", "/array/full/X", &key, f64_bytes(&[9.0; 4])).await;
    assert_eq!(response.status, StatusCode::OK);
    let frame = parse_frame(socket.next().await.expect("live").expect("live"));
    assert_eq!(frame["sequence"], 4);

    // Close: the end-of-stream record closes the socket with 1000.
    let response = send(&server.app, "DELETE", "/stream/close/X", Some(&key), None).await;
    assert_eq!(response.status, StatusCode::OK);
    match socket.next().await {
        Some(Ok(Message::Close(Some(frame)))) => {
            assert_eq!(u16::from(frame.code), 1000);
        }
        other => panic!("expected a close frame, got {other:?}"),
    }
}

#[tokio::test]
async fn handshake_rejects_missing_node_and_bad_key() {
    let server = open_server().await;
    let key = api_key_for(&server, "alice", false).await;
    let addr = bind_server(&server).await;

    // Missing node: 404 during the handshake.
    let mut request = format!("ws://{addr}/stream/single/absent")
        .into_client_request()
        .expect("ws request");
    request.headers_mut().insert(
        "authorization",
        format!("Apikey {key}").parse().expect("header"),
    );
    match tokio_tungstenite::connect_async(request).await {
        Err(tokio_tungstenite::tungstenite::Error::Http(response)) => {
            assert_eq!(response.status(), StatusCode::NOT_FOUND);
        }
        other => panic!("expected an HTTP 404 rejection, got {other:?}"),
    }

    // Invalid key: 401.
    let mut request = format!("ws://{addr}/stream/single/absent")
        .into_client_request()
        .expect("ws request");
    request.headers_mut().insert(
        "authorization",
        "Apikey 0000000000000000".parse().expect("header"),
    );
    match tokio_tungstenite::connect_async(request).await {
        Err(tokio_tungstenite::tungstenite::Error::Http(response)) => {
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        }
        other => panic!("expected an HTTP 401 rejection, got {other:?}"),
    }

    // Unknown scheme: 400.
    let mut request = format!("ws://{addr}/stream/single/absent")
        .into_client_request()
        .expect("ws request");
    request.headers_mut().insert(
        "authorization",
        "Token whatever".parse().expect("header"),
    );
    match tokio_tungstenite::connect_async(request).await {
        Err(tokio_tungstenite::tungstenite::Error::Http(response)) => {
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        }
        other => panic!("expected an HTTP 400 rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn container_subscription_sees_child_events() {
    let server = open_server().await;
    let key = api_key_for(&server, "alice", false).await;
    let addr = bind_server(&server).await;

    let response = send(
        &server.app,
        "POST",
        "/metadata/",
        Some(&key),
        Some(serde_json::json!({"id": "parent", "structure_family": "container"})),
    )
    .await;
    assert_eq!(response.status, StatusCode::OK);

    // Subscribe to the container.
    let mut request = format!("ws://{addr}/stream/single/parent?envelope=json")
        .into_client_request()
        .expect("ws request");
    request.headers_mut().insert(
        "authorization",
        format!("Apikey {key}").parse().expect("header"),
    );
    let (mut socket, _) = tokio_tungstenite::connect_async(request)
        .await
        .expect("ws connect");
    let schema = parse_frame(socket.next().await.expect("schema").expect("schema"));
    assert_eq!(schema["metadata"]["type"], "schema");

    // Creating a child under the container publishes child_created.
    let response = send(
        &server.app,
        "POST",
        "/metadata/parent",
        Some(&key),
        Some(serde_json::json!({"id": "child", "structure_family": "container"})),
    )
    .await;
    assert_eq!(response.status, StatusCode::OK);
    let frame = parse_frame(socket.next().await.expect("event").expect("event"));
    assert_eq!(frame["metadata"]["type"], "child_created");
    assert_eq!(frame["metadata"]["key"], "child");

    // Updating its metadata publishes child_metadata_updated.
    let response = send(
        &server.app,
        "PATCH",
        "/metadata/parent/child",
        Some(&key),
        Some(serde_json::json!({"metadata": {"note": "hi"}})),
    )
    .await;
    assert_eq!(response.status, StatusCode::OK);
    let frame = parse_frame(socket.next().await.expect("event").expect("event"));
    assert_eq!(frame["metadata"]["type"], "child_metadata_updated");
    assert_eq!(frame["metadata"]["key"], "child");

    let _ = socket.send(Message::Close(None)).await;
}
