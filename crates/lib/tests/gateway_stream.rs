//! WebSocket echo channel: accepted frames echo, quota rejection and failures close.

mod common;

use common::{spawn_gateway, FlakyStore, IO_TIMEOUT};
use futures_util::{SinkExt, StreamExt};
use lib::config::{Config, RejectPolicy};
use lib::gateway::SHUTDOWN_EVENT_JSON;
use lib::store::MemoryStore;
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn connect(url: &str) -> Ws {
    let (ws, _) = connect_async(url).await.expect("websocket connect");
    ws
}

async fn send_text(ws: &mut Ws, text: &str) {
    ws.send(Message::Text(text.to_string())).await.expect("send frame");
}

/// Next text frame, or panic on close/timeout.
async fn expect_text(ws: &mut Ws) -> String {
    loop {
        let next = tokio::time::timeout(IO_TIMEOUT, ws.next())
            .await
            .expect("frame within timeout");
        match next {
            Some(Ok(Message::Text(t))) => return t,
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
            other => panic!("expected text frame, got {:?}", other),
        }
    }
}

/// The server ends the connection without sending another text frame.
async fn expect_closed(ws: &mut Ws) {
    loop {
        let next = tokio::time::timeout(IO_TIMEOUT, ws.next())
            .await
            .expect("close within timeout");
        match next {
            None | Some(Err(_)) | Some(Ok(Message::Close(_))) => return,
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
            Some(Ok(other)) => panic!("expected close, got {:?}", other),
        }
    }
}

#[tokio::test]
async fn echo_echo_then_close_on_third_message() {
    let store = Arc::new(MemoryStore::new());
    let gw = spawn_gateway(Config::default(), store.clone()).await;
    let mut ws = connect(&gw.ws).await;

    send_text(&mut ws, "message 1").await;
    assert_eq!(expect_text(&mut ws).await, "message 1");
    send_text(&mut ws, "message 2").await;
    assert_eq!(expect_text(&mut ws).await, "message 2");
    send_text(&mut ws, "message 3").await;
    expect_closed(&mut ws).await;

    let stored = store.snapshot().await;
    assert_eq!(stored.len(), 2);
    assert!(stored.iter().all(|m| m.label == "ws@friendy.me"));
    assert_eq!(stored[1].content, "message 2");
}

#[tokio::test]
async fn quota_bucket_is_shared_across_connections() {
    let store = Arc::new(MemoryStore::new());
    let gw = spawn_gateway(Config::default(), store.clone()).await;

    let mut first = connect(&gw.ws).await;
    send_text(&mut first, "a").await;
    assert_eq!(expect_text(&mut first).await, "a");
    send_text(&mut first, "b").await;
    assert_eq!(expect_text(&mut first).await, "b");
    let _ = first.close(None).await;

    let mut second = connect(&gw.ws.replace("/ws", "/stream")).await;
    send_text(&mut second, "c").await;
    expect_closed(&mut second).await;
    assert_eq!(store.len().await, 2);
}

#[tokio::test]
async fn stream_and_request_buckets_are_independent() {
    let store = Arc::new(MemoryStore::new());
    let gw = spawn_gateway(Config::default(), store.clone()).await;
    let client = reqwest::Client::new();
    for _ in 0..3 {
        let _ = client
            .post(format!("{}/test", gw.base))
            .json(&json!({ "msg": "http" }))
            .send()
            .await
            .expect("post");
    }
    assert_eq!(store.len().await, 2);

    let mut ws = connect(&gw.ws).await;
    send_text(&mut ws, "still open").await;
    assert_eq!(expect_text(&mut ws).await, "still open");
    send_text(&mut ws, "also fine").await;
    assert_eq!(expect_text(&mut ws).await, "also fine");
    assert_eq!(store.len().await, 4);

    let resp = client
        .post(format!("{}/test", gw.base))
        .json(&json!({ "msg": "http again" }))
        .send()
        .await
        .expect("post");
    assert_eq!(resp.status(), reqwest::StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn continue_policy_keeps_connection_and_sends_notices() {
    let mut config = Config::default();
    config.stream.on_reject = RejectPolicy::Continue;
    config.stream.notices = true;
    let store = Arc::new(MemoryStore::new());
    let gw = spawn_gateway(config, store.clone()).await;
    let mut ws = connect(&gw.ws).await;

    for text in ["one", "two"] {
        send_text(&mut ws, text).await;
        assert_eq!(expect_text(&mut ws).await, text);
    }
    for _ in 0..2 {
        send_text(&mut ws, "over").await;
        let notice: serde_json::Value =
            serde_json::from_str(&expect_text(&mut ws).await).expect("notice json");
        assert_eq!(notice, json!({ "type": "rejected", "reason": "daily limit reached" }));
    }
    assert_eq!(store.len().await, 2);
}

#[tokio::test]
async fn close_policy_with_notices_explains_before_closing() {
    let mut config = Config::default();
    config.quota.daily_limit = 1;
    config.stream.notices = true;
    let gw = spawn_gateway(config, Arc::new(MemoryStore::new())).await;
    let mut ws = connect(&gw.ws).await;

    send_text(&mut ws, "only one").await;
    assert_eq!(expect_text(&mut ws).await, "only one");
    send_text(&mut ws, "one too many").await;
    let notice: serde_json::Value =
        serde_json::from_str(&expect_text(&mut ws).await).expect("notice json");
    assert_eq!(notice["type"], "closed");
    assert_eq!(notice["reason"], "daily limit reached");
    expect_closed(&mut ws).await;
}

#[tokio::test]
async fn invalid_utf8_frame_closes_only_that_connection() {
    let store = Arc::new(MemoryStore::new());
    let gw = spawn_gateway(Config::default(), store.clone()).await;

    let mut bad = connect(&gw.ws).await;
    bad.send(Message::Binary(vec![0xc3, 0x28]))
        .await
        .expect("send binary");
    expect_closed(&mut bad).await;
    assert!(store.is_empty().await);

    let mut good = connect(&gw.ws).await;
    send_text(&mut good, "fresh connection").await;
    assert_eq!(expect_text(&mut good).await, "fresh connection");
}

#[tokio::test]
async fn binary_utf8_frame_is_echoed_as_binary() {
    let store = Arc::new(MemoryStore::new());
    let gw = spawn_gateway(Config::default(), store.clone()).await;
    let mut ws = connect(&gw.ws).await;
    ws.send(Message::Binary(b"bytes".to_vec()))
        .await
        .expect("send binary");
    let next = tokio::time::timeout(IO_TIMEOUT, ws.next())
        .await
        .expect("frame within timeout");
    match next {
        Some(Ok(Message::Binary(b))) => assert_eq!(b, b"bytes".to_vec()),
        other => panic!("expected binary echo, got {:?}", other),
    }
    assert_eq!(store.snapshot().await[0].content, "bytes");
}

#[tokio::test]
async fn store_fault_closes_stream_without_echo() {
    let store = Arc::new(FlakyStore::new());
    let gw = spawn_gateway(Config::default(), store.clone()).await;

    store.set_down(true);
    let mut ws = connect(&gw.ws).await;
    send_text(&mut ws, "will fail").await;
    expect_closed(&mut ws).await;
    assert!(store.inner.is_empty().await);

    store.set_down(false);
    let mut ws = connect(&gw.ws).await;
    send_text(&mut ws, "works again").await;
    assert_eq!(expect_text(&mut ws).await, "works again");
}

#[tokio::test]
async fn shutdown_event_reaches_open_stream_then_going_away_close() {
    let gw = spawn_gateway(Config::default(), Arc::new(MemoryStore::new())).await;
    let mut ws = connect(&gw.ws).await;
    // One round trip so the stream loop is subscribed before the event goes out.
    send_text(&mut ws, "hello").await;
    assert_eq!(expect_text(&mut ws).await, "hello");

    gw.events
        .send(SHUTDOWN_EVENT_JSON.to_string())
        .expect("stream is subscribed");
    let event: serde_json::Value =
        serde_json::from_str(&expect_text(&mut ws).await).expect("event json");
    assert_eq!(event, json!({ "type": "event", "event": "shutdown" }));

    let next = tokio::time::timeout(IO_TIMEOUT, ws.next())
        .await
        .expect("close within timeout");
    match next {
        Some(Ok(Message::Close(Some(frame)))) => assert_eq!(u16::from(frame.code), 1001),
        other => panic!("expected going-away close, got {:?}", other),
    }
}
