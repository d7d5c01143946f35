//! End-to-end tests against a fake WebSocket server standing in for the
//! hosted service, grounded in the teacher's own `ws_errors` harness
//! (`TcpListener` + `tokio_tungstenite::accept_async`).

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::protocol::Message, WebSocketStream};

use pulse_client::{AuthStrategy, ChannelData, Client, ConnectionState, Options, Payload};

type ServerSocket = WebSocketStream<TcpStream>;

/// Binds an ephemeral port and returns it alongside a listener already
/// waiting for the single connection the test will make, so there is no gap
/// between "pick a port" and "accept on it" the way a fixed port would have.
async fn bind_ephemeral() -> (u16, TcpListener) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (port, listener)
}

async fn accept_one(listener: TcpListener) -> ServerSocket {
    let (stream, _) = listener.accept().await.unwrap();
    accept_async(stream).await.unwrap()
}

async fn send_json(socket: &mut ServerSocket, value: Value) {
    socket.send(Message::Text(value.to_string())).await.unwrap();
}

async fn recv_json(socket: &mut ServerSocket) -> Value {
    loop {
        match socket.next().await.unwrap().unwrap() {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

fn connection_established(socket_id: &str) -> Value {
    json!({
        "event": "pusher:connection_established",
        "data": json!({ "socket_id": socket_id }).to_string(),
    })
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn content_length(headers: &str) -> usize {
    headers
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            if name.trim().eq_ignore_ascii_case("content-length") {
                value.trim().parse::<usize>().ok()
            } else {
                None
            }
        })
        .unwrap_or(0)
}

/// Reads a minimal HTTP/1.1 request off `stream`, returning its headers and
/// body. Hand-rolled rather than pulled from a crate: the auth strategies
/// this exercises only need a POST target to receive on, not a real server.
async fn read_http_request(stream: &mut TcpStream) -> (String, String) {
    let mut buf = Vec::new();
    let mut tmp = [0u8; 1024];
    let header_end = loop {
        let n = stream.read(&mut tmp).await.unwrap();
        assert!(n > 0, "connection closed before headers completed");
        buf.extend_from_slice(&tmp[..n]);
        if let Some(pos) = find_subslice(&buf, b"\r\n\r\n") {
            break pos + 4;
        }
    };
    let headers = String::from_utf8_lossy(&buf[..header_end]).into_owned();
    let needed = content_length(&headers);
    while buf.len() - header_end < needed {
        let n = stream.read(&mut tmp).await.unwrap();
        buf.extend_from_slice(&tmp[..n]);
    }
    let body = String::from_utf8_lossy(&buf[header_end..header_end + needed]).into_owned();
    (headers, body)
}

async fn respond_json(stream: &mut TcpStream, body: &str) {
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    stream.write_all(response.as_bytes()).await.unwrap();
    let _ = stream.shutdown().await;
}

fn subscription_succeeded(channel: &str, presence: Option<Value>) -> Value {
    let mut data = serde_json::Map::new();
    if let Some(presence) = presence {
        data.insert("presence".to_string(), presence);
    }
    json!({
        "event": "pusher_internal:subscription_succeeded",
        "channel": channel,
        "data": Value::Object(data).to_string(),
    })
}

#[tokio::test]
async fn happy_subscribe_public_channel() {
    let (port, listener) = bind_ephemeral().await;
    let server = tokio::spawn(async move {
        let mut socket = accept_one(listener).await;
        send_json(&mut socket, connection_established("abc")).await;
        let subscribe = recv_json(&mut socket).await;
        assert_eq!(subscribe["event"], "pusher:subscribe");
        assert_eq!(subscribe["data"]["channel"], "chat");
        send_json(&mut socket, subscription_succeeded("chat", None)).await;
        socket
    });

    let client = Client::new(Options::new("KEY").with_host("127.0.0.1", port, false).with_auto_reconnect(false));
    let (tx, mut rx) = mpsc::unbounded_channel();
    client.bind("pusher_internal:subscription_succeeded", move |payload| {
        let _ = tx.send(payload);
    });

    let channel = client.subscribe("chat");
    client.connect().unwrap();

    let received = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
    assert!(matches!(received, Payload::Json(_) | Payload::Raw(_)));
    assert!(channel.is_subscribed());

    server.await.unwrap();
}

#[tokio::test]
async fn client_event_gate() {
    let (port, listener) = bind_ephemeral().await;
    let server = tokio::spawn(async move {
        let mut socket = accept_one(listener).await;
        send_json(&mut socket, connection_established("abc")).await;

        // First subscribe is for the private channel (auth required, but
        // inline-secret needs no round trip before the subscribe frame).
        let subscribe = recv_json(&mut socket).await;
        assert_eq!(subscribe["data"]["channel"], "private-x");
        send_json(&mut socket, subscription_succeeded("private-x", None)).await;

        let trigger = recv_json(&mut socket).await;
        assert_eq!(trigger["event"], "client-foo");
        assert_eq!(trigger["channel"], "private-x");
        socket
    });

    let options = Options::new("KEY")
        .with_host("127.0.0.1", port, false)
        .with_auto_reconnect(false)
        .with_auth_strategy(AuthStrategy::InlineSecret {
            app_key: "KEY".to_string(),
            secret: "s3cret".to_string(),
        });
    let client = Client::new(options);

    let public = client.subscribe("news");
    let private = client.subscribe("private-x");
    client.connect().unwrap();

    // The public channel can never accept a client event, subscribed or not.
    let err = public.trigger("client-foo", json!({})).await.unwrap_err();
    assert!(err.to_string().contains("client event"));

    // Wait for private-x to actually subscribe before triggering on it.
    for _ in 0..50 {
        if private.is_subscribed() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(private.is_subscribed());
    private.trigger("client-foo", json!({})).await.unwrap();

    server.await.unwrap();
}

#[tokio::test]
async fn presence_membership_lifecycle() {
    let (port, listener) = bind_ephemeral().await;
    let server = tokio::spawn(async move {
        let mut socket = accept_one(listener).await;
        send_json(&mut socket, connection_established("1.2")).await;
        let _subscribe = recv_json(&mut socket).await;

        let presence = json!({ "hash": { "u1": {"n": "a"}, "u2": {"n": "b"} } });
        send_json(&mut socket, subscription_succeeded("presence-office", Some(presence))).await;

        send_json(
            &mut socket,
            json!({
                "event": "pusher_internal:member_added",
                "channel": "presence-office",
                "data": json!({ "user_id": "u3" }).to_string(),
            }),
        )
        .await;
        send_json(
            &mut socket,
            json!({
                "event": "pusher_internal:member_removed",
                "channel": "presence-office",
                "data": json!({ "user_id": "u1" }).to_string(),
            }),
        )
        .await;
        socket
    });

    let options = Options::new("KEY")
        .with_host("127.0.0.1", port, false)
        .with_auto_reconnect(false)
        .with_auth_strategy(AuthStrategy::InlineSecret {
            app_key: "KEY".to_string(),
            secret: "s3cret".to_string(),
        })
        .with_user_data_provider(|socket_id: &str| ChannelData {
            user_id: socket_id.to_string(),
            user_info: None,
        });
    let client = Client::new(options);
    let added = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let added_clone = added.clone();
    let channel = client.subscribe_with(
        "presence-office",
        Some(std::sync::Arc::new(move |m: &pulse_client::Member| {
            added_clone.lock().unwrap().push(m.user_id.clone());
        })),
        None,
    );
    client.connect().unwrap();

    let mut ids: Vec<String> = Vec::new();
    for _ in 0..100 {
        ids = {
            let mut v: Vec<String> = channel.members().into_iter().map(|m| m.user_id).collect();
            v.sort();
            v
        };
        if ids == vec!["u2".to_string(), "u3".to_string()] {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(ids, vec!["u2".to_string(), "u3".to_string()]);
    assert_eq!(added.lock().unwrap().as_slice(), ["u3"]);

    server.await.unwrap();
}

#[tokio::test]
async fn disconnect_marks_channels_unsubscribed() {
    let (port, listener) = bind_ephemeral().await;
    let server = tokio::spawn(async move {
        let mut socket = accept_one(listener).await;
        send_json(&mut socket, connection_established("abc")).await;
        let _subscribe = recv_json(&mut socket).await;
        send_json(&mut socket, subscription_succeeded("chat", None)).await;
        tokio::time::sleep(Duration::from_millis(200)).await;
    });

    let client = Client::new(Options::new("KEY").with_host("127.0.0.1", port, false).with_auto_reconnect(false));
    let channel = client.subscribe("chat");
    client.connect().unwrap();

    for _ in 0..50 {
        if channel.is_subscribed() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(channel.is_subscribed());

    client.disconnect().unwrap();
    for _ in 0..50 {
        if client.state() == ConnectionState::Disconnected {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(!channel.is_subscribed());

    let _ = server.await;
}

#[tokio::test]
async fn private_channel_auth_via_endpoint() {
    let (auth_port, auth_listener) = bind_ephemeral().await;
    let auth_server = tokio::spawn(async move {
        let (mut stream, _) = auth_listener.accept().await.unwrap();
        let (_headers, body) = read_http_request(&mut stream).await;
        assert!(body.contains("socket_id=abc"));
        assert!(body.contains("channel_name=private-orders"));
        respond_json(&mut stream, r#"{"auth":"KEY:deadbeef"}"#).await;
    });

    let (ws_port, ws_listener) = bind_ephemeral().await;
    let ws_server = tokio::spawn(async move {
        let mut socket = accept_one(ws_listener).await;
        send_json(&mut socket, connection_established("abc")).await;
        let subscribe = recv_json(&mut socket).await;
        assert_eq!(subscribe["event"], "pusher:subscribe");
        assert_eq!(subscribe["data"]["channel"], "private-orders");
        assert_eq!(subscribe["data"]["auth"], "KEY:deadbeef");
        socket
    });

    let options = Options::new("KEY")
        .with_host("127.0.0.1", ws_port, false)
        .with_auto_reconnect(false)
        .with_auth_strategy(AuthStrategy::Endpoint {
            url: format!("http://127.0.0.1:{auth_port}/auth"),
        });
    let client = Client::new(options);
    let _channel = client.subscribe("private-orders");
    client.connect().unwrap();

    auth_server.await.unwrap();
    ws_server.await.unwrap();
}

#[tokio::test]
async fn round_trip_raw_payload_when_json_object_disabled() {
    let (port, listener) = bind_ephemeral().await;
    let server = tokio::spawn(async move {
        let mut socket = accept_one(listener).await;
        send_json(&mut socket, connection_established("abc")).await;
        let _subscribe = recv_json(&mut socket).await;
        send_json(&mut socket, subscription_succeeded("chat", None)).await;
        send_json(
            &mut socket,
            json!({
                "event": "my-event",
                "channel": "chat",
                "data": json!({ "x": 1 }).to_string(),
            }),
        )
        .await;
        socket
    });

    let options = Options::new("KEY")
        .with_host("127.0.0.1", port, false)
        .with_auto_reconnect(false)
        .with_attempt_to_return_json_object(false);
    let client = Client::new(options);
    let channel = client.subscribe("chat");
    let (tx, mut rx) = mpsc::unbounded_channel();
    channel.bind("my-event", move |payload| {
        let _ = tx.send(payload);
    });
    client.connect().unwrap();

    let received = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
    match received {
        Payload::Raw(raw) => assert_eq!(raw, r#"{"x":1}"#),
        Payload::Json(_) => panic!("expected a raw payload when attempt_to_return_json_object is false"),
    }

    server.await.unwrap();
}
