//! End-to-end tests for the WebSocket control channel.
//!
//! Each test binds a real axum server on an ephemeral port and talks to it
//! with a `tokio-tungstenite` client using the JSON wire format.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use craftplane::control::server::{self, ControlState};

use super::test_helpers::{registry_with, settings, ScriptDriver, EVENT_TIMEOUT, INTERACTIVE};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Server {
    addr: std::net::SocketAddr,
    ct: CancellationToken,
}

impl Drop for Server {
    fn drop(&mut self) {
        self.ct.cancel();
    }
}

impl Server {
    async fn start(drivers: Vec<ScriptDriver>) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let registry = registry_with(drivers, settings(addr.port()));
        let ct = CancellationToken::new();
        let state = ControlState {
            registry,
            client_buffer: 64,
            ct: ct.clone(),
        };
        tokio::spawn(server::serve(listener, state));
        Self { addr, ct }
    }

    async fn connect(&self) -> Client {
        let (client, _) = connect_async(format!("ws://{}/socket", self.addr))
            .await
            .expect("websocket handshake");
        client
    }
}

async fn send(client: &mut Client, message: Value) {
    client
        .send(Message::Text(message.to_string()))
        .await
        .expect("send frame");
}

async fn recv(client: &mut Client) -> Value {
    tokio::time::timeout(EVENT_TIMEOUT, async {
        loop {
            match client.next().await {
                Some(Ok(Message::Text(text))) => return serde_json::from_str(&text).unwrap(),
                Some(Ok(_)) => {}
                other => panic!("connection ended: {other:?}"),
            }
        }
    })
    .await
    .expect("timed out waiting for frame")
}

/// Receive frames until one with the given event name arrives.
async fn recv_event(client: &mut Client, event: &str) -> Value {
    loop {
        let frame = recv(client).await;
        if frame["event"] == event {
            return frame;
        }
    }
}

fn create(name: &str, port: u16, kind: &str) -> Value {
    json!({
        "event": "create",
        "data": {"name": name, "version": "1.20", "port": port, "memory": 512, "type": kind},
    })
}

/// Round-trip a `list` so every earlier frame on this connection is handled.
async fn list(client: &mut Client) -> Value {
    send(client, json!({"event": "list"})).await;
    recv_event(client, "sessions").await["data"]["sessions"].clone()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn create_replies_init_and_duplicate_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let gate = Arc::new(Notify::new());
    let server = Server::start(vec![
        ScriptDriver::new("paper", INTERACTIVE, dir.path()).gated(gate),
    ])
    .await;
    let mut client = server.connect().await;

    send(&mut client, create("Alpha", 25565, "paper")).await;
    let init = recv(&mut client).await;
    assert_eq!(init["event"], "init");
    let identity = init["data"]["identity"].as_str().unwrap().to_owned();
    assert_eq!(identity.len(), 6);

    send(&mut client, create("Alpha", 25565, "paper")).await;
    assert_eq!(
        recv(&mut client).await,
        json!({"event": "err", "data": {"reason": "Duplicate configuration"}})
    );

    let sessions = list(&mut client).await;
    assert_eq!(sessions.as_array().unwrap().len(), 1);
    assert_eq!(sessions[0]["identity"], identity.as_str());
    assert_eq!(sessions[0]["type"], "paper");
}

#[tokio::test]
async fn unknown_type_and_control_port_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let server = Server::start(vec![ScriptDriver::new("paper", INTERACTIVE, dir.path())]).await;
    let mut client = server.connect().await;

    send(&mut client, create("Alpha", 25565, "forge")).await;
    assert_eq!(recv(&mut client).await["data"]["reason"], "Unknown forge");

    send(&mut client, create("Alpha", server.addr.port(), "paper")).await;
    assert_eq!(recv(&mut client).await["data"]["reason"], "Duplicate configuration");
}

#[tokio::test]
async fn malformed_frames_get_err_and_connection_survives() {
    let dir = tempfile::tempdir().unwrap();
    let server = Server::start(vec![ScriptDriver::new("paper", INTERACTIVE, dir.path())]).await;
    let mut client = server.connect().await;

    client.send(Message::Text("{not json".into())).await.unwrap();
    let reply = recv(&mut client).await;
    assert_eq!(reply["event"], "err");
    assert!(reply["data"]["reason"].as_str().unwrap().starts_with("Invalid message: "));

    send(&mut client, json!({"event": "teleport", "data": {}})).await;
    assert_eq!(recv(&mut client).await["event"], "err");

    assert_eq!(list(&mut client).await, json!([]));
}

#[tokio::test]
async fn log_for_unknown_session_is_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let server = Server::start(vec![ScriptDriver::new("paper", INTERACTIVE, dir.path())]).await;
    let mut client = server.connect().await;

    send(&mut client, json!({"event": "log", "data": {"hash": "abcdef"}})).await;
    assert_eq!(
        recv(&mut client).await,
        json!({"event": "err", "data": {"reason": "Unable to open log"}})
    );
}

#[tokio::test]
async fn subscribe_and_send_to_unknown_identity_are_silent() {
    let dir = tempfile::tempdir().unwrap();
    let server = Server::start(vec![ScriptDriver::new("paper", INTERACTIVE, dir.path())]).await;
    let mut client = server.connect().await;

    send(&mut client, json!({"event": "subscribe", "data": {"identity": "abcdef"}})).await;
    send(&mut client, json!({"event": "unsubscribe", "data": {"identity": "abcdef"}})).await;
    send(&mut client, json!({"event": "send", "data": {"identity": "abcdef", "message": "hi"}})).await;

    // The first reply is the list; nothing was sent for the other frames.
    let reply = {
        send(&mut client, json!({"event": "list"})).await;
        recv(&mut client).await
    };
    assert_eq!(reply["event"], "sessions");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn subscribers_share_console_and_close() {
    let dir = tempfile::tempdir().unwrap();
    let server = Server::start(vec![ScriptDriver::new("paper", INTERACTIVE, dir.path())]).await;
    let mut owner = server.connect().await;
    let mut watcher = server.connect().await;

    send(&mut owner, create("Alpha", 25565, "paper")).await;
    let identity = recv_event(&mut owner, "init").await["data"]["identity"]
        .as_str()
        .unwrap()
        .to_owned();
    let starting = recv_event(&mut owner, "console").await;
    assert_eq!(starting["data"]["message"], "Starting paper 1.20 (server name: Alpha)...");

    send(&mut watcher, json!({"event": "subscribe", "data": {"hash": identity}})).await;
    for _ in 0..500 {
        if list(&mut watcher).await[0]["state"] == "running" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    send(
        &mut owner,
        json!({"event": "send", "data": {"identity": identity, "message": "ping"}}),
    )
    .await;
    for client in [&mut owner, &mut watcher] {
        assert_eq!(
            recv_event(client, "console").await,
            json!({"event": "console", "data": {"identity": identity, "message": "got ping"}})
        );
    }

    send(
        &mut owner,
        json!({"event": "send", "data": {"identity": identity, "message": "stop"}}),
    )
    .await;
    for client in [&mut owner, &mut watcher] {
        assert_eq!(
            recv_event(client, "close").await,
            json!({"event": "close", "data": {"identity": identity}})
        );
    }
}

#[tokio::test]
async fn ping_is_answered_with_pong() {
    let dir = tempfile::tempdir().unwrap();
    let server = Server::start(vec![ScriptDriver::new("paper", INTERACTIVE, dir.path())]).await;
    let mut client = server.connect().await;

    client.send(Message::Ping(vec![7, 7])).await.unwrap();
    let pong = tokio::time::timeout(EVENT_TIMEOUT, async {
        loop {
            if let Some(Ok(Message::Pong(payload))) = client.next().await {
                return payload;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(pong, vec![7, 7]);
}

#[tokio::test]
async fn health_endpoint_reports_ok() {
    let dir = tempfile::tempdir().unwrap();
    let server = Server::start(vec![ScriptDriver::new("paper", INTERACTIVE, dir.path())]).await;

    let body = reqwest::get(format!("http://{}/health", server.addr))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "ok");
}
