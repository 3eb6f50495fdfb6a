//! Client mode integration tests
//!
//! A bare tokio-tungstenite listener plays the controller; the agent dials it
//! with `run_client` and must redial after every drop.

#![cfg(unix)]

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};

use spectre_agent::{run_client, AgentIdentity, AgentState, LocalProbe};
use spectre_core::config::AgentConfig;
use spectre_protocol::Fingerprint;

type Controller = WebSocketStream<TcpStream>;

static PORT_COUNTER: AtomicU16 = AtomicU16::new(0);

fn get_test_port() -> u16 {
    42000 + PORT_COUNTER.fetch_add(1, Ordering::SeqCst)
}

fn agent_state(port: u16) -> Arc<AgentState> {
    let config = AgentConfig {
        token: "secret".to_string(),
        host: Some(format!("127.0.0.1:{}", port)),
        default_shell: Some("/bin/sh".to_string()),
        handshake_timeout: Duration::from_secs(2),
        ..Default::default()
    };
    let identity = AgentIdentity::new("device-dialer".to_string(), Fingerprint::default());
    Arc::new(AgentState::new(config, identity, Arc::new(LocalProbe)))
}

/// Accept the agent's next dial, returning the socket and the request URI
async fn accept_agent(listener: &TcpListener) -> (Controller, String) {
    let (stream, _) = timeout(Duration::from_secs(10), listener.accept())
        .await
        .expect("agent did not dial")
        .unwrap();

    let uri = Arc::new(Mutex::new(String::new()));
    let seen = Arc::clone(&uri);
    let callback = move |req: &Request, resp: Response| {
        *seen.lock().unwrap() = req.uri().to_string();
        Ok::<_, ErrorResponse>(resp)
    };
    let socket = accept_hdr_async(stream, callback).await.unwrap();
    let uri = uri.lock().unwrap().clone();
    (socket, uri)
}

async fn recv(socket: &mut Controller) -> Option<Value> {
    loop {
        let frame = timeout(Duration::from_secs(10), socket.next())
            .await
            .expect("Timed out waiting for a frame");
        match frame {
            Some(Ok(Message::Text(text))) => return Some(serde_json::from_str(&text).unwrap()),
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
            _ => return None,
        }
    }
}

async fn send(socket: &mut Controller, value: Value) {
    socket.send(Message::Text(value.to_string())).await.unwrap();
}

fn spawn_client(state: &Arc<AgentState>, port: u16) -> tokio::task::JoinHandle<()> {
    let state = Arc::clone(state);
    let host = format!("127.0.0.1:{}", port);
    tokio::spawn(async move {
        run_client(state, &host).await.unwrap();
    })
}

#[tokio::test]
async fn test_agent_dials_and_serves_sessions() {
    let port = get_test_port();
    let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
    let state = agent_state(port);
    let client = spawn_client(&state, port);

    let (mut socket, uri) = accept_agent(&listener).await;
    assert_eq!(uri, "/agents/register?token=secret");

    // The dialing side speaks first.
    let hello = recv(&mut socket).await.expect("no hello from agent");
    assert_eq!(hello["type"], "hello");
    assert_eq!(hello["agentId"], "device-dialer");
    send(&mut socket, json!({"type": "hello"})).await;

    send(&mut socket, json!({"type": "reset", "sessionId": "s2"})).await;
    send(
        &mut socket,
        json!({"type": "keystroke", "sessionId": "s2", "data": "echo dialed-$((6*7))\n"}),
    )
    .await;

    let mut seen = String::new();
    while !seen.contains("dialed-42") {
        let frame = recv(&mut socket).await.expect("agent hung up");
        if frame["type"] == "output" {
            assert_eq!(frame["sessionId"], "s2");
            seen.push_str(frame["data"].as_str().unwrap_or_default());
        }
    }

    state.shutdown.cancel();
    timeout(Duration::from_secs(5), client)
        .await
        .expect("client mode did not stop on shutdown")
        .unwrap();
}

#[tokio::test]
async fn test_agent_redials_after_drop() {
    let port = get_test_port();
    let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
    let state = agent_state(port);
    let client = spawn_client(&state, port);

    let (mut socket, _) = accept_agent(&listener).await;
    recv(&mut socket).await.expect("no hello from agent");
    send(&mut socket, json!({"type": "hello"})).await;
    let _ = socket.close(None).await;
    drop(socket);

    // First backoff step is one second.
    let (mut socket, _) = accept_agent(&listener).await;
    let hello = recv(&mut socket).await.expect("no hello on redial");
    assert_eq!(hello["type"], "hello");

    state.shutdown.cancel();
    timeout(Duration::from_secs(5), client).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_wrong_handshake_reply_is_retried() {
    let port = get_test_port();
    let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
    let state = agent_state(port);
    let client = spawn_client(&state, port);

    let (mut socket, _) = accept_agent(&listener).await;
    recv(&mut socket).await.expect("no hello from agent");
    send(&mut socket, json!({"type": "keystroke", "data": "x"})).await;
    assert_eq!(recv(&mut socket).await, None);

    let (mut socket, _) = accept_agent(&listener).await;
    assert_eq!(recv(&mut socket).await.unwrap()["type"], "hello");

    state.shutdown.cancel();
    timeout(Duration::from_secs(5), client).await.unwrap().unwrap();
}
