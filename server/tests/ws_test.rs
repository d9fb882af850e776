//! Integration tests for WebSocket connection, auth, ping/pong, capacity
//! limits, and connection cleanup.

use futures_util::{SinkExt, StreamExt};
use relay_protocol::{ClientMessage, ServerEvent};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use relay_server::config::Config;
use relay_server::db::models::User;
use relay_server::state::AppState;

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestServer {
    addr: SocketAddr,
    state: AppState,
    _tmp: tempfile::TempDir,
}

/// Start the server on a random port with the given config.
async fn start_test_server_with(mut config: Config) -> TestServer {
    let tmp = tempfile::tempdir().expect("Failed to create temp dir");
    config.data_dir = tmp.path().to_str().unwrap().to_string();

    let db = relay_server::db::init_db(&config.data_dir).expect("Failed to init DB");
    let jwt_secret = relay_server::auth::jwt::load_or_generate_jwt_secret(&config.data_dir)
        .expect("Failed to generate JWT secret");

    let state = AppState::new(db, jwt_secret, &config);
    let app = relay_server::routes::build_router(state.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer {
        addr,
        state,
        _tmp: tmp,
    }
}

async fn start_test_server() -> TestServer {
    start_test_server_with(Config::default()).await
}

/// Create a user row and issue an access token for it.
async fn seed_user(server: &TestServer, username: &str) -> (User, String) {
    let user = relay_server::db::create_user(&server.state.db, username, username)
        .await
        .expect("Failed to create user");
    let token = relay_server::auth::jwt::issue_access_token(&server.state.jwt_secret, &user.id)
        .expect("Failed to issue token");
    (user, token)
}

async fn connect_ws(addr: SocketAddr, token: &str) -> Ws {
    let url = format!("ws://{}/ws?token={}", addr, token);
    let (ws, _) = tokio_tungstenite::connect_async(&url)
        .await
        .expect("Failed to connect to WebSocket");
    ws
}

async fn send_client(ws: &mut Ws, message: &ClientMessage) {
    let json = serde_json::to_string(message).unwrap();
    ws.send(Message::Text(json.into()))
        .await
        .expect("Failed to send");
}

/// Drain frames until one decodes to a ServerEvent matching the predicate,
/// or the timeout expires.
async fn wait_for_event<F>(ws: &mut Ws, matches: F) -> Option<ServerEvent>
where
    F: Fn(&ServerEvent) -> bool,
{
    loop {
        match tokio::time::timeout(Duration::from_secs(2), ws.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                if let Ok(event) = serde_json::from_str::<ServerEvent>(&text) {
                    if matches(&event) {
                        return Some(event);
                    }
                }
            }
            Ok(Some(Ok(_))) => continue, // pings etc.
            _ => return None,
        }
    }
}

#[tokio::test]
async fn connected_ack_is_the_first_event() {
    let server = start_test_server().await;
    let (user, token) = seed_user(&server, "alice").await;

    let mut ws = connect_ws(server.addr, &token).await;

    let first = wait_for_event(&mut ws, |_| true).await.expect("no event");
    match first {
        ServerEvent::Connected {
            user_id,
            connection_id,
        } => {
            assert_eq!(user_id, user.id);
            assert!(!connection_id.is_empty());
        }
        other => panic!("Expected connected ack first, got {:?}", other),
    }
}

#[tokio::test]
async fn invalid_token_is_refused_before_registration() {
    let server = start_test_server().await;

    let url = format!("ws://{}/ws?token=not_a_jwt", server.addr);
    let (mut ws, _) = tokio_tungstenite::connect_async(&url)
        .await
        .expect("WebSocket should upgrade even with invalid token");

    let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
        .await
        .expect("Expected close message within timeout");

    match msg {
        Some(Ok(Message::Close(Some(frame)))) => {
            assert_eq!(
                frame.code,
                tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode::from(4002),
                "Expected close code 4002 (token invalid)"
            );
        }
        Some(Ok(Message::Close(None))) | None => {}
        other => {
            if let Some(Ok(msg)) = other {
                assert!(msg.is_close(), "Expected close message, got: {:?}", msg);
            }
        }
    }
}

#[tokio::test]
async fn missing_token_is_refused() {
    let server = start_test_server().await;

    let url = format!("ws://{}/ws", server.addr);
    let (mut ws, _) = tokio_tungstenite::connect_async(&url)
        .await
        .expect("WebSocket should upgrade without a token");

    let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
        .await
        .expect("Expected close within timeout");
    match msg {
        Some(Ok(msg)) => assert!(msg.is_close(), "Expected close, got {:?}", msg),
        _ => {}
    }
}

#[tokio::test]
async fn app_level_ping_gets_pong() {
    let server = start_test_server().await;
    let (_user, token) = seed_user(&server, "alice").await;

    let mut ws = connect_ws(server.addr, &token).await;
    send_client(&mut ws, &ClientMessage::Ping {}).await;

    let pong = wait_for_event(&mut ws, |e| matches!(e, ServerEvent::Pong {})).await;
    assert!(pong.is_some(), "Expected pong envelope");
}

#[tokio::test]
async fn connection_past_the_user_cap_is_refused() {
    let server = start_test_server_with(Config {
        max_connections_per_user: 2,
        ..Config::default()
    })
    .await;
    let (user, token) = seed_user(&server, "alice").await;

    let _ws1 = connect_ws(server.addr, &token).await;
    let _ws2 = connect_ws(server.addr, &token).await;

    // Third connection for the same user must be refused with 4005 —
    // and the existing two must stay registered.
    let mut ws3 = connect_ws(server.addr, &token).await;
    let msg = tokio::time::timeout(Duration::from_secs(2), ws3.next())
        .await
        .expect("Expected close within timeout");
    match msg {
        Some(Ok(Message::Close(Some(frame)))) => {
            assert_eq!(
                frame.code,
                tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode::from(4005),
                "Expected close code 4005 (capacity exceeded)"
            );
        }
        other => panic!("Expected close frame, got {:?}", other),
    }

    assert_eq!(server.state.registry.connection_count(&user.id), 2);
}

#[tokio::test]
async fn unknown_message_type_earns_an_error_event() {
    let server = start_test_server().await;
    let (_user, token) = seed_user(&server, "alice").await;

    let mut ws = connect_ws(server.addr, &token).await;
    ws.send(Message::Text(
        r#"{"type":"teleport","data":{}}"#.to_string().into(),
    ))
    .await
    .unwrap();

    let err = wait_for_event(&mut ws, |e| matches!(e, ServerEvent::Error { .. })).await;
    assert!(err.is_some(), "Expected error event for unknown type");
}

#[tokio::test]
async fn presence_endpoint_reflects_live_connections() {
    let server = start_test_server().await;
    let (user, token) = seed_user(&server, "alice").await;

    let _ws = connect_ws(server.addr, &token).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let client = reqwest::Client::new();
    let resp = client
        .get(format!("http://{}/api/presence", server.addr))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: serde_json::Value = resp.json().await.unwrap();
    let entry = body
        .as_array()
        .unwrap()
        .iter()
        .find(|e| e["user_id"] == user.id.as_str())
        .expect("alice should be tracked");
    assert_eq!(entry["status"], "online");

    // Without a token the endpoint is refused.
    let resp = client
        .get(format!("http://{}/api/presence", server.addr))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn disconnect_cleans_up_registry_and_subscriptions() {
    let server = start_test_server().await;
    let (user, token) = seed_user(&server, "alice").await;

    let channel = relay_server::db::create_channel(&server.state.db, "general")
        .await
        .unwrap();
    relay_server::chat::membership::add_member(&server.state.db, &user.id, &channel.id)
        .await
        .unwrap();

    let mut ws = connect_ws(server.addr, &token).await;
    send_client(
        &mut ws,
        &ClientMessage::Subscribe {
            channel_ids: vec![channel.id.clone()],
        },
    )
    .await;
    wait_for_event(&mut ws, |e| matches!(e, ServerEvent::Subscribed { .. }))
        .await
        .expect("Expected subscribed ack");

    ws.send(Message::Close(None)).await.unwrap();
    drop(ws);

    // Give the actor a moment to tear down.
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(server.state.registry.connection_count(&user.id), 0);
    assert!(
        server.state.subscriptions.subscribers_of(&channel.id).is_empty(),
        "Subscriptions must not outlive the connection batch"
    );
}
