use std::{sync::Arc, time::Duration};

use axum::{
    extract::{
        ws::{Message as AxumMessage, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use chrono::Utc;
use serde::Deserialize;
use shared::{
    domain::NotificationId,
    protocol::NotificationPayload,
};
use tokio::{net::TcpListener, sync::Mutex};

use super::*;

const GOOD_TOKEN: &str = "good-token";

#[derive(Deserialize)]
struct WsQuery {
    token: String,
}

#[derive(Clone)]
struct ServerState {
    received: Arc<Mutex<Vec<ClientRequest>>>,
    accepted: Arc<Mutex<u32>>,
    drop_first_connection: bool,
}

async fn handle_ws(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    Query(query): Query<WsQuery>,
    State(state): State<ServerState>,
) -> Response {
    let bearer = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    if query.token != GOOD_TOKEN || bearer.as_deref() != Some("Bearer good-token") {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let connection_number = {
        let mut accepted = state.accepted.lock().await;
        *accepted += 1;
        *accepted
    };
    ws.on_upgrade(move |socket| serve_socket(socket, state, connection_number))
}

async fn serve_socket(mut socket: WebSocket, state: ServerState, connection_number: u32) {
    if state.drop_first_connection && connection_number == 1 {
        // Wait for the join, then drop the socket to force a reconnect.
        if let Some(Ok(AxumMessage::Text(text))) = socket.recv().await {
            if let Ok(request) = serde_json::from_str::<ClientRequest>(&text) {
                state.received.lock().await.push(request);
            }
        }
        return;
    }

    let event = ServerEvent::NotificationCreated(NotificationPayload {
        id: NotificationId(connection_number as i64),
        message: "Task assigned".into(),
        task_id: None,
        board_id: None,
        is_read: false,
        created_at: Utc::now(),
    });
    let frame = serde_json::to_string(&event).expect("encode event");
    if socket.send(AxumMessage::Text(frame)).await.is_err() {
        return;
    }
    while let Some(Ok(message)) = socket.recv().await {
        if let AxumMessage::Text(text) = message {
            if let Ok(request) = serde_json::from_str::<ClientRequest>(&text) {
                state.received.lock().await.push(request);
            }
        }
    }
}

async fn spawn_ws_server(drop_first_connection: bool) -> (String, ServerState) {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let state = ServerState {
        received: Arc::new(Mutex::new(Vec::new())),
        accepted: Arc::new(Mutex::new(0)),
        drop_first_connection,
    };
    let app = Router::new()
        .route("/ws", get(handle_ws))
        .with_state(state.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("ws://{addr}"), state)
}

async fn next_event(inbound: &mut mpsc::Receiver<TransportEvent>) -> TransportEvent {
    tokio::time::timeout(Duration::from_secs(5), inbound.recv())
        .await
        .expect("transport event within timeout")
        .expect("inbound queue open")
}

async fn wait_for_requests(state: &ServerState, count: usize) -> Vec<ClientRequest> {
    for _ in 0..100 {
        let received = state.received.lock().await.clone();
        if received.len() >= count {
            return received;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("server did not receive {count} requests");
}

#[tokio::test]
async fn delivers_server_events_and_outbound_requests() {
    let (ws_url, state) = spawn_ws_server(false).await;
    let connector = WsConnector::new(ws_url);
    let mut session = connector.connect(GOOD_TOKEN).await.expect("connect");

    let TransportEvent::Event(ServerEvent::NotificationCreated(notification)) =
        next_event(&mut session.inbound).await
    else {
        panic!("expected notification event");
    };
    assert_eq!(notification.message, "Task assigned");

    session
        .handle
        .send(ClientRequest::JoinGroupChannel {
            board_id: BoardId(42),
        })
        .expect("send join");
    let received = wait_for_requests(&state, 1).await;
    assert_eq!(
        received[0],
        ClientRequest::JoinGroupChannel {
            board_id: BoardId(42)
        }
    );

    session.handle.close().await;
    match next_event(&mut session.inbound).await {
        TransportEvent::Closed(CloseReason::Requested) => {}
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn rejected_credentials_surface_as_unauthorized() {
    let (ws_url, _state) = spawn_ws_server(false).await;
    let connector = WsConnector::new(ws_url);
    let err = connector
        .connect("stale-token")
        .await
        .err()
        .expect("connect must fail");
    assert!(matches!(err, TransportError::Unauthorized));
}

#[tokio::test]
async fn reconnect_replays_board_subscriptions() {
    let (ws_url, state) = spawn_ws_server(true).await;
    let connector =
        WsConnector::new(ws_url).with_reconnect(Duration::from_millis(20), 3);
    let mut session = connector.connect(GOOD_TOKEN).await.expect("connect");
    session
        .handle
        .send(ClientRequest::JoinGroupChannel {
            board_id: BoardId(7),
        })
        .expect("send join");

    match next_event(&mut session.inbound).await {
        TransportEvent::Reconnected => {}
        other => panic!("unexpected event {other:?}"),
    }
    let TransportEvent::Event(ServerEvent::NotificationCreated(notification)) =
        next_event(&mut session.inbound).await
    else {
        panic!("expected notification from second connection");
    };
    assert_eq!(notification.id, NotificationId(2));

    let received = wait_for_requests(&state, 2).await;
    assert!(received.iter().all(|request| *request
        == ClientRequest::JoinGroupChannel {
            board_id: BoardId(7)
        }));
    assert!(!session.handle.is_closed());
    session.handle.close().await;
}

#[test]
fn derives_ws_url_from_http_scheme() {
    assert_eq!(
        ws_url_from_server_url("https://boards.example.com").expect("https"),
        "wss://boards.example.com"
    );
    assert_eq!(
        ws_url_from_server_url("http://127.0.0.1:5000").expect("http"),
        "ws://127.0.0.1:5000"
    );
    assert!(ws_url_from_server_url("ftp://example.com").is_err());
}

#[test]
fn endpoint_carries_token_query() {
    let connector = WsConnector::new("ws://127.0.0.1:9000/");
    let url = connector.endpoint("a b").expect("endpoint");
    assert_eq!(url.as_str(), "ws://127.0.0.1:9000/ws?token=a+b");
    assert!(WsConnector::new("http://127.0.0.1:9000")
        .endpoint("t")
        .is_err());
}
