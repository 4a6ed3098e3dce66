use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ai_chat_sdk::stream::client::ChatStreamClient;
use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::StreamExt;
use secrecy::SecretString;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::time::timeout;

const TEST_TOKEN: &str = "stream-token";
const CLOSE_REASON: &str = "bye";

#[derive(Clone)]
struct WsState {
    expected_authorization: String,
    observed_tx: Arc<tokio::sync::Mutex<Option<oneshot::Sender<Result<Value, String>>>>>,
}

#[derive(Debug, PartialEq)]
enum Seen {
    Open,
    Message(Value),
    Error(String),
    Close(Option<u16>, Option<String>),
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stream_client_dispatches_events_in_order() {
    let (observed_tx, observed_rx) = oneshot::channel();
    let state = WsState {
        expected_authorization: format!("Bearer {TEST_TOKEN}"),
        observed_tx: Arc::new(tokio::sync::Mutex::new(Some(observed_tx))),
    };
    let app = Router::new()
        .route("/chat/stream", get(ws_handler))
        .with_state(state);
    let (addr, shutdown_tx, server_task) = spawn_server(app).await;

    let mut client = ChatStreamClient::new(
        &format!("http://{addr}"),
        Some(SecretString::new(TEST_TOKEN.to_string())),
    );
    client.connect().expect("prepare stream connection");
    let sender = client.sender().expect("sender after connect");

    let seen = Arc::new(Mutex::new(Vec::new()));
    {
        let seen = Arc::clone(&seen);
        client.on_open(move || seen.lock().unwrap().push(Seen::Open));
    }
    {
        let seen = Arc::clone(&seen);
        client.on_message(move |value| {
            let ack = json!({"type": "ack", "of": value["type"].clone()});
            seen.lock().unwrap().push(Seen::Message(value));
            sender.send(&ack).expect("queue ack");
        });
    }
    {
        let seen = Arc::clone(&seen);
        client.on_error(move |error| seen.lock().unwrap().push(Seen::Error(error.to_string())));
    }
    {
        let seen = Arc::clone(&seen);
        client.on_close(move |code, reason| seen.lock().unwrap().push(Seen::Close(code, reason)));
    }

    timeout(Duration::from_secs(5), client.run_forever())
        .await
        .expect("stream loop should end after server close");
    assert!(!client.is_connected());

    let seen = std::mem::take(&mut *seen.lock().unwrap());
    assert_eq!(seen.len(), 4, "unexpected events: {seen:?}");
    assert_eq!(seen[0], Seen::Open);
    match &seen[1] {
        Seen::Error(message) => assert!(message.starts_with("JSON decode error")),
        other => panic!("expected decode error, got {other:?}"),
    }
    assert_eq!(seen[2], Seen::Message(json!({"type": "chat", "text": "hi"})));
    assert_eq!(
        seen[3],
        Seen::Close(Some(1000), Some(CLOSE_REASON.to_string()))
    );

    let ack = timeout(Duration::from_secs(2), observed_rx)
        .await
        .expect("timed out waiting for ws server observation")
        .expect("ws observation channel closed")
        .expect("ws protocol assertions failed");
    assert_eq!(ack, json!({"type": "ack", "of": "chat"}));

    // Sending after the loop ended is ignored.
    client.send(&json!({"late": true})).expect("ignored send");

    let _ = shutdown_tx.send(());
    server_task.await.expect("mock ws server task should join");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn client_close_ends_the_loop() {
    let app = Router::new().route(
        "/chat/stream",
        get(|ws: WebSocketUpgrade| async move { ws.on_upgrade(drain_until_closed) }),
    );
    let (addr, shutdown_tx, server_task) = spawn_server(app).await;

    let mut client = ChatStreamClient::new(&format!("http://{addr}"), None);
    client.connect().expect("prepare stream connection");
    let sender = client.sender().expect("sender after connect");

    let closes = Arc::new(Mutex::new(Vec::new()));
    {
        let closes = Arc::clone(&closes);
        client.on_close(move |code, _| closes.lock().unwrap().push(code));
    }
    client.on_open(move || sender.close());

    timeout(Duration::from_secs(5), client.run_forever())
        .await
        .expect("stream loop should end after client close");

    let closes = closes.lock().unwrap();
    assert_eq!(closes.len(), 1, "close handler should run once");

    let _ = shutdown_tx.send(());
    server_task.await.expect("mock ws server task should join");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn connect_failure_reports_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);

    let mut client = ChatStreamClient::new(&format!("http://{addr}"), None);
    client.connect().expect("prepare stream connection");

    let errors = Arc::new(Mutex::new(Vec::new()));
    let closes = Arc::new(Mutex::new(Vec::new()));
    let opened = Arc::new(Mutex::new(false));
    {
        let errors = Arc::clone(&errors);
        client.on_error(move |error| errors.lock().unwrap().push(error.to_string()));
    }
    {
        let closes = Arc::clone(&closes);
        client.on_close(move |code, _| closes.lock().unwrap().push(code));
    }
    {
        let opened = Arc::clone(&opened);
        client.on_open(move || *opened.lock().unwrap() = true);
    }

    timeout(Duration::from_secs(5), client.run_forever())
        .await
        .expect("failed connect should return");

    assert_eq!(errors.lock().unwrap().len(), 1);
    assert_eq!(*closes.lock().unwrap(), vec![None]);
    assert!(!*opened.lock().unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unacknowledged_close_times_out() {
    let app = Router::new().route(
        "/chat/stream",
        get(|ws: WebSocketUpgrade| async move { ws.on_upgrade(hold_without_reading) }),
    );
    let (addr, _shutdown_tx, server_task) = spawn_server(app).await;

    let mut client = ChatStreamClient::new(&format!("http://{addr}"), None)
        .with_close_timeout(Duration::from_millis(200));
    client.connect().expect("prepare stream connection");
    let sender = client.sender().expect("sender after connect");

    let closes = Arc::new(Mutex::new(Vec::new()));
    {
        let closes = Arc::clone(&closes);
        client.on_close(move |code, reason| closes.lock().unwrap().push((code, reason)));
    }
    client.on_open(move || sender.close());

    timeout(Duration::from_secs(5), client.run_forever())
        .await
        .expect("stream loop should give up waiting for the close reply");

    assert_eq!(*closes.lock().unwrap(), vec![(None, None)]);

    server_task.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn send_after_close_is_dropped() {
    let app = Router::new().route(
        "/chat/stream",
        get(|ws: WebSocketUpgrade| async move { ws.on_upgrade(acknowledge_close) }),
    );
    let (addr, shutdown_tx, server_task) = spawn_server(app).await;

    let mut client = ChatStreamClient::new(&format!("http://{addr}"), None);
    client.connect().expect("prepare stream connection");
    let sender = client.sender().expect("sender after connect");

    let errors = Arc::new(Mutex::new(Vec::new()));
    let closes = Arc::new(Mutex::new(Vec::new()));
    {
        let errors = Arc::clone(&errors);
        client.on_error(move |error| errors.lock().unwrap().push(error.to_string()));
    }
    {
        let closes = Arc::clone(&closes);
        client.on_close(move |code, _| closes.lock().unwrap().push(code));
    }
    client.on_open(move || {
        sender.close();
        sender
            .send(&json!({"type": "chat", "text": "too late"}))
            .expect("queue message");
    });

    timeout(Duration::from_secs(5), client.run_forever())
        .await
        .expect("stream loop should end after client close");

    assert!(errors.lock().unwrap().is_empty(), "{:?}", errors.lock().unwrap());
    assert_eq!(closes.lock().unwrap().len(), 1);

    let _ = shutdown_tx.send(());
    server_task.await.expect("mock ws server task should join");
}

async fn ws_handler(
    State(state): State<WsState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let authorized = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value == state.expected_authorization);
    if !authorized {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let observed_tx = state.observed_tx.clone();
    ws.on_upgrade(move |socket| async move {
        let result = run_ws_protocol(socket).await;
        if let Some(tx) = observed_tx.lock().await.take() {
            let _ = tx.send(result);
        }
    })
    .into_response()
}

async fn run_ws_protocol(mut socket: WebSocket) -> Result<Value, String> {
    send_text(&mut socket, "not json").await?;
    send_text(&mut socket, r#"{"type":"chat","text":"hi"}"#).await?;

    let ack = recv_json(&mut socket).await?;

    socket
        .send(Message::Close(Some(CloseFrame {
            code: 1000,
            reason: Utf8Bytes::from_static(CLOSE_REASON),
        })))
        .await
        .map_err(|err| format!("failed to send close: {err}"))?;

    drain_until_closed(socket).await;
    Ok(ack)
}

async fn send_text(socket: &mut WebSocket, text: &str) -> Result<(), String> {
    socket
        .send(Message::Text(text.to_string().into()))
        .await
        .map_err(|err| format!("failed to send text frame: {err}"))
}

async fn recv_json(socket: &mut WebSocket) -> Result<Value, String> {
    loop {
        match socket.next().await {
            Some(Ok(Message::Text(text))) => {
                return serde_json::from_str(text.as_str())
                    .map_err(|err| format!("failed to decode client message: {err}"));
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
            Some(Ok(Message::Close(_))) => {
                return Err("websocket closed before expected client message".to_string());
            }
            Some(Ok(_)) => return Err("received unexpected non-text websocket frame".to_string()),
            Some(Err(err)) => return Err(format!("websocket receive error: {err}")),
            None => return Err("websocket stream ended unexpectedly".to_string()),
        }
    }
}

async fn drain_until_closed(mut socket: WebSocket) {
    while let Some(Ok(message)) = socket.next().await {
        if matches!(message, Message::Close(_)) {
            break;
        }
    }
}

async fn acknowledge_close(mut socket: WebSocket) {
    while let Some(Ok(message)) = socket.recv().await {
        match message {
            Message::Close(_) => {
                let _ = socket.send(Message::Close(None)).await;
                break;
            }
            Message::Text(text) => panic!("unexpected frame after close: {}", text.as_str()),
            _ => {}
        }
    }
}

async fn hold_without_reading(socket: WebSocket) {
    tokio::time::sleep(Duration::from_secs(60)).await;
    drop(socket);
}

async fn spawn_server(
    app: Router,
) -> (SocketAddr, oneshot::Sender<()>, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock server listener");
    let addr = listener
        .local_addr()
        .expect("read mock server listener address");
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .expect("mock server should run");
    });
    (addr, shutdown_tx, task)
}
