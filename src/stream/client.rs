//! Websocket client for the chat stream endpoint.
//!
//! [`ChatStreamClient::connect`] prepares the upgrade request and the
//! outbound queue; [`ChatStreamClient::run_forever`] opens the socket and
//! dispatches events to the registered handlers until the connection ends.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::{InvalidHeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, warn};

use crate::chat_api::ChatApiClient;
use crate::config::ChatApiDefaults;
use crate::stream::events::{decode_binary_frame, decode_frame, StreamEvent, StreamHandlers};

/// Path of the stream endpoint relative to the websocket base URL.
pub const STREAM_PATH: &str = "/chat/stream";

/// Derives the stream URL from an API base URL.
///
/// `https://` maps to `wss://` and `http://` to `ws://`; websocket schemes
/// are kept as given.
pub fn stream_url(base_url: &str) -> String {
    let base = base_url.trim().trim_end_matches('/');
    let base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    };
    format!("{base}{STREAM_PATH}")
}

/// Realtime chat stream client.
///
/// Holds at most one connection. Handlers are registered per event kind and
/// run inline on the task driving [`run_forever`](Self::run_forever).
#[derive(Debug)]
pub struct ChatStreamClient {
    url: String,
    token: Option<SecretString>,
    handlers: StreamHandlers,
    connection: Option<PreparedConnection>,
    close_timeout: Duration,
}

#[derive(Debug)]
struct PreparedConnection {
    request: Request,
    outbound_rx: mpsc::UnboundedReceiver<Command>,
    sender: StreamSender,
}

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Text(String),
    Close,
}

impl Default for ChatStreamClient {
    fn default() -> Self {
        Self::new(ChatApiDefaults::BASE_URL, None)
    }
}

impl ChatStreamClient {
    pub fn new(base_url: &str, token: Option<SecretString>) -> Self {
        Self {
            url: stream_url(base_url),
            token,
            handlers: StreamHandlers::new(),
            connection: None,
            close_timeout: ChatApiDefaults::CLOSE_TIMEOUT,
        }
    }

    /// Bounds how long [`close`](Self::close) waits for the peer's close
    /// frame before the connection is torn down.
    pub fn with_close_timeout(mut self, close_timeout: Duration) -> Self {
        self.close_timeout = close_timeout;
        self
    }

    /// Uses the base URL and current token of an authenticated REST client.
    pub fn from_api_client(api: &ChatApiClient) -> Self {
        Self::new(api.base_url(), api.token())
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Token used for the next [`connect`](Self::connect).
    pub fn set_token(&mut self, token: Option<SecretString>) {
        self.token = token;
    }

    pub fn handlers_mut(&mut self) -> &mut StreamHandlers {
        &mut self.handlers
    }

    pub fn on_open<F>(&mut self, handler: F) -> &mut Self
    where
        F: FnMut() + Send + 'static,
    {
        self.handlers.set_on_open(handler);
        self
    }

    pub fn on_message<F>(&mut self, handler: F) -> &mut Self
    where
        F: FnMut(Value) + Send + 'static,
    {
        self.handlers.set_on_message(handler);
        self
    }

    pub fn on_error<F>(&mut self, handler: F) -> &mut Self
    where
        F: FnMut(StreamClientError) + Send + 'static,
    {
        self.handlers.set_on_error(handler);
        self
    }

    pub fn on_close<F>(&mut self, handler: F) -> &mut Self
    where
        F: FnMut(Option<u16>, Option<String>) + Send + 'static,
    {
        self.handlers.set_on_close(handler);
        self
    }

    /// Prepares the upgrade request without opening the socket.
    ///
    /// Adds `Authorization: Bearer <token>` when a token is set. A pending
    /// connection that was never run is replaced.
    pub fn connect(&mut self) -> Result<(), StreamClientError> {
        let mut request = self.url.as_str().into_client_request()?;
        if let Some(token) = self.token.as_ref() {
            let value: HeaderValue = format!("Bearer {}", token.expose_secret()).parse()?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (tx, outbound_rx) = mpsc::unbounded_channel();
        let previous = self.connection.replace(PreparedConnection {
            request,
            outbound_rx,
            sender: StreamSender { tx },
        });
        debug!(
            event = "stream_connect_prepared",
            url = %self.url,
            replaced = previous.is_some()
        );
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Returns a cloneable handle for sending while the loop runs.
    pub fn sender(&self) -> Option<StreamSender> {
        self.connection
            .as_ref()
            .map(|connection| connection.sender.clone())
    }

    /// JSON-encodes `payload` as one text frame. Ignored when there is no
    /// connection.
    pub fn send<T>(&self, payload: &T) -> Result<(), StreamClientError>
    where
        T: Serialize + ?Sized,
    {
        match self.connection.as_ref() {
            Some(connection) => connection.sender.send(payload),
            None => Ok(()),
        }
    }

    /// Requests shutdown. Ignored when there is no connection.
    pub fn close(&self) {
        if let Some(connection) = self.connection.as_ref() {
            connection.sender.close();
        }
    }

    /// Opens the prepared connection and dispatches events until it closes
    /// or fails. Returns immediately when [`connect`](Self::connect) was not
    /// called.
    ///
    /// After a close is requested, messages still queued are dropped and the
    /// loop ends once the peer replies or the close timeout elapses.
    pub async fn run_forever(&mut self) {
        let Some(PreparedConnection {
            request,
            mut outbound_rx,
            sender,
        }) = self.connection.take()
        else {
            debug!(event = "stream_run_without_connection");
            return;
        };

        let (mut socket, _) = match connect_async(request).await {
            Ok(pair) => pair,
            Err(err) => {
                warn!(event = "stream_connect_failed", url = %self.url);
                self.fail(err);
                return;
            }
        };

        debug!(event = "stream_opened", url = %self.url);
        self.handlers.dispatch(StreamEvent::Open);

        let mut closing = false;
        let mut outbound_open = true;
        let close_deadline = tokio::time::sleep(self.close_timeout);
        tokio::pin!(close_deadline);

        loop {
            tokio::select! {
                _ = &mut close_deadline, if closing => {
                    warn!(event = "stream_close_timed_out", url = %self.url);
                    self.handlers.dispatch(StreamEvent::Close { code: None, reason: None });
                    break;
                }
                command = outbound_rx.recv(), if outbound_open => {
                    match command {
                        Some(Command::Text(_)) if closing => {
                            debug!(event = "stream_send_ignored", closing);
                        }
                        Some(Command::Text(text)) => {
                            if let Err(err) = socket.send(Message::Text(text)).await {
                                self.fail(err);
                                break;
                            }
                        }
                        Some(Command::Close) => {
                            if !closing {
                                closing = true;
                                close_deadline
                                    .as_mut()
                                    .reset(Instant::now() + self.close_timeout);
                                debug!(event = "stream_close_requested");
                                let closed =
                                    tokio::time::timeout(self.close_timeout, socket.close(None))
                                        .await;
                                match closed {
                                    Ok(Ok(())) => {}
                                    Ok(Err(err)) => {
                                        self.fail(err);
                                        break;
                                    }
                                    Err(_) => {
                                        warn!(event = "stream_close_timed_out", url = %self.url);
                                        self.handlers.dispatch(StreamEvent::Close {
                                            code: None,
                                            reason: None,
                                        });
                                        break;
                                    }
                                }
                            }
                        }
                        None => outbound_open = false,
                    }
                }
                inbound = socket.next() => {
                    match inbound {
                        Some(Ok(Message::Text(text))) => {
                            self.handlers.dispatch(decode_frame(&text));
                        }
                        Some(Ok(Message::Binary(bytes))) => {
                            self.handlers.dispatch(decode_binary_frame(&bytes));
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            if let Err(err) = socket.send(Message::Pong(payload)).await {
                                self.fail(err);
                                break;
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let _ = socket.close(None).await;
                            let (code, reason) = close_details(frame);
                            debug!(event = "stream_closed", code, reason = reason.as_deref());
                            self.handlers.dispatch(StreamEvent::Close { code, reason });
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) | None => {
                            debug!(event = "stream_closed", code = Option::<u16>::None);
                            self.handlers.dispatch(StreamEvent::Close { code: None, reason: None });
                            break;
                        }
                        Some(Err(err)) => {
                            self.fail(err);
                            break;
                        }
                    }
                }
            }
        }

        drop(sender);
    }

    fn fail(&mut self, err: WsError) {
        warn!(event = "stream_transport_failed", url = %self.url, error = %err);
        self.handlers.dispatch(StreamEvent::Error(err.into()));
        self.handlers.dispatch(StreamEvent::Close {
            code: None,
            reason: None,
        });
    }
}

fn close_details(frame: Option<CloseFrame<'_>>) -> (Option<u16>, Option<String>) {
    match frame {
        Some(frame) => {
            let reason = Some(frame.reason.into_owned()).filter(|reason| !reason.is_empty());
            (Some(u16::from(frame.code)), reason)
        }
        None => (None, None),
    }
}

/// Cloneable sender for outbound stream messages.
#[derive(Clone, Debug)]
pub struct StreamSender {
    tx: mpsc::UnboundedSender<Command>,
}

impl StreamSender {
    /// JSON-encodes `payload` as one text frame. Ignored once the connection
    /// has ended.
    pub fn send<T>(&self, payload: &T) -> Result<(), StreamClientError>
    where
        T: Serialize + ?Sized,
    {
        let text = serde_json::to_string(payload).map_err(StreamClientError::Encode)?;
        if self.tx.send(Command::Text(text)).is_err() {
            debug!(event = "stream_send_ignored");
        }
        Ok(())
    }

    /// Requests shutdown. Ignored once the connection has ended.
    pub fn close(&self) {
        let _ = self.tx.send(Command::Close);
    }
}

/// Errors produced by stream transport and frame handling.
#[derive(Debug, Error)]
pub enum StreamClientError {
    /// Websocket transport error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] WsError),

    /// Inbound frame was not valid JSON.
    #[error("JSON decode error: {0}")]
    Decode(serde_json::Error),

    /// Outbound payload could not be encoded.
    #[error("JSON encode error: {0}")]
    Encode(serde_json::Error),

    /// Token could not be converted to a valid HTTP header value.
    #[error("invalid authorization header: {0}")]
    InvalidAuthHeader(#[from] InvalidHeaderValue),
}
