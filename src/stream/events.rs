//! Stream events and the handler registry they are dispatched to.
//!
//! Each event kind has at most one handler. Dispatch is synchronous and runs
//! inside the connection loop, so handlers should return quickly and hand
//! long work off to another task.

use std::fmt;

use serde_json::Value;
use tracing::{debug, warn};

use crate::stream::client::StreamClientError;

type OpenHandler = Box<dyn FnMut() + Send>;
type MessageHandler = Box<dyn FnMut(Value) + Send>;
type ErrorHandler = Box<dyn FnMut(StreamClientError) + Send>;
type CloseHandler = Box<dyn FnMut(Option<u16>, Option<String>) + Send>;

/// Lifecycle event produced by the connection loop.
#[derive(Debug)]
pub enum StreamEvent {
    /// The socket finished its handshake.
    Open,
    /// An inbound frame decoded as JSON.
    Message(Value),
    /// A transport error, or an inbound frame that was not valid JSON.
    Error(StreamClientError),
    /// The connection ended. `code` and `reason` come from the peer's close
    /// frame when one was received.
    Close {
        code: Option<u16>,
        reason: Option<String>,
    },
}

impl StreamEvent {
    fn kind(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Message(_) => "message",
            Self::Error(_) => "error",
            Self::Close { .. } => "close",
        }
    }
}

/// Decodes one inbound text frame.
///
/// Frames that are not JSON become [`StreamEvent::Error`] and are never
/// forwarded raw.
pub fn decode_frame(text: &str) -> StreamEvent {
    match serde_json::from_str::<Value>(text) {
        Ok(value) => StreamEvent::Message(value),
        Err(err) => {
            warn!(event = "stream_frame_decode_failed", error = %err);
            StreamEvent::Error(StreamClientError::Decode(err))
        }
    }
}

pub(crate) fn decode_binary_frame(bytes: &[u8]) -> StreamEvent {
    match serde_json::from_slice::<Value>(bytes) {
        Ok(value) => StreamEvent::Message(value),
        Err(err) => {
            warn!(event = "stream_frame_decode_failed", binary = true, error = %err);
            StreamEvent::Error(StreamClientError::Decode(err))
        }
    }
}

/// Zero-or-one handler per event kind.
#[derive(Default)]
pub struct StreamHandlers {
    on_open: Option<OpenHandler>,
    on_message: Option<MessageHandler>,
    on_error: Option<ErrorHandler>,
    on_close: Option<CloseHandler>,
}

impl StreamHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_on_open<F>(&mut self, handler: F)
    where
        F: FnMut() + Send + 'static,
    {
        self.on_open = Some(Box::new(handler));
    }

    pub fn set_on_message<F>(&mut self, handler: F)
    where
        F: FnMut(Value) + Send + 'static,
    {
        self.on_message = Some(Box::new(handler));
    }

    pub fn set_on_error<F>(&mut self, handler: F)
    where
        F: FnMut(StreamClientError) + Send + 'static,
    {
        self.on_error = Some(Box::new(handler));
    }

    /// The handler receives the close code and reason, when known.
    pub fn set_on_close<F>(&mut self, handler: F)
    where
        F: FnMut(Option<u16>, Option<String>) + Send + 'static,
    {
        self.on_close = Some(Box::new(handler));
    }

    /// Removes every registered handler.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Delivers `event` to its handler. Returns `false` when no handler is
    /// registered and the event was dropped.
    pub fn dispatch(&mut self, event: StreamEvent) -> bool {
        let kind = event.kind();
        let handled = match event {
            StreamEvent::Open => self.on_open.as_mut().map(|handler| handler()),
            StreamEvent::Message(value) => self.on_message.as_mut().map(|handler| handler(value)),
            StreamEvent::Error(error) => self.on_error.as_mut().map(|handler| handler(error)),
            StreamEvent::Close { code, reason } => self
                .on_close
                .as_mut()
                .map(|handler| handler(code, reason)),
        }
        .is_some();

        if !handled {
            debug!(event = "stream_event_dropped", kind);
        }
        handled
    }
}

impl fmt::Debug for StreamHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamHandlers")
            .field("on_open", &self.on_open.is_some())
            .field("on_message", &self.on_message.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_close", &self.on_close.is_some())
            .finish()
    }
}
