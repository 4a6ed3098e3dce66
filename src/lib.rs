//! User-facing Rust SDK for the AI Chat REST API and realtime stream.
//!
//! The crate is organized by transport surface:
//! - `chat_api`: HTTP client for authentication, conversations, messages and
//!   uploads.
//! - `response`: the uniform outcome every REST call returns.
//! - `stream`: websocket client with per-event handler dispatch.
//! - `config`: client options and environment loading.

/// Chat REST client and request types.
pub mod chat_api;
/// Client options, defaults, and environment loading.
pub mod config;
/// Normalized REST call outcome.
pub mod response;
/// Realtime stream client and event handlers.
pub mod stream;

pub use chat_api::{ChatApiClient, ChatApiError, PageRequest};
pub use config::{ChatApiClientOptions, ChatApiDefaults};
pub use response::{ApiResponse, FieldErrors};
pub use stream::client::{ChatStreamClient, StreamClientError, StreamSender};
pub use stream::events::{StreamEvent, StreamHandlers};
