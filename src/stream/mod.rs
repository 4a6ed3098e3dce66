//! Realtime stream modules.
//!
//! - `client`: websocket connection, outbound queue, and the event loop.
//! - `events`: lifecycle events and the per-kind handler registry.

/// Websocket connection and message sender.
pub mod client;
/// Stream events and handler dispatch.
pub mod events;
