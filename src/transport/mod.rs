//! # Transport
//!
//! The session talks to the server through two small traits so that the
//! WebSocket implementation can be swapped for a scripted one in tests.
//!
//! ## Key Components:
//! - **Connector**: opens a new connection to the fixed endpoint
//! - **Transport**: one open connection (send text, send binary, receive, close)
//! - **WsConnector / WsTransport**: tokio-tungstenite implementation (`websocket`)
//!
//! ## Cancellation Safety:
//! `recv` must be cancel-safe: dropping its future must not lose or split a
//! frame. A send future may be dropped when the session stops waiting for it;
//! the frame must then be queued whole or not at all.

use crate::error::StreamResult;
use async_trait::async_trait;

pub mod websocket;

#[cfg(test)]
pub(crate) mod mock;

pub use websocket::{WsConnector, WsTransport};

/// A complete inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

/// Opens connections for a session.
#[async_trait]
pub trait Connector: Send + Sync {
    type Transport: Transport;

    async fn connect(&self) -> StreamResult<Self::Transport>;
}

/// One open, bidirectional message connection.
#[async_trait]
pub trait Transport: Send {
    async fn send_text(&mut self, text: String) -> StreamResult<()>;

    async fn send_binary(&mut self, data: Vec<u8>) -> StreamResult<()>;

    /// Wait for the next message. `Ok(None)` means the peer closed the connection.
    async fn recv(&mut self) -> StreamResult<Option<Frame>>;

    /// Close the connection. Closing an already closed transport is a no-op.
    async fn close(&mut self) -> StreamResult<()>;

    fn is_closed(&self) -> bool;
}
