//! # Error Handling
//!
//! This module defines the error taxonomy of a streaming session and how each
//! kind is reported to the caller.
//!
//! ## Error Categories:
//! - **Transport**: connect/read/write/close failures on the WebSocket (fatal)
//! - **Auth**: logon rejected, or the channel never came online within the wait budget (fatal)
//! - **StreamStart**: stream negotiation rejected or timed out (fatal)
//! - **Cancelled**: the caller asked the session to stop; not a fault
//! - **Source**: the packet source could not produce audio (fatal)
//! - **Config**: configuration could not be loaded or failed validation
//!
//! ## Propagation:
//! Every fatal error aborts the session, triggers the best-effort
//! stop-and-close cleanup and ends up in `SessionOutcome::Failed`.
//! Nothing in this crate retries a whole session on its own.

use std::fmt;
use tokio_tungstenite::tungstenite;

/// Errors that can end a streaming session.
///
/// ## Rust Concepts:
/// - **enum**: Each variant is one failure category
/// - **String payload**: A human-readable cause for logs and callers
/// - **#[derive(Clone)]**: Outcomes can be copied into reports and tests
#[derive(Debug, Clone, PartialEq)]
pub enum StreamError {
    /// The WebSocket could not be opened, or failed while in use
    Transport(String),

    /// Logon was rejected or not confirmed in time
    Auth(String),

    /// The server refused to open a stream, or did not answer in time
    StreamStart(String),

    /// The session was interrupted by its cancellation token
    Cancelled,

    /// The packet source failed to produce audio
    Source(String),

    /// Configuration file or environment variable problems
    Config(String),
}

/// The category of a [`StreamError`], without its cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transport,
    Auth,
    StreamStart,
    Cancelled,
    Source,
    Config,
}

impl ErrorKind {
    /// Stable identifier, used as a structured logging field.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Transport => "transport_error",
            ErrorKind::Auth => "auth_error",
            ErrorKind::StreamStart => "stream_start_error",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Source => "source_error",
            ErrorKind::Config => "config_error",
        }
    }
}

impl StreamError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StreamError::Transport(_) => ErrorKind::Transport,
            StreamError::Auth(_) => ErrorKind::Auth,
            StreamError::StreamStart(_) => ErrorKind::StreamStart,
            StreamError::Cancelled => ErrorKind::Cancelled,
            StreamError::Source(_) => ErrorKind::Source,
            StreamError::Config(_) => ErrorKind::Config,
        }
    }

    /// Whether this error describes a deliberate stop rather than a fault.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, StreamError::Cancelled)
    }
}

/// Implementation of the Display trait for StreamError.
///
/// ## Purpose:
/// Defines how errors are formatted when logged or printed by the runner.
impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamError::Transport(msg) => write!(f, "Transport error: {}", msg),
            StreamError::Auth(msg) => write!(f, "Authentication error: {}", msg),
            StreamError::StreamStart(msg) => write!(f, "Stream start error: {}", msg),
            StreamError::Cancelled => write!(f, "Session cancelled"),
            StreamError::Source(msg) => write!(f, "Audio source error: {}", msg),
            StreamError::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for StreamError {}

/// Automatic conversion from WebSocket errors to StreamError.
///
/// ## Why Transport:
/// Anything tungstenite reports (I/O, TLS, handshake, protocol) happened
/// below the channel protocol, so it is a transport failure.
impl From<tungstenite::Error> for StreamError {
    fn from(err: tungstenite::Error) -> Self {
        StreamError::Transport(err.to_string())
    }
}

/// Reading audio from disk fails as a source error.
impl From<std::io::Error> for StreamError {
    fn from(err: std::io::Error) -> Self {
        StreamError::Source(err.to_string())
    }
}

/// Container errors from symphonia while reading an audio file.
///
/// ## When this happens:
/// - The file is not an Ogg stream, or a page is corrupt
/// - The underlying read fails part way through
impl From<symphonia::core::errors::Error> for StreamError {
    fn from(err: symphonia::core::errors::Error) -> Self {
        StreamError::Source(err.to_string())
    }
}

/// Automatic conversion from configuration errors to StreamError.
///
/// ## When this happens:
/// - config.toml file has invalid syntax
/// - Environment variables hold values of the wrong type
impl From<config::ConfigError> for StreamError {
    fn from(err: config::ConfigError) -> Self {
        StreamError::Config(err.to_string())
    }
}

/// Outbound control messages are serialized with serde_json; a failure there
/// means the message never reached the wire.
impl From<serde_json::Error> for StreamError {
    fn from(err: serde_json::Error) -> Self {
        StreamError::Transport(format!("JSON encoding error: {}", err))
    }
}

/// Type alias for Results that use our custom error type.
///
/// ## Usage Example:
/// ```rust
/// use channel_streamer::error::{StreamError, StreamResult};
///
/// fn require_channel(channel: &str) -> StreamResult<()> {
///     if channel.is_empty() {
///         return Err(StreamError::Config("channel is empty".to_string()));
///     }
///     Ok(())
/// }
/// ```
pub type StreamResult<T> = Result<T, StreamError>;
