//! # Session State
//!
//! State machine vocabulary of a streaming session, the handle of a live
//! stream, and the terminal outcome reported to the caller.
//!
//! ## Session Lifecycle:
//! 1. **Idle**: created, nothing opened yet
//! 2. **Connecting**: opening the WebSocket
//! 3. **Authenticating**: logon sent, waiting for authorization and channel status
//! 4. **StreamStarting**: start-stream sent, waiting for a stream id
//! 5. **Streaming**: packets are being paced out
//! 6. **Stopping**: best-effort stop-stream and connection close
//! 7. **Closed** / **Failed** / **Cancelled**: terminal

use crate::error::StreamError;
use std::time::Duration;
use uuid::Uuid;

/// Current state of a streaming session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Authenticating,
    StreamStarting,
    Streaming,
    Stopping,
    Closed,
    Failed,
    Cancelled,
}

impl SessionState {
    /// Convert state to string for structured log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Authenticating => "authenticating",
            SessionState::StreamStarting => "stream_starting",
            SessionState::Streaming => "streaming",
            SessionState::Stopping => "stopping",
            SessionState::Closed => "closed",
            SessionState::Failed => "failed",
            SessionState::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Closed | SessionState::Failed | SessionState::Cancelled
        )
    }
}

/// A live stream allocated by the server.
///
/// ## Ownership:
/// Created only from a successful start-stream reply and owned by the
/// session; it is taken (and so invalidated) when the stream is stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamHandle {
    stream_id: u32,
    /// Last control sequence number used on this connection
    sequence: u32,
    /// Last packet id handed out; 0 before the first packet
    last_packet_id: u32,
}

impl StreamHandle {
    pub fn new(stream_id: u32, sequence: u32) -> Self {
        Self {
            stream_id,
            sequence,
            last_packet_id: 0,
        }
    }

    pub fn stream_id(&self) -> u32 {
        self.stream_id
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Allocate the next packet id. Ids start at 1 and are never reused.
    pub fn next_packet_id(&mut self) -> u32 {
        self.last_packet_id = self.last_packet_id.wrapping_add(1);
        self.last_packet_id
    }

    /// Number of packet ids handed out so far.
    pub fn packets_allocated(&self) -> u32 {
        self.last_packet_id
    }
}

/// What a successful session did.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub stream_id: u32,
    pub packets_sent: u32,
    /// Packets whose send outlasted their window and were skipped
    pub packets_dropped: u32,
    /// Playback time of the audio that was sent
    pub streamed: Duration,
    /// Wall-clock time spent in the send loop
    pub elapsed: Duration,
}

/// The single terminal outcome of a session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
    /// Audio was streamed and the stream stopped
    Closed(SessionSummary),
    /// The session hit a fatal error
    Failed(StreamError),
    /// The session was interrupted by its cancellation token
    Cancelled,
}

impl SessionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SessionOutcome::Closed(_))
    }

    /// The terminal state matching this outcome.
    pub fn state(&self) -> SessionState {
        match self {
            SessionOutcome::Closed(_) => SessionState::Closed,
            SessionOutcome::Failed(_) => SessionState::Failed,
            SessionOutcome::Cancelled => SessionState::Cancelled,
        }
    }

    pub fn error(&self) -> Option<&StreamError> {
        match self {
            SessionOutcome::Failed(err) => Some(err),
            _ => None,
        }
    }
}

/// Result of running a session: its outcome and every state it passed through.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub outcome: SessionOutcome,
    pub transitions: Vec<SessionState>,
}

impl SessionReport {
    /// Whether the session ever entered `state`.
    pub fn entered(&self, state: SessionState) -> bool {
        self.transitions.contains(&state)
    }
}
