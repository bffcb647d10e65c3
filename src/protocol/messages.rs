//! # Channel Protocol Messages
//!
//! Control messages are UTF-8 JSON text frames. Outbound messages are typed
//! serde structs; inbound messages are classified by shape into
//! [`InboundMessage`] because the server mixes replies and unsolicited events
//! on the same connection.
//!
//! ## Message Flow:
//! 1. **logon** (out, seq 1) answered by a logon reply carrying `refresh_token`
//! 2. **on_channel_status** (in) reports whether the channel is online
//! 3. **start_stream** (out, seq 2) answered by `success` + `stream_id`, or `error`
//! 4. binary stream data frames (out)
//! 5. **stop_stream** (out)

use serde::Serialize;

/// Sequence number of the logon request.
pub const LOGON_SEQ: u32 = 1;

/// Sequence number of the start-stream request.
pub const START_STREAM_SEQ: u32 = 2;

/// Codec announced in every start-stream request.
pub const CODEC_NAME: &str = "opus";

/// Stream type announced in every start-stream request.
pub const STREAM_TYPE_AUDIO: &str = "audio";

/// Outbound control commands.
///
/// ## Rust Concepts:
/// - **#[serde(tag = "command")]**: The variant name becomes the `command` field
/// - **Borrowed fields**: Messages are serialized immediately, so they borrow
///   from the session instead of cloning credentials
#[derive(Debug, Serialize)]
#[serde(tag = "command")]
pub enum ControlCommand<'a> {
    /// Authenticate and join a channel
    #[serde(rename = "logon")]
    Logon {
        seq: u32,
        auth_token: &'a str,
        username: &'a str,
        password: &'a str,
        channel: &'a str,
    },

    /// Ask the server to open an outgoing audio stream
    #[serde(rename = "start_stream")]
    StartStream {
        seq: u32,
        #[serde(rename = "type")]
        stream_type: &'a str,
        codec: &'a str,
        /// base64 of sample rate (u16 LE), frames per packet (u8), packet duration (u8)
        codec_header: String,
        packet_duration: u8,
    },

    /// Close the outgoing stream
    #[serde(rename = "stop_stream")]
    StopStream { stream_id: u32 },
}

/// Reply to a start-stream request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamStartReply {
    /// The server allocated a stream
    Started { stream_id: u32 },
    /// The server refused the stream
    Rejected { error: String },
}

/// Inbound text frame, classified by shape.
///
/// Decoding never fails: anything unrecognized becomes `Unknown` so the
/// handshake scans can skip it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    /// Reply to logon. `authorized` is true when a refresh token was issued.
    LogonResult {
        authorized: bool,
        error: Option<String>,
    },

    /// Channel availability event
    ChannelStatus {
        status: String,
        users_online: Option<u32>,
    },

    /// Reply to start-stream
    StreamStartResult(StreamStartReply),

    /// An error not tied to the logon or start-stream request
    Error { seq: Option<u32>, error: String },

    /// Malformed JSON, or a shape nothing in the session waits for
    Unknown,
}

impl InboundMessage {
    /// True for a channel status that reports the channel as online.
    pub fn is_channel_online(&self) -> bool {
        matches!(self, InboundMessage::ChannelStatus { status, .. } if status == "online")
    }
}
