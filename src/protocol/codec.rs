//! # Protocol Codec
//!
//! Pure, stateless construction and parsing of channel protocol frames.
//!
//! ## Stream Data Frame:
//! ```text
//! +------+----------------+----------------+-----------------+
//! | 0x01 | stream_id (BE) | packet_id (BE) | opus payload... |
//! | 1 B  | 4 B            | 4 B            | n B             |
//! +------+----------------+----------------+-----------------+
//! ```
//! There is no length prefix; the WebSocket frame delimits the packet.

use crate::audio::StreamParameters;
use crate::protocol::messages::{
    ControlCommand, InboundMessage, StreamStartReply, CODEC_NAME, LOGON_SEQ, START_STREAM_SEQ,
    STREAM_TYPE_AUDIO,
};
use crate::error::StreamResult;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::Value;

/// Packet type marker for audio data frames.
pub const PACKET_TYPE_AUDIO: u8 = 1;

/// Size of the stream data header preceding the payload.
pub const DATA_HEADER_LEN: usize = 9;

/// Build the logon request.
pub fn encode_logon(auth_token: &str, username: &str, password: &str, channel: &str) -> StreamResult<String> {
    Ok(serde_json::to_string(&ControlCommand::Logon {
        seq: LOGON_SEQ,
        auth_token,
        username,
        password,
        channel,
    })?)
}

/// Build the start-stream request announcing `params`.
pub fn encode_start_stream(params: &StreamParameters) -> StreamResult<String> {
    Ok(serde_json::to_string(&ControlCommand::StartStream {
        seq: START_STREAM_SEQ,
        stream_type: STREAM_TYPE_AUDIO,
        codec: CODEC_NAME,
        codec_header: encode_codec_header(params),
        packet_duration: params.packet_duration_ms,
    })?)
}

/// Build the stop-stream request.
pub fn encode_stop_stream(stream_id: u32) -> StreamResult<String> {
    Ok(serde_json::to_string(&ControlCommand::StopStream { stream_id })?)
}

/// Codec header: sample rate (u16 little-endian), frames per packet, packet duration; base64.
pub fn encode_codec_header(params: &StreamParameters) -> String {
    let mut header = [0u8; 4];
    header[..2].copy_from_slice(&params.sample_rate.to_le_bytes());
    header[2] = params.frames_per_packet;
    header[3] = params.packet_duration_ms;
    STANDARD.encode(header)
}

/// Inverse of [`encode_codec_header`]. Returns `None` unless the payload is exactly four bytes.
pub fn decode_codec_header(encoded: &str) -> Option<StreamParameters> {
    let bytes = STANDARD.decode(encoded).ok()?;
    match bytes.as_slice() {
        [lo, hi, frames, duration] => Some(StreamParameters::new(
            u16::from_le_bytes([*lo, *hi]),
            *frames,
            *duration,
        )),
        _ => None,
    }
}

/// Build a binary stream data frame.
pub fn encode_data_packet(stream_id: u32, packet_id: u32, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(DATA_HEADER_LEN + payload.len());
    frame.push(PACKET_TYPE_AUDIO);
    frame.extend_from_slice(&stream_id.to_be_bytes());
    frame.extend_from_slice(&packet_id.to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Classify an inbound text frame.
///
/// ## Classification Order:
/// 1. `refresh_token` present: authorized logon reply
/// 2. `on_channel_status` command with a `status`: channel status
/// 3. `success: true` with a `stream_id`: stream started
/// 4. `error`, or `success: false`: attributed by `seq` (1 logon, 2 start-stream)
/// 5. Everything else: `Unknown`
pub fn decode(text: &str) -> InboundMessage {
    let data: Value = match serde_json::from_str(text) {
        Ok(Value::Object(map)) => Value::Object(map),
        _ => return InboundMessage::Unknown,
    };

    if data.get("refresh_token").is_some() {
        return InboundMessage::LogonResult {
            authorized: true,
            error: None,
        };
    }

    if data.get("command").and_then(Value::as_str) == Some("on_channel_status") {
        if let Some(status) = data.get("status").and_then(Value::as_str) {
            return InboundMessage::ChannelStatus {
                status: status.to_string(),
                users_online: data
                    .get("users_online")
                    .and_then(Value::as_u64)
                    .and_then(|n| u32::try_from(n).ok()),
            };
        }
        return InboundMessage::Unknown;
    }

    let success = data.get("success").and_then(Value::as_bool);
    let stream_id = data
        .get("stream_id")
        .and_then(Value::as_u64)
        .and_then(|id| u32::try_from(id).ok());

    if let (Some(true), Some(stream_id)) = (success, stream_id) {
        return InboundMessage::StreamStartResult(StreamStartReply::Started { stream_id });
    }

    let error = data.get("error").map(|e| match e.as_str() {
        Some(s) => s.to_string(),
        None => e.to_string(),
    });
    if error.is_none() && success != Some(false) {
        return InboundMessage::Unknown;
    }

    let seq = data
        .get("seq")
        .and_then(Value::as_u64)
        .and_then(|s| u32::try_from(s).ok());

    match seq {
        Some(LOGON_SEQ) => InboundMessage::LogonResult {
            authorized: false,
            error,
        },
        Some(START_STREAM_SEQ) => InboundMessage::StreamStartResult(StreamStartReply::Rejected {
            error: error.unwrap_or_else(|| "request rejected".to_string()),
        }),
        _ => InboundMessage::Error {
            seq,
            error: error.unwrap_or_else(|| "request rejected".to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_header_layout() {
        let params = StreamParameters::new(16000, 1, 60);
        let encoded = encode_codec_header(&params);
        assert_eq!(encoded, "gD4BPA==");
        assert_eq!(STANDARD.decode(&encoded).unwrap(), vec![0x80, 0x3e, 0x01, 0x3c]);
    }

    #[test]
    fn test_codec_header_recovers_parameters() {
        for frames in [1u8, 2, 3, 6] {
            let params = StreamParameters::new(16000, frames, 20);
            let decoded = decode_codec_header(&encode_codec_header(&params)).unwrap();
            assert_eq!(decoded, params);
        }
        assert_eq!(decode_codec_header("not base64!"), None);
        assert_eq!(decode_codec_header("AAAA"), None);
    }

    #[test]
    fn test_data_packet_layout() {
        let payload = [0xaa; 100];
        let frame = encode_data_packet(0x42, 3, &payload);

        assert_eq!(frame.len(), DATA_HEADER_LEN + 100);
        assert_eq!(&frame[..DATA_HEADER_LEN], &[0x01, 0, 0, 0, 0x42, 0, 0, 0, 3]);
        assert_eq!(&frame[DATA_HEADER_LEN..], &payload[..]);
    }

    #[test]
    fn test_control_messages() {
        let logon: Value = serde_json::from_str(&encode_logon("jwt", "user", "pass", "Test").unwrap()).unwrap();
        assert_eq!(logon["command"], "logon");
        assert_eq!(logon["seq"], 1);
        assert_eq!(logon["username"], "user");
        assert_eq!(logon["password"], "pass");

        let start: Value =
            serde_json::from_str(&encode_start_stream(&StreamParameters::new(16000, 1, 20)).unwrap()).unwrap();
        assert_eq!(start["seq"], 2);
        assert_eq!(start["codec_header"], "gD4BFA==");
        assert_eq!(start["packet_duration"], 20);

        let stop: Value = serde_json::from_str(&encode_stop_stream(42).unwrap()).unwrap();
        assert_eq!(stop["command"], "stop_stream");
        assert_eq!(stop["stream_id"], 42);
    }

    #[test]
    fn test_decode_handshake_replies() {
        assert_eq!(
            decode(r#"{"seq":1,"success":true,"refresh_token":"abc"}"#),
            InboundMessage::LogonResult { authorized: true, error: None }
        );
        assert_eq!(
            decode(r#"{"command":"on_channel_status","channel":"Test","status":"online","users_online":4}"#),
            InboundMessage::ChannelStatus {
                status: "online".to_string(),
                users_online: Some(4),
            }
        );
        assert_eq!(
            decode(r#"{"seq":2,"success":true,"stream_id":42}"#),
            InboundMessage::StreamStartResult(StreamStartReply::Started { stream_id: 42 })
        );
    }

    #[test]
    fn test_decode_failures() {
        assert_eq!(
            decode(r#"{"seq":1,"error":"not authorized"}"#),
            InboundMessage::LogonResult {
                authorized: false,
                error: Some("not authorized".to_string()),
            }
        );
        assert_eq!(
            decode(r#"{"seq":2,"success":false}"#),
            InboundMessage::StreamStartResult(StreamStartReply::Rejected {
                error: "request rejected".to_string(),
            })
        );
        assert_eq!(
            decode(r#"{"error":"channel_full"}"#),
            InboundMessage::Error {
                seq: None,
                error: "channel_full".to_string(),
            }
        );
    }

    #[test]
    fn test_decode_unknown_shapes() {
        assert_eq!(decode("not json"), InboundMessage::Unknown);
        assert_eq!(decode("[1,2,3]"), InboundMessage::Unknown);
        assert_eq!(decode(r#"{"command":"on_stream_start","stream_id":7}"#), InboundMessage::Unknown);
        assert_eq!(decode(r#"{"success":true}"#), InboundMessage::Unknown);
        assert_eq!(decode(r#"{"command":"on_channel_status"}"#), InboundMessage::Unknown);
    }
}
