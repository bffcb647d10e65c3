//! # Paced Sender
//!
//! Sends audio packets at the rate they play back. Pacing is computed against
//! a fixed start instant rather than per packet, so per-iteration overhead and
//! scheduling jitter are absorbed by shortening the next sleep instead of
//! accumulating as drift.
//!
//! ## Per Packet:
//! 1. Stop if cancellation was requested, or the source is exhausted
//! 2. Fail fast if the connection is already closed (nothing is sent)
//! 3. Allocate the next packet id and encode the frame
//! 4. Send the frame and wait for an inbound frame, both within 80% of a
//!    packet duration; running out of time is normal
//! 5. Sleep for `streamed - elapsed` when that exceeds 1 ms
//!
//! ## Late Packets:
//! A send that does not complete inside its window is abandoned and the
//! packet counted as dropped. Its id stays used and it is never resent:
//! late audio has no value, and resending would push every later packet
//! further behind.
//!
//! ## Cancellation:
//! Every await in the loop (send, reply wait, pacing sleep) races the
//! cancellation token. The transport queues a frame whole or not at all, so
//! abandoning a send never leaves half a frame on the wire.

use crate::audio::PacketSource;
use crate::error::{StreamError, StreamResult};
use crate::protocol::{codec, InboundMessage};
use crate::session::state::StreamHandle;
use crate::transport::{Frame, Transport};
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Sleeps shorter than this are skipped.
const MIN_SLEEP: Duration = Duration::from_millis(1);

/// Share of a packet duration allowed for sending a packet and hearing back.
const ACK_WINDOW_RATIO: f64 = 0.8;

/// What the send loop did before it returned.
///
/// ## Fields:
/// - `packets_sent`: frames the transport accepted
/// - `packets_dropped`: frames abandoned because the send outlasted its window
/// - `last_packet_id`: highest id allocated, equal to sent + dropped
#[derive(Debug, Clone, PartialEq)]
pub struct SendReport {
    pub packets_sent: u32,
    pub packets_dropped: u32,
    pub last_packet_id: u32,
    /// Playback time of the audio pulled from the source
    pub streamed: Duration,
    /// Wall-clock time spent in the loop
    pub elapsed: Duration,
}

/// Drives one stream's packets through a transport.
///
/// ## Rust Concepts:
/// - **Lifetime 'a**: the sender only borrows the session's transport, handle
///   and token; the session keeps ownership so it can still stop the stream
///   and close the connection after the loop ends, whatever the reason
/// - **Generic T: Transport**: the same loop runs over the WebSocket and over
///   the scripted transport used in tests
pub struct PacedSender<'a, T: Transport> {
    transport: &'a mut T,
    handle: &'a mut StreamHandle,
    cancel: &'a CancellationToken,
    session_id: &'a str,
}

impl<'a, T: Transport> PacedSender<'a, T> {
    pub fn new(
        transport: &'a mut T,
        handle: &'a mut StreamHandle,
        cancel: &'a CancellationToken,
        session_id: &'a str,
    ) -> Self {
        Self {
            transport,
            handle,
            cancel,
            session_id,
        }
    }

    /// Send every packet of `source`.
    ///
    /// ## Returns:
    /// - **Ok(report)**: the source ran out
    /// - **Err(Cancelled)**: the cancellation token fired
    /// - **Err(Transport)**: the connection closed or a send failed
    /// - **Err(Source)**: the source could not produce the next packet
    ///
    /// ## Why a fixed start instant:
    /// Sleeping a full packet duration after each send would add the send and
    /// reply time on top of every packet. Comparing the audio already sent
    /// with the time since `started` lets a slow iteration be paid back by a
    /// shorter sleep on the next one.
    pub async fn run<S: PacketSource + ?Sized>(&mut self, source: &mut S) -> StreamResult<SendReport> {
        let packet_duration = source.parameters().packet_duration();
        let ack_window = packet_duration.mul_f64(ACK_WINDOW_RATIO);
        let stream_id = self.handle.stream_id();
        // Copy the reference out so the token can be polled while `self` is borrowed mutably.
        let cancel = self.cancel;

        let started = Instant::now();
        let mut streamed = Duration::ZERO;
        let mut packets_sent = 0u32;
        let mut packets_dropped = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(StreamError::Cancelled);
            }

            let payload = match source.next_packet()? {
                Some(payload) => payload,
                None => {
                    debug!(
                        session = %self.session_id,
                        stream_id,
                        packets_sent,
                        packets_dropped,
                        "Audio source exhausted"
                    );
                    break;
                }
            };

            if self.transport.is_closed() {
                return Err(StreamError::Transport(format!(
                    "connection closed after {} packets",
                    packets_sent
                )));
            }

            let packet_id = self.handle.next_packet_id();
            let frame = codec::encode_data_packet(stream_id, packet_id, &payload);
            let ack_deadline = Instant::now() + ack_window;

            let mut delivered = false;
            let exchanged = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(StreamError::Cancelled),
                exchanged = timeout_at(ack_deadline, self.exchange(frame, packet_id, &mut delivered)) => exchanged,
            };

            match exchanged {
                Ok(result) => result?,
                // The window closed; that is only notable if the frame never went out.
                Err(_elapsed) if !delivered => {
                    packets_dropped += 1;
                    warn!(
                        session = %self.session_id,
                        stream_id,
                        packet_id,
                        "Send did not complete in time, packet dropped"
                    );
                }
                Err(_elapsed) => {}
            }
            if delivered {
                packets_sent += 1;
            }

            streamed += packet_duration;
            let elapsed = started.elapsed();
            if let Some(delay) = streamed.checked_sub(elapsed) {
                if delay > MIN_SLEEP {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(StreamError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        Ok(SendReport {
            packets_sent,
            packets_dropped,
            last_packet_id: self.handle.packets_allocated(),
            streamed,
            elapsed: started.elapsed(),
        })
    }

    /// Send one frame, then give the server a chance to answer.
    ///
    /// `delivered` is set as soon as the transport accepts the frame, so the
    /// caller can tell a dropped packet from a quiet server when the window
    /// closes on this future.
    async fn exchange(&mut self, frame: Vec<u8>, packet_id: u32, delivered: &mut bool) -> StreamResult<()> {
        let bytes = frame.len();
        self.transport.send_binary(frame).await?;
        *delivered = true;
        trace!(session = %self.session_id, packet_id, bytes, "Packet sent");

        match self.transport.recv().await? {
            None => {
                debug!(session = %self.session_id, "Connection closed while streaming");
            }
            Some(Frame::Text(text)) => match codec::decode(&text) {
                InboundMessage::Error { error, .. } => {
                    warn!(session = %self.session_id, error = %error, "Server reported an error while streaming");
                }
                message => trace!(session = %self.session_id, ?message, "Inbound message while streaming"),
            },
            Some(Frame::Binary(data)) => {
                trace!(session = %self.session_id, bytes = data.len(), "Ignoring inbound binary frame");
            }
        }

        Ok(())
    }
}
