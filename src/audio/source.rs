//! # Packet Sources
//!
//! A packet source hands the session a finished, encoded audio stream: a
//! single-pass sequence of Opus packets plus the three parameters that
//! describe it.
//!
//! ## Ownership:
//! `StreamSession::run` takes its source by value, so a source feeds at most
//! one session and is drained exactly once.

use crate::error::{StreamError, StreamResult};
use std::collections::VecDeque;
use std::time::Duration;

/// Fixed description of an encoded stream, announced in the start-stream handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamParameters {
    /// Input sample rate in Hz (16000 for narrow voice channels)
    pub sample_rate: u16,

    /// Number of codec frames packed into one packet
    pub frames_per_packet: u8,

    /// Playback duration of one packet in milliseconds
    pub packet_duration_ms: u8,
}

impl StreamParameters {
    pub fn new(sample_rate: u16, frames_per_packet: u8, packet_duration_ms: u8) -> Self {
        Self {
            sample_rate,
            frames_per_packet,
            packet_duration_ms,
        }
    }

    /// Packet duration as a `Duration`, the unit of pacing.
    pub fn packet_duration(&self) -> Duration {
        Duration::from_millis(u64::from(self.packet_duration_ms))
    }

    /// Reject parameters that cannot be paced or announced.
    ///
    /// ## Why:
    /// A zero packet duration would collapse the pacing loop into a burst
    /// that sends the whole source at once, and a zero frame or sample count
    /// describes no audio at all.
    pub fn validate(&self) -> StreamResult<()> {
        if self.packet_duration_ms == 0 {
            return Err(StreamError::Source("packet duration must be greater than 0".to_string()));
        }
        if self.frames_per_packet == 0 {
            return Err(StreamError::Source("frames per packet must be greater than 0".to_string()));
        }
        if self.sample_rate == 0 {
            return Err(StreamError::Source("sample rate must be greater than 0".to_string()));
        }
        Ok(())
    }
}

/// A lazy, finite, non-restartable sequence of encoded audio packets.
///
/// ## Contract:
/// - `parameters()` never changes for the lifetime of the source
/// - `next_packet()` returns `Ok(None)` once the sequence is exhausted,
///   and keeps returning `Ok(None)` afterwards
/// - An `Err` is fatal for the session consuming the source
pub trait PacketSource: Send {
    fn parameters(&self) -> StreamParameters;

    fn next_packet(&mut self) -> StreamResult<Option<Vec<u8>>>;
}

/// Packet source backed by packets already held in memory.
///
/// ## Usage:
/// Useful when the caller encoded audio itself (or for tests).
#[derive(Debug, Clone)]
pub struct MemorySource {
    parameters: StreamParameters,
    packets: VecDeque<Vec<u8>>,
}

impl MemorySource {
    pub fn new(parameters: StreamParameters, packets: Vec<Vec<u8>>) -> Self {
        Self {
            parameters,
            packets: packets.into(),
        }
    }

    /// Number of packets not yet consumed.
    pub fn remaining(&self) -> usize {
        self.packets.len()
    }
}

impl PacketSource for MemorySource {
    fn parameters(&self) -> StreamParameters {
        self.parameters
    }

    fn next_packet(&mut self) -> StreamResult<Option<Vec<u8>>> {
        Ok(self.packets.pop_front())
    }
}
