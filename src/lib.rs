//! # Channel Streamer
//!
//! Client for push-to-talk audio channels over WebSocket: logs on with a
//! pre-issued token, opens an audio stream, sends Opus packets at playback
//! rate, and stops the stream again.
//!
//! ## Module Overview:
//! - **audio**: packet sources (in-memory and Ogg Opus files)
//! - **protocol**: control message and data frame encoding
//! - **transport**: connection abstraction and the WebSocket implementation
//! - **session**: the per-session state machine and paced sender
//! - **config**: runner configuration (config.toml + environment variables)
//! - **error**: error types shared by all of the above

pub mod audio;
pub mod config;
pub mod error;
pub mod protocol;
pub mod session;
pub mod transport;

pub use error::{StreamError, StreamResult};
pub use session::{SessionOutcome, SessionReport, StreamSession};
