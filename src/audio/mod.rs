//! # Audio Sources
//!
//! Everything the session needs to know about the audio it streams: the
//! encoded packets and the parameters announced to the server.
//!
//! ## Key Components:
//! - **PacketSource**: single-pass sequence of encoded packets (`source`)
//! - **MemorySource**: packets already held in memory (`source`)
//! - **OggOpusSource**: packets read lazily from an `.opus` file (`ogg`)
//!
//! Capturing, voice detection and encoding happen before audio reaches this
//! crate.

pub mod ogg;
pub mod source;

pub use ogg::OggOpusSource;
pub use source::{MemorySource, PacketSource, StreamParameters};
