//! # Channel Protocol
//!
//! Wire format of the push-to-talk channel API: JSON control messages and
//! binary stream data frames. Nothing here touches the network.

pub mod codec;
pub mod messages;

pub use messages::{InboundMessage, StreamStartReply};
