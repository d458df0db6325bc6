//! Signaling exchange between the two endpoints of a call

pub mod channel;
pub mod protocol;
pub mod websocket;

pub use channel::{local_channel_pair, LocalEndpoint, LocalSignalingChannel, SignalingChannel};
pub use protocol::{IceCandidate, SignalingMessage};
