//! Peer-connection collaborator
//!
//! The session drives negotiation through [`PeerConnectionApi`] and learns
//! about candidates and transport state through [`PeerEvent`]s delivered on
//! the channel the peer was created with.

pub mod connection;
pub mod recorder;

pub use connection::WebRtcPeer;
pub use recorder::{DiskRecorder, Recorder};

use crate::media::MediaHandle;
use crate::sdp::{BandwidthLimit, SessionDescription};
use crate::signaling::IceCandidate;
use crate::stats::StatsSource;
use crate::Result;
use async_trait::async_trait;

/// Transport-level connection state reported by the peer connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Notification raised by the peer connection
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    /// Locally gathered candidate; `None` once gathering completes
    IceCandidate(Option<IceCandidate>),
    ConnectionState(PeerConnectionState),
}

/// Operations the session needs from a peer connection.
///
/// Every fallible call reports rejection as [`crate::Error::NegotiationError`].
#[async_trait]
pub trait PeerConnectionApi: StatsSource {
    /// Attach the handle's tracks as senders
    async fn add_local_media(&self, media: &MediaHandle) -> Result<()>;

    async fn create_offer(&self) -> Result<SessionDescription>;

    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()>;

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()>;

    /// `None` marks end-of-candidates from the remote endpoint
    async fn add_ice_candidate(&self, candidate: Option<IceCandidate>) -> Result<()>;

    /// Track ids of the current senders
    async fn senders(&self) -> Result<Vec<String>>;

    /// Whether sender encoding parameters can be changed without renegotiation
    fn supports_parameter_update(&self) -> bool;

    /// Cap every sender's encoding bitrate in place
    async fn set_max_bitrate(&self, limit: BandwidthLimit) -> Result<()>;

    async fn close(&self) -> Result<()>;
}
