//! Call signaling for two-endpoint WebRTC calls
//!
//! This crate negotiates a media session between a caller and an answerer
//! over an ordered signaling channel, enforces a sender bandwidth cap by
//! editing session descriptions, and samples outbound bitrate once the call
//! is connected.
//!
//! # Features
//!
//! - **SDP bandwidth editing**: insert, replace or strip `b=AS:` lines
//! - **Offer/answer exchange**: candidate buffering and glare rejection
//! - **Session state machine**: Idle → AwaitingLocalMedia → Negotiating → Connected
//! - **Bandwidth changes mid-call**: in-place parameter update or renegotiation
//! - **Stats sampling**: per-sender bitrate from cumulative byte counters
//! - **Recording server**: WebSocket signaling, media written to disk
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │  CallSession (state machine, one task per call)      │
//! │  ├─ MediaSource       → MediaHandle (local tracks)   │
//! │  ├─ NegotiationTracker (rounds, early candidates)    │
//! │  ├─ sdp::apply_limit  (b=AS: on every description)   │
//! │  ├─ PeerConnectionApi (WebRtcPeer / test doubles)    │
//! │  ├─ SignalingChannel  (WebSocket / in-process pair)  │
//! │  └─ StatsSampler      (bitrate once connected)       │
//! │     ↓                                                │
//! │  RecordingServer: one caller session per socket,     │
//! │  incoming tracks written by DiskRecorder             │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use callsig::{apply_limit, remove_limit, BandwidthLimit, CallConfig};
//!
//! let sdp = "v=0\r\nc=IN IP4 0.0.0.0\r\nm=video 9 UDP/TLS/RTP/SAVPF 96\r\n";
//! let limited = apply_limit(sdp, 500).unwrap();
//! assert!(limited.contains("b=AS:500\r\n"));
//! assert_eq!(remove_limit(&limited), sdp);
//!
//! let config = CallConfig::default().with_bandwidth(BandwidthLimit::Kbps(500));
//! assert!(config.validate().is_ok());
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod media;
pub mod peer;
pub mod sdp;
pub mod session;
pub mod signaling;
pub mod stats;

pub use config::{AudioConstraints, CallConfig, MediaConstraints, TurnServerConfig, VideoConstraints};
pub use error::{AcquisitionError, Error, Result};
pub use media::{MediaHandle, MediaSource, NoLocalMedia, SyntheticMediaSource};
pub use peer::{DiskRecorder, PeerConnectionApi, PeerConnectionState, PeerEvent, Recorder, WebRtcPeer};
pub use sdp::{apply_limit, current_limit, remove_limit, BandwidthLimit, SdpType, SessionDescription};
pub use session::{
    BandwidthStrategy, CallSession, CallState, NegotiationRole, SessionEvent, SessionHandle,
    SessionOptions,
};
pub use signaling::websocket::{RecordingServer, RecordingServerHandle, WebSocketSignalingClient};
pub use signaling::{local_channel_pair, IceCandidate, SignalingChannel, SignalingMessage};
pub use stats::{BitrateReading, StatsSample, StatsSampler, StatsSource};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
