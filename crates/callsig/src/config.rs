//! Configuration types for call sessions and the recording server

use crate::sdp::BandwidthLimit;
use crate::session::NegotiationRole;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration for a call endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallConfig {
    /// WebSocket signaling URL the client connects to (ws:// or wss://)
    pub signaling_url: String,

    /// Address the recording server binds to
    pub listen_ip: String,

    /// Port the recording server binds to
    pub listen_port: u16,

    /// STUN server URLs (at least one required)
    pub stun_servers: Vec<String>,

    /// TURN server configurations (optional)
    pub turn_servers: Vec<TurnServerConfig>,

    /// Role this endpoint plays in every negotiation round
    pub role: NegotiationRole,

    /// Bandwidth cap written into descriptions (default: unlimited)
    pub bandwidth: BandwidthLimit,

    /// Constraints passed to the local media source
    pub media: MediaConstraints,

    /// Directory recordings are written to
    pub recording_dir: PathBuf,

    /// Maximum concurrent recording sessions (default: 8, max: 64)
    pub max_sessions: u32,
}

/// TURN server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnServerConfig {
    /// TURN server URL (turn: or turns:)
    pub url: String,

    /// Username for TURN authentication
    pub username: String,

    /// Credential for TURN authentication
    pub credential: String,
}

/// Ideal capture settings requested from the media source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaConstraints {
    /// Video settings, `None` to request no video
    pub video: Option<VideoConstraints>,

    /// Audio settings, `None` to request no audio
    pub audio: Option<AudioConstraints>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoConstraints {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    /// "user" (front camera) or "environment"
    pub facing_mode: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioConstraints {
    pub echo_cancellation: bool,
}

impl Default for VideoConstraints {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            frame_rate: 24,
            facing_mode: "user".to_string(),
        }
    }
}

impl Default for AudioConstraints {
    fn default() -> Self {
        Self {
            echo_cancellation: false,
        }
    }
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            video: Some(VideoConstraints::default()),
            audio: Some(AudioConstraints::default()),
        }
    }
}

impl MediaConstraints {
    /// Constraints requesting no media at all
    pub fn none() -> Self {
        Self {
            video: None,
            audio: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.video.is_none() && self.audio.is_none()
    }
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            signaling_url: "ws://localhost:3000".to_string(),
            listen_ip: "0.0.0.0".to_string(),
            listen_port: 3000,
            stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            turn_servers: Vec::new(),
            role: NegotiationRole::Answerer,
            bandwidth: BandwidthLimit::Unlimited,
            media: MediaConstraints::default(),
            recording_dir: PathBuf::from("recordings"),
            max_sessions: 8,
        }
    }
}

impl CallConfig {
    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `stun_servers` is empty
    /// - `signaling_url` is not a WebSocket URL
    /// - `listen_port` is zero
    /// - `max_sessions` is not in range 1-64
    /// - video constraints have a zero dimension or frame rate
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        if self.stun_servers.is_empty() {
            return Err(Error::InvalidConfig(
                "At least one STUN server is required".to_string(),
            ));
        }

        if !self.signaling_url.starts_with("ws://") && !self.signaling_url.starts_with("wss://") {
            return Err(Error::InvalidConfig(format!(
                "signaling_url must start with ws:// or wss://, got {}",
                self.signaling_url
            )));
        }

        if self.listen_port == 0 {
            return Err(Error::InvalidConfig(
                "listen_port must be non-zero".to_string(),
            ));
        }

        if self.max_sessions == 0 || self.max_sessions > 64 {
            return Err(Error::InvalidConfig(format!(
                "max_sessions must be in range 1-64, got {}",
                self.max_sessions
            )));
        }

        if let Some(video) = &self.media.video {
            if video.width == 0 || video.height == 0 || video.frame_rate == 0 {
                return Err(Error::InvalidConfig(format!(
                    "video constraints must be positive, got {}x{}@{}",
                    video.width, video.height, video.frame_rate
                )));
            }
        }

        if let BandwidthLimit::Kbps(0) = self.bandwidth {
            return Err(Error::InvalidConfig(
                "bandwidth limit must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// Address string for binding the recording server
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.listen_ip, self.listen_port)
    }

    /// Add TURN servers to this configuration
    pub fn with_turn_servers(mut self, turn_servers: Vec<TurnServerConfig>) -> Self {
        self.turn_servers = turn_servers;
        self
    }

    pub fn with_role(mut self, role: NegotiationRole) -> Self {
        self.role = role;
        self
    }

    pub fn with_bandwidth(mut self, bandwidth: BandwidthLimit) -> Self {
        self.bandwidth = bandwidth;
        self
    }

    pub fn with_media(mut self, media: MediaConstraints) -> Self {
        self.media = media;
        self
    }

    pub fn with_recording_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.recording_dir = dir.into();
        self
    }
}
