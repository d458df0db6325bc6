//! Signaling message schema
//!
//! Frames travel as JSON text: `{"event": "<type>", "data": <payload>}`.

use crate::sdp::{SdpType, SessionDescription};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Network path proposed by one endpoint's ICE agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,

    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,

    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,

    #[serde(
        rename = "usernameFragment",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>, sdp_mid: Option<String>, sdp_mline_index: Option<u16>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid,
            sdp_mline_index,
            username_fragment: None,
        }
    }
}

/// Signaling messages exchanged between the two endpoints of a call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum SignalingMessage {
    /// Opens a negotiation round (Caller -> Answerer)
    #[serde(rename = "offer")]
    Offer(SessionDescription),

    /// Completes a negotiation round (Answerer -> Caller)
    #[serde(rename = "answer")]
    Answer(SessionDescription),

    /// Trickled candidate; `None` marks end-of-candidates
    #[serde(rename = "ice-candidate")]
    IceCandidate(Option<IceCandidate>),
}

impl SignalingMessage {
    /// Serialize to a JSON text frame
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::SerializationError(e.to_string()))
    }

    /// Parse a JSON text frame.
    ///
    /// Descriptions whose `type` disagrees with the event name are rejected.
    pub fn from_json(json: &str) -> Result<Self> {
        let message: Self =
            serde_json::from_str(json).map_err(|e| Error::SerializationError(e.to_string()))?;

        match &message {
            SignalingMessage::Offer(desc) if desc.sdp_type != SdpType::Offer => Err(
                Error::SerializationError(format!("offer event carries a {} description", desc.sdp_type)),
            ),
            SignalingMessage::Answer(desc) if desc.sdp_type != SdpType::Answer => Err(
                Error::SerializationError(format!("answer event carries a {} description", desc.sdp_type)),
            ),
            _ => Ok(message),
        }
    }

    /// Event name on the wire
    pub fn message_type(&self) -> &'static str {
        match self {
            SignalingMessage::Offer(_) => "offer",
            SignalingMessage::Answer(_) => "answer",
            SignalingMessage::IceCandidate(_) => "ice-candidate",
        }
    }
}
