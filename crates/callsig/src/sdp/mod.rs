//! Session descriptions and bandwidth editing

pub mod bandwidth;

pub use bandwidth::{apply_limit, current_limit, remove_limit, BandwidthLimit};

use crate::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which half of an offer/answer exchange a description is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    /// Sent by the caller to open a negotiation round
    Offer,
    /// Sent by the answerer to complete it
    Answer,
}

impl fmt::Display for SdpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SdpType::Offer => write!(f, "offer"),
            SdpType::Answer => write!(f, "answer"),
        }
    }
}

/// SDP blob tagged with its type; the `sdp` text is CRLF-terminated lines
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }

    /// Copy of this description with `limit` written into its SDP
    pub fn with_limit(&self, limit: BandwidthLimit) -> Result<Self> {
        Ok(Self {
            sdp_type: self.sdp_type,
            sdp: limit.apply_to(&self.sdp)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_description_json_shape() {
        let desc = SessionDescription::offer("v=0\r\n");
        let json = serde_json::to_value(&desc).unwrap();
        assert_eq!(json["type"], "offer");
        assert_eq!(json["sdp"], "v=0\r\n");

        let back: SessionDescription =
            serde_json::from_str(r#"{"type":"answer","sdp":"v=0\r\n"}"#).unwrap();
        assert_eq!(back.sdp_type, SdpType::Answer);
    }

    #[test]
    fn test_with_limit_keeps_type() {
        let desc = SessionDescription::answer("v=0\r\nc=IN IP4 0.0.0.0\r\n");
        let limited = desc.with_limit(BandwidthLimit::Kbps(300)).unwrap();
        assert_eq!(limited.sdp_type, SdpType::Answer);
        assert_eq!(limited.sdp, "v=0\r\nc=IN IP4 0.0.0.0\r\nb=AS:300\r\n");
    }

    #[test]
    fn test_with_limit_malformed() {
        let desc = SessionDescription::offer("v=0\r\n");
        assert!(desc.with_limit(BandwidthLimit::Kbps(300)).is_err());
        assert!(desc.with_limit(BandwidthLimit::Unlimited).is_ok());
    }
}
