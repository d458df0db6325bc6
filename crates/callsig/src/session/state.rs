//! Session state, roles and bandwidth strategies

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a call session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallState {
    /// Created, not started
    Idle,
    /// Waiting for the media source to hand out tracks
    AwaitingLocalMedia,
    /// An offer/answer round is in flight
    Negotiating,
    /// Both descriptions applied and the transport is up
    Connected,
    /// A description or candidate was rejected, or the transport failed
    Failed,
    /// Hung up; terminal
    Closed,
}

impl CallState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallState::Closed)
    }

    /// Whether moving from `self` to `next` is a legal transition
    pub fn can_transition_to(&self, next: CallState) -> bool {
        use CallState::*;
        match (self, next) {
            (Idle, AwaitingLocalMedia) => true,
            (AwaitingLocalMedia, Negotiating) => true,
            (Negotiating, Connected) => true,
            (Connected, Negotiating) => true,
            (Closed, _) => false,
            (Failed, Closed) => true,
            (Failed, _) => false,
            (_, Failed) => true,
            (_, Closed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CallState::Idle => "idle",
            CallState::AwaitingLocalMedia => "awaiting-local-media",
            CallState::Negotiating => "negotiating",
            CallState::Connected => "connected",
            CallState::Failed => "failed",
            CallState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Message-sequencing responsibility of an endpoint, fixed per call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NegotiationRole {
    /// Sends offers
    Caller,
    /// Answers offers
    Answerer,
}

impl fmt::Display for NegotiationRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NegotiationRole::Caller => write!(f, "caller"),
            NegotiationRole::Answerer => write!(f, "answerer"),
        }
    }
}

/// How a bandwidth change reaches a connected call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BandwidthStrategy {
    /// Update sender encoding parameters in place
    DirectParameterUpdate,
    /// Run a fresh offer/answer round with rewritten descriptions
    RenegotiationFallback,
}

impl BandwidthStrategy {
    /// Pick the strategy from the peer connection's capability flag
    pub fn select(supports_parameter_update: bool) -> Self {
        if supports_parameter_update {
            BandwidthStrategy::DirectParameterUpdate
        } else {
            BandwidthStrategy::RenegotiationFallback
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        use CallState::*;
        assert!(Idle.can_transition_to(AwaitingLocalMedia));
        assert!(AwaitingLocalMedia.can_transition_to(Negotiating));
        assert!(Negotiating.can_transition_to(Connected));
        assert!(Connected.can_transition_to(Negotiating));
        assert!(Connected.can_transition_to(Closed));
    }

    #[test]
    fn test_failed_and_closed() {
        use CallState::*;
        assert!(Negotiating.can_transition_to(Failed));
        assert!(Connected.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Closed));
        assert!(!Failed.can_transition_to(Connected));
        assert!(!Failed.can_transition_to(Negotiating));
        assert!(!Closed.can_transition_to(Idle));
        assert!(Closed.is_terminal());
    }

    #[test]
    fn test_strategy_selection() {
        assert_eq!(
            BandwidthStrategy::select(true),
            BandwidthStrategy::DirectParameterUpdate
        );
        assert_eq!(
            BandwidthStrategy::select(false),
            BandwidthStrategy::RenegotiationFallback
        );
    }

    #[test]
    fn test_role_serde() {
        assert_eq!(
            serde_json::to_string(&NegotiationRole::Caller).unwrap(),
            "\"caller\""
        );
    }
}
