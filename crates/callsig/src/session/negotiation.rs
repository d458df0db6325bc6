//! Offer/answer bookkeeping for one endpoint
//!
//! Tracks at most one outstanding offer per direction and buffers remote
//! candidates until a remote description has been applied.

use super::state::NegotiationRole;
use crate::signaling::IceCandidate;
use crate::{Error, Result};
use std::collections::VecDeque;
use tracing::{debug, warn};

/// What to do with a remote candidate right now
#[derive(Debug, Clone, PartialEq)]
pub enum CandidateDisposition {
    /// Remote description is in place; add it to the peer connection
    Apply(Option<IceCandidate>),
    /// Held until the remote description is applied
    Buffered,
}

#[derive(Debug)]
pub struct NegotiationTracker {
    role: NegotiationRole,
    round: u64,
    /// Round id of our offer still waiting for an answer
    outstanding_local_offer: Option<u64>,
    /// A remote offer has been applied but not yet answered
    pending_remote_offer: bool,
    remote_applied: bool,
    local_applied: bool,
    buffered: VecDeque<Option<IceCandidate>>,
}

impl NegotiationTracker {
    pub fn new(role: NegotiationRole) -> Self {
        Self {
            role,
            round: 0,
            outstanding_local_offer: None,
            pending_remote_offer: false,
            remote_applied: false,
            local_applied: false,
            buffered: VecDeque::new(),
        }
    }

    pub fn role(&self) -> NegotiationRole {
        self.role
    }

    /// Open a new local offer round, superseding any unanswered one.
    /// Returns the round id.
    pub fn begin_local_offer(&mut self) -> Result<u64> {
        if self.role != NegotiationRole::Caller {
            return Err(Error::UnexpectedMessage(
                "answerer cannot send offers".to_string(),
            ));
        }
        self.round += 1;
        if let Some(previous) = self.outstanding_local_offer.replace(self.round) {
            debug!(
                "Offer for round {} supersedes unanswered round {}",
                self.round, previous
            );
        }
        Ok(self.round)
    }

    /// Our local offer was set and sent
    pub fn local_offer_applied(&mut self) {
        self.local_applied = true;
    }

    /// Abandon the outstanding local offer (the round was aborted before sending)
    pub fn cancel_local_offer(&mut self) {
        self.outstanding_local_offer = None;
    }

    /// Check that an incoming offer may be processed and mark it pending
    pub fn accept_remote_offer(&mut self) -> Result<()> {
        match self.role {
            NegotiationRole::Answerer => {
                if self.pending_remote_offer {
                    return Err(Error::GlareError(
                        "offer received while a previous offer is still unanswered".to_string(),
                    ));
                }
                self.pending_remote_offer = true;
                Ok(())
            }
            NegotiationRole::Caller => {
                if let Some(round) = self.outstanding_local_offer {
                    Err(Error::GlareError(format!(
                        "remote offer collides with our offer for round {}",
                        round
                    )))
                } else {
                    Err(Error::UnexpectedMessage(
                        "caller does not accept offers".to_string(),
                    ))
                }
            }
        }
    }

    /// The pending remote offer could not be applied; forget it
    pub fn reject_remote_offer(&mut self) {
        self.pending_remote_offer = false;
    }

    /// Our answer was set and sent, closing the round
    pub fn local_answer_applied(&mut self) {
        self.pending_remote_offer = false;
        self.local_applied = true;
    }

    /// Check that an incoming answer matches an outstanding offer
    pub fn accept_remote_answer(&self) -> Result<u64> {
        match (self.role, self.outstanding_local_offer) {
            (NegotiationRole::Caller, Some(round)) => Ok(round),
            (NegotiationRole::Caller, None) => Err(Error::UnexpectedMessage(
                "answer received with no outstanding offer".to_string(),
            )),
            (NegotiationRole::Answerer, _) => Err(Error::UnexpectedMessage(
                "answerer does not accept answers".to_string(),
            )),
        }
    }

    /// The remote answer was applied, closing the round
    pub fn remote_answer_applied(&mut self) {
        self.outstanding_local_offer = None;
    }

    /// A remote description (offer or answer) is now in place.
    /// Returns the buffered candidates in arrival order.
    pub fn remote_description_applied(&mut self) -> Vec<Option<IceCandidate>> {
        self.remote_applied = true;
        self.buffered.drain(..).collect()
    }

    pub fn on_remote_candidate(&mut self, candidate: Option<IceCandidate>) -> CandidateDisposition {
        if self.remote_applied {
            CandidateDisposition::Apply(candidate)
        } else {
            if self.buffered.len() == 256 {
                warn!("Holding an unusually large number of early candidates");
            }
            self.buffered.push_back(candidate);
            CandidateDisposition::Buffered
        }
    }

    pub fn has_pending_remote_offer(&self) -> bool {
        self.pending_remote_offer
    }

    pub fn outstanding_local_offer(&self) -> Option<u64> {
        self.outstanding_local_offer
    }

    pub fn buffered_candidates(&self) -> usize {
        self.buffered.len()
    }

    /// Both descriptions set and no round in flight
    pub fn is_settled(&self) -> bool {
        self.local_applied
            && self.remote_applied
            && self.outstanding_local_offer.is_none()
            && !self.pending_remote_offer
    }
}
