//! Call session state machine
//!
//! A [`CallSession`] owns one peer connection, one signaling channel and the
//! call's bandwidth limit. Events are handled one at a time; every
//! collaborator call is awaited inside the handler, so ordering within a
//! session is the arrival order of its events.
//!
//! ```text
//! Idle -> AwaitingLocalMedia -> Negotiating <-> Connected -> Closed
//!                                    \            /
//!                                     +-> Failed +
//! ```

use super::negotiation::{CandidateDisposition, NegotiationTracker};
use super::state::{BandwidthStrategy, CallState, NegotiationRole};
use crate::config::MediaConstraints;
use crate::error::AcquisitionError;
use crate::media::{MediaHandle, MediaSource};
use crate::peer::{PeerConnectionApi, PeerConnectionState, PeerEvent};
use crate::sdp::{BandwidthLimit, SessionDescription};
use crate::signaling::{IceCandidate, SignalingChannel, SignalingMessage};
use crate::stats::{BitrateReading, StatsSampler, SAMPLING_INTERVAL};
use crate::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, trace, warn};

/// Tunables that do not change the negotiation contract
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Stats polling cadence once connected. Calls always sample every
    /// [`SAMPLING_INTERVAL`]; only tests shorten it.
    pub stats_interval: Duration,

    /// Receives every bitrate reading when set
    pub stats_sink: Option<mpsc::UnboundedSender<BitrateReading>>,

    /// Hang up automatically after entering Failed (default: true)
    pub hangup_on_failure: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            stats_interval: SAMPLING_INTERVAL,
            stats_sink: None,
            hangup_on_failure: true,
        }
    }
}

/// Input to the session state machine
#[derive(Debug)]
pub enum SessionEvent {
    /// Result of the media acquisition started by [`CallSession::start`]
    LocalMedia(std::result::Result<MediaHandle, AcquisitionError>),
    /// Message from the remote endpoint
    Signaling(SignalingMessage),
    /// The signaling transport went away
    SignalingClosed,
    /// Notification from our peer connection
    Peer(PeerEvent),
    /// New bandwidth limit from the control surface
    SetBandwidth(BandwidthLimit),
    Hangup,
}

/// Cloneable control surface of a running session
#[derive(Clone)]
pub struct SessionHandle {
    id: String,
    control: mpsc::UnboundedSender<SessionEvent>,
    state: watch::Receiver<CallState>,
}

impl SessionHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Request a new bandwidth limit
    pub fn set_bandwidth(&self, limit: BandwidthLimit) -> Result<()> {
        self.send(SessionEvent::SetBandwidth(limit))
    }

    pub fn hangup(&self) -> Result<()> {
        self.send(SessionEvent::Hangup)
    }

    /// Inject an event as if it came from a collaborator
    pub fn send(&self, event: SessionEvent) -> Result<()> {
        self.control
            .send(event)
            .map_err(|_| Error::SessionClosed(self.id.clone()))
    }

    /// Latest published state
    pub fn state(&self) -> CallState {
        *self.state.borrow()
    }

    /// Wait until the session publishes `target`.
    ///
    /// Only the latest state is observed, so a state that is entered and
    /// left between two polls can be missed.
    pub async fn wait_for(&mut self, target: CallState) -> Result<()> {
        self.state
            .wait_for(|state| *state == target)
            .await
            .map(|_| ())
            .map_err(|_| Error::SessionClosed(self.id.clone()))
    }
}

/// One endpoint of a call
pub struct CallSession {
    id: String,
    role: NegotiationRole,
    state: CallState,
    state_tx: watch::Sender<CallState>,

    peer: Arc<dyn PeerConnectionApi>,
    signaling: Arc<dyn SignalingChannel>,
    media_source: Arc<dyn MediaSource>,
    constraints: MediaConstraints,
    media: Option<MediaHandle>,

    /// Latest requested limit
    bandwidth: BandwidthLimit,
    /// Limit snapshotted when the current round started
    round_limit: BandwidthLimit,
    /// Limit in force on the connected call
    effective_limit: BandwidthLimit,
    change_pending: bool,
    strategy: BandwidthStrategy,

    tracker: NegotiationTracker,
    transport_connected: bool,
    has_connected: bool,

    control_tx: mpsc::UnboundedSender<SessionEvent>,
    control_rx: mpsc::UnboundedReceiver<SessionEvent>,
    closed_tx: watch::Sender<bool>,
    sampler: Option<StatsSampler>,
    options: SessionOptions,
    acquisition_error: Option<AcquisitionError>,
}

impl CallSession {
    pub fn new(
        role: NegotiationRole,
        peer: Arc<dyn PeerConnectionApi>,
        signaling: Arc<dyn SignalingChannel>,
        media_source: Arc<dyn MediaSource>,
    ) -> Self {
        let (state_tx, _) = watch::channel(CallState::Idle);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (closed_tx, _) = watch::channel(false);
        let strategy = BandwidthStrategy::select(peer.supports_parameter_update());

        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            state: CallState::Idle,
            state_tx,
            peer,
            signaling,
            media_source,
            constraints: MediaConstraints::default(),
            media: None,
            bandwidth: BandwidthLimit::Unlimited,
            round_limit: BandwidthLimit::Unlimited,
            effective_limit: BandwidthLimit::Unlimited,
            change_pending: false,
            strategy,
            tracker: NegotiationTracker::new(role),
            transport_connected: false,
            has_connected: false,
            control_tx,
            control_rx,
            closed_tx,
            sampler: None,
            options: SessionOptions::default(),
            acquisition_error: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_constraints(mut self, constraints: MediaConstraints) -> Self {
        self.constraints = constraints;
        self
    }

    /// Initial bandwidth limit, used from the first round on
    pub fn with_bandwidth(mut self, limit: BandwidthLimit) -> Self {
        self.bandwidth = limit;
        self.round_limit = limit;
        self.effective_limit = limit;
        self
    }

    pub fn with_options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn role(&self) -> NegotiationRole {
        self.role
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn strategy(&self) -> BandwidthStrategy {
        self.strategy
    }

    pub fn bandwidth(&self) -> BandwidthLimit {
        self.bandwidth
    }

    /// Limit currently in force on the connected call
    pub fn effective_bandwidth(&self) -> BandwidthLimit {
        self.effective_limit
    }

    pub fn tracker(&self) -> &NegotiationTracker {
        &self.tracker
    }

    /// Control handle that stays valid while the session runs
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            id: self.id.clone(),
            control: self.control_tx.clone(),
            state: self.state_tx.subscribe(),
        }
    }

    /// Run the session on its own task
    pub fn spawn(
        self,
        inbound: mpsc::UnboundedReceiver<SignalingMessage>,
        peer_events: mpsc::UnboundedReceiver<PeerEvent>,
    ) -> (SessionHandle, JoinHandle<Result<()>>) {
        let handle = self.handle();
        let task = tokio::spawn(self.run(inbound, peer_events));
        (handle, task)
    }

    /// Start the call and process events until the session closes.
    ///
    /// Returns the acquisition error if the call could not start.
    #[instrument(skip_all, fields(session_id = %self.id, role = %self.role))]
    pub async fn run(
        mut self,
        mut inbound: mpsc::UnboundedReceiver<SignalingMessage>,
        mut peer_events: mpsc::UnboundedReceiver<PeerEvent>,
    ) -> Result<()> {
        if self.state == CallState::Idle {
            self.start()?;
        }

        let mut inbound_open = true;
        loop {
            let event = tokio::select! {
                Some(event) = self.control_rx.recv() => event,
                message = inbound.recv(), if inbound_open => match message {
                    Some(message) => SessionEvent::Signaling(message),
                    None => {
                        inbound_open = false;
                        SessionEvent::SignalingClosed
                    }
                },
                Some(event) = peer_events.recv() => SessionEvent::Peer(event),
            };

            if let Err(e) = self.handle_event(event).await {
                if e.is_protocol_error() {
                    warn!("Rejected signaling message: {}", e);
                } else if e.is_user_facing() {
                    error!(session_id = %self.id, "Call could not start: {}", e);
                } else if e.is_fatal_to_session() && self.state != CallState::Connected {
                    debug!(state = %self.state, "Negotiation aborted: {}", e);
                } else {
                    debug!("Event handling failed: {}", e);
                }
            }

            if self.state == CallState::Failed && self.options.hangup_on_failure {
                self.hangup().await;
            }
            if self.state.is_terminal() {
                break;
            }
        }

        info!("Session finished");
        match self.acquisition_error.take() {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// Idle -> AwaitingLocalMedia; the media result arrives as
    /// [`SessionEvent::LocalMedia`] on the session's control channel.
    pub fn start(&mut self) -> Result<()> {
        if self.state != CallState::Idle {
            return Err(Error::UnexpectedMessage(format!(
                "session already started (state {})",
                self.state
            )));
        }

        info!(
            session_id = %self.id,
            role = %self.role,
            bandwidth = %self.bandwidth,
            "Requesting local stream"
        );
        self.set_state(CallState::AwaitingLocalMedia);

        let source = Arc::clone(&self.media_source);
        let constraints = self.constraints.clone();
        let control = self.control_tx.clone();
        tokio::spawn(async move {
            let acquiring = tokio::spawn(async move { source.acquire(&constraints).await });
            let result = match acquiring.await {
                Ok(result) => result,
                Err(e) => {
                    error!("Media acquisition task failed: {}", e);
                    Err(AcquisitionError::Other(format!("media source aborted: {}", e)))
                }
            };
            // Session already gone; the tracks die with the handle
            if let Err(mpsc::error::SendError(SessionEvent::LocalMedia(Ok(handle)))) =
                control.send(SessionEvent::LocalMedia(result))
            {
                handle.stop_all();
            }
        });
        Ok(())
    }

    /// Process one event
    pub async fn handle_event(&mut self, event: SessionEvent) -> Result<()> {
        if self.state.is_terminal() {
            if let SessionEvent::LocalMedia(Ok(handle)) = &event {
                handle.stop_all();
            }
            trace!("Ignoring {:?} on closed session", event);
            return Err(Error::SessionClosed(self.id.clone()));
        }

        if self.state == CallState::Failed {
            return match event {
                SessionEvent::Hangup | SessionEvent::SignalingClosed => {
                    self.hangup().await;
                    Ok(())
                }
                SessionEvent::LocalMedia(Ok(handle)) => {
                    handle.stop_all();
                    Ok(())
                }
                other => {
                    debug!("Ignoring {:?} on failed session", other);
                    Ok(())
                }
            };
        }

        match event {
            SessionEvent::LocalMedia(result) => self.on_local_media(result).await,
            SessionEvent::Signaling(SignalingMessage::Offer(desc)) => self.on_remote_offer(desc).await,
            SessionEvent::Signaling(SignalingMessage::Answer(desc)) => {
                self.on_remote_answer(desc).await
            }
            SessionEvent::Signaling(SignalingMessage::IceCandidate(candidate)) => {
                self.on_remote_candidate(candidate).await
            }
            SessionEvent::SignalingClosed => {
                info!(session_id = %self.id, "Signaling channel closed");
                self.hangup().await;
                Ok(())
            }
            SessionEvent::Peer(PeerEvent::IceCandidate(candidate)) => {
                self.on_local_candidate(candidate).await
            }
            SessionEvent::Peer(PeerEvent::ConnectionState(state)) => {
                self.on_connection_state(state).await;
                Ok(())
            }
            SessionEvent::SetBandwidth(limit) => self.set_bandwidth(limit).await,
            SessionEvent::Hangup => {
                self.hangup().await;
                Ok(())
            }
        }
    }

    /// Release media, close the peer connection and the channel. Terminal.
    pub async fn hangup(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        info!(session_id = %self.id, state = %self.state, "Hanging up");

        self.closed_tx.send_replace(true);
        if let Some(media) = self.media.take() {
            media.stop_all();
        }
        if let Err(e) = self.peer.close().await {
            warn!("Failed to close peer connection: {}", e);
        }
        if let Err(e) = self.signaling.close().await {
            debug!("Failed to close signaling channel: {}", e);
        }
        self.set_state(CallState::Closed);
    }

    fn set_state(&mut self, next: CallState) {
        if self.state == next {
            return;
        }
        if !self.state.can_transition_to(next) {
            warn!("Refusing state transition {} -> {}", self.state, next);
            return;
        }
        debug!(session_id = %self.id, from = %self.state, to = %next, "State transition");
        self.state = next;
        self.state_tx.send_replace(next);
    }

    fn fail(&mut self, err: Error) -> Error {
        error!(session_id = %self.id, state = %self.state, "Negotiation failed: {}", err);
        self.set_state(CallState::Failed);
        err
    }

    /// A bandwidth edit could not be applied. Fatal before the first
    /// connection; afterwards only the current round is abandoned.
    fn abort_edit(&mut self, err: Error) -> Error {
        if self.has_connected {
            warn!(
                limit = %self.effective_limit,
                "Bandwidth edit failed, keeping previous limit: {}", err
            );
            self.round_limit = self.effective_limit;
            self.set_state(CallState::Connected);
            err
        } else {
            self.fail(err)
        }
    }

    async fn on_local_media(
        &mut self,
        result: std::result::Result<MediaHandle, AcquisitionError>,
    ) -> Result<()> {
        let media = match result {
            Ok(media) => media,
            Err(e) => {
                error!(session_id = %self.id, "Unable to open local media: {}", e);
                self.acquisition_error = Some(e.clone());
                self.hangup().await;
                return Err(e.into());
            }
        };

        if self.state != CallState::AwaitingLocalMedia {
            warn!("Local media arrived in state {}, releasing it", self.state);
            media.stop_all();
            return Ok(());
        }

        info!("Received local stream");
        for track in media.tracks() {
            info!("Using {} device: {}", track.kind(), track.label());
        }

        self.set_state(CallState::Negotiating);
        let added = self.peer.add_local_media(&media).await;
        self.media = Some(media);
        if let Err(e) = added {
            return Err(self.fail(e));
        }

        match self.role {
            NegotiationRole::Caller => self.send_offer().await,
            NegotiationRole::Answerer if self.tracker.has_pending_remote_offer() => {
                self.send_answer().await
            }
            NegotiationRole::Answerer => {
                debug!("Waiting for an offer");
                Ok(())
            }
        }
    }

    /// Create, edit, apply and send an offer for a new round
    async fn send_offer(&mut self) -> Result<()> {
        self.round_limit = self.bandwidth;
        let round = self.tracker.begin_local_offer()?;

        let offer = match self.peer.create_offer().await {
            Ok(offer) => offer,
            Err(e) => {
                self.tracker.cancel_local_offer();
                return Err(self.fail(e));
            }
        };
        let outgoing = match offer.with_limit(self.round_limit) {
            Ok(desc) => desc,
            Err(e) => {
                self.tracker.cancel_local_offer();
                return Err(self.abort_edit(e));
            }
        };
        if let Err(e) = self.peer.set_local_description(offer).await {
            self.tracker.cancel_local_offer();
            return Err(self.fail(e));
        }
        self.tracker.local_offer_applied();

        debug!(round, limit = %self.round_limit, "Sending offer");
        self.signaling
            .send(SignalingMessage::Offer(outgoing))
            .await
            .map_err(|e| {
                warn!("Failed to send offer: {}", e);
                e
            })
    }

    async fn send_answer(&mut self) -> Result<()> {
        let answer = match self.peer.create_answer().await {
            Ok(answer) => answer,
            Err(e) => return Err(self.fail(e)),
        };
        let outgoing = match answer.with_limit(self.round_limit) {
            Ok(desc) => desc,
            Err(e) => {
                self.tracker.reject_remote_offer();
                return Err(self.abort_edit(e));
            }
        };
        if let Err(e) = self.peer.set_local_description(answer).await {
            return Err(self.fail(e));
        }
        self.tracker.local_answer_applied();

        debug!(limit = %self.round_limit, "Sending answer");
        let sent = self.signaling.send(SignalingMessage::Answer(outgoing)).await;
        self.maybe_connected().await;
        sent.map_err(|e| {
            warn!("Failed to send answer: {}", e);
            e
        })
    }

    async fn on_remote_offer(&mut self, desc: SessionDescription) -> Result<()> {
        if let Err(e) = self.tracker.accept_remote_offer() {
            warn!("Dropping offer: {}", e);
            return Err(e);
        }

        if self.state == CallState::Connected {
            self.set_state(CallState::Negotiating);
        }
        self.round_limit = self.bandwidth;

        let remote = match desc.with_limit(self.round_limit) {
            Ok(desc) => desc,
            Err(e) => {
                self.tracker.reject_remote_offer();
                return Err(self.abort_edit(e));
            }
        };
        if let Err(e) = self.peer.set_remote_description(remote).await {
            self.tracker.reject_remote_offer();
            return Err(self.fail(e));
        }
        self.flush_candidates().await?;

        if self.state == CallState::Negotiating {
            self.send_answer().await
        } else {
            debug!("Offer applied; answering once local media is ready");
            Ok(())
        }
    }

    async fn on_remote_answer(&mut self, desc: SessionDescription) -> Result<()> {
        let round = match self.tracker.accept_remote_answer() {
            Ok(round) => round,
            Err(e) => {
                warn!("Dropping answer: {}", e);
                return Err(e);
            }
        };

        let remote = match desc.with_limit(self.round_limit) {
            Ok(desc) => desc,
            Err(e) => {
                self.tracker.cancel_local_offer();
                return Err(self.abort_edit(e));
            }
        };
        if let Err(e) = self.peer.set_remote_description(remote).await {
            return Err(self.fail(e));
        }
        self.tracker.remote_answer_applied();
        self.flush_candidates().await?;

        debug!(round, "Answer applied");
        self.maybe_connected().await;
        Ok(())
    }

    async fn flush_candidates(&mut self) -> Result<()> {
        let buffered = self.tracker.remote_description_applied();
        if !buffered.is_empty() {
            debug!(count = buffered.len(), "Flushing buffered remote candidates");
        }
        for candidate in buffered {
            self.add_remote_candidate(candidate).await?;
        }
        Ok(())
    }

    async fn on_remote_candidate(&mut self, candidate: Option<IceCandidate>) -> Result<()> {
        match self.tracker.on_remote_candidate(candidate) {
            CandidateDisposition::Apply(candidate) => self.add_remote_candidate(candidate).await,
            CandidateDisposition::Buffered => {
                trace!("Buffered remote candidate until a remote description is set");
                Ok(())
            }
        }
    }

    async fn add_remote_candidate(&mut self, candidate: Option<IceCandidate>) -> Result<()> {
        let label = candidate
            .as_ref()
            .map(|c| c.candidate.clone())
            .unwrap_or_else(|| "end-of-candidates".to_string());
        match self.peer.add_ice_candidate(candidate).await {
            Ok(()) => {
                trace!("New remote ICE candidate: {}", label);
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    async fn on_local_candidate(&mut self, candidate: Option<IceCandidate>) -> Result<()> {
        trace!(?candidate, "Local ICE candidate");
        if let Err(e) = self
            .signaling
            .send(SignalingMessage::IceCandidate(candidate))
            .await
        {
            warn!("Failed to relay local candidate: {}", e);
            return Err(e);
        }
        Ok(())
    }

    async fn on_connection_state(&mut self, state: PeerConnectionState) {
        debug!(?state, "Peer connection state changed");
        match state {
            PeerConnectionState::Connected => {
                self.transport_connected = true;
                self.maybe_connected().await;
            }
            PeerConnectionState::Failed => {
                self.transport_connected = false;
                error!(session_id = %self.id, "Peer connection failed");
                self.set_state(CallState::Failed);
            }
            PeerConnectionState::Disconnected | PeerConnectionState::Closed => {
                self.transport_connected = false;
                warn!(session_id = %self.id, "Peer connection {:?}", state);
                self.hangup().await;
            }
            PeerConnectionState::New | PeerConnectionState::Connecting => {}
        }
    }

    /// Negotiating -> Connected once the round is settled and the transport is up
    async fn maybe_connected(&mut self) {
        if self.state != CallState::Negotiating
            || !self.transport_connected
            || !self.tracker.is_settled()
        {
            return;
        }

        self.set_state(CallState::Connected);
        self.effective_limit = self.round_limit;

        if !self.has_connected {
            self.has_connected = true;
            info!(session_id = %self.id, limit = %self.effective_limit, "Call connected");
            match self.peer.senders().await {
                Ok(senders) => debug!(senders = senders.len(), "Sampling outbound senders"),
                Err(e) => warn!("Failed to list senders: {}", e),
            }
            self.start_sampler();
        } else {
            info!(limit = %self.effective_limit, "Renegotiation complete");
        }

        if self.change_pending {
            self.change_pending = false;
            if self.bandwidth != self.round_limit {
                if let Err(e) = self.apply_bandwidth_change().await {
                    warn!("Deferred bandwidth change failed: {}", e);
                }
            }
        }
    }

    fn start_sampler(&mut self) {
        if self.sampler.is_some() {
            return;
        }
        self.sampler = Some(StatsSampler::spawn(
            Arc::clone(&self.peer),
            self.options.stats_interval,
            self.closed_tx.subscribe(),
            self.options.stats_sink.clone(),
        ));
    }

    async fn set_bandwidth(&mut self, limit: BandwidthLimit) -> Result<()> {
        if limit == self.bandwidth {
            debug!(limit = %limit, "Bandwidth unchanged");
            return Ok(());
        }
        info!(from = %self.bandwidth, to = %limit, "Bandwidth change requested");
        self.bandwidth = limit;

        match self.state {
            CallState::Connected => self.apply_bandwidth_change().await,
            CallState::Negotiating => {
                debug!("Round in flight; the new limit applies to the next round");
                self.change_pending = true;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    async fn apply_bandwidth_change(&mut self) -> Result<()> {
        match (self.strategy, self.role) {
            (BandwidthStrategy::DirectParameterUpdate, _) => {
                match self.peer.set_max_bitrate(self.bandwidth).await {
                    Ok(()) => {
                        self.effective_limit = self.bandwidth;
                        info!(limit = %self.bandwidth, "Sender parameters updated");
                        Ok(())
                    }
                    Err(e) => {
                        warn!("Failed to update sender parameters: {}", e);
                        Err(e)
                    }
                }
            }
            (BandwidthStrategy::RenegotiationFallback, NegotiationRole::Caller) => {
                self.set_state(CallState::Negotiating);
                self.send_offer().await
            }
            (BandwidthStrategy::RenegotiationFallback, NegotiationRole::Answerer) => {
                debug!(limit = %self.bandwidth, "Stored for the next offer from the caller");
                Ok(())
            }
        }
    }
}

impl Drop for CallSession {
    fn drop(&mut self) {
        self.closed_tx.send_replace(true);
        if let Some(media) = self.media.take() {
            media.stop_all();
        }
    }
}
