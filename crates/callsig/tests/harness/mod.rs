//! Call session test harness
//!
//! Provides doubles for the collaborators a session drives:
//! - `FakePeer`: scripted peer connection that records every call and
//!   reports itself connected once both descriptions are set
//! - `GatedMediaSource`: media source whose acquisition can be held open
//! - `CallPair`: a caller and an answerer wired over an in-process channel

#![allow(dead_code)]

use async_trait::async_trait;
use callsig::media::{LocalTrack, TrackKind};
use callsig::{
    local_channel_pair, AcquisitionError, BandwidthLimit, CallSession, CallState, Error,
    IceCandidate, MediaConstraints, MediaHandle, MediaSource, NegotiationRole, PeerConnectionApi,
    PeerConnectionState, PeerEvent, SessionDescription, SessionHandle, SessionOptions, StatsSample,
    StatsSource,
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// How long any single wait in a test may take
pub const TIMEOUT: Duration = Duration::from_secs(5);

/// Result type for test harness operations
pub type HarnessResult<T> = Result<T, HarnessError>;

/// Error type for test harness operations
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Session error: {0}")]
    SessionError(#[from] Error),
}

/// Route session logs to the test writer; RUST_LOG selects the level
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Minimal SDP with one video section and a connection line
pub fn fake_sdp(origin: &str, version: u64) -> String {
    format!(
        "v=0\r\no={} {} 1 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\nm=video 9 UDP/TLS/RTP/SAVPF 96\r\nc=IN IP4 0.0.0.0\r\na=rtpmap:96 VP8/90000\r\na=sendrecv\r\n",
        origin, version
    )
}

/// Same SDP with the connection line missing
pub fn malformed_sdp(origin: &str, version: u64) -> String {
    fake_sdp(origin, version).replace("c=IN IP4 0.0.0.0\r\n", "")
}

pub fn candidate(label: &str) -> Option<IceCandidate> {
    Some(IceCandidate::new(
        format!("candidate:{} 1 udp 2130706431 127.0.0.1 50000 typ host", label),
        Some("0".to_string()),
        Some(0),
    ))
}

/// Scripted peer connection
pub struct FakePeer {
    name: String,
    parameter_update: bool,
    events: mpsc::UnboundedSender<PeerEvent>,
    log: Mutex<Vec<String>>,
    local: Mutex<Vec<SessionDescription>>,
    remote: Mutex<Vec<SessionDescription>>,
    candidates: Mutex<Vec<Option<IceCandidate>>>,
    bitrate_updates: Mutex<Vec<BandwidthLimit>>,
    offers_created: AtomicU64,
    malformed_offers: AtomicBool,
    reject_remote: AtomicBool,
    auto_connect: AtomicBool,
    gathered: AtomicBool,
    connected: AtomicBool,
    has_media: AtomicBool,
    closed: AtomicBool,
    bytes_sent: AtomicU64,
    created_at: tokio::time::Instant,
}

impl FakePeer {
    pub fn new(name: &str, parameter_update: bool) -> (Arc<Self>, mpsc::UnboundedReceiver<PeerEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let peer = Arc::new(Self {
            name: name.to_string(),
            parameter_update,
            events,
            log: Mutex::new(Vec::new()),
            local: Mutex::new(Vec::new()),
            remote: Mutex::new(Vec::new()),
            candidates: Mutex::new(Vec::new()),
            bitrate_updates: Mutex::new(Vec::new()),
            offers_created: AtomicU64::new(0),
            malformed_offers: AtomicBool::new(false),
            reject_remote: AtomicBool::new(false),
            auto_connect: AtomicBool::new(true),
            gathered: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            has_media: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            bytes_sent: AtomicU64::new(0),
            created_at: tokio::time::Instant::now(),
        });
        (peer, rx)
    }

    /// Offers created from now on lack a connection line
    pub fn set_malformed_offers(&self, malformed: bool) {
        self.malformed_offers.store(malformed, Ordering::SeqCst);
    }

    pub fn set_reject_remote(&self, reject: bool) {
        self.reject_remote.store(reject, Ordering::SeqCst);
    }

    pub fn set_auto_connect(&self, auto: bool) {
        self.auto_connect.store(auto, Ordering::SeqCst);
    }

    /// Raise an event as the real connection would
    pub fn emit(&self, event: PeerEvent) {
        let _ = self.events.send(event);
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn local_descriptions(&self) -> Vec<SessionDescription> {
        self.local.lock().unwrap().clone()
    }

    pub fn remote_descriptions(&self) -> Vec<SessionDescription> {
        self.remote.lock().unwrap().clone()
    }

    pub fn applied_candidates(&self) -> Vec<Option<IceCandidate>> {
        self.candidates.lock().unwrap().clone()
    }

    pub fn bitrate_updates(&self) -> Vec<BandwidthLimit> {
        self.bitrate_updates.lock().unwrap().clone()
    }

    pub fn offers_created(&self) -> u64 {
        self.offers_created.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn record(&self, entry: impl Into<String>) {
        self.log.lock().unwrap().push(entry.into());
    }

    /// Gather on the first local description; connect once both sides are set
    fn after_description(&self) {
        if !self.gathered.swap(true, Ordering::SeqCst) {
            self.emit(PeerEvent::IceCandidate(candidate(&self.name)));
            self.emit(PeerEvent::IceCandidate(None));
        }
        let both = !self.local.lock().unwrap().is_empty() && !self.remote.lock().unwrap().is_empty();
        if both
            && self.auto_connect.load(Ordering::SeqCst)
            && !self.connected.swap(true, Ordering::SeqCst)
        {
            self.emit(PeerEvent::ConnectionState(PeerConnectionState::Connecting));
            self.emit(PeerEvent::ConnectionState(PeerConnectionState::Connected));
        }
    }
}

#[async_trait]
impl StatsSource for FakePeer {
    async fn outbound_stats(&self) -> callsig::Result<Vec<StatsSample>> {
        if self.closed.load(Ordering::SeqCst) || !self.has_media.load(Ordering::SeqCst) {
            return Ok(Vec::new());
        }
        let bytes = self.bytes_sent.fetch_add(12_500, Ordering::SeqCst) + 12_500;
        Ok(vec![StatsSample {
            id: format!("outbound-video-{}", self.name),
            timestamp_ms: self.created_at.elapsed().as_secs_f64() * 1000.0,
            bytes_sent: bytes,
            header_bytes_sent: bytes / 20,
        }])
    }
}

#[async_trait]
impl PeerConnectionApi for FakePeer {
    async fn add_local_media(&self, media: &MediaHandle) -> callsig::Result<()> {
        self.record(format!("add_local_media:{}", media.tracks().len()));
        if !media.is_empty() {
            self.has_media.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn create_offer(&self) -> callsig::Result<SessionDescription> {
        let n = self.offers_created.fetch_add(1, Ordering::SeqCst) + 1;
        self.record("create_offer");
        let sdp = if self.malformed_offers.load(Ordering::SeqCst) {
            malformed_sdp(&self.name, n)
        } else {
            fake_sdp(&self.name, n)
        };
        Ok(SessionDescription::offer(sdp))
    }

    async fn create_answer(&self) -> callsig::Result<SessionDescription> {
        self.record("create_answer");
        let version = self.remote.lock().unwrap().len() as u64;
        if version == 0 {
            return Err(Error::NegotiationError(
                "no remote offer to answer".to_string(),
            ));
        }
        Ok(SessionDescription::answer(fake_sdp(&self.name, version)))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> callsig::Result<()> {
        self.record(format!("set_local_description:{}", desc.sdp_type));
        self.local.lock().unwrap().push(desc);
        self.after_description();
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> callsig::Result<()> {
        self.record(format!("set_remote_description:{}", desc.sdp_type));
        if self.reject_remote.load(Ordering::SeqCst) {
            return Err(Error::NegotiationError(
                "remote description rejected".to_string(),
            ));
        }
        self.remote.lock().unwrap().push(desc);
        self.after_description();
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: Option<IceCandidate>) -> callsig::Result<()> {
        self.record("add_ice_candidate");
        self.candidates.lock().unwrap().push(candidate);
        Ok(())
    }

    async fn senders(&self) -> callsig::Result<Vec<String>> {
        if self.has_media.load(Ordering::SeqCst) {
            Ok(vec![format!("video-{}", self.name)])
        } else {
            Ok(Vec::new())
        }
    }

    fn supports_parameter_update(&self) -> bool {
        self.parameter_update
    }

    async fn set_max_bitrate(&self, limit: BandwidthLimit) -> callsig::Result<()> {
        self.record(format!("set_max_bitrate:{}", limit));
        if !self.parameter_update {
            return Err(Error::NegotiationError(
                "parameter updates unsupported".to_string(),
            ));
        }
        self.bitrate_updates.lock().unwrap().push(limit);
        Ok(())
    }

    async fn close(&self) -> callsig::Result<()> {
        self.record("close");
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Track with no real device behind it
pub struct FakeTrack {
    kind: TrackKind,
    label: String,
    stopped: AtomicBool,
}

impl FakeTrack {
    pub fn new(kind: TrackKind, label: &str) -> Self {
        Self {
            kind,
            label: label.to_string(),
            stopped: AtomicBool::new(false),
        }
    }
}

impl LocalTrack for FakeTrack {
    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// Media source that can be held until the test opens the gate
pub struct GatedMediaSource {
    gate: tokio::sync::Mutex<Option<oneshot::Receiver<()>>>,
    failure: Option<AcquisitionError>,
    issued: Mutex<Vec<Arc<FakeTrack>>>,
}

impl GatedMediaSource {
    /// Acquisition completes immediately
    pub fn ready() -> Arc<Self> {
        Arc::new(Self {
            gate: tokio::sync::Mutex::new(None),
            failure: None,
            issued: Mutex::new(Vec::new()),
        })
    }

    /// Acquisition completes when the returned sender fires
    pub fn gated() -> (Arc<Self>, oneshot::Sender<()>) {
        let (tx, rx) = oneshot::channel();
        let source = Arc::new(Self {
            gate: tokio::sync::Mutex::new(Some(rx)),
            failure: None,
            issued: Mutex::new(Vec::new()),
        });
        (source, tx)
    }

    pub fn failing(error: AcquisitionError) -> Arc<Self> {
        Arc::new(Self {
            gate: tokio::sync::Mutex::new(None),
            failure: Some(error),
            issued: Mutex::new(Vec::new()),
        })
    }

    /// Every track handed out so far
    pub fn issued(&self) -> Vec<Arc<FakeTrack>> {
        self.issued.lock().unwrap().clone()
    }

    pub fn all_stopped(&self) -> bool {
        self.issued().iter().all(|t| t.is_stopped())
    }

    /// A handle built directly, for tests that feed events by hand
    pub fn handle(&self) -> MediaHandle {
        let track = Arc::new(FakeTrack::new(TrackKind::Video, "Fake Camera"));
        self.issued.lock().unwrap().push(Arc::clone(&track));
        MediaHandle::new(vec![track as Arc<dyn LocalTrack>])
    }
}

#[async_trait]
impl MediaSource for GatedMediaSource {
    async fn acquire(
        &self,
        _constraints: &MediaConstraints,
    ) -> Result<MediaHandle, AcquisitionError> {
        let gate = self.gate.lock().await.take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        if let Some(e) = &self.failure {
            return Err(e.clone());
        }
        Ok(self.handle())
    }
}

/// Wait until the session publishes `state`
pub async fn wait_for_state(handle: &mut SessionHandle, state: CallState) -> HarnessResult<()> {
    let waited = tokio::time::timeout(TIMEOUT, handle.wait_for(state)).await;
    match waited {
        Ok(result) => result.map_err(HarnessError::from),
        Err(_) => Err(HarnessError::Timeout(format!(
            "{} never reached {} (last {})",
            handle.id(),
            state,
            handle.state()
        ))),
    }
}

/// Poll `condition` until it holds
pub async fn wait_until<F>(what: &str, condition: F) -> HarnessResult<()>
where
    F: Fn() -> bool,
{
    let poll = async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(TIMEOUT, poll)
        .await
        .map_err(|_| HarnessError::Timeout(what.to_string()))
}

/// Knobs for [`CallPair::start`]
pub struct CallSetup {
    pub caller_limit: BandwidthLimit,
    pub answerer_limit: BandwidthLimit,
    pub parameter_update: bool,
    pub caller_media: Arc<GatedMediaSource>,
    pub answerer_media: Arc<GatedMediaSource>,
    pub caller_options: SessionOptions,
}

impl Default for CallSetup {
    fn default() -> Self {
        Self {
            caller_limit: BandwidthLimit::Unlimited,
            answerer_limit: BandwidthLimit::Unlimited,
            parameter_update: false,
            caller_media: GatedMediaSource::ready(),
            answerer_media: GatedMediaSource::ready(),
            caller_options: SessionOptions::default(),
        }
    }
}

/// Caller and answerer running against each other in-process
pub struct CallPair {
    pub caller: SessionHandle,
    pub answerer: SessionHandle,
    pub caller_peer: Arc<FakePeer>,
    pub answerer_peer: Arc<FakePeer>,
    pub caller_media: Arc<GatedMediaSource>,
    pub answerer_media: Arc<GatedMediaSource>,
    pub caller_task: JoinHandle<callsig::Result<()>>,
    pub answerer_task: JoinHandle<callsig::Result<()>>,
}

impl CallPair {
    pub fn start(setup: CallSetup) -> Self {
        init_test_logging();
        let (caller_end, answerer_end) = local_channel_pair();
        let (caller_peer, caller_events) = FakePeer::new("caller", setup.parameter_update);
        let (answerer_peer, answerer_events) = FakePeer::new("answerer", setup.parameter_update);

        let caller = CallSession::new(
            NegotiationRole::Caller,
            caller_peer.clone(),
            Arc::new(caller_end.channel),
            setup.caller_media.clone(),
        )
        .with_id("caller")
        .with_bandwidth(setup.caller_limit)
        .with_options(setup.caller_options);

        let answerer = CallSession::new(
            NegotiationRole::Answerer,
            answerer_peer.clone(),
            Arc::new(answerer_end.channel),
            setup.answerer_media.clone(),
        )
        .with_id("answerer")
        .with_bandwidth(setup.answerer_limit);

        let (answerer, answerer_task) = answerer.spawn(answerer_end.inbound, answerer_events);
        let (caller, caller_task) = caller.spawn(caller_end.inbound, caller_events);

        Self {
            caller,
            answerer,
            caller_peer,
            answerer_peer,
            caller_media: setup.caller_media,
            answerer_media: setup.answerer_media,
            caller_task,
            answerer_task,
        }
    }

    pub async fn wait_connected(&mut self) -> HarnessResult<()> {
        wait_for_state(&mut self.caller, CallState::Connected).await?;
        wait_for_state(&mut self.answerer, CallState::Connected).await
    }
}
