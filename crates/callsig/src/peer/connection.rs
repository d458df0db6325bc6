//! Peer connection backed by webrtc-rs

use super::{PeerConnectionApi, PeerConnectionState, PeerEvent};
use crate::config::CallConfig;
use crate::media::MediaHandle;
use crate::sdp::{BandwidthLimit, SdpType, SessionDescription};
use crate::signaling::IceCandidate;
use crate::stats::{StatsSample, StatsSource};
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, trace, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::stats::StatsReportType;

/// webrtc-rs peer connection driven by a call session.
///
/// webrtc-rs senders cannot change encoding parameters in place, so
/// sessions on this peer always renegotiate bandwidth changes.
pub struct WebRtcPeer {
    /// Unique identifier for this connection instance
    connection_id: String,

    /// Actual WebRTC peer connection
    peer_connection: Arc<RTCPeerConnection>,

    /// Origin for stats timestamps
    created_at: Instant,
}

impl WebRtcPeer {
    /// Create a new peer connection
    ///
    /// Candidates and connection-state changes are delivered on `events`.
    #[instrument(skip(config, events))]
    pub async fn new(
        config: &CallConfig,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Self> {
        let connection_id = uuid::Uuid::new_v4().to_string();
        info!("Creating peer connection: connection_id={}", connection_id);

        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::WebRtcError(format!("Failed to register codecs: {}", e)))?;

        let interceptor_registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| Error::WebRtcError(format!("Failed to register interceptors: {}", e)))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptor_registry)
            .build();

        let ice_servers: Vec<RTCIceServer> = config
            .stun_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .chain(config.turn_servers.iter().map(|turn| RTCIceServer {
                urls: vec![turn.url.clone()],
                username: turn.username.clone(),
                credential: turn.credential.clone(),
                ..Default::default()
            }))
            .collect();

        let rtc_config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let peer_connection =
            Arc::new(api.new_peer_connection(rtc_config).await.map_err(|e| {
                Error::WebRtcError(format!("Failed to create peer connection: {}", e))
            })?);

        let candidate_tx = events.clone();
        peer_connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let candidate_tx = candidate_tx.clone();
            Box::pin(async move {
                let candidate = match candidate {
                    Some(candidate) => match candidate.to_json() {
                        Ok(init) => Some(IceCandidate {
                            candidate: init.candidate,
                            sdp_mid: init.sdp_mid,
                            sdp_mline_index: init.sdp_mline_index,
                            username_fragment: init.username_fragment,
                        }),
                        Err(e) => {
                            warn!("Failed to serialize local ICE candidate: {}", e);
                            return;
                        }
                    },
                    None => None,
                };
                let _ = candidate_tx.send(PeerEvent::IceCandidate(candidate));
            })
        }));

        let state_tx = events;
        let id = connection_id.clone();
        peer_connection.on_peer_connection_state_change(Box::new(
            move |s: RTCPeerConnectionState| {
                let state_tx = state_tx.clone();
                let id = id.clone();
                Box::pin(async move {
                    let state = match s {
                        RTCPeerConnectionState::New => PeerConnectionState::New,
                        RTCPeerConnectionState::Connecting => PeerConnectionState::Connecting,
                        RTCPeerConnectionState::Connected => PeerConnectionState::Connected,
                        RTCPeerConnectionState::Disconnected => PeerConnectionState::Disconnected,
                        RTCPeerConnectionState::Failed => PeerConnectionState::Failed,
                        RTCPeerConnectionState::Closed => PeerConnectionState::Closed,
                        _ => return,
                    };
                    debug!("Peer connection {} state: {:?}", id, state);
                    let _ = state_tx.send(PeerEvent::ConnectionState(state));
                })
            },
        ));

        Ok(Self {
            connection_id,
            peer_connection,
            created_at: Instant::now(),
        })
    }

    /// Get the connection ID
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Underlying webrtc-rs connection, for collaborators such as recorders
    pub fn peer_connection(&self) -> Arc<RTCPeerConnection> {
        Arc::clone(&self.peer_connection)
    }
}

fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription> {
    let parsed = match desc.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpType::Answer => RTCSessionDescription::answer(desc.sdp),
    };
    parsed.map_err(|e| Error::NegotiationError(format!("Failed to parse description: {}", e)))
}

fn from_rtc(desc: RTCSessionDescription) -> Result<SessionDescription> {
    match desc.sdp_type {
        RTCSdpType::Offer => Ok(SessionDescription::offer(desc.sdp)),
        RTCSdpType::Answer => Ok(SessionDescription::answer(desc.sdp)),
        other => Err(Error::NegotiationError(format!(
            "Unsupported description type: {:?}",
            other
        ))),
    }
}

#[async_trait]
impl StatsSource for WebRtcPeer {
    async fn outbound_stats(&self) -> Result<Vec<StatsSample>> {
        let report = self.peer_connection.get_stats().await;
        let samples = report
            .reports
            .values()
            .filter_map(|stat| match stat {
                StatsReportType::OutboundRTP(rtp) => Some(StatsSample {
                    id: rtp.id.clone(),
                    timestamp_ms: rtp
                        .timestamp
                        .saturating_duration_since(self.created_at)
                        .as_secs_f64()
                        * 1000.0,
                    bytes_sent: rtp.bytes_sent,
                    header_bytes_sent: rtp.header_bytes_sent,
                }),
                _ => None,
            })
            .collect();
        Ok(samples)
    }
}

#[async_trait]
impl PeerConnectionApi for WebRtcPeer {
    async fn add_local_media(&self, media: &MediaHandle) -> Result<()> {
        for track in media.tracks() {
            let Some(local) = track.as_track_local() else {
                debug!("Track {} has no RTP source, skipping", track.label());
                continue;
            };

            let sender = self
                .peer_connection
                .add_track(local)
                .await
                .map_err(|e| Error::NegotiationError(format!("Failed to add track: {}", e)))?;

            // Drain RTCP so interceptors (NACK, reports) keep running
            tokio::spawn(async move {
                let mut rtcp_buf = vec![0u8; 1500];
                while let Ok((_, _)) = sender.read(&mut rtcp_buf).await {}
            });
            debug!("Added {} track {}", track.kind(), track.label());
        }
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .map_err(|e| Error::NegotiationError(format!("Failed to create offer: {}", e)))?;
        from_rtc(offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|e| Error::NegotiationError(format!("Failed to create answer: {}", e)))?;
        from_rtc(answer)
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        self.peer_connection
            .set_local_description(to_rtc(desc)?)
            .await
            .map_err(|e| Error::NegotiationError(format!("Failed to set local description: {}", e)))
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        self.peer_connection
            .set_remote_description(to_rtc(desc)?)
            .await
            .map_err(|e| {
                Error::NegotiationError(format!("Failed to set remote description: {}", e))
            })
    }

    async fn add_ice_candidate(&self, candidate: Option<IceCandidate>) -> Result<()> {
        let Some(candidate) = candidate else {
            debug!("Remote end-of-candidates for {}", self.connection_id);
            return Ok(());
        };
        trace!("Adding ICE candidate: {}", candidate.candidate);

        self.peer_connection
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_mline_index,
                username_fragment: candidate.username_fragment,
            })
            .await
            .map_err(|e| Error::NegotiationError(format!("Failed to add ICE candidate: {}", e)))
    }

    async fn senders(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for sender in self.peer_connection.get_senders().await {
            if let Some(track) = sender.track().await {
                ids.push(track.id().to_string());
            }
        }
        Ok(ids)
    }

    fn supports_parameter_update(&self) -> bool {
        false
    }

    async fn set_max_bitrate(&self, limit: BandwidthLimit) -> Result<()> {
        let target = limit
            .max_bitrate_bps()
            .map(|bps| format!("{} bps", bps))
            .unwrap_or_else(|| "no cap".to_string());
        Err(Error::NegotiationError(format!(
            "cannot apply {} in place: sender parameter updates are unsupported",
            target
        )))
    }

    /// Close the connection
    async fn close(&self) -> Result<()> {
        info!("Closing peer connection {}", self.connection_id);
        self.peer_connection
            .close()
            .await
            .map_err(|e| Error::WebRtcError(format!("Failed to close peer connection: {}", e)))
    }
}
