//! Test-pattern media source for endpoints without capture devices

use super::{LocalTrack, MediaHandle, MediaSource, TrackKind};
use crate::config::MediaConstraints;
use crate::error::AcquisitionError;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

const OPUS_FRAME: Duration = Duration::from_millis(20);
const OPUS_FRAME_BYTES: usize = 80;
const MIN_VIDEO_FRAME_BYTES: u64 = 256;
const MAX_VIDEO_FRAME_BYTES: u64 = 1 << 20;

/// Track fed with fixed-size samples until stopped
pub struct SyntheticTrack {
    kind: TrackKind,
    label: String,
    track: Arc<TrackLocalStaticSample>,
    stopped: Arc<AtomicBool>,
}

impl LocalTrack for SyntheticTrack {
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

    fn as_track_local(&self) -> Option<Arc<dyn TrackLocal + Send + Sync>> {
        Some(Arc::clone(&self.track) as Arc<dyn TrackLocal + Send + Sync>)
    }
}

/// Media source producing a VP8 test pattern and Opus silence
#[derive(Debug, Clone, Default)]
pub struct SyntheticMediaSource {
    deny_with: Option<AcquisitionError>,
}

impl SyntheticMediaSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Source that refuses every request with `error`
    pub fn failing(error: AcquisitionError) -> Self {
        Self {
            deny_with: Some(error),
        }
    }

    fn spawn_feeder(
        label: String,
        track: Arc<TrackLocalStaticSample>,
        stopped: Arc<AtomicBool>,
        frame: Bytes,
        frame_duration: Duration,
    ) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(frame_duration);
            while !stopped.load(Ordering::SeqCst) {
                ticker.tick().await;
                let sample = Sample {
                    data: frame.clone(),
                    duration: frame_duration,
                    ..Default::default()
                };
                if let Err(e) = track.write_sample(&sample).await {
                    warn!("Failed to write sample to {}: {}", label, e);
                    break;
                }
            }
            debug!("Feeder for {} stopped", label);
        });
    }
}

#[async_trait]
impl MediaSource for SyntheticMediaSource {
    async fn acquire(
        &self,
        constraints: &MediaConstraints,
    ) -> std::result::Result<MediaHandle, AcquisitionError> {
        if let Some(err) = &self.deny_with {
            return Err(err.clone());
        }
        if constraints.is_empty() {
            return Err(AcquisitionError::NotFound(
                "neither audio nor video requested".to_string(),
            ));
        }

        let stream_id = format!("synthetic-{}", uuid::Uuid::new_v4());
        let mut tracks: Vec<Arc<dyn LocalTrack>> = Vec::new();

        if let Some(video) = &constraints.video {
            if video.width == 0 || video.height == 0 || video.frame_rate == 0 {
                return Err(AcquisitionError::Other(format!(
                    "cannot produce video at {}x{}@{}",
                    video.width, video.height, video.frame_rate
                )));
            }

            let track = Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_VP8.to_owned(),
                    clock_rate: 90000,
                    channels: 0,
                    sdp_fmtp_line: String::new(),
                    rtcp_feedback: vec![],
                },
                "video".to_owned(),
                stream_id.clone(),
            ));
            // Roughly the size of a compressed frame at this resolution
            let frame_bytes = (u64::from(video.width) * u64::from(video.height) / 64)
                .clamp(MIN_VIDEO_FRAME_BYTES, MAX_VIDEO_FRAME_BYTES) as usize;
            let frame_duration = Duration::from_secs_f64(1.0 / f64::from(video.frame_rate));
            let label = format!("test pattern {}x{} ({})", video.width, video.height, video.facing_mode);
            let stopped = Arc::new(AtomicBool::new(false));

            Self::spawn_feeder(
                label.clone(),
                Arc::clone(&track),
                Arc::clone(&stopped),
                Bytes::from(vec![0u8; frame_bytes]),
                frame_duration,
            );
            debug!("Using video device: {}", label);
            tracks.push(Arc::new(SyntheticTrack {
                kind: TrackKind::Video,
                label,
                track,
                stopped,
            }));
        }

        if let Some(audio) = &constraints.audio {
            let track = Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_OPUS.to_owned(),
                    clock_rate: 48000,
                    channels: 2,
                    sdp_fmtp_line: "minptime=10;useinbandfec=1".to_owned(),
                    rtcp_feedback: vec![],
                },
                "audio".to_owned(),
                stream_id.clone(),
            ));
            let label = format!(
                "silence (echo cancellation {})",
                if audio.echo_cancellation { "on" } else { "off" }
            );
            let stopped = Arc::new(AtomicBool::new(false));

            Self::spawn_feeder(
                label.clone(),
                Arc::clone(&track),
                Arc::clone(&stopped),
                Bytes::from(vec![0u8; OPUS_FRAME_BYTES]),
                OPUS_FRAME,
            );
            debug!("Using audio device: {}", label);
            tracks.push(Arc::new(SyntheticTrack {
                kind: TrackKind::Audio,
                label,
                track,
                stopped,
            }));
        }

        Ok(MediaHandle::new(tracks))
    }
}
