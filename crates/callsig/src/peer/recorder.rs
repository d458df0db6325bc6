//! Server-side recording of incoming media

use crate::{Error, Result};
use async_trait::async_trait;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, error, info, warn};
use webrtc::api::media_engine::{MIME_TYPE_H264, MIME_TYPE_OPUS, MIME_TYPE_VP8, MIME_TYPE_VP9};
use webrtc::media::io::h264_writer::H264Writer;
use webrtc::media::io::ivf_reader::IVFFileHeader;
use webrtc::media::io::ivf_writer::IVFWriter;
use webrtc::media::io::ogg_writer::OggWriter;
use webrtc::media::io::Writer;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtcp::payload_feedbacks::picture_loss_indication::PictureLossIndication;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::{RTCRtpTransceiver, RTCRtpTransceiverInit};
use webrtc::track::track_remote::TrackRemote;

const PLI_INTERVAL: Duration = Duration::from_secs(3);

/// Arranges for a peer connection's incoming media to be captured
#[async_trait]
pub trait Recorder: Send + Sync {
    /// Called on the server's peer connection before it creates its offer
    async fn prepare_for_offer(&self, peer_connection: &Arc<RTCPeerConnection>) -> Result<()>;

    /// Flush and close everything recorded so far
    async fn finish(&self) -> Result<()>;
}

type SharedWriter = Arc<Mutex<Option<Box<dyn Writer + Send + Sync>>>>;

/// Writes each incoming track to a file named after the session, kind and SSRC
pub struct DiskRecorder {
    dir: PathBuf,
    session_id: String,
    writers: Arc<Mutex<Vec<SharedWriter>>>,
    done: Arc<Notify>,
}

impl DiskRecorder {
    pub fn new(dir: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            session_id: session_id.into(),
            writers: Arc::new(Mutex::new(Vec::new())),
            done: Arc::new(Notify::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Output file for a track with the given codec, if the codec is recordable
    pub fn output_path(&self, mime_type: &str, ssrc: u32) -> Option<PathBuf> {
        let (kind, ext) = match_codec(mime_type)?;
        Some(
            self.dir
                .join(format!("{}-{}-{}.{}", self.session_id, kind, ssrc, ext)),
        )
    }

    async fn open_writer(
        path: &Path,
        mime_type: &str,
    ) -> Result<Box<dyn Writer + Send + Sync>> {
        let file = File::create(path)?;
        let writer: Box<dyn Writer + Send + Sync> = if mime_type.eq_ignore_ascii_case(MIME_TYPE_OPUS) {
            Box::new(
                OggWriter::new(file, 48000, 2)
                    .map_err(|e| Error::RecordingError(format!("Failed to open ogg writer: {}", e)))?,
            )
        } else if mime_type.eq_ignore_ascii_case(MIME_TYPE_H264) {
            Box::new(H264Writer::new(file))
        } else {
            let four_cc = if mime_type.eq_ignore_ascii_case(MIME_TYPE_VP9) {
                *b"VP90"
            } else {
                *b"VP80"
            };
            Box::new(
                IVFWriter::new(
                    file,
                    &IVFFileHeader {
                        signature: *b"DKIF",
                        version: 0,
                        header_size: 32,
                        four_cc,
                        width: 640,
                        height: 480,
                        timebase_denominator: 30,
                        timebase_numerator: 1,
                        num_frames: 900,
                        unused: 0,
                    },
                )
                .map_err(|e| Error::RecordingError(format!("Failed to open ivf writer: {}", e)))?,
            )
        };
        Ok(writer)
    }
}

fn match_codec(mime_type: &str) -> Option<(&'static str, &'static str)> {
    if mime_type.eq_ignore_ascii_case(MIME_TYPE_VP8) || mime_type.eq_ignore_ascii_case(MIME_TYPE_VP9) {
        Some(("video", "ivf"))
    } else if mime_type.eq_ignore_ascii_case(MIME_TYPE_H264) {
        Some(("video", "h264"))
    } else if mime_type.eq_ignore_ascii_case(MIME_TYPE_OPUS) {
        Some(("audio", "ogg"))
    } else {
        None
    }
}

async fn close_writer(writer: &SharedWriter) {
    if let Some(mut w) = writer.lock().await.take() {
        if let Err(e) = w.close() {
            warn!("Failed to close recording: {}", e);
        }
    }
}

#[async_trait]
impl Recorder for DiskRecorder {
    async fn prepare_for_offer(&self, peer_connection: &Arc<RTCPeerConnection>) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;

        for kind in [RTPCodecType::Audio, RTPCodecType::Video] {
            peer_connection
                .add_transceiver_from_kind(
                    kind,
                    Some(RTCRtpTransceiverInit {
                        direction: RTCRtpTransceiverDirection::Recvonly,
                        send_encodings: vec![],
                    }),
                )
                .await
                .map_err(|e| Error::RecordingError(format!("Failed to add transceiver: {}", e)))?;
        }

        let recorder = Arc::new(DiskRecorder {
            dir: self.dir.clone(),
            session_id: self.session_id.clone(),
            writers: Arc::clone(&self.writers),
            done: Arc::clone(&self.done),
        });
        let pc = Arc::downgrade(peer_connection);

        peer_connection.on_track(Box::new(
            move |track: Arc<TrackRemote>, _receiver: Arc<RTCRtpReceiver>, _transceiver: Arc<RTCRtpTransceiver>| {
                let recorder = Arc::clone(&recorder);
                let pc = pc.clone();
                Box::pin(async move {
                    let codec = track.codec();
                    let mime_type = codec.capability.mime_type.clone();
                    let ssrc = track.ssrc();

                    let Some(path) = recorder.output_path(&mime_type, ssrc) else {
                        warn!("Not recording track with unsupported codec {}", mime_type);
                        return;
                    };

                    let writer = match DiskRecorder::open_writer(&path, &mime_type).await {
                        Ok(w) => Arc::new(Mutex::new(Some(w))),
                        Err(e) => {
                            error!("Failed to open {}: {}", path.display(), e);
                            return;
                        }
                    };
                    recorder.writers.lock().await.push(Arc::clone(&writer));
                    info!("Recording {} track (ssrc {}) to {}", mime_type, ssrc, path.display());

                    if track.kind() == RTPCodecType::Video {
                        let done = Arc::clone(&recorder.done);
                        tokio::spawn(async move {
                            let mut ticker = tokio::time::interval(PLI_INTERVAL);
                            loop {
                                tokio::select! {
                                    _ = ticker.tick() => {}
                                    _ = done.notified() => break,
                                }
                                let Some(pc) = pc.upgrade() else { break };
                                if pc
                                    .write_rtcp(&[Box::new(PictureLossIndication {
                                        sender_ssrc: 0,
                                        media_ssrc: ssrc,
                                    })])
                                    .await
                                    .is_err()
                                {
                                    break;
                                }
                            }
                        });
                    }

                    tokio::spawn(async move {
                        loop {
                            match track.read_rtp().await {
                                Ok((packet, _)) => {
                                    let mut guard = writer.lock().await;
                                    let Some(w) = guard.as_mut() else { break };
                                    if let Err(e) = w.write_rtp(&packet) {
                                        warn!("Failed to write RTP packet: {}", e);
                                    }
                                }
                                Err(e) => {
                                    debug!("Track {} ended: {}", ssrc, e);
                                    break;
                                }
                            }
                        }
                        close_writer(&writer).await;
                    });
                })
            },
        ));

        debug!("Recorder prepared for session {}", self.session_id);
        Ok(())
    }

    async fn finish(&self) -> Result<()> {
        self.done.notify_waiters();
        let writers: Vec<SharedWriter> = self.writers.lock().await.drain(..).collect();
        for writer in &writers {
            close_writer(writer).await;
        }
        info!(
            "Recording for session {} finished ({} tracks)",
            self.session_id,
            writers.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_paths() {
        let recorder = DiskRecorder::new("/tmp/rec", "abc");
        assert_eq!(
            recorder.output_path("video/VP8", 42).unwrap(),
            PathBuf::from("/tmp/rec/abc-video-42.ivf")
        );
        assert_eq!(
            recorder.output_path("video/h264", 7).unwrap(),
            PathBuf::from("/tmp/rec/abc-video-7.h264")
        );
        assert_eq!(
            recorder.output_path("audio/opus", 1).unwrap(),
            PathBuf::from("/tmp/rec/abc-audio-1.ogg")
        );
        assert!(recorder.output_path("video/AV1", 1).is_none());
    }

    #[tokio::test]
    async fn test_open_writers_create_files() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = DiskRecorder::new(dir.path(), "s1");

        for (mime, ssrc) in [("video/VP8", 1u32), ("video/H264", 2), ("audio/opus", 3)] {
            let path = recorder.output_path(mime, ssrc).unwrap();
            let mut writer = DiskRecorder::open_writer(&path, mime).await.unwrap();
            writer.close().unwrap();
            assert!(path.exists(), "{} not created", path.display());
        }
    }

    #[tokio::test]
    async fn test_finish_without_tracks() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = DiskRecorder::new(dir.path(), "empty");
        tokio_test::assert_ok!(recorder.finish().await);
    }
}
