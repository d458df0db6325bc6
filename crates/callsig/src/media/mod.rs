//! Local media collaborator
//!
//! A [`MediaSource`] hands out a [`MediaHandle`] of tracks for the
//! constraints the session asks for. The handle owns its tracks and stops
//! them on hangup.

pub mod synthetic;

pub use synthetic::SyntheticMediaSource;

use crate::config::MediaConstraints;
use crate::error::AcquisitionError;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::debug;
use webrtc::track::track_local::TrackLocal;

/// Media kind of a local track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Audio => write!(f, "audio"),
            TrackKind::Video => write!(f, "video"),
        }
    }
}

/// A single captured track
pub trait LocalTrack: Send + Sync {
    fn kind(&self) -> TrackKind;

    /// Device label, logged when the call starts
    fn label(&self) -> &str;

    /// Release the underlying device; idempotent
    fn stop(&self);

    fn is_stopped(&self) -> bool;

    /// Track to attach to a webrtc-rs peer connection, if this track has one
    fn as_track_local(&self) -> Option<Arc<dyn TrackLocal + Send + Sync>> {
        None
    }
}

/// Tracks acquired for one call
#[derive(Clone, Default)]
pub struct MediaHandle {
    tracks: Vec<Arc<dyn LocalTrack>>,
}

impl MediaHandle {
    pub fn new(tracks: Vec<Arc<dyn LocalTrack>>) -> Self {
        Self { tracks }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn tracks(&self) -> &[Arc<dyn LocalTrack>] {
        &self.tracks
    }

    pub fn video_tracks(&self) -> impl Iterator<Item = &Arc<dyn LocalTrack>> {
        self.tracks.iter().filter(|t| t.kind() == TrackKind::Video)
    }

    pub fn audio_tracks(&self) -> impl Iterator<Item = &Arc<dyn LocalTrack>> {
        self.tracks.iter().filter(|t| t.kind() == TrackKind::Audio)
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Stop every track in the handle
    pub fn stop_all(&self) {
        for track in &self.tracks {
            if !track.is_stopped() {
                debug!("Stopping {} track {}", track.kind(), track.label());
                track.stop();
            }
        }
    }
}

impl fmt::Debug for MediaHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.tracks.iter().map(|t| (t.kind(), t.label().to_string())))
            .finish()
    }
}

/// Source of local media for a call
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn acquire(
        &self,
        constraints: &MediaConstraints,
    ) -> std::result::Result<MediaHandle, AcquisitionError>;
}

/// Media source for endpoints that only receive, such as the recording server
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLocalMedia;

#[async_trait]
impl MediaSource for NoLocalMedia {
    async fn acquire(
        &self,
        _constraints: &MediaConstraints,
    ) -> std::result::Result<MediaHandle, AcquisitionError> {
        Ok(MediaHandle::empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct CountingTrack {
        kind: TrackKind,
        stopped: AtomicBool,
        stop_calls: AtomicUsize,
    }

    impl LocalTrack for CountingTrack {
        fn kind(&self) -> TrackKind {
            self.kind
        }
        fn label(&self) -> &str {
            "counting"
        }
        fn stop(&self) {
            self.stop_calls.fetch_add(1, Ordering::SeqCst);
            self.stopped.store(true, Ordering::SeqCst);
        }
        fn is_stopped(&self) -> bool {
            self.stopped.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn test_stop_all_stops_each_track_once() {
        let video = Arc::new(CountingTrack {
            kind: TrackKind::Video,
            stopped: AtomicBool::new(false),
            stop_calls: AtomicUsize::new(0),
        });
        let handle = MediaHandle::new(vec![video.clone() as Arc<dyn LocalTrack>]);
        assert_eq!(handle.video_tracks().count(), 1);
        assert_eq!(handle.audio_tracks().count(), 0);

        handle.stop_all();
        handle.stop_all();
        assert!(video.is_stopped());
        assert_eq!(video.stop_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_local_media_is_empty() {
        let handle = NoLocalMedia
            .acquire(&MediaConstraints::default())
            .await
            .unwrap();
        assert!(handle.is_empty());
    }
}
