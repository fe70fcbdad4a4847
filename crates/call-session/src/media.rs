use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::MediaError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Audio,
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Audio => f.write_str("audio"),
            MediaKind::Video => f.write_str("video"),
        }
    }
}

/// A single local or remote media track.
pub trait MediaTrack: Send + Sync + fmt::Debug {
    fn id(&self) -> &str;
    fn kind(&self) -> MediaKind;
    fn set_enabled(&self, enabled: bool);
    fn is_enabled(&self) -> bool;
    /// Release the underlying device or stream. Idempotent.
    fn stop(&self) -> Result<(), MediaError>;
}

/// Tracks captured from local devices for one call.
#[derive(Debug, Clone)]
pub struct LocalMedia {
    pub stream_id: String,
    pub tracks: Vec<Arc<dyn MediaTrack>>,
}

impl LocalMedia {
    pub fn new(stream_id: impl Into<String>, tracks: Vec<Arc<dyn MediaTrack>>) -> Self {
        Self {
            stream_id: stream_id.into(),
            tracks,
        }
    }

    pub fn tracks_of(&self, kind: MediaKind) -> impl Iterator<Item = &Arc<dyn MediaTrack>> {
        self.tracks.iter().filter(move |track| track.kind() == kind)
    }

    /// Toggle every track of `kind`. Returns how many tracks were touched.
    pub fn set_enabled(&self, kind: MediaKind, enabled: bool) -> usize {
        let mut touched = 0;
        for track in self.tracks_of(kind) {
            track.set_enabled(enabled);
            touched += 1;
        }
        touched
    }

    /// Stop every track, continuing past failures.
    pub fn stop(&self) -> Vec<MediaError> {
        self.tracks.iter().filter_map(|track| track.stop().err()).collect()
    }
}

/// Tracks received from the remote peer, in arrival order.
#[derive(Debug, Clone, Default)]
pub struct RemoteMedia {
    tracks: Vec<Arc<dyn MediaTrack>>,
}

impl RemoteMedia {
    /// Returns false if a track with the same id was already attached.
    pub fn attach(&mut self, track: Arc<dyn MediaTrack>) -> bool {
        if self.tracks.iter().any(|existing| existing.id() == track.id()) {
            return false;
        }
        self.tracks.push(track);
        true
    }

    pub fn tracks(&self) -> &[Arc<dyn MediaTrack>] {
        &self.tracks
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn stop(&self) -> Vec<MediaError> {
        self.tracks.iter().filter_map(|track| track.stop().err()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacingMode {
    User,
    Environment,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoConstraints {
    pub facing_mode: Option<FacingMode>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub frame_rate: Option<u32>,
}

impl VideoConstraints {
    pub fn any() -> Self {
        Self {
            facing_mode: None,
            width: None,
            height: None,
            frame_rate: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: Option<VideoConstraints>,
}

impl MediaConstraints {
    /// 720p at 30fps from the user-facing camera, plus audio.
    pub fn caller_default() -> Self {
        Self {
            audio: true,
            video: Some(VideoConstraints {
                facing_mode: Some(FacingMode::User),
                width: Some(1280),
                height: Some(720),
                frame_rate: Some(30),
            }),
        }
    }

    pub fn callee_default() -> Self {
        Self {
            audio: true,
            video: Some(VideoConstraints::any()),
        }
    }

    pub fn audio_only() -> Self {
        Self {
            audio: true,
            video: None,
        }
    }
}

#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn acquire(&self, constraints: &MediaConstraints) -> Result<LocalMedia, MediaError>;
}
