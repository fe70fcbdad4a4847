use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use call_session::{LocalMedia, MediaConstraints, MediaError, MediaKind, MediaSource, MediaTrack};
use tracing::{debug, trace};
use webrtc::media::Sample;

use crate::track::{TrackTable, WebRtcLocalTrack};

// Opus TOC byte plus a zero-length frame: decodes to silence.
const OPUS_SILENCE: &[u8] = &[0xf8, 0xff, 0xfe];
const AUDIO_FRAME: Duration = Duration::from_millis(20);
const DEFAULT_FRAME_RATE: u32 = 30;

/// Media source with no devices behind it: audio tracks carry Opus silence
/// and video tracks carry placeholder VP8 frames at the requested rate.
#[derive(Debug, Clone)]
pub struct SyntheticMediaSource {
    label: String,
    tracks: TrackTable,
    next_stream: Arc<AtomicU64>,
}

impl SyntheticMediaSource {
    pub fn new(label: impl Into<String>, tracks: TrackTable) -> Self {
        Self {
            label: label.into(),
            tracks,
            next_stream: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn tracks(&self) -> &TrackTable {
        &self.tracks
    }

    fn spawn_pump(track: Arc<WebRtcLocalTrack>, frame: Duration, payload: Bytes) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(frame);
            let sample = track.sample();
            while !track.is_stopped() {
                ticker.tick().await;
                if !track.is_enabled() {
                    continue;
                }
                let written = sample
                    .write_sample(&Sample {
                        data: payload.clone(),
                        duration: frame,
                        ..Default::default()
                    })
                    .await;
                if let Err(err) = written {
                    trace!(target = "call.webrtc", track = track.id(), error = %err, "sample write failed");
                }
            }
        });
    }
}

#[async_trait]
impl MediaSource for SyntheticMediaSource {
    async fn acquire(&self, constraints: &MediaConstraints) -> Result<LocalMedia, MediaError> {
        if !constraints.audio && constraints.video.is_none() {
            return Err(MediaError::Unavailable("no audio or video requested".into()));
        }
        let n = self.next_stream.fetch_add(1, Ordering::Relaxed) + 1;
        let stream_id = format!("{}-stream-{n}", self.label);
        let mut tracks: Vec<Arc<dyn MediaTrack>> = Vec::new();

        if constraints.audio {
            let track = WebRtcLocalTrack::new(
                format!("{}-audio-{n}", self.label),
                &stream_id,
                MediaKind::Audio,
                self.tracks.clone(),
            );
            Self::spawn_pump(track.clone(), AUDIO_FRAME, Bytes::from_static(OPUS_SILENCE));
            tracks.push(track);
        }
        if let Some(video) = &constraints.video {
            let fps = video.frame_rate.unwrap_or(DEFAULT_FRAME_RATE).max(1);
            let track = WebRtcLocalTrack::new(
                format!("{}-video-{n}", self.label),
                &stream_id,
                MediaKind::Video,
                self.tracks.clone(),
            );
            let frame = Duration::from_millis(1_000 / u64::from(fps));
            Self::spawn_pump(track.clone(), frame, Bytes::from(vec![0u8; 16]));
            tracks.push(track);
        }

        debug!(target = "call.webrtc", stream = %stream_id, tracks = tracks.len(), "synthetic media acquired");
        Ok(LocalMedia::new(stream_id, tracks))
    }
}
