use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use call_session::{MediaError, MediaKind, MediaTrack};
use parking_lot::RwLock;
use tracing::{debug, trace};
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_remote::TrackRemote;

/// RTP writers of live local tracks, keyed by track id.
#[derive(Clone, Default)]
pub struct TrackTable {
    tracks: Arc<RwLock<HashMap<String, Arc<TrackLocalStaticSample>>>>,
}

impl fmt::Debug for TrackTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.tracks.read().keys()).finish()
    }
}

impl TrackTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<Arc<TrackLocalStaticSample>> {
        self.tracks.read().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.tracks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.read().is_empty()
    }

    pub(crate) fn insert(&self, id: &str, sample: Arc<TrackLocalStaticSample>) {
        self.tracks.write().insert(id.to_string(), sample);
    }

    pub(crate) fn remove(&self, id: &str) {
        self.tracks.write().remove(id);
    }
}

pub(crate) fn codec_for(kind: MediaKind) -> RTCRtpCodecCapability {
    match kind {
        MediaKind::Audio => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_owned(),
            clock_rate: 48_000,
            channels: 2,
            ..Default::default()
        },
        MediaKind::Video => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_VP8.to_owned(),
            clock_rate: 90_000,
            ..Default::default()
        },
    }
}

/// Local track whose samples are written by a [`crate::SyntheticMediaSource`] pump.
pub struct WebRtcLocalTrack {
    id: String,
    kind: MediaKind,
    enabled: AtomicBool,
    stopped: AtomicBool,
    sample: Arc<TrackLocalStaticSample>,
    table: TrackTable,
}

impl WebRtcLocalTrack {
    pub(crate) fn new(id: String, stream_id: &str, kind: MediaKind, table: TrackTable) -> Arc<Self> {
        let sample = Arc::new(TrackLocalStaticSample::new(
            codec_for(kind),
            id.clone(),
            stream_id.to_string(),
        ));
        table.insert(&id, sample.clone());
        Arc::new(Self {
            id,
            kind,
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
            sample,
            table,
        })
    }

    pub fn sample(&self) -> Arc<TrackLocalStaticSample> {
        self.sample.clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

impl fmt::Debug for WebRtcLocalTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebRtcLocalTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("enabled", &self.is_enabled())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

impl MediaTrack for WebRtcLocalTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    fn stop(&self) -> Result<(), MediaError> {
        if !self.stopped.swap(true, Ordering::AcqRel) {
            self.table.remove(&self.id);
            debug!(target = "call.webrtc", track = %self.id, "local track stopped");
        }
        Ok(())
    }
}

/// Track received from the remote peer. A reader task drains its RTP stream
/// until the track is stopped or the connection goes away.
#[derive(Debug)]
pub struct WebRtcRemoteTrack {
    id: String,
    kind: MediaKind,
    enabled: AtomicBool,
    stopped: Arc<AtomicBool>,
    packets: Arc<AtomicU64>,
}

impl WebRtcRemoteTrack {
    pub(crate) fn spawn(remote: Arc<TrackRemote>) -> Arc<Self> {
        let kind = match remote.kind() {
            RTPCodecType::Audio => MediaKind::Audio,
            _ => MediaKind::Video,
        };
        let track = Arc::new(Self {
            id: remote.id(),
            kind,
            enabled: AtomicBool::new(true),
            stopped: Arc::new(AtomicBool::new(false)),
            packets: Arc::new(AtomicU64::new(0)),
        });

        let stopped = track.stopped.clone();
        let packets = track.packets.clone();
        let id = track.id.clone();
        tokio::spawn(async move {
            while !stopped.load(Ordering::Acquire) {
                match remote.read_rtp().await {
                    Ok(_) => {
                        packets.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(err) => {
                        trace!(target = "call.webrtc", track = %id, error = %err, "remote track reader finished");
                        break;
                    }
                }
            }
        });
        track
    }

    /// RTP packets received so far.
    pub fn packets(&self) -> u64 {
        self.packets.load(Ordering::Relaxed)
    }
}

impl MediaTrack for WebRtcRemoteTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    fn stop(&self) -> Result<(), MediaError> {
        self.stopped.store(true, Ordering::Release);
        Ok(())
    }
}
