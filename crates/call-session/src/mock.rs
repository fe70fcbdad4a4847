//! In-memory collaborators for exercising a [`crate::CallSession`] without
//! devices, a network stack or a relay.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use signal_bus::{BusError, BusResult, LocalBus, SignalBus, Subscription};
use tokio::sync::Notify;

use crate::config::IceServer;
use crate::error::{MediaError, PeerLinkError};
use crate::event::{IceCandidate, SessionDescription, SignalEvent, SignalKind};
use crate::media::{LocalMedia, MediaConstraints, MediaKind, MediaSource, MediaTrack};
use crate::notify::{CallObserver, Notice};
use crate::peer::{ConnectionState, LinkId, PeerEvent, PeerEventSink, PeerLink, PeerLinkFactory};
use crate::registry::PendingOffer;
use crate::state::CallState;

#[derive(Debug)]
pub struct FakeTrack {
    id: String,
    kind: MediaKind,
    enabled: AtomicBool,
    stopped: AtomicBool,
    fail_stop: AtomicBool,
}

impl FakeTrack {
    pub fn new(id: impl Into<String>, kind: MediaKind) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            kind,
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
            fail_stop: AtomicBool::new(false),
        })
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Make `stop` report an error (the track is still marked stopped).
    pub fn fail_stop(&self) {
        self.fail_stop.store(true, Ordering::SeqCst);
    }
}

impl MediaTrack for FakeTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn stop(&self) -> Result<(), MediaError> {
        self.stopped.store(true, Ordering::SeqCst);
        if self.fail_stop.load(Ordering::SeqCst) {
            return Err(MediaError::Unavailable(format!("{} already gone", self.id)));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct GateInner {
    entered: Notify,
    released: Notify,
}

impl GateInner {
    async fn pass(&self) {
        self.entered.notify_one();
        self.released.notified().await;
    }
}

/// Parks the next held call (media `acquire` or bus `publish`) until
/// released, so tests can act while it is outstanding.
#[derive(Debug, Clone)]
pub struct Gate(Arc<GateInner>);

impl Gate {
    /// Resolves once the held call has started waiting.
    pub async fn entered(&self) {
        self.0.entered.notified().await;
    }

    pub fn release(&self) {
        self.0.released.notify_one();
    }
}

#[derive(Debug, Default)]
pub struct FakeMediaSource {
    gate: Mutex<Option<Arc<GateInner>>>,
    fail_next: Mutex<Option<MediaError>>,
    tracks: Mutex<Vec<Arc<FakeTrack>>>,
    requests: Mutex<Vec<MediaConstraints>>,
    counter: AtomicU64,
}

impl FakeMediaSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hold(&self) -> Gate {
        let gate = Arc::new(GateInner::default());
        *self.gate.lock() = Some(gate.clone());
        Gate(gate)
    }

    pub fn fail_next(&self, err: MediaError) {
        *self.fail_next.lock() = Some(err);
    }

    /// Every track handed out so far.
    pub fn tracks(&self) -> Vec<Arc<FakeTrack>> {
        self.tracks.lock().clone()
    }

    pub fn requests(&self) -> Vec<MediaConstraints> {
        self.requests.lock().clone()
    }

    pub fn all_stopped(&self) -> bool {
        self.tracks.lock().iter().all(|track| track.is_stopped())
    }
}

#[async_trait]
impl MediaSource for FakeMediaSource {
    async fn acquire(&self, constraints: &MediaConstraints) -> Result<LocalMedia, MediaError> {
        self.requests.lock().push(constraints.clone());
        let gate = self.gate.lock().take();
        if let Some(gate) = gate {
            gate.pass().await;
        }
        if let Some(err) = self.fail_next.lock().take() {
            return Err(err);
        }

        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let mut fakes = Vec::new();
        if constraints.audio {
            fakes.push(FakeTrack::new(format!("audio-{n}"), MediaKind::Audio));
        }
        if constraints.video.is_some() {
            fakes.push(FakeTrack::new(format!("video-{n}"), MediaKind::Video));
        }
        self.tracks.lock().extend(fakes.iter().cloned());
        let tracks = fakes
            .into_iter()
            .map(|track| track as Arc<dyn MediaTrack>)
            .collect();
        Ok(LocalMedia::new(format!("stream-{n}"), tracks))
    }
}

#[derive(Debug, Clone, Default)]
struct LinkBehavior {
    failing_candidates: HashSet<String>,
    reject_remote_description: bool,
}

#[derive(Debug, Default)]
struct FakeLinkState {
    behavior: LinkBehavior,
    local_tracks: Vec<String>,
    local_description: Option<SessionDescription>,
    remote_description: Option<SessionDescription>,
    applied: Vec<IceCandidate>,
    closed: bool,
    close_calls: usize,
}

/// Records what the session asks of it. Candidates are refused until a
/// remote description is in place, like a real stack.
#[derive(Debug)]
pub struct FakePeerLink {
    id: LinkId,
    sink: Option<PeerEventSink>,
    state: Mutex<FakeLinkState>,
}

impl FakePeerLink {
    pub fn new(id: LinkId) -> Self {
        Self {
            id,
            sink: None,
            state: Mutex::new(FakeLinkState::default()),
        }
    }

    fn with_sink(sink: PeerEventSink, behavior: LinkBehavior) -> Self {
        Self {
            id: sink.link_id(),
            sink: Some(sink),
            state: Mutex::new(FakeLinkState {
                behavior,
                ..FakeLinkState::default()
            }),
        }
    }

    pub fn id(&self) -> LinkId {
        self.id
    }

    pub fn fail_candidate(&self, candidate: &str) {
        self.state
            .lock()
            .behavior
            .failing_candidates
            .insert(candidate.to_string());
    }

    /// Candidate strings applied so far, in order.
    pub fn applied_candidates(&self) -> Vec<String> {
        self.state
            .lock()
            .applied
            .iter()
            .map(|candidate| candidate.candidate.clone())
            .collect()
    }

    pub fn local_description(&self) -> Option<SessionDescription> {
        self.state.lock().local_description.clone()
    }

    pub fn remote_description(&self) -> Option<SessionDescription> {
        self.state.lock().remote_description.clone()
    }

    pub fn local_tracks(&self) -> Vec<String> {
        self.state.lock().local_tracks.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn close_calls(&self) -> usize {
        self.state.lock().close_calls
    }

    pub fn emit_local_candidate(&self, candidate: &str) -> bool {
        self.emit(PeerEvent::LocalCandidate(IceCandidate::new(
            candidate,
            Some("0".into()),
            Some(0),
        )))
    }

    pub fn emit_remote_track(&self, track: Arc<dyn MediaTrack>) -> bool {
        self.emit(PeerEvent::RemoteTrack(track))
    }

    pub fn emit_state(&self, state: ConnectionState) -> bool {
        self.emit(PeerEvent::ConnectionStateChanged(state))
    }

    fn emit(&self, event: PeerEvent) -> bool {
        self.sink.as_ref().is_some_and(|sink| sink.emit(event))
    }

    fn ensure_open(state: &FakeLinkState) -> Result<(), PeerLinkError> {
        if state.closed {
            Err(PeerLinkError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl PeerLink for FakePeerLink {
    async fn add_local_track(&self, track: Arc<dyn MediaTrack>) -> Result<(), PeerLinkError> {
        let mut state = self.state.lock();
        Self::ensure_open(&state)?;
        state.local_tracks.push(track.id().to_string());
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, PeerLinkError> {
        Self::ensure_open(&self.state.lock())?;
        Ok(SessionDescription::offer(format!("v=0 fake-offer {}", self.id)))
    }

    async fn create_answer(&self) -> Result<SessionDescription, PeerLinkError> {
        let state = self.state.lock();
        Self::ensure_open(&state)?;
        if state.remote_description.is_none() {
            return Err(PeerLinkError::InvalidDescription("no remote offer".into()));
        }
        Ok(SessionDescription::answer(format!("v=0 fake-answer {}", self.id)))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<(), PeerLinkError> {
        let mut state = self.state.lock();
        Self::ensure_open(&state)?;
        state.local_description = Some(description);
        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<(), PeerLinkError> {
        let mut state = self.state.lock();
        Self::ensure_open(&state)?;
        if state.behavior.reject_remote_description {
            return Err(PeerLinkError::InvalidDescription("malformed sdp".into()));
        }
        state.remote_description = Some(description);
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<(), PeerLinkError> {
        let mut state = self.state.lock();
        Self::ensure_open(&state)?;
        if state.remote_description.is_none() {
            return Err(PeerLinkError::InvalidCandidate("remote description not set".into()));
        }
        if state.behavior.failing_candidates.contains(&candidate.candidate) {
            return Err(PeerLinkError::InvalidCandidate(candidate.candidate));
        }
        state.applied.push(candidate);
        Ok(())
    }

    async fn close(&self) -> Result<(), PeerLinkError> {
        let mut state = self.state.lock();
        state.closed = true;
        state.close_calls += 1;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct FakePeerLinkFactory {
    links: Mutex<Vec<Arc<FakePeerLink>>>,
    behavior: Mutex<LinkBehavior>,
    fail_next: Mutex<Option<PeerLinkError>>,
    ice_servers: Mutex<Vec<IceServer>>,
}

impl FakePeerLinkFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn links(&self) -> Vec<Arc<FakePeerLink>> {
        self.links.lock().clone()
    }

    pub fn last_link(&self) -> Option<Arc<FakePeerLink>> {
        self.links.lock().last().cloned()
    }

    pub fn fail_next(&self, err: PeerLinkError) {
        *self.fail_next.lock() = Some(err);
    }

    /// Links created from now on reject this candidate.
    pub fn fail_candidate(&self, candidate: &str) {
        self.behavior
            .lock()
            .failing_candidates
            .insert(candidate.to_string());
    }

    /// Links created from now on reject every remote description.
    pub fn reject_remote_descriptions(&self) {
        self.behavior.lock().reject_remote_description = true;
    }

    /// ICE servers passed to the most recent `create`.
    pub fn last_ice_servers(&self) -> Vec<IceServer> {
        self.ice_servers.lock().clone()
    }
}

#[async_trait]
impl PeerLinkFactory for FakePeerLinkFactory {
    async fn create(
        &self,
        ice_servers: &[IceServer],
        events: PeerEventSink,
    ) -> Result<Arc<dyn PeerLink>, PeerLinkError> {
        if let Some(err) = self.fail_next.lock().take() {
            return Err(err);
        }
        *self.ice_servers.lock() = ice_servers.to_vec();
        let behavior = self.behavior.lock().clone();
        let link = Arc::new(FakePeerLink::with_sink(events, behavior));
        self.links.lock().push(link.clone());
        Ok(link)
    }
}

#[derive(Debug, Default)]
pub struct RecordingObserver {
    states: Mutex<Vec<CallState>>,
    notices: Mutex<Vec<Notice>>,
    incoming: Mutex<Vec<Vec<PendingOffer>>>,
    remote_tracks: Mutex<Vec<String>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn states(&self) -> Vec<CallState> {
        self.states.lock().clone()
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().clone()
    }

    pub fn has_notice(&self, predicate: impl Fn(&Notice) -> bool) -> bool {
        self.notices.lock().iter().any(predicate)
    }

    /// The most recent pending-offer snapshot, as a storage mirror would see it.
    pub fn last_incoming(&self) -> Option<Vec<PendingOffer>> {
        self.incoming.lock().last().cloned()
    }

    pub fn remote_tracks(&self) -> Vec<String> {
        self.remote_tracks.lock().clone()
    }
}

impl CallObserver for RecordingObserver {
    fn on_state_changed(&self, state: &CallState) {
        self.states.lock().push(state.clone());
    }

    fn on_incoming_calls_changed(&self, pending: &[PendingOffer]) {
        self.incoming.lock().push(pending.to_vec());
    }

    fn on_notice(&self, notice: &Notice) {
        self.notices.lock().push(notice.clone());
    }

    fn on_remote_track(&self, track: &Arc<dyn MediaTrack>) {
        self.remote_tracks.lock().push(track.id().to_string());
    }
}

/// [`LocalBus`] wrapper that keeps a decoded copy of everything published
/// and can be told to fail or hold publishes.
#[derive(Debug, Default)]
pub struct RecordingBus {
    inner: LocalBus,
    published: Mutex<Vec<SignalEvent>>,
    fail_publish: AtomicBool,
    gate: Mutex<Option<Arc<GateInner>>>,
}

impl RecordingBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn local(&self) -> &LocalBus {
        &self.inner
    }

    pub fn published(&self) -> Vec<SignalEvent> {
        self.published.lock().clone()
    }

    pub fn published_kinds(&self) -> Vec<SignalKind> {
        self.published.lock().iter().map(SignalEvent::kind).collect()
    }

    pub fn fail_publishes(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.published.lock().clear();
    }

    /// Park the next publish after it has been recorded.
    pub fn hold_next_publish(&self) -> Gate {
        let gate = Arc::new(GateInner::default());
        *self.gate.lock() = Some(gate.clone());
        Gate(gate)
    }
}

#[async_trait]
impl SignalBus for RecordingBus {
    fn subscribe(&self, topic: &str) -> Subscription {
        self.inner.subscribe(topic)
    }

    async fn publish(&self, topic: &str, payload: Bytes) -> BusResult<()> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(BusError::Transport("relay unreachable".into()));
        }
        if let Ok(event) = SignalEvent::decode(&payload) {
            self.published.lock().push(event);
        }
        let gate = self.gate.lock().take();
        if let Some(gate) = gate {
            gate.pass().await;
        }
        self.inner.publish(topic, payload).await
    }

    fn unsubscribe(&self, subscription: Subscription) {
        self.inner.unsubscribe(subscription);
    }
}
