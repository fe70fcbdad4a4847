use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use signal_bus::SignalBus;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::config::SessionConfig;
use crate::error::CallError;
use crate::event::{Identity, IceCandidate, SessionDescription, SignalBody, SignalEvent};
use crate::ice_queue::IceCandidateQueue;
use crate::media::{LocalMedia, MediaKind, MediaSource, MediaTrack, RemoteMedia};
use crate::notify::{CallObserver, Notice};
use crate::peer::{ConnectionState, LinkEvent, LinkId, PeerEvent, PeerEventSink, PeerLink, PeerLinkFactory};
use crate::registry::{IncomingCallRegistry, OfferKey, PendingOffer, SettledOffers};
use crate::state::CallState;

/// Who this session speaks for on the signaling channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalIdentity {
    pub id: Identity,
    /// Sent as `senderUsername` on outgoing call requests.
    pub username: String,
}

impl LocalIdentity {
    pub fn new(id: impl Into<Identity>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
        }
    }
}

#[derive(Debug, Clone)]
enum Phase {
    Idle,
    Calling {
        target: Identity,
        label: String,
        /// Set once the local offer exists; a cancel carries it.
        offer: Option<SessionDescription>,
    },
    Negotiating {
        peer: Identity,
        accepting: Option<OfferKey>,
    },
    Active {
        peer: Identity,
        accepted: Option<OfferKey>,
    },
}

impl Phase {
    fn is_busy(&self) -> bool {
        !matches!(self, Phase::Idle)
    }

    fn peer(&self) -> Option<&Identity> {
        match self {
            Phase::Idle => None,
            Phase::Calling { target, .. } => Some(target),
            Phase::Negotiating { peer, .. } | Phase::Active { peer, .. } => Some(peer),
        }
    }

    /// The inbound offer this call was set up from, if any.
    fn inbound_key(&self) -> Option<&OfferKey> {
        match self {
            Phase::Negotiating { accepting, .. } => accepting.as_ref(),
            Phase::Active { accepted, .. } => accepted.as_ref(),
            Phase::Idle | Phase::Calling { .. } => None,
        }
    }
}

struct LinkSlot {
    id: LinkId,
    peer: Identity,
    link: Arc<dyn PeerLink>,
    remote_description_set: bool,
    candidates: IceCandidateQueue,
    /// Local candidates are held back until the peer knows about the call.
    announced: bool,
    outbound: Vec<IceCandidate>,
}

impl LinkSlot {
    fn new(id: LinkId, peer: Identity, link: Arc<dyn PeerLink>, announced: bool) -> Self {
        Self {
            id,
            peer,
            link,
            remote_description_set: false,
            candidates: IceCandidateQueue::new(),
            announced,
            outbound: Vec::new(),
        }
    }
}

struct SessionState {
    phase: Phase,
    /// Bumped whenever a call attempt starts or ends. Async continuations
    /// compare against the value they started with.
    epoch: u64,
    link: Option<LinkSlot>,
    local_media: Option<LocalMedia>,
    remote_media: RemoteMedia,
    registry: IncomingCallRegistry,
    settled: SettledOffers,
}

impl SessionState {
    fn new() -> Self {
        Self {
            phase: Phase::Idle,
            epoch: 0,
            link: None,
            local_media: None,
            remote_media: RemoteMedia::default(),
            registry: IncomingCallRegistry::new(),
            settled: SettledOffers::default(),
        }
    }

    fn call_state(&self) -> CallState {
        match &self.phase {
            Phase::Idle if self.registry.is_empty() => CallState::Idle,
            Phase::Idle => CallState::RingingLocal {
                pending: self.registry.len(),
            },
            Phase::Calling { target, label, .. } => CallState::Calling {
                target: target.clone(),
                label: label.clone(),
            },
            Phase::Negotiating { peer, .. } => CallState::Negotiating { peer: peer.clone() },
            Phase::Active { peer, .. } => CallState::Active { peer: peer.clone() },
        }
    }

    fn begin(&mut self, phase: Phase) -> u64 {
        self.epoch += 1;
        self.phase = phase;
        self.epoch
    }

    /// Return to idle, handing back everything that still has to be released.
    fn reset(&mut self) -> Released {
        self.epoch += 1;
        self.phase = Phase::Idle;
        Released {
            link: self.link.take().map(|slot| slot.link),
            local_media: self.local_media.take(),
            remote_media: std::mem::take(&mut self.remote_media),
        }
    }

    fn current_link(&mut self, link_id: LinkId) -> Option<&mut LinkSlot> {
        self.link.as_mut().filter(|slot| slot.id == link_id)
    }
}

/// Resources detached from the session state, released outside the lock.
struct Released {
    link: Option<Arc<dyn PeerLink>>,
    local_media: Option<LocalMedia>,
    remote_media: RemoteMedia,
}

impl Released {
    /// Every step is attempted; failures are logged.
    async fn release(self) {
        if let Some(media) = self.local_media {
            for err in media.stop() {
                warn!(target = "call.session", error = %err, "failed to stop local track");
            }
        }
        for err in self.remote_media.stop() {
            warn!(target = "call.session", error = %err, "failed to stop remote track");
        }
        if let Some(link) = self.link {
            close_quietly(link.as_ref()).await;
        }
    }
}

async fn close_quietly(link: &dyn PeerLink) {
    if let Err(err) = link.close().await {
        warn!(target = "call.session", error = %err, "failed to close peer link");
    }
}

fn discard_media(media: LocalMedia) {
    for err in media.stop() {
        warn!(target = "call.session", error = %err, "failed to stop unused local track");
    }
}

struct Inner {
    identity: LocalIdentity,
    config: SessionConfig,
    bus: Arc<dyn SignalBus>,
    links: Arc<dyn PeerLinkFactory>,
    media: Arc<dyn MediaSource>,
    observer: Arc<dyn CallObserver>,
    link_events: mpsc::UnboundedSender<LinkEvent>,
    next_link_id: AtomicU64,
    state: Mutex<SessionState>,
}

/// Signaling state machine for one identity.
///
/// UI-facing operations (`start_call`, `accept_offer`, ...) can be called
/// from any task. Inbound signals and peer link events are fed in through
/// [`CallSession::handle_event`] and [`CallSession::handle_link_event`],
/// normally by a [`crate::CallDriver`]. The state lock is never held across
/// an await; every continuation re-checks the epoch it started under.
#[derive(Clone)]
pub struct CallSession {
    inner: Arc<Inner>,
}

impl fmt::Debug for CallSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallSession")
            .field("identity", &self.inner.identity.id)
            .field("state", &self.state())
            .finish()
    }
}

impl CallSession {
    /// Returns the session plus the receiver its peer links report into;
    /// hand both to [`crate::CallDriver::spawn`].
    pub fn new(
        identity: LocalIdentity,
        config: SessionConfig,
        bus: Arc<dyn SignalBus>,
        links: Arc<dyn PeerLinkFactory>,
        media: Arc<dyn MediaSource>,
        observer: Arc<dyn CallObserver>,
    ) -> (Self, mpsc::UnboundedReceiver<LinkEvent>) {
        let (link_events, link_rx) = mpsc::unbounded_channel();
        let session = Self {
            inner: Arc::new(Inner {
                identity,
                config,
                bus,
                links,
                media,
                observer,
                link_events,
                next_link_id: AtomicU64::new(0),
                state: Mutex::new(SessionState::new()),
            }),
        };
        (session, link_rx)
    }

    pub fn identity(&self) -> &LocalIdentity {
        &self.inner.identity
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn bus(&self) -> Arc<dyn SignalBus> {
        self.inner.bus.clone()
    }

    pub fn state(&self) -> CallState {
        self.inner.state.lock().call_state()
    }

    pub fn pending_offers(&self) -> Vec<PendingOffer> {
        self.inner.state.lock().registry.snapshot()
    }

    pub fn local_media(&self) -> Option<LocalMedia> {
        self.inner.state.lock().local_media.clone()
    }

    pub fn remote_media(&self) -> RemoteMedia {
        self.inner.state.lock().remote_media.clone()
    }

    /// Mute or unmute the microphone. Returns false when no audio track is live.
    pub fn set_local_audio_enabled(&self, enabled: bool) -> bool {
        self.toggle_local(MediaKind::Audio, enabled)
    }

    pub fn set_local_video_enabled(&self, enabled: bool) -> bool {
        self.toggle_local(MediaKind::Video, enabled)
    }

    fn toggle_local(&self, kind: MediaKind, enabled: bool) -> bool {
        let media = self.local_media();
        let touched = media.map(|media| media.set_enabled(kind, enabled)).unwrap_or(0);
        debug!(target = "call.session", %kind, enabled, touched, "local media toggled");
        touched > 0
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        f(&mut self.inner.state.lock())
    }

    fn me(&self) -> &Identity {
        &self.inner.identity.id
    }

    /// Place an outgoing call to `target`. Refused while another call is
    /// being placed or is connected.
    pub async fn start_call(&self, target: Identity, label: impl Into<String>) -> Result<(), CallError> {
        let label = label.into();
        let begun = self.with_state(|st| {
            if st.phase.is_busy() {
                return Err(CallError::DuplicateCall {
                    state: st.call_state(),
                });
            }
            Ok(st.begin(Phase::Calling {
                target: target.clone(),
                label: label.clone(),
                offer: None,
            }))
        });
        let epoch = match begun {
            Ok(epoch) => epoch,
            Err(err) => return Err(self.refuse(err)),
        };
        info!(target = "call.session", to = %target, %label, "placing call");
        self.emit_state();

        match self.place_call(epoch, &target, &label).await {
            Ok(()) => Ok(()),
            Err(err) => Err(self.abandon_setup(epoch, err).await),
        }
    }

    async fn place_call(&self, epoch: u64, target: &Identity, label: &str) -> Result<(), CallError> {
        let link = self.open_link(epoch, target, false).await?;
        let media = self.inner.media.acquire(&self.inner.config.caller_media).await?;
        let tracks = self.adopt_media(epoch, media)?;
        for track in tracks {
            link.add_local_track(track).await.map_err(CallError::Negotiation)?;
        }
        let offer = link.create_offer().await.map_err(CallError::Negotiation)?;
        link.set_local_description(offer.clone())
            .await
            .map_err(CallError::Negotiation)?;

        self.with_state(|st| {
            if st.epoch != epoch {
                return Err(CallError::SetupAborted);
            }
            if let Phase::Calling { offer: recorded, .. } = &mut st.phase {
                *recorded = Some(offer.clone());
            }
            Ok(())
        })?;

        self.publish_to(
            target,
            SignalBody::CallRequest {
                offer,
                sender_username: self.inner.identity.username.clone(),
                receiver_username: Some(label.to_string()),
            },
        )
        .await;
        self.announce(epoch).await;
        self.ensure_current(epoch)?;
        self.notify(Notice::Calling {
            label: label.to_string(),
        });
        Ok(())
    }

    /// Answer a pending inbound offer.
    pub async fn accept_offer(&self, offer: &PendingOffer) -> Result<(), CallError> {
        let key = offer.key();
        let begun = self.with_state(|st| {
            if st.phase.is_busy() {
                return Err(CallError::DuplicateCall {
                    state: st.call_state(),
                });
            }
            let Some(pending) = st.registry.get(&key).map(|entry| entry.offer.clone()) else {
                return Err(CallError::UnknownOffer {
                    sender: key.sender_id.clone(),
                });
            };
            let epoch = st.begin(Phase::Negotiating {
                peer: key.sender_id.clone(),
                accepting: Some(key.clone()),
            });
            Ok((epoch, pending))
        });
        let (epoch, description) = match begun {
            Ok(begun) => begun,
            Err(err) => return Err(self.refuse(err)),
        };
        info!(target = "call.session", from = %key.sender_id, "accepting call");
        self.emit_state();

        match self.answer_offer(epoch, &key, description).await {
            Ok(()) => Ok(()),
            Err(err) => Err(self.abandon_setup(epoch, err).await),
        }
    }

    async fn answer_offer(&self, epoch: u64, key: &OfferKey, offer: SessionDescription) -> Result<(), CallError> {
        let peer = &key.sender_id;
        let link = self.open_link(epoch, peer, true).await?;
        let media = self.inner.media.acquire(&self.inner.config.callee_media).await?;
        let tracks = self.claim_offer(epoch, key, media)?;
        self.emit_incoming();

        for track in tracks {
            link.add_local_track(track).await.map_err(CallError::Negotiation)?;
        }
        link.set_remote_description(offer)
            .await
            .map_err(CallError::DescriptionApply)?;
        self.drain_candidates(epoch, link.as_ref()).await?;

        let answer = link.create_answer().await.map_err(CallError::Negotiation)?;
        link.set_local_description(answer.clone())
            .await
            .map_err(CallError::Negotiation)?;
        self.ensure_current(epoch)?;
        self.publish_to(peer, SignalBody::Answer { answer }).await;
        self.activate(epoch, peer, Some(key.clone()))
    }

    /// Decline a pending inbound offer and tell its sender.
    pub async fn reject_call(&self, offer: &PendingOffer) -> Result<(), CallError> {
        let key = offer.key();
        let removed = self.with_state(|st| {
            let removed = st.registry.remove_key(&key)?;
            st.settled.settle(key.clone());
            Some(removed)
        });
        let Some(removed) = removed else {
            return Err(self.refuse(CallError::UnknownOffer {
                sender: key.sender_id,
            }));
        };
        info!(target = "call.session", from = %removed.sender_id, "rejecting call");
        self.emit_incoming();
        self.emit_state();
        self.publish_to(
            &removed.sender_id,
            SignalBody::CallRejected {
                offer: Some(removed.offer.clone()),
            },
        )
        .await;
        self.notify(Notice::CallDeclined {
            caller: removed.sender_username,
        });
        Ok(())
    }

    /// Hang up. Cancels an outgoing call that has not been answered yet and
    /// does nothing when there is no call.
    pub async fn end_call(&self) -> Result<(), CallError> {
        enum Ending {
            Nothing,
            Cancel,
            Hangup(Identity, Released),
            /// Callee hung up before its answer settled the call.
            Decline {
                peer: Identity,
                offer: SessionDescription,
                withdrawn: bool,
                released: Released,
            },
        }

        let ending = self.with_state(|st| match &st.phase {
            Phase::Idle => Ending::Nothing,
            Phase::Calling { .. } => Ending::Cancel,
            Phase::Negotiating {
                peer,
                accepting: Some(key),
            } => {
                let (peer, key) = (peer.clone(), key.clone());
                let withdrawn = st.registry.remove_key(&key).is_some();
                st.settled.settle(key.clone());
                Ending::Decline {
                    peer,
                    offer: SessionDescription::offer(key.sdp),
                    withdrawn,
                    released: st.reset(),
                }
            }
            Phase::Negotiating { peer, .. } | Phase::Active { peer, .. } => {
                let peer = peer.clone();
                Ending::Hangup(peer, st.reset())
            }
        });

        match ending {
            Ending::Nothing => {
                debug!(target = "call.session", "end_call with no call in progress");
                Ok(())
            }
            Ending::Cancel => self.end_call_by_caller().await,
            Ending::Hangup(peer, released) => {
                info!(target = "call.session", with = %peer, "ending call");
                self.emit_state();
                self.publish_to(&peer, SignalBody::CallEnded).await;
                released.release().await;
                self.notify(Notice::CallEnded);
                Ok(())
            }
            Ending::Decline {
                peer,
                offer,
                withdrawn,
                released,
            } => {
                info!(target = "call.session", with = %peer, "ending call before it was answered");
                if withdrawn {
                    self.emit_incoming();
                }
                self.emit_state();
                // The caller may still be ringing; only a rejection reaches it there.
                self.publish_to(&peer, SignalBody::CallRejected { offer: Some(offer) })
                    .await;
                released.release().await;
                self.notify(Notice::CallEnded);
                Ok(())
            }
        }
    }

    /// Withdraw an outgoing call before it is answered.
    pub async fn end_call_by_caller(&self) -> Result<(), CallError> {
        let cancelled = self.with_state(|st| match &st.phase {
            Phase::Calling { target, offer, .. } => {
                let (target, offer) = (target.clone(), offer.clone());
                Some((target, offer, st.reset()))
            }
            _ => None,
        });
        let Some((target, offer, released)) = cancelled else {
            return Err(self.refuse(CallError::NotCalling));
        };

        info!(target = "call.session", to = %target, "cancelling outgoing call");
        self.emit_state();
        // Without an offer the request never went out.
        if offer.is_some() {
            self.publish_to(&target, SignalBody::CallCancelled { offer }).await;
        }
        released.release().await;
        self.notify(Notice::CallCancelled);
        Ok(())
    }

    /// Decode and handle one payload from the signaling channel.
    pub async fn handle_payload(&self, payload: &[u8]) {
        match SignalEvent::decode(payload) {
            Ok(event) => self.handle_event(event).await,
            Err(err) => warn!(target = "call.session", error = %err, "dropping malformed signal"),
        }
    }

    pub async fn handle_event(&self, event: SignalEvent) {
        if event.is_from(self.me()) {
            trace!(target = "call.session", kind = %event.kind(), "ignoring own signal");
            return;
        }
        let reaches = event.reaches(self.me());
        let addressed = event.is_addressed_to(self.me());
        let kind = event.kind();
        let sender = event.sender_id;
        debug!(target = "call.session", %kind, from = %sender, "signal received");

        match event.body {
            SignalBody::CallRequest {
                offer, sender_username, ..
            } if reaches => self.on_call_request(sender, sender_username, offer),
            SignalBody::Offer { offer, sender_username } if reaches => {
                let username = sender_username.unwrap_or_else(|| sender.to_string());
                self.on_call_request(sender, username, offer)
            }
            SignalBody::Answer { answer } if reaches => self.on_answer(sender, answer).await,
            SignalBody::IceCandidate { candidate } if reaches => self.on_remote_candidate(sender, candidate).await,
            SignalBody::CallCancelled { offer } if reaches => self.on_call_cancelled(sender, offer).await,
            SignalBody::CallRejected { .. } if addressed => self.on_call_rejected(sender).await,
            SignalBody::CallEnded if addressed => self.on_call_ended(sender).await,
            _ => trace!(target = "call.session", %kind, from = %sender, "signal not addressed to us"),
        }
    }

    fn on_call_request(&self, sender: Identity, username: String, offer: SessionDescription) {
        let pending = PendingOffer::new(sender, username.clone(), offer);
        let key = pending.key();
        let added = self.with_state(|st| {
            // A redelivered request for a call we already took or settled.
            if st.phase.inbound_key() == Some(&key) || st.settled.contains(&key) {
                return false;
            }
            st.registry.add(pending)
        });
        if !added {
            debug!(target = "call.session", from = %key.sender_id, "duplicate call request ignored");
            return;
        }
        info!(target = "call.session", from = %key.sender_id, %username, "incoming call");
        self.emit_incoming();
        self.emit_state();
        self.notify(Notice::IncomingCall { from: username });
    }

    async fn on_answer(&self, sender: Identity, answer: SessionDescription) {
        let begun = self.with_state(|st| {
            let expected = matches!(
                &st.phase,
                Phase::Calling { target, offer: Some(_), .. } if *target == sender
            );
            if !expected {
                return None;
            }
            let link = st.link.as_ref()?.link.clone();
            st.phase = Phase::Negotiating {
                peer: sender.clone(),
                accepting: None,
            };
            Some((st.epoch, link))
        });
        let Some((epoch, link)) = begun else {
            debug!(target = "call.session", from = %sender, "ignoring unexpected answer");
            return;
        };
        self.emit_state();

        let applied = async {
            link.set_remote_description(answer)
                .await
                .map_err(CallError::DescriptionApply)?;
            self.drain_candidates(epoch, link.as_ref()).await?;
            self.activate(epoch, &sender, None)
        }
        .await;
        if let Err(err) = applied {
            self.abandon_setup(epoch, err).await;
        }
    }

    async fn on_remote_candidate(&self, sender: Identity, candidate: IceCandidate) {
        enum Route {
            Apply(Arc<dyn PeerLink>),
            Queued,
            Stashed,
            Dropped,
        }

        let route = self.with_state(|st| {
            if let Some(slot) = st.link.as_mut().filter(|slot| slot.peer == sender) {
                if slot.remote_description_set {
                    return Route::Apply(slot.link.clone());
                }
                slot.candidates.enqueue(candidate.clone());
                return Route::Queued;
            }
            if st.registry.stash_candidate(&sender, candidate.clone()) {
                Route::Stashed
            } else {
                Route::Dropped
            }
        });

        match route {
            Route::Apply(link) => {
                if let Err(err) = link.add_remote_candidate(candidate).await {
                    warn!(target = "call.session", from = %sender, error = %err, "remote candidate rejected");
                    self.notify(Notice::Failure(CallError::CandidateApply(err)));
                }
            }
            Route::Queued => trace!(target = "call.session", from = %sender, "candidate queued"),
            Route::Stashed => trace!(target = "call.session", from = %sender, "candidate stashed on pending offer"),
            Route::Dropped => debug!(target = "call.session", from = %sender, "candidate for no known call dropped"),
        }
    }

    async fn on_call_cancelled(&self, sender: Identity, offer: Option<SessionDescription>) {
        let (removed, released) = self.with_state(|st| {
            let removed = match &offer {
                Some(offer) => st.registry.remove(&sender, &offer.sdp).into_iter().collect(),
                None => st.registry.remove_from(&sender),
            };
            for pending in &removed {
                st.settled.settle(pending.key());
            }
            // Settled even when the request has not arrived yet.
            if let Some(offer) = &offer {
                st.settled.settle(OfferKey::new(sender.clone(), offer.sdp.clone()));
            }
            let removed = removed.len();
            let aborts = st.phase.inbound_key().is_some_and(|key| {
                key.sender_id == sender && offer.as_ref().is_none_or(|offer| offer.sdp == key.sdp)
            });
            (removed, aborts.then(|| st.reset()))
        });
        if removed == 0 && released.is_none() {
            debug!(target = "call.session", from = %sender, "cancel for unknown call ignored");
            return;
        }

        info!(target = "call.session", from = %sender, "caller cancelled");
        if removed > 0 {
            self.emit_incoming();
        }
        self.emit_state();
        if let Some(released) = released {
            released.release().await;
        }
        self.notify(Notice::CallCancelledByCaller { from: sender });
    }

    async fn on_call_rejected(&self, sender: Identity) {
        let released = self.with_state(|st| {
            let from_peer = st.phase.peer() == Some(&sender);
            from_peer.then(|| st.reset())
        });
        let Some(released) = released else {
            debug!(target = "call.session", from = %sender, "rejection from non-peer ignored");
            return;
        };
        info!(target = "call.session", from = %sender, "call rejected");
        self.emit_state();
        released.release().await;
        self.notify(Notice::CallRejected { by: sender });
    }

    async fn on_call_ended(&self, sender: Identity) {
        let released = self.with_state(|st| {
            let connected = matches!(st.phase, Phase::Negotiating { .. } | Phase::Active { .. });
            let from_peer = st.phase.peer() == Some(&sender);
            (connected && from_peer).then(|| st.reset())
        });
        let Some(released) = released else {
            debug!(target = "call.session", from = %sender, "hangup from non-peer ignored");
            return;
        };
        info!(target = "call.session", from = %sender, "remote hung up");
        self.emit_state();
        released.release().await;
        self.notify(Notice::RemoteHangup { by: sender });
    }

    /// Handle an event reported by one of this session's peer links.
    pub async fn handle_link_event(&self, event: LinkEvent) {
        let LinkEvent { link_id, event } = event;
        match event {
            PeerEvent::LocalCandidate(candidate) => {
                let peer = self.with_state(|st| {
                    let slot = st.current_link(link_id)?;
                    if slot.announced {
                        Some(slot.peer.clone())
                    } else {
                        slot.outbound.push(candidate.clone());
                        None
                    }
                });
                if let Some(peer) = peer {
                    self.publish_to(&peer, SignalBody::IceCandidate { candidate }).await;
                }
            }
            PeerEvent::RemoteTrack(track) => {
                let attached = self.with_state(|st| {
                    st.current_link(link_id).is_some() && st.remote_media.attach(track.clone())
                });
                if attached {
                    debug!(target = "call.session", link_id, track = track.id(), kind = %track.kind(), "remote track");
                    self.inner.observer.on_remote_track(&track);
                } else {
                    trace!(target = "call.session", link_id, "remote track for stale link ignored");
                }
            }
            PeerEvent::ConnectionStateChanged(state) => {
                let current = self.with_state(|st| st.current_link(link_id).is_some());
                if !current {
                    trace!(target = "call.session", link_id, ?state, "state change for stale link ignored");
                    return;
                }
                debug!(target = "call.session", link_id, ?state, "peer connection state");
                match state {
                    ConnectionState::Disconnected => self.notify(Notice::ConnectionInterrupted),
                    ConnectionState::Failed => self.notify(Notice::ConnectionFailed),
                    ConnectionState::New
                    | ConnectionState::Connecting
                    | ConnectionState::Connected
                    | ConnectionState::Closed => {}
                }
            }
        }
    }

    async fn open_link(&self, epoch: u64, peer: &Identity, announced: bool) -> Result<Arc<dyn PeerLink>, CallError> {
        let link_id = self.inner.next_link_id.fetch_add(1, Ordering::Relaxed) + 1;
        let sink = PeerEventSink::new(link_id, self.inner.link_events.clone());
        let link = self
            .inner
            .links
            .create(&self.inner.config.ice_servers, sink)
            .await
            .map_err(CallError::PeerLink)?;

        let adopted = self.with_state(|st| {
            if st.epoch != epoch {
                return false;
            }
            st.link = Some(LinkSlot::new(link_id, peer.clone(), link.clone(), announced));
            true
        });
        if !adopted {
            close_quietly(link.as_ref()).await;
            return Err(CallError::SetupAborted);
        }
        debug!(target = "call.session", link_id, %peer, "peer link opened");
        Ok(link)
    }

    fn adopt_media(&self, epoch: u64, media: LocalMedia) -> Result<Vec<Arc<dyn MediaTrack>>, CallError> {
        let adopted = self.with_state(|st| {
            if st.epoch != epoch {
                return Err(media);
            }
            let tracks = media.tracks.clone();
            st.local_media = Some(media);
            Ok(tracks)
        });
        adopted.map_err(|media| {
            discard_media(media);
            CallError::SetupAborted
        })
    }

    /// Take ownership of `media` and remove the offer being answered from the
    /// registry. Fails if either the attempt or the offer went away while
    /// media was being acquired.
    fn claim_offer(
        &self,
        epoch: u64,
        key: &OfferKey,
        media: LocalMedia,
    ) -> Result<Vec<Arc<dyn MediaTrack>>, CallError> {
        let claimed = self.with_state(|st| {
            if st.epoch != epoch {
                return Err(media);
            }
            let Some(mut offer) = st.registry.remove_key(key) else {
                return Err(media);
            };
            st.settled.settle(key.clone());
            let early = offer.take_early_candidates();
            if let Some(slot) = st.link.as_mut() {
                slot.candidates.prepend_earlier(early);
            }
            let tracks = media.tracks.clone();
            st.local_media = Some(media);
            Ok(tracks)
        });
        claimed.map_err(|media| {
            debug!(target = "call.session", from = %key.sender_id, "offer withdrawn during setup");
            discard_media(media);
            CallError::SetupAborted
        })
    }

    /// Flush queued remote candidates into `link`. Candidates arriving while
    /// a batch is applied are queued and picked up by the next pass, so the
    /// link sees them in arrival order.
    async fn drain_candidates(&self, epoch: u64, link: &dyn PeerLink) -> Result<(), CallError> {
        loop {
            let batch = self.with_state(|st| {
                if st.epoch != epoch {
                    return Err(CallError::SetupAborted);
                }
                let slot = st.link.as_mut().ok_or(CallError::SetupAborted)?;
                if slot.candidates.is_empty() {
                    slot.remote_description_set = true;
                    return Ok(None);
                }
                Ok(Some(slot.candidates.take()))
            })?;
            let Some(mut batch) = batch else {
                return Ok(());
            };
            let report = batch.drain_into(link).await;
            debug!(
                target = "call.session",
                applied = report.applied,
                failed = report.failures.len(),
                "queued candidates drained"
            );
            for (candidate, err) in report.failures {
                warn!(target = "call.session", candidate = %candidate.candidate, error = %err, "queued candidate rejected");
                self.notify(Notice::Failure(CallError::CandidateApply(err)));
            }
        }
    }

    fn activate(&self, epoch: u64, peer: &Identity, accepted: Option<OfferKey>) -> Result<(), CallError> {
        self.with_state(|st| {
            if st.epoch != epoch {
                return Err(CallError::SetupAborted);
            }
            st.phase = Phase::Active {
                peer: peer.clone(),
                accepted,
            };
            Ok(())
        })?;
        info!(target = "call.session", with = %peer, "call connected");
        self.emit_state();
        self.notify(Notice::CallConnected { peer: peer.clone() });
        Ok(())
    }

    fn ensure_current(&self, epoch: u64) -> Result<(), CallError> {
        if self.with_state(|st| st.epoch == epoch) {
            Ok(())
        } else {
            Err(CallError::SetupAborted)
        }
    }

    /// Publish local candidates gathered before the call request went out.
    async fn announce(&self, epoch: u64) {
        let flushed = self.with_state(|st| {
            if st.epoch != epoch {
                return None;
            }
            let slot = st.link.as_mut()?;
            slot.announced = true;
            Some((slot.peer.clone(), std::mem::take(&mut slot.outbound)))
        });
        let Some((peer, outbound)) = flushed else {
            return;
        };
        for candidate in outbound {
            self.publish_to(&peer, SignalBody::IceCandidate { candidate }).await;
        }
    }

    /// Unwind a failed setup. Only the attempt that still owns the session
    /// tears it down; a superseded one reports `SetupAborted`.
    async fn abandon_setup(&self, epoch: u64, err: CallError) -> CallError {
        let released = self.with_state(|st| (st.epoch == epoch).then(|| st.reset()));
        let Some(released) = released else {
            debug!(target = "call.session", error = %err, "superseded setup unwound");
            return CallError::SetupAborted;
        };
        warn!(target = "call.session", error = %err, "call setup failed");
        self.emit_state();
        released.release().await;
        if err.is_reportable() {
            self.notify(Notice::Failure(err.clone()));
        }
        err
    }

    /// Report an operation refused before it changed anything.
    fn refuse(&self, err: CallError) -> CallError {
        warn!(target = "call.session", error = %err, "call operation refused");
        self.notify(Notice::Failure(err.clone()));
        err
    }

    async fn publish_to(&self, peer: &Identity, body: SignalBody) {
        let event = SignalEvent::new(self.me().clone(), Some(peer.clone()), body);
        let kind = event.kind();
        let published = match event.encode() {
            Ok(payload) => self
                .inner
                .bus
                .publish(&self.inner.config.channel, payload)
                .await
                .map_err(|err| CallError::SignalPublish {
                    event: kind,
                    reason: err.to_string(),
                }),
            Err(err) => Err(err),
        };
        match published {
            Ok(()) => trace!(target = "call.session", %kind, to = %peer, "signal published"),
            Err(err) => {
                warn!(target = "call.session", %kind, to = %peer, error = %err, "signal publish failed");
                self.notify(Notice::Failure(err));
            }
        }
    }

    fn emit_state(&self) {
        let state = self.state();
        self.inner.observer.on_state_changed(&state);
    }

    fn emit_incoming(&self) {
        let pending = self.pending_offers();
        self.inner.observer.on_incoming_calls_changed(&pending);
    }

    fn notify(&self, notice: Notice) {
        self.inner.observer.on_notice(&notice);
    }
}
