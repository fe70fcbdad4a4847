#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use call_session::mock::{FakeMediaSource, FakePeerLink, FakePeerLinkFactory, RecordingBus, RecordingObserver};
use call_session::{
    CallSession, Identity, IceCandidate, LinkEvent, LocalIdentity, SessionConfig, SessionDescription, SignalBody,
    SignalEvent,
};
use tokio::sync::mpsc;

pub struct Harness {
    pub session: CallSession,
    pub link_events: mpsc::UnboundedReceiver<LinkEvent>,
    pub bus: Arc<RecordingBus>,
    pub links: Arc<FakePeerLinkFactory>,
    pub media: Arc<FakeMediaSource>,
    pub observer: Arc<RecordingObserver>,
}

impl Harness {
    /// Session for `id` whose username is `{id}-user`.
    pub fn new(id: &str) -> Self {
        let bus = Arc::new(RecordingBus::new());
        let links = Arc::new(FakePeerLinkFactory::new());
        let media = Arc::new(FakeMediaSource::new());
        let observer = Arc::new(RecordingObserver::new());
        let (session, link_events) = CallSession::new(
            LocalIdentity::new(id, format!("{id}-user")),
            SessionConfig::default(),
            bus.clone(),
            links.clone(),
            media.clone(),
            observer.clone(),
        );
        Self {
            session,
            link_events,
            bus,
            links,
            media,
            observer,
        }
    }

    pub async fn deliver(&self, sender: &str, receiver: Option<&str>, body: SignalBody) {
        let event = SignalEvent::new(sender.into(), receiver.map(Identity::from), body);
        self.session.handle_event(event).await;
    }

    /// Hand every queued peer link event to the session.
    pub async fn pump_link_events(&mut self) {
        while let Ok(event) = self.link_events.try_recv() {
            self.session.handle_link_event(event).await;
        }
    }

    pub fn link(&self) -> Arc<FakePeerLink> {
        self.links.last_link().expect("a peer link was created")
    }

    pub fn me(&self) -> Identity {
        self.session.identity().id.clone()
    }

    /// Drive this session into `Active` as the caller of `peer`.
    pub async fn connect_as_caller(&self, peer: &str) {
        self.session
            .start_call(peer.into(), format!("{peer}-user"))
            .await
            .expect("start call");
        self.deliver(peer, Some(self.me().as_str()), answer("v=0 answer")).await;
    }
}

pub fn call_request(sdp: &str, sender_username: &str) -> SignalBody {
    SignalBody::CallRequest {
        offer: SessionDescription::offer(sdp),
        sender_username: sender_username.to_string(),
        receiver_username: None,
    }
}

pub fn answer(sdp: &str) -> SignalBody {
    SignalBody::Answer {
        answer: SessionDescription::answer(sdp),
    }
}

pub fn candidate(name: &str) -> SignalBody {
    SignalBody::IceCandidate {
        candidate: IceCandidate::new(name, Some("0".into()), Some(0)),
    }
}

pub async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    let reached = tokio::time::timeout(Duration::from_secs(2), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(reached.is_ok(), "timed out waiting for {what}");
}
