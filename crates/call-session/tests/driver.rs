mod common;

use std::sync::Arc;

use bytes::Bytes;
use call_session::mock::{FakeMediaSource, FakePeerLinkFactory, RecordingObserver};
use call_session::{CallDriver, CallSession, CallState, LocalIdentity, Notice, SessionConfig};
use common::eventually;
use signal_bus::{LocalBus, SignalBus};

struct Party {
    session: CallSession,
    driver: CallDriver,
    links: Arc<FakePeerLinkFactory>,
    observer: Arc<RecordingObserver>,
}

fn party(bus: &Arc<LocalBus>, id: &str, username: &str) -> Party {
    let links = Arc::new(FakePeerLinkFactory::new());
    let observer = Arc::new(RecordingObserver::new());
    let (session, link_events) = CallSession::new(
        LocalIdentity::new(id, username),
        SessionConfig::default(),
        bus.clone(),
        links.clone(),
        Arc::new(FakeMediaSource::new()),
        observer.clone(),
    );
    let driver = CallDriver::spawn(session.clone(), link_events);
    Party {
        session,
        driver,
        links,
        observer,
    }
}

#[tokio::test]
async fn two_sessions_complete_a_call_over_the_bus() {
    let bus = Arc::new(LocalBus::new());
    let alice = party(&bus, "A", "alice");
    let bob = party(&bus, "B", "bob");
    let channel = alice.session.config().channel.clone();
    assert_eq!(bus.subscriber_count(&channel), 2);

    alice.session.start_call("B".into(), "bob").await.expect("start call");
    eventually("bob to ring", || bob.session.pending_offers().len() == 1).await;
    assert!(bob.observer.has_notice(|n| *n == Notice::IncomingCall { from: "alice".into() }));

    let offer = bob.session.pending_offers().remove(0);
    bob.session.accept_offer(&offer).await.expect("accept");
    eventually("alice to connect", || {
        alice.session.state() == CallState::Active { peer: "B".into() }
    })
    .await;

    let alice_link = alice.links.last_link().expect("alice link");
    let bob_link = bob.links.last_link().expect("bob link");
    assert!(alice_link.emit_local_candidate("a-host"));
    assert!(bob_link.emit_local_candidate("b-host"));
    eventually("candidates to cross", || {
        bob_link.applied_candidates() == ["a-host"] && alice_link.applied_candidates() == ["b-host"]
    })
    .await;

    alice.session.end_call().await.expect("hang up");
    eventually("bob to see the hangup", || bob.session.state() == CallState::Idle).await;
    assert!(bob.observer.has_notice(|n| *n == Notice::RemoteHangup { by: "A".into() }));
    assert!(bob_link.is_closed());
    assert!(alice_link.is_closed());

    alice.driver.shutdown().await;
    bob.driver.shutdown().await;
    assert_eq!(bus.subscriber_count(&channel), 0);
}

#[tokio::test]
async fn rejection_crosses_the_bus() {
    let bus = Arc::new(LocalBus::new());
    let alice = party(&bus, "A", "alice");
    let bob = party(&bus, "B", "bob");

    alice.session.start_call("B".into(), "bob").await.unwrap();
    eventually("bob to ring", || !bob.session.pending_offers().is_empty()).await;
    let offer = bob.session.pending_offers().remove(0);
    bob.session.reject_call(&offer).await.unwrap();

    eventually("alice to go idle", || alice.session.state() == CallState::Idle).await;
    assert!(alice.observer.has_notice(|n| *n == Notice::CallRejected { by: "B".into() }));
    assert!(alice.links.last_link().unwrap().is_closed());
}

#[tokio::test]
async fn malformed_payloads_do_not_stop_the_driver() {
    let bus = Arc::new(LocalBus::new());
    let bob = party(&bus, "B", "bob");
    let channel = bob.session.config().channel.clone();

    bus.publish(&channel, Bytes::from_static(b"not json")).await.unwrap();
    bus.publish(&channel, Bytes::from_static(br#"{"type":"call-transfer","senderId":"A"}"#))
        .await
        .unwrap();
    bus.publish(
        &channel,
        Bytes::from_static(
            br#"{"type":"call-request","senderId":"A","receiverId":"B","senderUsername":"alice","offer":{"type":"offer","sdp":"v=0 a"}}"#,
        ),
    )
    .await
    .unwrap();

    eventually("bob to ring", || bob.session.pending_offers().len() == 1).await;
}

#[tokio::test]
async fn dropping_the_driver_unsubscribes() {
    let bus = Arc::new(LocalBus::new());
    let bob = party(&bus, "B", "bob");
    let channel = bob.session.config().channel.clone();
    assert_eq!(bus.subscriber_count(&channel), 1);

    drop(bob.driver);
    eventually("subscription to go away", || bus.subscriber_count(&channel) == 0).await;
}
