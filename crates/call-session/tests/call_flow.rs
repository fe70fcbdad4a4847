mod common;

use call_session::{
    CallError, CallState, ConnectionState, Identity, MediaConstraints, MediaError, MediaKind, MediaTrack, Notice,
    SessionDescription, SignalBody, SignalKind,
};
use call_session::mock::FakeTrack;
use common::{Harness, answer, call_request, candidate};

#[tokio::test]
async fn caller_happy_path() {
    let h = Harness::new("A");

    h.session.start_call("B".into(), "bob").await.expect("start call");

    assert_eq!(
        h.session.state(),
        CallState::Calling {
            target: "B".into(),
            label: "bob".into()
        }
    );
    let link = h.link();
    let offer = link.local_description().expect("offer set locally");
    let published = h.bus.published();
    assert_eq!(published.len(), 1);
    let request = &published[0];
    assert_eq!(request.sender_id, Identity::from("A"));
    assert_eq!(request.receiver_id, Some(Identity::from("B")));
    match &request.body {
        SignalBody::CallRequest {
            offer: sent,
            sender_username,
            receiver_username,
        } => {
            assert_eq!(*sent, offer);
            assert_eq!(sender_username, "A-user");
            assert_eq!(receiver_username.as_deref(), Some("bob"));
        }
        other => panic!("unexpected body {other:?}"),
    }
    assert_eq!(link.local_tracks(), ["audio-1", "video-1"]);
    assert_eq!(h.media.requests(), [MediaConstraints::caller_default()]);

    h.deliver("B", Some("A"), answer("v=0 from-b")).await;

    assert_eq!(h.session.state(), CallState::Active { peer: "B".into() });
    assert_eq!(link.remote_description(), Some(SessionDescription::answer("v=0 from-b")));

    h.session.end_call().await.expect("end call");

    assert_eq!(h.session.state(), CallState::Idle);
    assert_eq!(
        h.bus.published_kinds(),
        [SignalKind::CallRequest, SignalKind::CallEnded]
    );
    assert_eq!(h.bus.published()[1].receiver_id, Some(Identity::from("B")));
    assert!(link.is_closed());
    assert!(h.media.all_stopped());
    assert!(h.session.local_media().is_none());
    let notices = h.observer.notices();
    assert_eq!(notices.first(), Some(&Notice::Calling { label: "bob".into() }));
    assert!(notices.contains(&Notice::CallConnected { peer: "B".into() }));
    assert_eq!(notices.last(), Some(&Notice::CallEnded));
}

#[tokio::test]
async fn candidates_before_answer_are_applied_in_arrival_order() {
    let h = Harness::new("A");
    h.session.start_call("B".into(), "bob").await.unwrap();

    for name in ["c1", "c2", "c3"] {
        h.deliver("B", Some("A"), candidate(name)).await;
    }
    let link = h.link();
    assert!(link.applied_candidates().is_empty());

    h.deliver("B", Some("A"), answer("v=0 from-b")).await;
    assert_eq!(link.applied_candidates(), ["c1", "c2", "c3"]);

    h.deliver("B", Some("A"), candidate("c4")).await;
    assert_eq!(link.applied_candidates(), ["c1", "c2", "c3", "c4"]);
}

#[tokio::test]
async fn rejected_queued_candidate_is_reported_and_rest_still_applied() {
    let h = Harness::new("A");
    h.links.fail_candidate("c2");
    h.session.start_call("B".into(), "bob").await.unwrap();

    for name in ["c1", "c2", "c3"] {
        h.deliver("B", Some("A"), candidate(name)).await;
    }
    h.deliver("B", Some("A"), answer("v=0 from-b")).await;

    assert_eq!(h.link().applied_candidates(), ["c1", "c3"]);
    assert_eq!(h.session.state(), CallState::Active { peer: "B".into() });
    assert!(
        h.observer
            .has_notice(|n| matches!(n, Notice::Failure(CallError::CandidateApply(_))))
    );
}

#[tokio::test]
async fn second_outgoing_call_is_refused_without_side_effects() {
    let h = Harness::new("A");
    h.session.start_call("B".into(), "bob").await.unwrap();
    let before = h.session.state();

    let err = h.session.start_call("C".into(), "carol").await.unwrap_err();

    assert_eq!(err, CallError::DuplicateCall { state: before.clone() });
    assert_eq!(h.session.state(), before);
    assert_eq!(h.links.links().len(), 1);
    assert!(!h.link().is_closed());
    assert_eq!(h.bus.published_kinds(), [SignalKind::CallRequest]);
    assert!(h.observer.has_notice(|n| matches!(n, Notice::Failure(CallError::DuplicateCall { .. }))));
}

#[tokio::test]
async fn end_call_twice_is_harmless() {
    let h = Harness::new("A");
    h.connect_as_caller("B").await;

    h.session.end_call().await.expect("first end");
    assert_eq!(h.session.state(), CallState::Idle);
    h.session.end_call().await.expect("second end");
    assert_eq!(h.session.state(), CallState::Idle);

    assert_eq!(h.link().close_calls(), 1);
    let ended = h
        .bus
        .published_kinds()
        .into_iter()
        .filter(|kind| *kind == SignalKind::CallEnded)
        .count();
    assert_eq!(ended, 1);
}

#[tokio::test]
async fn end_call_when_idle_is_a_no_op() {
    let h = Harness::new("A");
    h.session.end_call().await.expect("end call");
    assert_eq!(h.session.state(), CallState::Idle);
    assert!(h.bus.published().is_empty());
    assert!(h.observer.notices().is_empty());
}

#[tokio::test]
async fn own_signals_are_ignored() {
    let h = Harness::new("A");
    let own = [
        call_request("v=0 mine", "A-user"),
        answer("v=0 mine"),
        candidate("c1"),
        SignalBody::CallCancelled { offer: None },
        SignalBody::CallRejected { offer: None },
        SignalBody::CallEnded,
    ];

    for body in own.clone() {
        h.deliver("A", Some("A"), body).await;
    }
    assert_eq!(h.session.state(), CallState::Idle);
    assert!(h.session.pending_offers().is_empty());

    h.session.start_call("B".into(), "bob").await.unwrap();
    let calling = h.session.state();
    for body in own {
        h.deliver("A", Some("A"), body).await;
        h.deliver("A", None, SignalBody::CallEnded).await;
    }
    assert_eq!(h.session.state(), calling);
    assert!(h.session.pending_offers().is_empty());
    assert!(h.link().remote_description().is_none());
}

#[tokio::test]
async fn callee_accepts_pending_offer() {
    let h = Harness::new("B");
    h.deliver("A", Some("B"), call_request("v=0 from-a", "alice")).await;

    assert_eq!(h.session.state(), CallState::RingingLocal { pending: 1 });
    assert!(h.observer.has_notice(|n| *n == Notice::IncomingCall { from: "alice".into() }));
    let pending = h.session.pending_offers();
    assert_eq!(h.observer.last_incoming(), Some(pending.clone()));

    h.session.accept_offer(&pending[0]).await.expect("accept");

    assert_eq!(h.session.state(), CallState::Active { peer: "A".into() });
    assert!(h.session.pending_offers().is_empty());
    assert_eq!(h.observer.last_incoming(), Some(Vec::new()));
    let link = h.link();
    assert_eq!(link.remote_description(), Some(SessionDescription::offer("v=0 from-a")));
    let local = link.local_description().expect("answer set locally");
    let published = h.bus.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].receiver_id, Some(Identity::from("A")));
    assert_eq!(published[0].body, SignalBody::Answer { answer: local });
    assert_eq!(h.media.requests(), [MediaConstraints::callee_default()]);
}

#[tokio::test]
async fn duplicate_requests_ring_once_but_new_offers_ring_again() {
    let h = Harness::new("B");
    h.deliver("A", Some("B"), call_request("v=0 one", "alice")).await;
    h.deliver("A", Some("B"), call_request("v=0 one", "alice")).await;
    assert_eq!(h.session.pending_offers().len(), 1);

    h.deliver("A", Some("B"), call_request("v=0 two", "alice")).await;
    assert_eq!(h.session.state(), CallState::RingingLocal { pending: 2 });
    let incoming = h
        .observer
        .notices()
        .into_iter()
        .filter(|n| matches!(n, Notice::IncomingCall { .. }))
        .count();
    assert_eq!(incoming, 2);
}

#[tokio::test]
async fn request_for_someone_else_is_ignored() {
    let h = Harness::new("B");
    h.deliver("A", Some("C"), call_request("v=0 for-c", "alice")).await;
    assert_eq!(h.session.state(), CallState::Idle);
    assert!(h.session.pending_offers().is_empty());
}

#[tokio::test]
async fn offer_event_rings_like_a_call_request() {
    let h = Harness::new("B");
    h.deliver(
        "A",
        None,
        SignalBody::Offer {
            offer: SessionDescription::offer("v=0 bare"),
            sender_username: None,
        },
    )
    .await;
    let pending = h.session.pending_offers();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].sender_username, "A");
}

#[tokio::test]
async fn requests_while_in_a_call_are_kept_for_later() {
    let h = Harness::new("B");
    h.deliver("A", Some("B"), call_request("v=0 from-a", "alice")).await;
    let pending = h.session.pending_offers();
    h.session.accept_offer(&pending[0]).await.unwrap();

    h.deliver("C", Some("B"), call_request("v=0 from-c", "carol")).await;
    assert_eq!(h.session.state(), CallState::Active { peer: "A".into() });
    assert_eq!(h.session.pending_offers().len(), 1);

    let waiting = h.session.pending_offers();
    let err = h.session.accept_offer(&waiting[0]).await.unwrap_err();
    assert!(matches!(err, CallError::DuplicateCall { .. }));

    h.session.end_call().await.unwrap();
    assert_eq!(h.session.state(), CallState::RingingLocal { pending: 1 });
}

#[tokio::test]
async fn redelivered_request_for_the_accepted_call_does_not_ring() {
    let h = Harness::new("B");
    h.deliver("A", Some("B"), call_request("v=0 from-a", "alice")).await;
    let pending = h.session.pending_offers();
    h.session.accept_offer(&pending[0]).await.unwrap();

    h.deliver("A", Some("B"), call_request("v=0 from-a", "alice")).await;
    assert!(h.session.pending_offers().is_empty());
}

#[tokio::test]
async fn redelivered_request_after_the_call_ended_does_not_ring() {
    let h = Harness::new("B");
    h.deliver("A", Some("B"), call_request("v=0 from-a", "alice")).await;
    let pending = h.session.pending_offers();
    h.session.accept_offer(&pending[0]).await.unwrap();
    h.session.end_call().await.unwrap();

    h.deliver("A", Some("B"), call_request("v=0 from-a", "alice")).await;
    assert_eq!(h.session.state(), CallState::Idle);
    assert!(h.session.pending_offers().is_empty());

    h.deliver("A", Some("B"), call_request("v=0 next", "alice")).await;
    assert_eq!(h.session.state(), CallState::RingingLocal { pending: 1 });
}

#[tokio::test]
async fn rejected_or_cancelled_requests_do_not_ring_again() {
    let h = Harness::new("B");
    h.deliver("A", Some("B"), call_request("v=0 from-a", "alice")).await;
    let pending = h.session.pending_offers();
    h.session.reject_call(&pending[0]).await.unwrap();
    h.deliver("A", Some("B"), call_request("v=0 from-a", "alice")).await;
    assert!(h.session.pending_offers().is_empty());

    h.deliver("C", Some("B"), call_request("v=0 from-c", "carol")).await;
    h.deliver("C", Some("B"), SignalBody::CallCancelled { offer: None }).await;
    h.deliver("C", Some("B"), call_request("v=0 from-c", "carol")).await;
    assert!(h.session.pending_offers().is_empty());

    // Cancel overtaking its own request.
    h.deliver(
        "D",
        Some("B"),
        SignalBody::CallCancelled {
            offer: Some(SessionDescription::offer("v=0 from-d")),
        },
    )
    .await;
    h.deliver("D", Some("B"), call_request("v=0 from-d", "dave")).await;
    assert_eq!(h.session.state(), CallState::Idle);
}

#[tokio::test]
async fn reject_publishes_to_the_caller_and_goes_idle() {
    let h = Harness::new("B");
    h.deliver("A", Some("B"), call_request("v=0 from-a", "alice")).await;
    let pending = h.session.pending_offers();

    h.session.reject_call(&pending[0]).await.expect("reject");

    assert!(h.session.pending_offers().is_empty());
    assert_eq!(h.session.state(), CallState::Idle);
    let published = h.bus.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].sender_id, Identity::from("B"));
    assert_eq!(published[0].receiver_id, Some(Identity::from("A")));
    assert_eq!(
        published[0].body,
        SignalBody::CallRejected {
            offer: Some(SessionDescription::offer("v=0 from-a"))
        }
    );
    assert!(h.observer.has_notice(|n| *n == Notice::CallDeclined { caller: "alice".into() }));
    assert!(h.links.links().is_empty());
}

#[tokio::test]
async fn rejecting_one_of_two_offers_keeps_ringing() {
    let h = Harness::new("B");
    h.deliver("A", Some("B"), call_request("v=0 from-a", "alice")).await;
    h.deliver("C", Some("B"), call_request("v=0 from-c", "carol")).await;
    let pending = h.session.pending_offers();

    h.session.reject_call(&pending[0]).await.unwrap();

    assert_eq!(h.session.state(), CallState::RingingLocal { pending: 1 });
    assert_eq!(h.session.pending_offers()[0].sender_id, Identity::from("C"));
}

#[tokio::test]
async fn rejecting_unknown_offer_fails() {
    let h = Harness::new("B");
    h.deliver("A", Some("B"), call_request("v=0 from-a", "alice")).await;
    let mut stale = h.session.pending_offers().remove(0);
    h.session.reject_call(&stale).await.unwrap();

    stale.offer.sdp.push_str(" changed");
    let err = h.session.reject_call(&stale).await.unwrap_err();
    assert_eq!(err, CallError::UnknownOffer { sender: "A".into() });
    let err = h.session.accept_offer(&stale).await.unwrap_err();
    assert_eq!(err, CallError::UnknownOffer { sender: "A".into() });
}

#[tokio::test]
async fn hangup_must_be_addressed_to_us() {
    let h = Harness::new("A");
    h.connect_as_caller("B").await;

    h.deliver("B", None, SignalBody::CallEnded).await;
    h.deliver("B", Some("C"), SignalBody::CallEnded).await;
    h.deliver("C", Some("A"), SignalBody::CallEnded).await;
    assert_eq!(h.session.state(), CallState::Active { peer: "B".into() });

    h.deliver("B", Some("A"), SignalBody::CallEnded).await;
    assert_eq!(h.session.state(), CallState::Idle);
    assert!(h.link().is_closed());
    assert!(h.media.all_stopped());
    assert!(h.observer.has_notice(|n| *n == Notice::RemoteHangup { by: "B".into() }));
    assert!(!h.bus.published_kinds().contains(&SignalKind::CallEnded));
}

#[tokio::test]
async fn rejection_must_be_addressed_to_us() {
    let h = Harness::new("A");
    h.session.start_call("B".into(), "bob").await.unwrap();

    h.deliver("B", None, SignalBody::CallRejected { offer: None }).await;
    h.deliver("B", Some("C"), SignalBody::CallRejected { offer: None }).await;
    h.deliver("C", Some("A"), SignalBody::CallRejected { offer: None }).await;
    assert!(matches!(h.session.state(), CallState::Calling { .. }));

    h.deliver("B", Some("A"), SignalBody::CallRejected { offer: None }).await;
    assert_eq!(h.session.state(), CallState::Idle);
    assert!(h.link().is_closed());
    assert!(h.media.all_stopped());
    assert!(h.observer.has_notice(|n| *n == Notice::CallRejected { by: "B".into() }));
}

#[tokio::test]
async fn caller_cancel_publishes_the_offer() {
    let h = Harness::new("A");
    h.session.start_call("B".into(), "bob").await.unwrap();
    let offer = h.link().local_description();

    h.session.end_call_by_caller().await.expect("cancel");

    assert_eq!(h.session.state(), CallState::Idle);
    let last = h.bus.published().pop().expect("cancel published");
    assert_eq!(last.receiver_id, Some(Identity::from("B")));
    assert_eq!(last.body, SignalBody::CallCancelled { offer });
    assert!(h.link().is_closed());
    assert!(h.media.all_stopped());
    assert!(h.observer.has_notice(|n| *n == Notice::CallCancelled));

    let err = h.session.end_call_by_caller().await.unwrap_err();
    assert_eq!(err, CallError::NotCalling);
}

#[tokio::test]
async fn end_call_while_calling_cancels() {
    let h = Harness::new("A");
    h.session.start_call("B".into(), "bob").await.unwrap();

    h.session.end_call().await.unwrap();

    assert_eq!(h.session.state(), CallState::Idle);
    assert_eq!(
        h.bus.published_kinds(),
        [SignalKind::CallRequest, SignalKind::CallCancelled]
    );
}

#[tokio::test]
async fn duplicate_answer_after_connect_is_ignored() {
    let h = Harness::new("A");
    h.connect_as_caller("B").await;
    h.deliver("B", Some("A"), answer("v=0 again")).await;
    assert_eq!(h.session.state(), CallState::Active { peer: "B".into() });
    assert_eq!(h.link().remote_description(), Some(SessionDescription::answer("v=0 answer")));
}

#[tokio::test]
async fn answer_from_stranger_is_ignored() {
    let h = Harness::new("A");
    h.session.start_call("B".into(), "bob").await.unwrap();
    h.deliver("C", Some("A"), answer("v=0 from-c")).await;
    assert!(matches!(h.session.state(), CallState::Calling { .. }));
    assert!(h.link().remote_description().is_none());
}

#[tokio::test]
async fn callee_sees_cancel_for_pending_offer() {
    let h = Harness::new("B");
    h.deliver("A", Some("B"), call_request("v=0 from-a", "alice")).await;
    h.deliver("C", Some("B"), call_request("v=0 from-c", "carol")).await;

    h.deliver(
        "A",
        Some("B"),
        SignalBody::CallCancelled {
            offer: Some(SessionDescription::offer("v=0 from-a")),
        },
    )
    .await;

    assert_eq!(h.session.state(), CallState::RingingLocal { pending: 1 });
    assert!(h.observer.has_notice(|n| *n == Notice::CallCancelledByCaller { from: "A".into() }));

    h.deliver("C", Some("B"), SignalBody::CallCancelled { offer: None }).await;
    assert_eq!(h.session.state(), CallState::Idle);
}

#[tokio::test]
async fn cancel_for_other_offer_leaves_entry() {
    let h = Harness::new("B");
    h.deliver("A", Some("B"), call_request("v=0 from-a", "alice")).await;
    h.deliver(
        "A",
        Some("B"),
        SignalBody::CallCancelled {
            offer: Some(SessionDescription::offer("v=0 older")),
        },
    )
    .await;
    assert_eq!(h.session.pending_offers().len(), 1);
    assert!(h.observer.notices().iter().all(|n| !matches!(n, Notice::CallCancelledByCaller { .. })));
}

#[tokio::test]
async fn early_candidates_reach_the_link_after_accept() {
    let mut h = Harness::new("B");
    h.deliver("A", Some("B"), call_request("v=0 from-a", "alice")).await;
    h.deliver("A", Some("B"), candidate("e1")).await;
    h.deliver("A", Some("B"), candidate("e2")).await;
    assert_eq!(h.session.pending_offers()[0].early_candidates().len(), 2);

    let pending = h.session.pending_offers();
    h.session.accept_offer(&pending[0]).await.unwrap();
    h.pump_link_events().await;

    assert_eq!(h.link().applied_candidates(), ["e1", "e2"]);
}

#[tokio::test]
async fn candidate_from_unknown_sender_is_dropped() {
    let h = Harness::new("A");
    h.connect_as_caller("B").await;
    h.deliver("C", Some("A"), candidate("x1")).await;
    assert!(h.link().applied_candidates().is_empty());
}

#[tokio::test]
async fn media_failure_unwinds_to_idle() {
    let h = Harness::new("A");
    h.media.fail_next(MediaError::PermissionDenied("camera".into()));

    let err = h.session.start_call("B".into(), "bob").await.unwrap_err();

    assert_eq!(err, CallError::MediaAcquisition(MediaError::PermissionDenied("camera".into())));
    assert_eq!(h.session.state(), CallState::Idle);
    assert!(h.link().is_closed());
    assert!(h.bus.published().is_empty());
    assert!(h.observer.has_notice(|n| matches!(n, Notice::Failure(CallError::MediaAcquisition(_)))));

    h.session.start_call("B".into(), "bob").await.expect("retry succeeds");
}

#[tokio::test]
async fn bad_remote_description_tears_down_accept() {
    let h = Harness::new("B");
    h.links.reject_remote_descriptions();
    h.deliver("A", Some("B"), call_request("v=0 from-a", "alice")).await;
    let pending = h.session.pending_offers();

    let err = h.session.accept_offer(&pending[0]).await.unwrap_err();

    assert!(matches!(err, CallError::DescriptionApply(_)));
    assert_eq!(h.session.state(), CallState::Idle);
    assert!(h.link().is_closed());
    assert!(h.media.all_stopped());
    assert!(h.bus.published().is_empty());
}

#[tokio::test]
async fn bad_answer_tears_down_caller() {
    let h = Harness::new("A");
    h.links.reject_remote_descriptions();
    h.session.start_call("B".into(), "bob").await.unwrap();

    h.deliver("B", Some("A"), answer("v=0 garbage")).await;

    assert_eq!(h.session.state(), CallState::Idle);
    assert!(h.link().is_closed());
    assert!(h.observer.has_notice(|n| matches!(n, Notice::Failure(CallError::DescriptionApply(_)))));
}

#[tokio::test]
async fn publish_failure_is_reported_but_call_proceeds() {
    let h = Harness::new("A");
    h.bus.fail_publishes(true);

    h.session.start_call("B".into(), "bob").await.expect("start call");

    assert!(matches!(h.session.state(), CallState::Calling { .. }));
    assert!(h.observer.has_notice(|n| matches!(
        n,
        Notice::Failure(CallError::SignalPublish {
            event: SignalKind::CallRequest,
            ..
        })
    )));
}

#[tokio::test]
async fn local_candidates_are_sent_to_the_peer() {
    let mut h = Harness::new("A");
    h.session.start_call("B".into(), "bob").await.unwrap();
    h.bus.clear();

    assert!(h.link().emit_local_candidate("l1"));
    h.pump_link_events().await;

    let published = h.bus.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].receiver_id, Some(Identity::from("B")));
    assert!(matches!(&published[0].body, SignalBody::IceCandidate { candidate } if candidate.candidate == "l1"));
}

#[tokio::test]
async fn remote_tracks_and_connection_warnings_reach_the_observer() {
    let mut h = Harness::new("A");
    h.connect_as_caller("B").await;
    let link = h.link();

    link.emit_remote_track(FakeTrack::new("remote-video", MediaKind::Video));
    link.emit_remote_track(FakeTrack::new("remote-video", MediaKind::Video));
    link.emit_state(ConnectionState::Disconnected);
    h.pump_link_events().await;

    assert_eq!(h.observer.remote_tracks(), ["remote-video"]);
    assert_eq!(h.session.remote_media().tracks().len(), 1);
    assert!(h.observer.has_notice(|n| *n == Notice::ConnectionInterrupted));
    assert_eq!(h.session.state(), CallState::Active { peer: "B".into() });
}

#[tokio::test]
async fn events_from_a_closed_link_are_ignored() {
    let mut h = Harness::new("A");
    h.connect_as_caller("B").await;
    let old = h.link();
    h.session.end_call().await.unwrap();
    h.bus.clear();

    old.emit_local_candidate("late");
    old.emit_remote_track(FakeTrack::new("late-track", MediaKind::Audio));
    old.emit_state(ConnectionState::Failed);
    h.pump_link_events().await;

    assert!(h.bus.published().is_empty());
    assert!(h.observer.remote_tracks().is_empty());
    assert!(!h.observer.has_notice(|n| *n == Notice::ConnectionFailed));
}

#[tokio::test]
async fn remote_tracks_are_stopped_on_hangup() {
    let mut h = Harness::new("A");
    h.connect_as_caller("B").await;
    let remote = FakeTrack::new("remote-audio", MediaKind::Audio);
    h.link().emit_remote_track(remote.clone());
    h.pump_link_events().await;

    h.deliver("B", Some("A"), SignalBody::CallEnded).await;

    assert!(remote.is_stopped());
    assert!(h.session.remote_media().is_empty());
}

#[tokio::test]
async fn teardown_continues_past_track_failures() {
    let h = Harness::new("A");
    h.connect_as_caller("B").await;
    h.media.tracks()[0].fail_stop();

    h.session.end_call().await.expect("teardown never fails");

    assert!(h.media.all_stopped());
    assert!(h.link().is_closed());
}

#[tokio::test]
async fn mute_and_camera_toggles_flip_local_tracks() {
    let h = Harness::new("A");
    assert!(!h.session.set_local_audio_enabled(false));

    h.connect_as_caller("B").await;
    assert!(h.session.set_local_audio_enabled(false));
    assert!(h.session.set_local_video_enabled(false));

    let tracks = h.media.tracks();
    assert!(tracks.iter().all(|track| !track.is_enabled()));

    h.session.set_local_audio_enabled(true);
    let audio = tracks.iter().find(|track| track.kind() == MediaKind::Audio).unwrap();
    assert!(audio.is_enabled());
}

#[tokio::test]
async fn peer_link_gets_configured_ice_servers() {
    let h = Harness::new("A");
    h.session.start_call("B".into(), "bob").await.unwrap();
    assert_eq!(h.links.last_ice_servers(), h.session.config().ice_servers);
}
