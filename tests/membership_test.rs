// Call membership: prompts, mesh auto-accept, invites, glare and leave.

mod common;

use common::{candidate, offers_to, Harness};
use meshcall_lib::call::{Input, TimerEvent, TimerKind};
use meshcall_lib::peer::{Connectivity, Role, SessionDescription, SessionState};
use meshcall_lib::signaling::{InboundSignal, OutboundSignal};
use meshcall_lib::{CallError, CallEvent, CloseReason};
use std::sync::atomic::Ordering;

#[tokio::test]
async fn test_first_call_prompts_then_mesh_join_is_automatic() {
    // bob's side: the first call needs consent
    let mut bob = Harness::new("bob");
    bob.orch
        .handle(Input::Signal(InboundSignal::IncomingCall {
            from_user_id: "alice".into(),
            offer: SessionDescription::offer("offer-alice"),
        }))
        .await
        .unwrap();

    assert_eq!(bob.orch.session_count(), 0);
    assert!(bob.orch.roster().is_empty());
    let events = bob.drain_events();
    assert!(matches!(
        events.as_slice(),
        [CallEvent::IncomingCall { from, .. }] if from == "alice"
    ));

    bob.orch.accept_pending_call().await.unwrap();
    let sent = bob.signals.take();
    assert!(matches!(
        sent.as_slice(),
        [OutboundSignal::AnswerCall { to_user_id, .. }] if to_user_id == "alice"
    ));
    assert_eq!(bob.orch.roster(), vec!["alice".to_string()]);
    assert!(bob.orch.pending_call().is_none());

    // alice's side: carol's join-call is handled without a prompt
    let mut alice = Harness::new("alice");
    alice.connect_to("bob").await;
    alice.signals.take();
    alice.drain_events();

    alice
        .orch
        .handle(Input::Signal(InboundSignal::JoinCall {
            joining_user_id: "carol".into(),
        }))
        .await
        .unwrap();

    assert_eq!(offers_to(&alice.signals.take()), vec!["carol".to_string()]);
    assert_eq!(
        alice.orch.roster(),
        vec!["bob".to_string(), "carol".to_string()]
    );
    assert!(!alice
        .drain_events()
        .iter()
        .any(|e| matches!(e, CallEvent::IncomingCall { .. })));
}

#[tokio::test]
async fn test_offer_during_call_is_auto_accepted() {
    let mut h = Harness::new("alice");
    h.connect_to("bob").await;
    h.signals.take();

    h.orch
        .receive_offer("dave".into(), SessionDescription::offer("offer-dave"))
        .await
        .unwrap();

    let sent = h.signals.take();
    assert!(matches!(
        sent.as_slice(),
        [OutboundSignal::AnswerCall { to_user_id, .. }] if to_user_id == "dave"
    ));
    let ops = h.factory.latest("dave").ops();
    assert_eq!(ops[0], "set_remote:offer-dave");
    assert!(ops.contains(&"create_answer".to_string()));
    assert_eq!(h.orch.session("dave").unwrap().role, Role::Answerer);
}

#[tokio::test]
async fn test_accepting_invite_offers_to_everyone_and_announces_to_members_only() {
    let mut h = Harness::new("dave");
    h.connect_to("a").await;
    h.connect_to("b").await;
    h.signals.take();

    h.orch
        .handle(Input::Signal(InboundSignal::IncomingInvite {
            from_user_id: "inviter".into(),
        }))
        .await
        .unwrap();
    assert_eq!(h.orch.pending_invite().unwrap().peer_id, "inviter");

    h.orch.accept_pending_invite().await.unwrap();
    let sent = h.signals.take();

    let mut offered = offers_to(&sent);
    offered.sort();
    assert_eq!(offered, vec!["a", "b", "inviter"]);

    let announced: Vec<&str> = sent
        .iter()
        .filter_map(|s| match s {
            OutboundSignal::NewParticipantJoined {
                to_user_id,
                new_participant,
            } => {
                assert_eq!(new_participant, "dave");
                Some(to_user_id.as_str())
            }
            _ => None,
        })
        .collect();
    assert_eq!(announced, vec!["a", "b"]);

    assert!(sent.iter().any(|s| matches!(
        s,
        OutboundSignal::AcceptInvite { from_user_id } if from_user_id == "inviter"
    )));
    // existing sessions are reused, not duplicated
    assert_eq!(h.factory.built_for("a"), 1);
    assert_eq!(h.orch.session_count(), 3);
    assert!(h.orch.pending_invite().is_none());
}

#[tokio::test]
async fn test_accept_without_pending_is_an_error() {
    let mut h = Harness::new("alice");
    assert!(matches!(
        h.orch.accept_pending_call().await,
        Err(CallError::NoPendingCall)
    ));
    assert!(matches!(
        h.orch.accept_pending_invite().await,
        Err(CallError::NoPendingInvite)
    ));
    assert!(matches!(
        h.orch.reject_pending_call(),
        Err(CallError::NoPendingCall)
    ));
}

#[tokio::test]
async fn test_at_most_one_session_per_peer() {
    let mut h = Harness::new("alice");
    h.connect_to("bob").await;
    let epoch = h.orch.session("bob").unwrap().epoch;

    assert!(matches!(
        h.orch.initiate_call("bob".into()).await,
        Err(CallError::AlreadyInCall(p)) if p == "bob"
    ));
    assert!(matches!(
        h.orch.invite_to_join("bob".into()).await,
        Err(CallError::AlreadyInCall(_))
    ));

    // a fresh offer from a connected peer renegotiates in place
    h.signals.take();
    h.orch
        .receive_offer("bob".into(), SessionDescription::offer("restart-bob"))
        .await
        .unwrap();
    assert_eq!(h.factory.built_for("bob"), 1);
    assert_eq!(h.orch.session("bob").unwrap().epoch, epoch);
    assert!(matches!(
        h.signals.take().as_slice(),
        [OutboundSignal::AnswerCall { .. }]
    ));

    // join-call and announcements for a known peer are ignored
    h.orch.receive_join_call("bob".into()).await.unwrap();
    h.orch.receive_new_participant("bob".into()).await.unwrap();
    h.orch.receive_new_participant("alice".into()).await.unwrap();
    assert_eq!(h.factory.total(), 1);
}

#[tokio::test]
async fn test_offer_glare_lower_id_yields() {
    let mut h = Harness::new("alice");
    h.orch.initiate_call("bob".into()).await.unwrap();
    let first_epoch = h.orch.session("bob").unwrap().epoch;
    h.signals.take();

    h.orch
        .receive_offer("bob".into(), SessionDescription::offer("offer-bob"))
        .await
        .unwrap();

    let session = h.orch.session("bob").unwrap();
    assert_ne!(session.epoch, first_epoch);
    assert_eq!(session.role, Role::Answerer);
    assert_eq!(h.orch.roster(), vec!["bob".to_string()]);
    assert!(matches!(
        h.signals.take().as_slice(),
        [OutboundSignal::AnswerCall { .. }]
    ));
    assert!(!h
        .drain_events()
        .iter()
        .any(|e| matches!(e, CallEvent::PeerRemoved { .. } | CallEvent::CallEnded)));
}

#[tokio::test]
async fn test_offer_glare_higher_id_keeps_its_offer() {
    let mut h = Harness::new("zed");
    h.orch.initiate_call("bob".into()).await.unwrap();
    let epoch = h.orch.session("bob").unwrap().epoch;
    h.signals.take();

    h.orch
        .receive_offer("bob".into(), SessionDescription::offer("offer-bob"))
        .await
        .unwrap();

    assert_eq!(h.orch.session("bob").unwrap().epoch, epoch);
    assert!(h.signals.take().is_empty());
    assert_eq!(h.factory.built_for("bob"), 1);
}

#[tokio::test]
async fn test_queued_calls_are_presented_one_after_another() {
    let mut h = Harness::new("alice");
    h.orch
        .receive_offer("bob".into(), SessionDescription::offer("offer-bob"))
        .await
        .unwrap();
    h.orch
        .receive_offer("carol".into(), SessionDescription::offer("offer-carol"))
        .await
        .unwrap();
    // newer offer from bob replaces the queued one without re-presenting others
    h.orch
        .receive_offer("bob".into(), SessionDescription::offer("offer-bob-2"))
        .await
        .unwrap();

    let presented: Vec<String> = h
        .drain_events()
        .into_iter()
        .filter_map(|e| match e {
            CallEvent::IncomingCall { from, offer } => Some(format!("{from}:{}", offer.sdp)),
            _ => None,
        })
        .collect();
    assert_eq!(presented, vec!["bob:offer-bob", "bob:offer-bob-2"]);
    assert_eq!(h.orch.queued_calls(), 2);

    h.orch.reject_pending_call().unwrap();
    assert!(matches!(
        h.signals.take().as_slice(),
        [OutboundSignal::RejectCall { to_user_id }] if to_user_id == "bob"
    ));
    assert!(matches!(
        h.drain_events().as_slice(),
        [CallEvent::IncomingCall { from, .. }] if from == "carol"
    ));
    assert_eq!(h.factory.total(), 0);

    h.orch.accept_pending_call().await.unwrap();
    assert_eq!(h.orch.roster(), vec!["carol".to_string()]);
    assert_eq!(h.orch.queued_calls(), 0);
}

#[tokio::test]
async fn test_early_candidates_for_pending_call_apply_after_accept() {
    let mut h = Harness::new("bob");
    h.orch
        .receive_offer("alice".into(), SessionDescription::offer("offer-alice"))
        .await
        .unwrap();
    h.orch.receive_candidate("alice", candidate(1)).await;
    h.orch.receive_candidate("alice", candidate(2)).await;
    assert_eq!(h.orch.pending_call().unwrap().early_candidates.len(), 2);

    h.orch.accept_pending_call().await.unwrap();

    let ops = h.factory.latest("alice").ops();
    let remote = ops.iter().position(|o| o == "set_remote:offer-alice").unwrap();
    assert_eq!(ops[remote + 1], format!("add_candidate:{}", candidate(1).candidate));
    assert_eq!(ops[remote + 2], format!("add_candidate:{}", candidate(2).candidate));
    assert_eq!(h.orch.session("alice").unwrap().pending_candidates, 0);
}

#[tokio::test]
async fn test_candidate_from_unknown_peer_is_dropped() {
    let mut h = Harness::new("alice");
    h.orch.receive_candidate("mallory", candidate(1)).await;
    h.orch.receive_participant_left("mallory").await;
    assert_eq!(h.factory.total(), 0);
    assert!(h.drain_events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_leave_call_notifies_everyone_and_stops_timers() {
    let mut h = Harness::new("alice");
    h.connect_to("a").await;
    h.connect_to("b").await;
    let epoch_a = h.orch.session("a").unwrap().epoch;
    h.signals.take();
    h.drain_events();

    h.orch.leave_call().await;

    let left: Vec<String> = h
        .signals
        .take()
        .into_iter()
        .map(|s| match s {
            OutboundSignal::ParticipantLeft {
                to_user_id,
                leaving_user_id,
            } => {
                assert_eq!(leaving_user_id, "alice");
                to_user_id
            }
            other => panic!("unexpected signal {other:?}"),
        })
        .collect();
    assert_eq!(left, vec!["a", "b"]);
    assert_eq!(h.orch.session_count(), 0);
    assert!(h.orch.roster().is_empty());
    assert_eq!(h.factory.latest("a").count("close"), 1);
    assert_eq!(h.factory.latest("b").count("close"), 1);

    // timers that were in flight are no-ops against the disposed sessions
    h.orch
        .handle(Input::Timer(TimerEvent {
            peer_id: "a".into(),
            epoch: epoch_a,
            kind: TimerKind::Grace,
        }))
        .await
        .unwrap();
    h.advance(h.config.watchdog_interval * 3).await;

    assert!(h.signals.take().is_empty());
    assert!(h
        .drain_events()
        .iter()
        .all(|e| matches!(e, CallEvent::CallEnded)));
    assert_eq!(h.factory.latest("a").count("regather"), 0);
}

#[tokio::test]
async fn test_participant_left_removes_peer_and_ends_call() {
    let mut h = Harness::new("alice");
    h.connect_to("bob").await;
    h.drain_events();

    h.orch
        .handle(Input::Signal(InboundSignal::ParticipantLeft {
            leaving_user_id: "bob".into(),
        }))
        .await
        .unwrap();

    assert!(h.orch.roster().is_empty());
    assert_eq!(
        h.drain_events(),
        vec![
            CallEvent::PeerRemoved {
                peer: "bob".into(),
                reason: CloseReason::RemoteLeft
            },
            CallEvent::CallEnded
        ]
    );

    // a new call to the same peer gets a new session
    h.orch.initiate_call("bob".into()).await.unwrap();
    assert_eq!(h.factory.built_for("bob"), 2);
    assert_eq!(h.orch.session("bob").unwrap().state, SessionState::Negotiating);
}

#[tokio::test]
async fn test_call_rejected_is_reported_not_failed() {
    let mut h = Harness::new("alice");
    h.orch.initiate_call("bob".into()).await.unwrap();
    h.orch.receive_call_rejected("bob").await;

    assert!(h.orch.roster().is_empty());
    let events = h.drain_events();
    assert!(events.contains(&CallEvent::CallRejected { peer: "bob".into() }));
    assert!(!events
        .iter()
        .any(|e| matches!(e, CallEvent::SessionFailed { .. })));
}

#[tokio::test]
async fn test_call_rejected_without_session_is_dropped() {
    let mut h = Harness::new("alice");
    h.connect_to("bob").await;
    h.drain_events();

    h.orch.receive_call_rejected("carol").await;

    assert!(h.drain_events().is_empty());
    assert_eq!(h.orch.roster(), vec!["bob".to_string()]);
    assert!(h.orch.in_call());
}

#[tokio::test]
async fn test_calling_back_a_waiting_caller_answers_their_offer() {
    let mut alice = Harness::new("alice");
    let mut bob = Harness::new("bob");

    bob.orch.initiate_call("alice".into()).await.unwrap();
    let offer = match bob.signals.take().as_slice() {
        [OutboundSignal::CallUser { to_user_id, offer }] if to_user_id == "alice" => offer.clone(),
        other => panic!("expected a single offer to alice, got {:?}", other),
    };
    alice.orch.receive_offer("bob".into(), offer).await.unwrap();
    alice.orch.receive_candidate("bob", candidate(1)).await;
    assert_eq!(alice.orch.pending_call().unwrap().peer_id, "bob");
    assert!(!alice.orch.in_call());

    // alice dials bob instead of pressing accept
    alice.orch.initiate_call("bob".into()).await.unwrap();

    assert!(alice.orch.pending_call().is_none());
    assert!(alice.orch.in_call());
    assert_eq!(alice.factory.built_for("bob"), 1);
    let session = alice.orch.session("bob").unwrap();
    assert_eq!(session.role, Role::Answerer);
    assert_eq!(session.pending_candidates, 0);
    let transport = alice.factory.latest("bob");
    assert_eq!(transport.count("create_offer"), 0);
    assert_eq!(transport.count("add_candidate"), 1);

    let answer = match alice.signals.take().as_slice() {
        [OutboundSignal::AnswerCall { to_user_id, answer }] if to_user_id == "bob" => {
            answer.clone()
        }
        other => panic!("expected a single answer to bob, got {:?}", other),
    };

    // bob's side completes as an ordinary call
    bob.orch.receive_answer("alice", answer).await.unwrap();
    let bob_transport = bob.factory.latest("alice");
    assert_eq!(bob_transport.count("set_remote:answer-bob"), 1);
    bob_transport.report(Connectivity::Connected);
    bob.pump().await;
    assert_eq!(bob.orch.session("alice").unwrap().state, SessionState::Connected);
    assert_eq!(bob.orch.session("alice").unwrap().role, Role::Offerer);
}

#[tokio::test]
async fn test_invite_during_call_sends_join_call() {
    let mut h = Harness::new("alice");
    h.connect_to("bob").await;
    h.signals.take();

    h.orch.invite_to_join("carol".into()).await.unwrap();
    assert!(matches!(
        h.signals.take().as_slice(),
        [OutboundSignal::JoinCall { joining_user_id }] if joining_user_id == "carol"
    ));
    assert_eq!(h.factory.built_for("carol"), 0);

    // with nobody in the call an invite is just a call
    let mut solo = Harness::new("alice");
    solo.orch.invite_to_join("carol".into()).await.unwrap();
    assert_eq!(offers_to(&solo.signals.take()), vec!["carol".to_string()]);
}

#[tokio::test]
async fn test_invite_accepted_is_announced_to_other_members() {
    let mut h = Harness::new("alice");
    h.connect_to("bob").await;
    h.connect_to("carol").await;
    h.signals.take();
    h.drain_events();

    h.orch.receive_invite_accepted("carol");

    assert!(matches!(
        h.signals.take().as_slice(),
        [OutboundSignal::NewParticipantJoined { to_user_id, new_participant }]
            if to_user_id == "bob" && new_participant == "carol"
    ));
    assert_eq!(
        h.drain_events(),
        vec![CallEvent::InviteAccepted {
            peer: "carol".into()
        }]
    );

    h.orch.receive_invite_rejected("erin");
    assert_eq!(
        h.drain_events(),
        vec![CallEvent::InviteDeclined {
            peer: "erin".into()
        }]
    );
}

#[tokio::test]
async fn test_setup_failure_closes_session_without_retry() {
    let mut h = Harness::new("alice");
    h.connect_to("bob").await;
    h.drain_events();
    h.factory.fail_answer.store(true, Ordering::SeqCst);

    let result = h
        .orch
        .receive_offer("carol".into(), SessionDescription::offer("offer-carol"))
        .await;

    assert!(matches!(result, Err(CallError::Setup { peer, .. }) if peer == "carol"));
    assert!(h.orch.session("carol").is_none());
    assert_eq!(h.orch.roster(), vec!["bob".to_string()]);
    let events = h.drain_events();
    assert!(events
        .iter()
        .any(|e| matches!(e, CallEvent::SessionFailed { peer, .. } if peer == "carol")));
    assert!(events.contains(&CallEvent::PeerRemoved {
        peer: "carol".into(),
        reason: CloseReason::SetupFailed
    }));
    // carol gets no answer, so they are told to drop their side
    assert!(h
        .signals
        .take()
        .contains(&OutboundSignal::ParticipantLeft {
            to_user_id: "carol".into(),
            leaving_user_id: "alice".into(),
        }));

    h.factory.fail_create.store(true, Ordering::SeqCst);
    assert!(h.orch.initiate_call("dave".into()).await.is_err());
    assert!(h.orch.session("dave").is_none());
}
