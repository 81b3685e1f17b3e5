//! Integration tests for the negotiation state machine.
//!
//! Two [`NegotiationState`]s are driven against each other the way the
//! session orchestrator does it, with payloads passed by value between them.

use share_core::{
    CandidateDisposition, EndpointId, IceCandidate, NegotiationError, NegotiationState,
    RemoteOutcome, SessionDescription, SignalingState,
};

fn pair() -> (NegotiationState, NegotiationState) {
    let a = EndpointId::new("connectionA");
    let b = EndpointId::new("connectionB");
    (
        NegotiationState::new(a.clone(), Some(b.clone())),
        NegotiationState::new(b, Some(a)),
    )
}

/// Runs offer → answer → apply answer with `offerer` starting.
fn handshake(offerer: &mut NegotiationState, answerer: &mut NegotiationState, round: u32) {
    offerer.check_create_offer().expect("offerer is stable");
    let offer = SessionDescription::offer(format!("v=0\r\no=offer {round}\r\n"));
    offerer.commit_local_description(offer.clone()).expect("set local offer");

    answerer.commit_remote_description(offer).expect("set remote offer");
    answerer.check_create_answer().expect("remote offer pending");
    let answer = SessionDescription::answer(format!("v=0\r\no=answer {round}\r\n"));
    answerer.commit_local_description(answer.clone()).expect("set local answer");

    offerer.commit_remote_description(answer).expect("set remote answer");
}

#[test]
fn test_three_step_handshake_reaches_stable_with_matching_descriptions() {
    // Arrange
    let (mut a, mut b) = pair();

    // Act
    handshake(&mut a, &mut b, 1);

    // Assert
    assert_eq!(a.signaling(), SignalingState::Stable);
    assert_eq!(b.signaling(), SignalingState::Stable);
    assert_eq!(a.local_description(), b.remote_description());
    assert_eq!(a.remote_description(), b.local_description());
    assert_eq!((a.round(), b.round()), (1, 1));
}

#[test]
fn test_renegotiation_round_increments_on_both_sides() {
    let (mut a, mut b) = pair();
    handshake(&mut a, &mut b, 1);

    assert!(a.mark_negotiation_needed());
    assert!(a.take_negotiation_needed());
    handshake(&mut a, &mut b, 2);

    assert_eq!((a.round(), b.round()), (2, 2));
    assert_eq!(a.local_description(), b.remote_description());
}

#[test]
fn test_early_candidates_are_flushed_in_arrival_order_and_never_lost() {
    // Arrange: three candidates from A overtake A's offer.
    let (mut a, mut b) = pair();
    let sent: Vec<IceCandidate> = (1..=3)
        .map(|i| IceCandidate::new(format!("candidate:{i} 1 udp 2130706431 127.0.0.1 5000{i} typ host")))
        .collect();
    for c in &sent {
        assert!(matches!(
            b.accept_remote_candidate(c.clone()).unwrap(),
            CandidateDisposition::Buffered { .. }
        ));
    }
    let offer = SessionDescription::offer("v=0\r\n");
    a.commit_local_description(offer.clone()).unwrap();

    // Act
    let outcome = b.commit_remote_description(offer).unwrap();

    // Assert
    let RemoteOutcome::Applied { flushed, .. } = outcome else {
        panic!("expected Applied, got {outcome:?}");
    };
    assert_eq!(flushed, sent);
    let late = IceCandidate::new("candidate:4");
    assert_eq!(
        b.accept_remote_candidate(late.clone()).unwrap(),
        CandidateDisposition::Apply(late)
    );
}

#[test]
fn test_glare_converges_to_stable_on_both_sides() {
    // Arrange: both endpoints create an offer at the same time.
    let (mut a, mut b) = pair();
    let offer_a = SessionDescription::offer("v=0\r\no=A\r\n");
    let offer_b = SessionDescription::offer("v=0\r\no=B\r\n");
    a.commit_local_description(offer_a.clone()).unwrap();
    b.commit_local_description(offer_b.clone()).unwrap();

    // Act: the offers cross.
    let at_a = a.commit_remote_description(offer_b).unwrap();
    let at_b = b.commit_remote_description(offer_a).unwrap();
    let answer = SessionDescription::answer("v=0\r\no=B-answer\r\n");
    b.commit_local_description(answer.clone()).unwrap();
    a.commit_remote_description(answer).unwrap();

    // Assert
    assert_eq!(at_a, RemoteOutcome::IgnoredGlare, "connectionA sorts first and wins");
    assert!(matches!(at_b, RemoteOutcome::Applied { rolled_back: true, .. }));
    assert_eq!(a.signaling(), SignalingState::Stable);
    assert_eq!(b.signaling(), SignalingState::Stable);
    assert_eq!(a.local_description(), b.remote_description());
}

#[test]
fn test_create_answer_while_stable_fails_without_side_effects() {
    let (_, b) = pair();
    let before = b.snapshot();

    let err = b.check_create_answer().unwrap_err();

    assert!(matches!(err, NegotiationError::InvalidState { .. }));
    assert_eq!(b.snapshot(), before);
}
