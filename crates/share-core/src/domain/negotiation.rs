//! The per-endpoint negotiation state machine.
//!
//! [`NegotiationState`] owns everything one endpoint needs to
//! decide *whether* an operation is legal and *what* it changes:
//!
//! - the signaling state and the two description slots (local, remote),
//! - the ICE gathering and connection states,
//! - the FIFO buffer of remote candidates that arrived too early,
//! - the negotiation round counter and the renegotiation flag.
//!
//! It never talks to a transport.  Callers follow a *check → apply → commit*
//! sequence: check the operation here, apply it to the media transport, and
//! only then commit the transition here.  A failure in the middle therefore
//! leaves the state exactly as it was (no partial transitions).
//!
//! # Candidate buffering (for beginners)
//!
//! A remote candidate describes a network path *on the peer*.  The transport
//! can only use it once it knows the peer's session description, because the
//! description carries the credentials the path is checked with.  Since
//! candidates and descriptions travel independently, a candidate can overtake
//! the description it belongs to.  Such early candidates are queued here and
//! handed back, in arrival order, the moment the remote description is
//! committed.

use std::collections::VecDeque;

use thiserror::Error;
use tracing::debug;

use crate::domain::candidate::IceCandidate;
use crate::domain::description::{DescriptionError, SdpKind, SessionDescription};
use crate::domain::endpoint::{EndpointId, NegotiationRole};
use crate::domain::state::{IceConnectionState, IceGatheringState, SignalingState};

/// Errors raised by negotiation operations.  None of them mutate state.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NegotiationError {
    /// The operation is not valid in the current signaling state.
    #[error("cannot {operation} while signaling state is {state}")]
    InvalidState {
        operation: &'static str,
        state: SignalingState,
    },

    /// The description is malformed or was rejected.
    #[error(transparent)]
    Description(#[from] DescriptionError),

    /// A transport-driven ICE state change skipped or reversed a step.
    #[error("illegal {axis} transition {from} -> {to}")]
    InvalidTransition {
        axis: &'static str,
        from: String,
        to: String,
    },

    /// The endpoint has been torn down.
    #[error("endpoint {0} is closed")]
    Closed(EndpointId),
}

/// What happened to a remote candidate handed to
/// [`NegotiationState::accept_remote_candidate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateDisposition {
    /// No remote description yet; the candidate was queued.
    Buffered { pending: usize },
    /// The caller must apply this candidate to the transport now.
    Apply(IceCandidate),
}

/// How a remote description must be applied to the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemotePlan {
    /// Apply directly.
    Apply,
    /// Glare, and this endpoint yields: roll back the local offer first.
    RollbackThenApply,
    /// Glare, and this endpoint wins: drop the remote offer.
    IgnoreGlare,
}

/// Result of committing a remote description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteOutcome {
    /// The description is now the remote description.
    Applied {
        /// Buffered candidates to apply, oldest first.
        flushed: Vec<IceCandidate>,
        /// `true` if a pending local offer was rolled back first.
        rolled_back: bool,
    },
    /// The remote offer lost the glare tie-break and was dropped.
    IgnoredGlare,
}

/// Read-only copy of an endpoint's negotiation state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointSnapshot {
    pub endpoint_id: EndpointId,
    pub signaling: SignalingState,
    pub gathering: IceGatheringState,
    pub connection: IceConnectionState,
    pub local_description: Option<SessionDescription>,
    pub remote_description: Option<SessionDescription>,
    pub pending_candidates: usize,
    pub applied_candidates: u64,
    pub round: u64,
}

/// Negotiation state of one endpoint.
#[derive(Debug, Clone)]
pub struct NegotiationState {
    endpoint_id: EndpointId,
    peer_id: Option<EndpointId>,
    signaling: SignalingState,
    gathering: IceGatheringState,
    connection: IceConnectionState,
    local_description: Option<SessionDescription>,
    remote_description: Option<SessionDescription>,
    /// Committed local description to restore if the pending offer is rolled back.
    rollback_local: Option<SessionDescription>,
    pending_candidates: VecDeque<IceCandidate>,
    applied_candidates: u64,
    round: u64,
    negotiation_needed: bool,
}

impl NegotiationState {
    /// Creates a fresh endpoint in `stable` / `new` / `new`.
    ///
    /// `peer_id` is required for glare resolution; without it a colliding
    /// remote offer is rejected as an invalid state.
    pub fn new(endpoint_id: EndpointId, peer_id: Option<EndpointId>) -> Self {
        Self {
            endpoint_id,
            peer_id,
            signaling: SignalingState::Stable,
            gathering: IceGatheringState::New,
            connection: IceConnectionState::New,
            local_description: None,
            remote_description: None,
            rollback_local: None,
            pending_candidates: VecDeque::new(),
            applied_candidates: 0,
            round: 0,
            negotiation_needed: false,
        }
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    pub fn endpoint_id(&self) -> &EndpointId {
        &self.endpoint_id
    }

    pub fn peer_id(&self) -> Option<&EndpointId> {
        self.peer_id.as_ref()
    }

    pub fn signaling(&self) -> SignalingState {
        self.signaling
    }

    pub fn gathering(&self) -> IceGatheringState {
        self.gathering
    }

    pub fn connection(&self) -> IceConnectionState {
        self.connection
    }

    pub fn local_description(&self) -> Option<&SessionDescription> {
        self.local_description.as_ref()
    }

    pub fn remote_description(&self) -> Option<&SessionDescription> {
        self.remote_description.as_ref()
    }

    pub fn pending_candidates(&self) -> usize {
        self.pending_candidates.len()
    }

    /// Number of completed offer/answer exchanges.
    pub fn round(&self) -> u64 {
        self.round
    }

    pub fn is_closed(&self) -> bool {
        self.signaling == SignalingState::Closed
    }

    /// Role of this endpoint relative to its peer, if the peer is known.
    pub fn role(&self) -> Option<NegotiationRole> {
        self.peer_id
            .as_ref()
            .map(|peer| NegotiationRole::for_pair(&self.endpoint_id, peer))
    }

    pub fn snapshot(&self) -> EndpointSnapshot {
        EndpointSnapshot {
            endpoint_id: self.endpoint_id.clone(),
            signaling: self.signaling,
            gathering: self.gathering,
            connection: self.connection,
            local_description: self.local_description.clone(),
            remote_description: self.remote_description.clone(),
            pending_candidates: self.pending_candidates.len(),
            applied_candidates: self.applied_candidates,
            round: self.round,
        }
    }

    // ── Offer / answer creation ──────────────────────────────────────────────

    /// Checks that an offer may be created: only in `stable`.
    ///
    /// # Errors
    ///
    /// [`NegotiationError::InvalidState`] outside `stable`,
    /// [`NegotiationError::Closed`] after teardown.
    pub fn check_create_offer(&self) -> Result<(), NegotiationError> {
        self.ensure_open()?;
        if self.signaling != SignalingState::Stable {
            return Err(NegotiationError::InvalidState {
                operation: "create offer",
                state: self.signaling,
            });
        }
        Ok(())
    }

    /// Checks that an answer may be created: only with an unanswered remote offer.
    ///
    /// # Errors
    ///
    /// [`NegotiationError::InvalidState`] unless in `have-remote-offer`.
    pub fn check_create_answer(&self) -> Result<(), NegotiationError> {
        self.ensure_open()?;
        if self.signaling != SignalingState::HaveRemoteOffer {
            return Err(NegotiationError::InvalidState {
                operation: "create answer",
                state: self.signaling,
            });
        }
        Ok(())
    }

    // ── Local description ────────────────────────────────────────────────────

    /// Validates a local description and returns the signaling state it leads to.
    ///
    /// # Errors
    ///
    /// [`NegotiationError::Description`] for a malformed payload,
    /// [`NegotiationError::InvalidState`] when the kind does not fit the state.
    pub fn check_local_description(
        &self,
        desc: &SessionDescription,
    ) -> Result<SignalingState, NegotiationError> {
        self.ensure_open()?;
        desc.validate()?;
        match (self.signaling, desc.kind) {
            (SignalingState::Stable, SdpKind::Offer) => Ok(SignalingState::HaveLocalOffer),
            (SignalingState::HaveRemoteOffer, SdpKind::Answer) => Ok(SignalingState::Stable),
            (state, SdpKind::Offer) => Err(NegotiationError::InvalidState {
                operation: "set local offer",
                state,
            }),
            (state, SdpKind::Answer) => Err(NegotiationError::InvalidState {
                operation: "set local answer",
                state,
            }),
        }
    }

    /// Commits a local description that the transport has accepted.
    ///
    /// Returns the new signaling state.
    ///
    /// # Errors
    ///
    /// Same as [`check_local_description`](Self::check_local_description);
    /// on error nothing changes.
    pub fn commit_local_description(
        &mut self,
        desc: SessionDescription,
    ) -> Result<SignalingState, NegotiationError> {
        let next = self.check_local_description(&desc)?;
        match desc.kind {
            SdpKind::Offer => {
                self.rollback_local = self.local_description.take();
            }
            SdpKind::Answer => {
                self.rollback_local = None;
                self.round += 1;
            }
        }
        self.local_description = Some(desc);
        self.signaling = next;
        Ok(next)
    }

    /// Abandons a pending local offer and returns to `stable`.
    ///
    /// The previously committed local description (if any) is restored.
    ///
    /// # Errors
    ///
    /// [`NegotiationError::InvalidState`] unless in `have-local-offer`.
    pub fn rollback_local_offer(&mut self) -> Result<(), NegotiationError> {
        self.ensure_open()?;
        if self.signaling != SignalingState::HaveLocalOffer {
            return Err(NegotiationError::InvalidState {
                operation: "roll back local offer",
                state: self.signaling,
            });
        }
        self.local_description = self.rollback_local.take();
        self.signaling = SignalingState::Stable;
        debug!(endpoint = %self.endpoint_id, "local offer rolled back");
        Ok(())
    }

    // ── Remote description ───────────────────────────────────────────────────

    /// Decides how a remote description must be applied.
    ///
    /// A remote offer arriving in `have-local-offer` is glare: the designated
    /// offerer (smaller id) ignores it, the other endpoint rolls back first.
    ///
    /// # Errors
    ///
    /// [`NegotiationError::Description`] for a malformed payload,
    /// [`NegotiationError::InvalidState`] for an answer with no pending offer,
    /// or glare without a known peer.
    pub fn plan_remote_description(
        &self,
        desc: &SessionDescription,
    ) -> Result<RemotePlan, NegotiationError> {
        self.ensure_open()?;
        desc.validate()?;
        match (self.signaling, desc.kind) {
            (SignalingState::Stable, SdpKind::Offer) => Ok(RemotePlan::Apply),
            (SignalingState::HaveLocalOffer, SdpKind::Answer) => Ok(RemotePlan::Apply),
            (SignalingState::HaveLocalOffer, SdpKind::Offer) => match self.role() {
                Some(NegotiationRole::Offerer) => Ok(RemotePlan::IgnoreGlare),
                Some(NegotiationRole::Answerer) => Ok(RemotePlan::RollbackThenApply),
                None => Err(NegotiationError::InvalidState {
                    operation: "set remote offer",
                    state: self.signaling,
                }),
            },
            (state, SdpKind::Offer) => Err(NegotiationError::InvalidState {
                operation: "set remote offer",
                state,
            }),
            (state, SdpKind::Answer) => Err(NegotiationError::InvalidState {
                operation: "set remote answer",
                state,
            }),
        }
    }

    /// Commits a remote description according to `plan`.
    ///
    /// Buffered candidates are drained and returned in arrival order; the
    /// caller applies them to the transport before any newer candidate.
    ///
    /// # Errors
    ///
    /// Re-validates with [`plan_remote_description`](Self::plan_remote_description);
    /// on error nothing changes.
    pub fn commit_remote_description(
        &mut self,
        desc: SessionDescription,
    ) -> Result<RemoteOutcome, NegotiationError> {
        let plan = self.plan_remote_description(&desc)?;
        let rolled_back = match plan {
            RemotePlan::IgnoreGlare => {
                debug!(endpoint = %self.endpoint_id, "glare: keeping local offer, ignoring remote offer");
                return Ok(RemoteOutcome::IgnoredGlare);
            }
            RemotePlan::RollbackThenApply => {
                self.rollback_local_offer()?;
                true
            }
            RemotePlan::Apply => false,
        };

        match desc.kind {
            SdpKind::Offer => {
                self.signaling = SignalingState::HaveRemoteOffer;
            }
            SdpKind::Answer => {
                self.signaling = SignalingState::Stable;
                self.rollback_local = None;
                self.round += 1;
            }
        }
        self.remote_description = Some(desc);

        let flushed: Vec<IceCandidate> = self.pending_candidates.drain(..).collect();
        self.applied_candidates += flushed.len() as u64;
        if !flushed.is_empty() {
            debug!(
                endpoint = %self.endpoint_id,
                count = flushed.len(),
                "flushing buffered remote candidates"
            );
        }
        Ok(RemoteOutcome::Applied {
            flushed,
            rolled_back,
        })
    }

    // ── Candidates ───────────────────────────────────────────────────────────

    /// Accepts a remote candidate at any time.
    ///
    /// Before the first remote description it is buffered (FIFO); afterwards
    /// it is returned for immediate application.
    ///
    /// # Errors
    ///
    /// [`NegotiationError::Closed`] after teardown.
    pub fn accept_remote_candidate(
        &mut self,
        candidate: IceCandidate,
    ) -> Result<CandidateDisposition, NegotiationError> {
        self.ensure_open()?;
        if self.remote_description.is_none() {
            self.pending_candidates.push_back(candidate);
            return Ok(CandidateDisposition::Buffered {
                pending: self.pending_candidates.len(),
            });
        }
        self.applied_candidates += 1;
        Ok(CandidateDisposition::Apply(candidate))
    }

    // ── Transport-driven ICE states ──────────────────────────────────────────

    /// Records a gathering state reported by the transport.
    ///
    /// Returns `false` for a repeat of the current state.
    ///
    /// # Errors
    ///
    /// [`NegotiationError::InvalidTransition`] if the step is illegal.
    pub fn apply_gathering_state(&mut self, next: IceGatheringState) -> Result<bool, NegotiationError> {
        if next == self.gathering {
            return Ok(false);
        }
        if !self.gathering.can_transition_to(next) {
            return Err(NegotiationError::InvalidTransition {
                axis: "ice gathering",
                from: self.gathering.to_string(),
                to: next.to_string(),
            });
        }
        self.gathering = next;
        Ok(true)
    }

    /// Records a connection state reported by the transport.
    ///
    /// Returns `false` for a repeat of the current state.
    ///
    /// # Errors
    ///
    /// [`NegotiationError::InvalidTransition`] if the step is illegal.
    pub fn apply_connection_state(&mut self, next: IceConnectionState) -> Result<bool, NegotiationError> {
        if next == self.connection {
            return Ok(false);
        }
        if !self.connection.can_transition_to(next) {
            return Err(NegotiationError::InvalidTransition {
                axis: "ice connection",
                from: self.connection.to_string(),
                to: next.to_string(),
            });
        }
        self.connection = next;
        Ok(true)
    }

    // ── Renegotiation ────────────────────────────────────────────────────────

    /// Records that the transport topology changed after the first handshake.
    ///
    /// Returns `true` if a new round can start right away (`stable`).
    pub fn mark_negotiation_needed(&mut self) -> bool {
        self.negotiation_needed = true;
        self.signaling == SignalingState::Stable
    }

    /// Clears and returns the renegotiation flag if the endpoint is `stable`.
    pub fn take_negotiation_needed(&mut self) -> bool {
        if self.signaling == SignalingState::Stable && self.negotiation_needed {
            self.negotiation_needed = false;
            return true;
        }
        false
    }

    // ── Teardown ─────────────────────────────────────────────────────────────

    /// Moves every axis to its closed state and drops buffered candidates.
    ///
    /// Returns `false` if the endpoint was already closed.
    pub fn close(&mut self) -> bool {
        if self.is_closed() {
            return false;
        }
        self.signaling = SignalingState::Closed;
        self.connection = IceConnectionState::Closed;
        self.pending_candidates.clear();
        self.negotiation_needed = false;
        true
    }

    fn ensure_open(&self) -> Result<(), NegotiationError> {
        if self.is_closed() {
            return Err(NegotiationError::Closed(self.endpoint_id.clone()));
        }
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(id: &str, peer: &str) -> NegotiationState {
        NegotiationState::new(EndpointId::new(id), Some(EndpointId::new(peer)))
    }

    fn offer(tag: &str) -> SessionDescription {
        SessionDescription::offer(format!("v=0\r\no=- {tag}\r\n"))
    }

    fn answer(tag: &str) -> SessionDescription {
        SessionDescription::answer(format!("v=0\r\no=- {tag}\r\n"))
    }

    // ── Offerer path ─────────────────────────────────────────────────────────

    #[test]
    fn test_new_endpoint_is_stable_with_no_descriptions() {
        let ep = endpoint("a", "b");
        assert_eq!(ep.signaling(), SignalingState::Stable);
        assert_eq!(ep.gathering(), IceGatheringState::New);
        assert_eq!(ep.connection(), IceConnectionState::New);
        assert!(ep.local_description().is_none());
        assert!(ep.remote_description().is_none());
    }

    #[test]
    fn test_local_offer_moves_to_have_local_offer() {
        // Arrange
        let mut ep = endpoint("a", "b");

        // Act
        let next = ep.commit_local_description(offer("1")).unwrap();

        // Assert
        assert_eq!(next, SignalingState::HaveLocalOffer);
        assert_eq!(ep.local_description(), Some(&offer("1")));
    }

    #[test]
    fn test_remote_answer_completes_offerer_round() {
        // Arrange
        let mut ep = endpoint("a", "b");
        ep.commit_local_description(offer("1")).unwrap();

        // Act
        let outcome = ep.commit_remote_description(answer("1")).unwrap();

        // Assert
        assert!(matches!(outcome, RemoteOutcome::Applied { rolled_back: false, .. }));
        assert_eq!(ep.signaling(), SignalingState::Stable);
        assert_eq!(ep.round(), 1);
    }

    #[test]
    fn test_create_offer_outside_stable_fails() {
        let mut ep = endpoint("a", "b");
        ep.commit_local_description(offer("1")).unwrap();

        let err = ep.check_create_offer().unwrap_err();

        assert_eq!(
            err,
            NegotiationError::InvalidState {
                operation: "create offer",
                state: SignalingState::HaveLocalOffer
            }
        );
    }

    #[test]
    fn test_second_local_offer_in_same_round_is_rejected() {
        // A committed round must not be silently overwritten.
        let mut ep = endpoint("a", "b");
        ep.commit_local_description(offer("1")).unwrap();

        let err = ep.commit_local_description(offer("2")).unwrap_err();

        assert!(matches!(err, NegotiationError::InvalidState { .. }));
        assert_eq!(ep.local_description(), Some(&offer("1")));
    }

    // ── Answerer path ────────────────────────────────────────────────────────

    #[test]
    fn test_remote_offer_then_local_answer_returns_to_stable() {
        let mut ep = endpoint("b", "a");

        ep.commit_remote_description(offer("1")).unwrap();
        assert_eq!(ep.signaling(), SignalingState::HaveRemoteOffer);
        ep.check_create_answer().unwrap();
        ep.commit_local_description(answer("1")).unwrap();

        assert_eq!(ep.signaling(), SignalingState::Stable);
        assert_eq!(ep.round(), 1);
    }

    #[test]
    fn test_create_answer_in_stable_fails_and_leaves_state_unchanged() {
        // Arrange
        let ep = endpoint("b", "a");
        let before = ep.snapshot();

        // Act
        let err = ep.check_create_answer().unwrap_err();

        // Assert
        assert_eq!(
            err,
            NegotiationError::InvalidState {
                operation: "create answer",
                state: SignalingState::Stable
            }
        );
        assert_eq!(ep.snapshot(), before);
    }

    #[test]
    fn test_local_answer_without_remote_offer_fails() {
        let mut ep = endpoint("b", "a");
        let err = ep.commit_local_description(answer("1")).unwrap_err();
        assert!(matches!(
            err,
            NegotiationError::InvalidState {
                operation: "set local answer",
                ..
            }
        ));
    }

    #[test]
    fn test_remote_answer_in_stable_fails() {
        let mut ep = endpoint("a", "b");
        let err = ep.commit_remote_description(answer("1")).unwrap_err();
        assert!(matches!(
            err,
            NegotiationError::InvalidState {
                operation: "set remote answer",
                state: SignalingState::Stable
            }
        ));
    }

    // ── Malformed descriptions ───────────────────────────────────────────────

    #[test]
    fn test_malformed_remote_offer_leaves_state_unchanged() {
        // Arrange
        let mut ep = endpoint("b", "a");
        ep.accept_remote_candidate(IceCandidate::new("c1")).unwrap();
        let before = ep.snapshot();

        // Act
        let err = ep
            .commit_remote_description(SessionDescription::offer(""))
            .unwrap_err();

        // Assert
        assert!(matches!(err, NegotiationError::Description(_)));
        assert_eq!(ep.snapshot(), before, "no partial transition allowed");
    }

    // ── Candidates ───────────────────────────────────────────────────────────

    #[test]
    fn test_candidates_before_remote_description_are_buffered_in_order() {
        // Arrange
        let mut ep = endpoint("b", "a");
        for name in ["c1", "c2", "c3"] {
            let disposition = ep.accept_remote_candidate(IceCandidate::new(name)).unwrap();
            assert!(matches!(disposition, CandidateDisposition::Buffered { .. }));
        }

        // Act
        let outcome = ep.commit_remote_description(offer("1")).unwrap();

        // Assert
        let RemoteOutcome::Applied { flushed, .. } = outcome else {
            panic!("expected Applied, got {outcome:?}");
        };
        let names: Vec<&str> = flushed.iter().map(|c| c.candidate.as_str()).collect();
        assert_eq!(names, vec!["c1", "c2", "c3"]);
        assert_eq!(ep.pending_candidates(), 0);
        assert_eq!(ep.snapshot().applied_candidates, 3);
    }

    #[test]
    fn test_candidates_after_remote_description_apply_immediately() {
        let mut ep = endpoint("b", "a");
        ep.commit_remote_description(offer("1")).unwrap();

        let disposition = ep.accept_remote_candidate(IceCandidate::new("late")).unwrap();

        assert_eq!(disposition, CandidateDisposition::Apply(IceCandidate::new("late")));
    }

    #[test]
    fn test_buffered_count_is_reported() {
        let mut ep = endpoint("b", "a");
        ep.accept_remote_candidate(IceCandidate::new("c1")).unwrap();
        let second = ep.accept_remote_candidate(IceCandidate::new("c2")).unwrap();
        assert_eq!(second, CandidateDisposition::Buffered { pending: 2 });
    }

    // ── Glare ────────────────────────────────────────────────────────────────

    #[test]
    fn test_glare_designated_offerer_ignores_remote_offer() {
        // Arrange: "a" < "b", so "a" is the designated offerer.
        let mut a = endpoint("a", "b");
        a.commit_local_description(offer("a1")).unwrap();

        // Act
        let outcome = a.commit_remote_description(offer("b1")).unwrap();

        // Assert
        assert_eq!(outcome, RemoteOutcome::IgnoredGlare);
        assert_eq!(a.signaling(), SignalingState::HaveLocalOffer);
        assert_eq!(a.local_description(), Some(&offer("a1")));
        assert!(a.remote_description().is_none());
    }

    #[test]
    fn test_glare_answerer_rolls_back_and_accepts_remote_offer() {
        // Arrange
        let mut b = endpoint("b", "a");
        b.commit_local_description(offer("b1")).unwrap();

        // Act
        let outcome = b.commit_remote_description(offer("a1")).unwrap();

        // Assert
        assert!(matches!(outcome, RemoteOutcome::Applied { rolled_back: true, .. }));
        assert_eq!(b.signaling(), SignalingState::HaveRemoteOffer);
        assert!(b.local_description().is_none(), "pending offer must be discarded");
    }

    #[test]
    fn test_rollback_restores_previous_committed_local_description() {
        // Arrange: complete one round as answerer, then start a local offer.
        let mut b = endpoint("b", "a");
        b.commit_remote_description(offer("a1")).unwrap();
        b.commit_local_description(answer("b1")).unwrap();
        b.commit_local_description(offer("b2")).unwrap();

        // Act
        b.rollback_local_offer().unwrap();

        // Assert
        assert_eq!(b.signaling(), SignalingState::Stable);
        assert_eq!(b.local_description(), Some(&answer("b1")));
    }

    #[test]
    fn test_glare_without_peer_is_invalid_state() {
        let mut ep = NegotiationState::new(EndpointId::new("x"), None);
        ep.commit_local_description(offer("x1")).unwrap();
        let err = ep.commit_remote_description(offer("y1")).unwrap_err();
        assert!(matches!(err, NegotiationError::InvalidState { .. }));
    }

    // ── ICE states ───────────────────────────────────────────────────────────

    #[test]
    fn test_gathering_repeat_is_not_a_change() {
        let mut ep = endpoint("a", "b");
        assert!(ep.apply_gathering_state(IceGatheringState::Gathering).unwrap());
        assert!(!ep.apply_gathering_state(IceGatheringState::Gathering).unwrap());
    }

    #[test]
    fn test_connection_state_rejects_skipping_checking() {
        let mut ep = endpoint("a", "b");
        let err = ep
            .apply_connection_state(IceConnectionState::Completed)
            .unwrap_err();
        assert!(matches!(err, NegotiationError::InvalidTransition { .. }));
        assert_eq!(ep.connection(), IceConnectionState::New);
    }

    // ── Renegotiation ────────────────────────────────────────────────────────

    #[test]
    fn test_negotiation_needed_is_deferred_until_stable() {
        // Arrange
        let mut ep = endpoint("a", "b");
        ep.commit_local_description(offer("1")).unwrap();

        // Act
        let can_start_now = ep.mark_negotiation_needed();

        // Assert
        assert!(!can_start_now);
        assert!(!ep.take_negotiation_needed());
        ep.commit_remote_description(answer("1")).unwrap();
        assert!(ep.take_negotiation_needed());
        assert!(!ep.take_negotiation_needed(), "flag is cleared once taken");
    }

    // ── Teardown ─────────────────────────────────────────────────────────────

    #[test]
    fn test_close_is_idempotent_and_blocks_operations() {
        let mut ep = endpoint("a", "b");
        ep.accept_remote_candidate(IceCandidate::new("c1")).unwrap();

        assert!(ep.close());
        assert!(!ep.close());
        assert_eq!(ep.pending_candidates(), 0);
        assert_eq!(ep.connection(), IceConnectionState::Closed);
        assert!(matches!(
            ep.check_create_offer(),
            Err(NegotiationError::Closed(_))
        ));
        assert!(matches!(
            ep.accept_remote_candidate(IceCandidate::new("c2")),
            Err(NegotiationError::Closed(_))
        ));
    }
}
