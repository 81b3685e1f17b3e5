//! NegotiationEngine: one endpoint's offer/answer/candidate driver.
//!
//! The engine pairs a pure [`NegotiationState`] with a [`MediaConnection`].
//! Every operation runs under one `tokio::sync::Mutex`, so an endpoint's
//! description slots and candidate buffer have exactly one writer at a time.
//!
//! Each mutating operation follows the same three steps:
//!
//! 1. check the operation against the state machine,
//! 2. apply it to the media connection,
//! 3. commit the transition.
//!
//! If step 2 fails, step 3 never runs and the endpoint is unchanged.  If the
//! engine was closed while step 2 was in flight, step 3 is skipped as well,
//! so late completions cannot resurrect a torn-down endpoint.
//!
//! Observers subscribe to [`EndpointEvent`]s through
//! [`NegotiationEngine::subscribe`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use share_core::{
    CandidateDisposition, EndpointId, EndpointSnapshot, IceCandidate, IceConnectionState,
    IceGatheringState, NegotiationError, NegotiationRole, NegotiationState, RemoteOutcome,
    RemotePlan, SdpKind, SessionDescription, SignalingState,
};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use crate::application::error::SessionError;
use crate::application::media::{
    DataChannel, MediaConnection, RemoteVideoTrack, TransportEvent, VideoSink,
};

const EVENT_CAPACITY: usize = 256;

/// A state transition or notable occurrence on one endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointEvent {
    SignalingChanged {
        endpoint: EndpointId,
        state: SignalingState,
    },
    GatheringChanged {
        endpoint: EndpointId,
        state: IceGatheringState,
    },
    ConnectionChanged {
        endpoint: EndpointId,
        state: IceConnectionState,
    },
    /// A locally gathered candidate, ready to be forwarded.
    LocalCandidate {
        endpoint: EndpointId,
        candidate: IceCandidate,
    },
    /// A remote candidate arrived before the remote description.
    CandidateBuffered { endpoint: EndpointId, pending: usize },
    /// The transport refused a remote candidate.  Not fatal.
    CandidateRejected { endpoint: EndpointId, reason: String },
    /// A colliding remote offer was dropped (this endpoint is the designated offerer).
    GlareIgnored { endpoint: EndpointId },
    /// A pending local offer was abandoned in favour of the remote one.
    RolledBack { endpoint: EndpointId },
    /// An offer/answer round completed and the endpoint is `stable` again.
    RoundCompleted { endpoint: EndpointId, round: u64 },
    NegotiationNeeded { endpoint: EndpointId },
    Closed { endpoint: EndpointId },
}

/// What the orchestrator has to do after a transport event was recorded.
pub enum TransportReaction {
    /// Nothing beyond the published event.
    None,
    /// Send this local candidate to the peer.
    ForwardCandidate(IceCandidate),
    /// Topology changed; start (or request) a new round.
    NegotiationNeeded,
    /// ICE is `connected` or `completed`.
    Connected,
    /// ICE reached `failed`.
    Failed,
    /// The peer opened a data channel.
    IncomingChannel(Arc<dyn DataChannel>),
    /// The peer started a video track.
    IncomingTrack(RemoteVideoTrack),
}

/// Negotiation driver for one local endpoint.
pub struct NegotiationEngine {
    id: EndpointId,
    state: Mutex<NegotiationState>,
    connection: Arc<dyn MediaConnection>,
    events: broadcast::Sender<EndpointEvent>,
    closed: AtomicBool,
}

impl NegotiationEngine {
    /// Creates an engine for `id` talking to `peer` over `connection`.
    pub fn new(id: EndpointId, peer: EndpointId, connection: Arc<dyn MediaConnection>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: Mutex::new(NegotiationState::new(id.clone(), Some(peer))),
            id,
            connection,
            events,
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &EndpointId {
        &self.id
    }

    pub fn connection(&self) -> &Arc<dyn MediaConnection> {
        &self.connection
    }

    /// Subscription point for this endpoint's transition events.
    pub fn subscribe(&self) -> broadcast::Receiver<EndpointEvent> {
        self.events.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Role of this endpoint for its peer.
    pub async fn role(&self) -> NegotiationRole {
        self.state.lock().await.role().unwrap_or(NegotiationRole::Offerer)
    }

    pub async fn snapshot(&self) -> EndpointSnapshot {
        self.state.lock().await.snapshot()
    }

    pub async fn signaling_state(&self) -> SignalingState {
        self.state.lock().await.signaling()
    }

    // ── Offer / answer ───────────────────────────────────────────────────────

    /// Creates an offer.  Valid only in `stable`; no state changes.
    ///
    /// # Errors
    ///
    /// [`NegotiationError::InvalidState`] outside `stable`, or a transport error.
    pub async fn create_offer(&self) -> Result<SessionDescription, SessionError> {
        let state = self.state.lock().await;
        state.check_create_offer()?;
        let offer = self.connection.create_offer().await?;
        offer.expect_kind(SdpKind::Offer).map_err(NegotiationError::from)?;
        debug!(endpoint = %self.id, "offer created");
        Ok(offer)
    }

    /// Creates an answer to the pending remote offer.
    ///
    /// # Errors
    ///
    /// [`NegotiationError::InvalidState`] unless in `have-remote-offer`.
    pub async fn create_answer(&self) -> Result<SessionDescription, SessionError> {
        let state = self.state.lock().await;
        state.check_create_answer()?;
        let answer = self.connection.create_answer().await?;
        answer.expect_kind(SdpKind::Answer).map_err(NegotiationError::from)?;
        debug!(endpoint = %self.id, "answer created");
        Ok(answer)
    }

    // ── Descriptions ─────────────────────────────────────────────────────────

    /// Applies a local description and commits the signaling transition.
    ///
    /// The media connection starts gathering candidates on the first call.
    ///
    /// # Errors
    ///
    /// Invalid state, malformed or rejected description, or closed endpoint.
    /// The endpoint is unchanged on error.
    pub async fn set_local_description(&self, desc: SessionDescription) -> Result<SignalingState, SessionError> {
        let mut state = self.state.lock().await;
        state.check_local_description(&desc)?;
        self.connection
            .set_local_description(&desc)
            .await
            .map_err(SessionError::from_description_transport)?;
        self.ensure_open()?;

        let kind = desc.kind;
        let next = state.commit_local_description(desc)?;
        debug!(endpoint = %self.id, %kind, state = %next, "local description set");
        self.publish(EndpointEvent::SignalingChanged {
            endpoint: self.id.clone(),
            state: next,
        });
        if next == SignalingState::Stable {
            self.round_completed(state.round());
        }
        Ok(next)
    }

    /// Applies a remote description.
    ///
    /// On glare the designated offerer drops the remote offer and the other
    /// endpoint rolls its own offer back first.  Buffered remote candidates
    /// are applied in arrival order once the description is committed.
    ///
    /// # Errors
    ///
    /// Invalid state, malformed or rejected description, or closed endpoint.
    pub async fn set_remote_description(&self, desc: SessionDescription) -> Result<RemoteOutcome, SessionError> {
        let mut state = self.state.lock().await;
        let plan = state.plan_remote_description(&desc)?;

        let rolled_back = match plan {
            RemotePlan::IgnoreGlare => {
                info!(endpoint = %self.id, "glare: remote offer ignored, keeping local offer");
                self.publish(EndpointEvent::GlareIgnored {
                    endpoint: self.id.clone(),
                });
                return Ok(state.commit_remote_description(desc)?);
            }
            RemotePlan::RollbackThenApply => {
                self.connection.rollback().await?;
                true
            }
            RemotePlan::Apply => false,
        };

        if let Err(e) = self.connection.set_remote_description(&desc).await {
            if rolled_back {
                self.restore_local_offer(&state).await;
            }
            return Err(SessionError::from_description_transport(e));
        }
        self.ensure_open()?;

        if rolled_back {
            state.rollback_local_offer()?;
            info!(endpoint = %self.id, "glare: local offer rolled back");
            self.publish(EndpointEvent::RolledBack {
                endpoint: self.id.clone(),
            });
        }

        let kind = desc.kind;
        let mut outcome = state.commit_remote_description(desc)?;
        if let RemoteOutcome::Applied { rolled_back: flag, .. } = &mut outcome {
            *flag |= rolled_back;
        }
        let next = state.signaling();
        debug!(endpoint = %self.id, %kind, state = %next, "remote description set");
        self.publish(EndpointEvent::SignalingChanged {
            endpoint: self.id.clone(),
            state: next,
        });

        if let RemoteOutcome::Applied { flushed, .. } = &outcome {
            for candidate in flushed {
                self.apply_candidate(candidate).await;
            }
        }
        if next == SignalingState::Stable {
            self.round_completed(state.round());
        }
        Ok(outcome)
    }

    /// Puts the pending local offer back on the transport after a rolled-back
    /// glare offer was rejected.
    async fn restore_local_offer(&self, state: &NegotiationState) {
        let Some(offer) = state.local_description() else {
            return;
        };
        if let Err(e) = self.connection.set_local_description(offer).await {
            warn!(endpoint = %self.id, "failed to restore local offer after rejected remote offer: {e}");
        }
    }

    // ── Candidates ───────────────────────────────────────────────────────────

    /// Accepts a remote candidate at any time.
    ///
    /// Before the remote description it is buffered; afterwards it goes to
    /// the transport directly.  A transport refusal is logged and published
    /// but is not an error: candidates are best-effort.
    ///
    /// # Errors
    ///
    /// [`NegotiationError::Closed`] after teardown.
    pub async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<CandidateDisposition, SessionError> {
        let mut state = self.state.lock().await;
        let disposition = state.accept_remote_candidate(candidate)?;
        match &disposition {
            CandidateDisposition::Buffered { pending } => {
                debug!(endpoint = %self.id, pending, "remote candidate buffered");
                self.publish(EndpointEvent::CandidateBuffered {
                    endpoint: self.id.clone(),
                    pending: *pending,
                });
            }
            CandidateDisposition::Apply(c) => self.apply_candidate(c).await,
        }
        Ok(disposition)
    }

    async fn apply_candidate(&self, candidate: &IceCandidate) {
        if let Err(e) = self.connection.add_ice_candidate(candidate).await {
            warn!(endpoint = %self.id, candidate = %candidate.candidate, "remote candidate rejected: {e}");
            self.publish(EndpointEvent::CandidateRejected {
                endpoint: self.id.clone(),
                reason: e.to_string(),
            });
        }
    }

    // ── Renegotiation ────────────────────────────────────────────────────────

    /// Flags that a new round is wanted.  Returns `true` if the endpoint is `stable`.
    pub async fn mark_negotiation_needed(&self) -> bool {
        self.state.lock().await.mark_negotiation_needed()
    }

    /// Clears and returns the renegotiation flag if the endpoint is `stable`.
    pub async fn take_negotiation_needed(&self) -> bool {
        self.state.lock().await.take_negotiation_needed()
    }

    // ── Tracks and channels ──────────────────────────────────────────────────

    pub async fn add_video_track(&self, track_id: &str) -> Result<Arc<dyn VideoSink>, SessionError> {
        self.ensure_open()?;
        Ok(self.connection.add_video_track(track_id).await?)
    }

    pub async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannel>, SessionError> {
        self.ensure_open()?;
        Ok(self.connection.create_data_channel(label).await?)
    }

    // ── Transport events ─────────────────────────────────────────────────────

    /// Records a transport event and tells the caller how to react.
    ///
    /// Events arriving after [`close`](Self::close) are dropped.
    pub async fn on_transport_event(&self, event: TransportEvent) -> TransportReaction {
        if self.is_closed() {
            return TransportReaction::None;
        }
        match event {
            TransportEvent::CandidateGenerated(candidate) => {
                self.publish(EndpointEvent::LocalCandidate {
                    endpoint: self.id.clone(),
                    candidate: candidate.clone(),
                });
                TransportReaction::ForwardCandidate(candidate)
            }
            TransportEvent::GatheringStateChanged(next) => {
                let changed = self.state.lock().await.apply_gathering_state(next);
                match changed {
                    Ok(true) => {
                        debug!(endpoint = %self.id, state = %next, "ice gathering state");
                        self.publish(EndpointEvent::GatheringChanged {
                            endpoint: self.id.clone(),
                            state: next,
                        });
                    }
                    Ok(false) => {}
                    Err(e) => warn!(endpoint = %self.id, "{e}"),
                }
                TransportReaction::None
            }
            TransportEvent::ConnectionStateChanged(next) => {
                let changed = self.state.lock().await.apply_connection_state(next);
                match changed {
                    Ok(true) => {
                        info!(endpoint = %self.id, state = %next, "ice connection state");
                        self.publish(EndpointEvent::ConnectionChanged {
                            endpoint: self.id.clone(),
                            state: next,
                        });
                        if next.is_established() {
                            TransportReaction::Connected
                        } else if next == IceConnectionState::Failed {
                            TransportReaction::Failed
                        } else {
                            TransportReaction::None
                        }
                    }
                    Ok(false) => TransportReaction::None,
                    Err(e) => {
                        warn!(endpoint = %self.id, "{e}");
                        TransportReaction::None
                    }
                }
            }
            TransportEvent::NegotiationNeeded => {
                self.state.lock().await.mark_negotiation_needed();
                debug!(endpoint = %self.id, "negotiation needed");
                self.publish(EndpointEvent::NegotiationNeeded {
                    endpoint: self.id.clone(),
                });
                TransportReaction::NegotiationNeeded
            }
            TransportEvent::DataChannelOpened(channel) => {
                info!(endpoint = %self.id, label = channel.label(), "remote data channel opened");
                TransportReaction::IncomingChannel(channel)
            }
            TransportEvent::RemoteTrack(track) => {
                info!(endpoint = %self.id, track = %track.track_id, "remote video track");
                TransportReaction::IncomingTrack(track)
            }
        }
    }

    // ── Teardown ─────────────────────────────────────────────────────────────

    /// Closes the media connection and the state machine.
    ///
    /// Returns `false` if the engine was already closed.
    pub async fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.connection.close().await;
        self.state.lock().await.close();
        debug!(endpoint = %self.id, "engine closed");
        self.publish(EndpointEvent::Closed {
            endpoint: self.id.clone(),
        });
        true
    }

    fn ensure_open(&self) -> Result<(), SessionError> {
        if self.is_closed() {
            return Err(NegotiationError::Closed(self.id.clone()).into());
        }
        Ok(())
    }

    fn round_completed(&self, round: u64) {
        info!(endpoint = %self.id, round, "negotiation round completed");
        self.publish(EndpointEvent::RoundCompleted {
            endpoint: self.id.clone(),
            round,
        });
    }

    fn publish(&self, event: EndpointEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::media::{MediaTransport, TransportError};
    use crate::infrastructure::loopback_media::LoopbackMediaTransport;

    async fn engine_pair() -> (NegotiationEngine, NegotiationEngine) {
        let transport = LoopbackMediaTransport::new();
        transport.initialize().unwrap();
        let a = EndpointId::new("connectionA");
        let b = EndpointId::new("connectionB");
        let conn_a = transport
            .create_connection(crate::application::media::ConnectionConfig::new(a.clone()))
            .await
            .unwrap();
        let conn_b = transport
            .create_connection(crate::application::media::ConnectionConfig::new(b.clone()))
            .await
            .unwrap();
        (
            NegotiationEngine::new(a.clone(), b.clone(), conn_a),
            NegotiationEngine::new(b, a, conn_b),
        )
    }

    #[tokio::test]
    async fn test_handshake_reaches_stable_on_both_engines() {
        // Arrange
        let (a, b) = engine_pair().await;

        // Act
        let offer = a.create_offer().await.unwrap();
        a.set_local_description(offer.clone()).await.unwrap();
        b.set_remote_description(offer).await.unwrap();
        let answer = b.create_answer().await.unwrap();
        b.set_local_description(answer.clone()).await.unwrap();
        a.set_remote_description(answer).await.unwrap();

        // Assert
        let (sa, sb) = (a.snapshot().await, b.snapshot().await);
        assert_eq!(sa.signaling, SignalingState::Stable);
        assert_eq!(sb.signaling, SignalingState::Stable);
        assert_eq!(sa.local_description, sb.remote_description);
        assert_eq!(sa.remote_description, sb.local_description);
    }

    #[tokio::test]
    async fn test_create_answer_in_stable_is_invalid_state() {
        let (_, b) = engine_pair().await;
        let before = b.snapshot().await;

        let err = b.create_answer().await.unwrap_err();

        assert!(err.is_invalid_state(), "got {err:?}");
        assert_eq!(b.snapshot().await, before);
    }

    #[tokio::test]
    async fn test_rejected_remote_description_leaves_state_unchanged() {
        // Arrange: a payload the loopback engine cannot parse.
        let (_, b) = engine_pair().await;
        let before = b.snapshot().await;

        // Act
        let err = b
            .set_remote_description(SessionDescription::offer("v=0\r\ns=no credentials\r\n"))
            .await
            .unwrap_err();

        // Assert
        assert!(err.is_description_error(), "got {err:?}");
        assert_eq!(b.snapshot().await, before);
    }

    #[tokio::test]
    async fn test_rejected_glare_offer_keeps_pending_local_offer() {
        // Arrange: the non-designated endpoint holds its own offer.
        let (a, b) = engine_pair().await;
        let own = b.create_offer().await.unwrap();
        b.set_local_description(own).await.unwrap();
        let before = b.snapshot().await;
        assert_eq!(before.signaling, SignalingState::HaveLocalOffer);
        let mut events = b.subscribe();

        // Act
        let err = b
            .set_remote_description(SessionDescription::offer("v=0\r\ns=no credentials\r\n"))
            .await
            .unwrap_err();

        // Assert: nothing moved, and a well-formed offer still rolls back cleanly.
        assert!(err.is_description_error(), "got {err:?}");
        assert_eq!(b.snapshot().await, before);
        assert!(events.try_recv().is_err(), "no rollback event on failure");
        let offer = a.create_offer().await.unwrap();
        a.set_local_description(offer.clone()).await.unwrap();
        let outcome = b.set_remote_description(offer).await.unwrap();
        assert!(matches!(outcome, RemoteOutcome::Applied { rolled_back: true, .. }));
        assert_eq!(b.signaling_state().await, SignalingState::HaveRemoteOffer);
    }

    #[tokio::test]
    async fn test_candidate_before_description_is_buffered_then_flushed() {
        let (a, b) = engine_pair().await;
        let mut events = b.subscribe();

        let disposition = b
            .add_remote_candidate(IceCandidate::new("candidate:1 1 udp 1 127.0.0.1 50000 typ host"))
            .await
            .unwrap();
        assert!(matches!(disposition, CandidateDisposition::Buffered { pending: 1 }));

        let offer = a.create_offer().await.unwrap();
        a.set_local_description(offer.clone()).await.unwrap();
        let outcome = b.set_remote_description(offer).await.unwrap();

        let RemoteOutcome::Applied { flushed, .. } = outcome else {
            panic!("expected Applied");
        };
        assert_eq!(flushed.len(), 1);
        assert!(matches!(
            events.try_recv().unwrap(),
            EndpointEvent::CandidateBuffered { pending: 1, .. }
        ));
    }

    #[tokio::test]
    async fn test_operations_after_close_are_rejected() {
        let (a, _) = engine_pair().await;

        assert!(a.close().await);
        assert!(!a.close().await, "second close is a no-op");

        let err = a.create_offer().await.unwrap_err();
        assert!(matches!(err, SessionError::Negotiation(NegotiationError::Closed(_))));
        assert!(matches!(
            a.on_transport_event(TransportEvent::NegotiationNeeded).await,
            TransportReaction::None
        ));
    }

    #[tokio::test]
    async fn test_failed_connection_state_is_reported() {
        let (a, _) = engine_pair().await;

        a.on_transport_event(TransportEvent::ConnectionStateChanged(IceConnectionState::Checking))
            .await;
        let reaction = a
            .on_transport_event(TransportEvent::ConnectionStateChanged(IceConnectionState::Failed))
            .await;

        assert!(matches!(reaction, TransportReaction::Failed));
        assert_eq!(a.snapshot().await.connection, IceConnectionState::Failed);
    }

    #[test]
    fn test_transport_error_is_wrapped() {
        let err: SessionError = TransportError::Closed.into();
        assert!(matches!(err, SessionError::Transport(TransportError::Closed)));
    }
}
