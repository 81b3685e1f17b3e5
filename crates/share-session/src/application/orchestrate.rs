//! SessionOrchestrator: runs a screen-share session end to end.
//!
//! The orchestrator owns one [`NegotiationEngine`] per local endpoint and a
//! pump task per endpoint that multiplexes two inputs:
//!
//! - transport events from the endpoint's media connection (gathered
//!   candidates, ICE state, channels and tracks opened by the peer),
//! - envelopes from the endpoint's signaling inbox.
//!
//! ```text
//!            ┌──────────── pump (per endpoint) ────────────┐
//! transport ─┤ on_transport: forward candidate, renegotiate │
//!   events   │                 route channel/track          │
//! signaling ─┤ on_signal: offer → answer, answer, candidate │
//!   inbox    └──────────────────────────────────────────────┘
//! ```
//!
//! [`SessionOrchestrator::start`] only spawns tasks and returns.  Every step
//! of the handshake checks the previous result; the first error halts that
//! endpoint's pump, sets the status to [`SessionStatus::Failed`] and publishes
//! [`SessionEvent::Failed`].  [`SessionOrchestrator::stop`] releases
//! everything exactly once.
//!
//! The endpoint whose id sorts first is the designated offerer.  It opens the
//! control data channel and starts every round; the other endpoint asks for
//! a round with [`SignalPayload::NegotiationRequest`].

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use share_core::{
    DataChannelState, EndpointId, EndpointSnapshot, PointerEvent, RemoteOutcome, SdpKind, SignalEnvelope,
    SignalPayload, SignalingState,
};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::application::capture_pipeline::{CapturePipeline, PipelineStats, TransportClock};
use crate::application::error::SessionError;
use crate::application::media::{
    BundlePolicy, ConnectionConfig, DataChannel, MediaTransport, RemoteVideoTrack, TransportError,
    TransportEvent,
};
use crate::application::negotiate::{EndpointEvent, NegotiationEngine, TransportReaction};
use crate::application::remote_input::{dispatch_remote_input, FrameRenderer, InputInjector, RemoteInputChannel};
use crate::application::signaling::{SignalingError, SignalingTransport};
use crate::infrastructure::frame_source::{CaptureSettings, FrameSource};

const EVENT_CAPACITY: usize = 256;

// ── Public types ──────────────────────────────────────────────────────────────

/// What a local endpoint does in the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    /// Captures and sends the screen; receives pointer events.
    Sharer,
    /// Renders the remote screen; sends pointer events.
    Viewer,
}

/// One endpoint hosted by this orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalEndpointSpec {
    pub id: EndpointId,
    pub role: SessionRole,
    pub peer: EndpointId,
}

impl LocalEndpointSpec {
    pub fn new(id: impl Into<EndpointId>, role: SessionRole, peer: impl Into<EndpointId>) -> Self {
        Self {
            id: id.into(),
            role,
            peer: peer.into(),
        }
    }
}

/// Session-wide settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    pub data_channel_label: String,
    pub video_track_id: String,
    pub capture: CaptureSettings,
    pub bundle_policy: BundlePolicy,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            data_channel_label: "channelA".to_string(),
            video_track_id: "screen".to_string(),
            capture: CaptureSettings::default(),
            bundle_policy: BundlePolicy::default(),
        }
    }
}

/// External collaborators.  Each one is optional.
#[derive(Default)]
pub struct SessionAttachments {
    /// Screen capture for the sharer.
    pub frame_source: Option<Arc<dyn FrameSource>>,
    /// Receives frames arriving on the viewer.
    pub renderer: Option<Arc<dyn FrameRenderer>>,
    /// Receives pointer events arriving on the sharer.
    pub injector: Option<Arc<dyn InputInjector>>,
}

/// Lifecycle of the whole session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    Negotiating,
    /// Every local endpoint reached ICE `connected`.
    Connected,
    /// The first error that halted the handshake.
    Failed(String),
    Stopped,
}

/// Notifications for the host application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A negotiation event from one of the engines.
    Endpoint(EndpointEvent),
    Connected { endpoint: EndpointId },
    DataChannelOpen { endpoint: EndpointId, label: String },
    RemoteTrack { endpoint: EndpointId, track_id: String },
    Failed { reason: String },
    Stopped,
}

// ── Internal endpoint record ──────────────────────────────────────────────────

type Streams = (
    mpsc::UnboundedReceiver<TransportEvent>,
    mpsc::UnboundedReceiver<SignalEnvelope>,
);

struct LocalEndpoint {
    spec: LocalEndpointSpec,
    engine: Arc<NegotiationEngine>,
    signaling: Arc<dyn SignalingTransport>,
    streams: Mutex<Option<Streams>>,
    channels: Mutex<HashMap<String, Arc<dyn DataChannel>>>,
    connected: AtomicBool,
}

impl LocalEndpoint {
    fn channel(&self, label: &str) -> Option<Arc<dyn DataChannel>> {
        self.channels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(label)
            .cloned()
    }

    async fn send(&self, payload: SignalPayload) -> Result<(), SignalingError> {
        debug!(from = %self.spec.id, to = %self.spec.peer, kind = payload.label(), "signal out");
        self.signaling.send(&self.spec.peer, payload).await
    }
}

// ── Orchestrator ──────────────────────────────────────────────────────────────

/// Owns the engines, pumps and attachments of one session.
pub struct SessionOrchestrator {
    settings: SessionSettings,
    endpoints: Vec<Arc<LocalEndpoint>>,
    attachments: SessionAttachments,
    pipeline: Mutex<Option<Arc<CapturePipeline>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    status: watch::Sender<SessionStatus>,
    events: broadcast::Sender<SessionEvent>,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl SessionOrchestrator {
    /// Initializes the media engine and creates one connection per endpoint.
    ///
    /// # Errors
    ///
    /// Media engine initialization or connection failures, or a signaling
    /// handle whose inbox was already taken.
    pub async fn new(
        settings: SessionSettings,
        transport: Arc<dyn MediaTransport>,
        endpoints: Vec<(LocalEndpointSpec, Arc<dyn SignalingTransport>)>,
        attachments: SessionAttachments,
    ) -> Result<Arc<Self>, SessionError> {
        transport.initialize()?;

        let mut locals = Vec::with_capacity(endpoints.len());
        for (spec, signaling) in endpoints {
            let connection = transport
                .create_connection(ConnectionConfig {
                    endpoint_id: spec.id.clone(),
                    bundle_policy: settings.bundle_policy,
                })
                .await?;
            let transport_events = connection
                .take_events()
                .ok_or_else(|| TransportError::InvalidState("event stream already taken".to_string()))?;
            let inbox = signaling.take_inbox().ok_or(SignalingError::Closed)?;
            let engine = Arc::new(NegotiationEngine::new(spec.id.clone(), spec.peer.clone(), connection));
            info!(endpoint = %spec.id, peer = %spec.peer, role = ?spec.role, "local endpoint created");
            locals.push(Arc::new(LocalEndpoint {
                spec,
                engine,
                signaling,
                streams: Mutex::new(Some((transport_events, inbox))),
                channels: Mutex::new(HashMap::new()),
                connected: AtomicBool::new(false),
            }));
        }

        let (status, _) = watch::channel(SessionStatus::Idle);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Arc::new(Self {
            settings,
            endpoints: locals,
            attachments,
            pipeline: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            status,
            events,
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }))
    }

    /// Starts the pumps and the first negotiation round.  Returns immediately.
    ///
    /// # Errors
    ///
    /// [`SessionError::AlreadyStarted`] or [`SessionError::Stopped`].
    pub fn start(self: &Arc<Self>) -> Result<(), SessionError> {
        if self.is_stopped() {
            return Err(SessionError::Stopped);
        }
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(SessionError::AlreadyStarted);
        }
        self.status.send_replace(SessionStatus::Negotiating);
        info!(endpoints = self.endpoints.len(), "session starting");

        for ep in &self.endpoints {
            let Some((transport_events, inbox)) = ep.streams.lock().unwrap_or_else(|e| e.into_inner()).take() else {
                continue;
            };

            let this = Arc::clone(self);
            let endpoint = Arc::clone(ep);
            self.spawn(async move { this.pump(endpoint, transport_events, inbox).await });

            let this = Arc::clone(self);
            let mut engine_events = ep.engine.subscribe();
            self.spawn(async move {
                loop {
                    match engine_events.recv().await {
                        Ok(event) => this.publish(SessionEvent::Endpoint(event)),
                        Err(broadcast::error::RecvError::Lagged(n)) => warn!(skipped = n, "endpoint events lagged"),
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            });

            let this = Arc::clone(self);
            let endpoint = Arc::clone(ep);
            self.spawn(async move {
                if let Err(e) = this.setup(&endpoint).await {
                    this.fail(&endpoint, e);
                }
            });
        }
        Ok(())
    }

    /// Tears the session down.  Returns `false` if it was already stopped.
    pub async fn stop(&self) -> bool {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return false;
        }
        info!("session stopping");

        if let Some(source) = &self.attachments.frame_source {
            // Joining the capture thread may take up to one frame period.
            let source = Arc::clone(source);
            if let Err(e) = tokio::task::spawn_blocking(move || source.stop()).await {
                warn!("frame source stop task failed: {e}");
            }
        }
        if let Some(pipeline) = self.pipeline.lock().unwrap_or_else(|e| e.into_inner()).take() {
            pipeline.close();
        }
        let tasks: Vec<_> = self.tasks.lock().unwrap_or_else(|e| e.into_inner()).drain(..).collect();
        for task in tasks {
            task.abort();
        }

        for ep in &self.endpoints {
            let channels: Vec<_> = ep
                .channels
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .drain()
                .map(|(_, ch)| ch)
                .collect();
            for channel in channels {
                channel.close().await;
            }
            ep.engine.close().await;
            ep.signaling.close().await;
        }

        self.status.send_replace(SessionStatus::Stopped);
        self.publish(SessionEvent::Stopped);
        info!("session stopped");
        true
    }

    // ── Queries ──────────────────────────────────────────────────────────────

    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Engine of a local endpoint.
    pub fn engine(&self, id: &EndpointId) -> Result<Arc<NegotiationEngine>, SessionError> {
        Ok(Arc::clone(&self.endpoint(id)?.engine))
    }

    pub async fn endpoint_snapshot(&self, id: &EndpointId) -> Result<EndpointSnapshot, SessionError> {
        Ok(self.endpoint(id)?.engine.snapshot().await)
    }

    /// Frame counters of the sharer's capture pipeline, once it exists.
    pub fn pipeline_stats(&self) -> Option<PipelineStats> {
        self.pipeline
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|p| p.stats())
    }

    // ── Data channels and remote input ───────────────────────────────────────

    /// Opens an extra data channel after the session started.
    ///
    /// The media engine requests renegotiation; the channel opens on the
    /// peer once that round completes.
    ///
    /// # Errors
    ///
    /// Unknown endpoint, stopped session, or a transport failure.
    pub async fn open_data_channel(&self, id: &EndpointId, label: &str) -> Result<Arc<dyn DataChannel>, SessionError> {
        if self.is_stopped() {
            return Err(SessionError::Stopped);
        }
        let ep = self.endpoint(id)?;
        let channel = ep.engine.create_data_channel(label).await?;
        info!(endpoint = %id, label, "data channel created");
        self.register_channel(ep, Arc::clone(&channel));
        Ok(channel)
    }

    /// The control channel of `id` as a pointer-event channel.
    ///
    /// # Errors
    ///
    /// [`SessionError::ChannelNotReady`] if the peer has not opened it yet.
    pub fn input_channel(&self, id: &EndpointId) -> Result<RemoteInputChannel, SessionError> {
        let ep = self.endpoint(id)?;
        ep.channel(&self.settings.data_channel_label)
            .map(RemoteInputChannel::new)
            .ok_or_else(|| SessionError::ChannelNotReady {
                label: self.settings.data_channel_label.clone(),
                state: DataChannelState::Connecting,
            })
    }

    /// Sends one pointer event over the control channel of `id`.
    ///
    /// # Errors
    ///
    /// [`SessionError::ChannelNotReady`] unless the channel is `open`.
    pub async fn send_pointer(&self, id: &EndpointId, event: &PointerEvent) -> Result<(), SessionError> {
        self.input_channel(id)?.send_pointer(event).await
    }

    /// Waits until the control channel of `id` exists and is `open`.
    ///
    /// # Errors
    ///
    /// [`SessionError::Stopped`] if the session stops first, or
    /// [`SessionError::ChannelNotReady`] if the channel closes first.
    pub async fn wait_input_channel(&self, id: &EndpointId) -> Result<RemoteInputChannel, SessionError> {
        let ep = self.endpoint(id)?;
        let mut events = self.events.subscribe();
        loop {
            if let Some(channel) = ep.channel(&self.settings.data_channel_label) {
                let input = RemoteInputChannel::new(channel);
                input.wait_open().await?;
                return Ok(input);
            }
            if self.is_stopped() {
                return Err(SessionError::Stopped);
            }
            match events.recv().await {
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return Err(SessionError::Stopped),
            }
        }
    }

    // ── Setup ────────────────────────────────────────────────────────────────

    /// Attaches tracks and channels, then starts the first round.
    async fn setup(&self, ep: &LocalEndpoint) -> Result<(), SessionError> {
        if ep.spec.role == SessionRole::Sharer {
            let sink = ep.engine.add_video_track(&self.settings.video_track_id).await?;
            if let Some(source) = &self.attachments.frame_source {
                let pipeline = Arc::new(CapturePipeline::new(
                    self.settings.capture.pixel_format,
                    TransportClock::new(),
                ));
                self.spawn(Arc::clone(&pipeline).run_delivery(sink));
                *self.pipeline.lock().unwrap_or_else(|e| e.into_inner()) = Some(Arc::clone(&pipeline));
                source.start(
                    self.settings.capture,
                    Box::new(move |frame| {
                        pipeline.push_frame(frame);
                    }),
                )?;
                info!(endpoint = %ep.spec.id, "screen capture started");
            }
        }

        if ep.engine.role().await.is_offerer() {
            let channel = ep.engine.create_data_channel(&self.settings.data_channel_label).await?;
            self.register_channel(ep, channel);
            self.begin_round(ep).await?;
        }
        Ok(())
    }

    /// Creates and sends an offer, or defers it until the endpoint is `stable`.
    async fn begin_round(&self, ep: &LocalEndpoint) -> Result<(), SessionError> {
        if self.is_stopped() {
            return Ok(());
        }
        if ep.engine.signaling_state().await != SignalingState::Stable {
            ep.engine.mark_negotiation_needed().await;
            debug!(endpoint = %ep.spec.id, "round deferred until stable");
            return Ok(());
        }
        let offer = match ep.engine.create_offer().await {
            Ok(offer) => offer,
            Err(e) if e.is_invalid_state() => {
                ep.engine.mark_negotiation_needed().await;
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        ep.engine.set_local_description(offer.clone()).await?;
        ep.send(offer.into()).await?;
        Ok(())
    }

    /// Starts (offerer) or requests (other side) a pending round.
    async fn renegotiate(&self, ep: &LocalEndpoint) -> Result<(), SessionError> {
        if !ep.engine.take_negotiation_needed().await {
            return Ok(());
        }
        if ep.engine.role().await.is_offerer() {
            self.begin_round(ep).await
        } else {
            ep.send(SignalPayload::NegotiationRequest).await?;
            Ok(())
        }
    }

    // ── Pump ─────────────────────────────────────────────────────────────────

    async fn pump(
        self: Arc<Self>,
        ep: Arc<LocalEndpoint>,
        mut transport_events: mpsc::UnboundedReceiver<TransportEvent>,
        mut inbox: mpsc::UnboundedReceiver<SignalEnvelope>,
    ) {
        debug!(endpoint = %ep.spec.id, "pump started");
        loop {
            let result = tokio::select! {
                Some(event) = transport_events.recv() => self.on_transport(&ep, event).await,
                Some(envelope) = inbox.recv() => self.on_signal(&ep, envelope).await,
                else => break,
            };
            if self.is_stopped() {
                break;
            }
            if let Err(e) = result {
                self.fail(&ep, e);
                break;
            }
        }
        debug!(endpoint = %ep.spec.id, "pump stopped");
    }

    async fn on_transport(&self, ep: &LocalEndpoint, event: TransportEvent) -> Result<(), SessionError> {
        match ep.engine.on_transport_event(event).await {
            TransportReaction::None => {}
            TransportReaction::ForwardCandidate(candidate) => {
                if let Err(e) = ep.send(candidate.into()).await {
                    warn!(endpoint = %ep.spec.id, "candidate not delivered: {e}");
                }
            }
            TransportReaction::NegotiationNeeded => self.renegotiate(ep).await?,
            TransportReaction::Connected => {
                if !ep.connected.swap(true, Ordering::AcqRel) {
                    info!(endpoint = %ep.spec.id, peer = %ep.spec.peer, "endpoint connected");
                    self.publish(SessionEvent::Connected {
                        endpoint: ep.spec.id.clone(),
                    });
                    if self.endpoints.iter().all(|e| e.connected.load(Ordering::Acquire)) {
                        self.status.send_if_modified(|status| {
                            if *status == SessionStatus::Negotiating {
                                *status = SessionStatus::Connected;
                                true
                            } else {
                                false
                            }
                        });
                    }
                }
            }
            TransportReaction::Failed => return Err(SessionError::ConnectionFailed(ep.spec.id.clone())),
            TransportReaction::IncomingChannel(channel) => self.register_channel(ep, channel),
            TransportReaction::IncomingTrack(track) => self.attach_track(ep, track),
        }
        Ok(())
    }

    async fn on_signal(&self, ep: &LocalEndpoint, envelope: SignalEnvelope) -> Result<(), SessionError> {
        if envelope.from != ep.spec.peer {
            warn!(endpoint = %ep.spec.id, from = %envelope.from, "signal from unexpected sender dropped");
            return Ok(());
        }
        debug!(endpoint = %ep.spec.id, kind = envelope.payload.label(), "signal in");
        match envelope.payload {
            SignalPayload::Description(desc) if desc.kind == SdpKind::Offer => {
                let outcome = ep.engine.set_remote_description(desc).await?;
                if matches!(outcome, RemoteOutcome::IgnoredGlare) {
                    return Ok(());
                }
                let answer = ep.engine.create_answer().await?;
                ep.engine.set_local_description(answer.clone()).await?;
                ep.send(answer.into()).await?;
                self.renegotiate(ep).await
            }
            SignalPayload::Description(desc) => {
                ep.engine.set_remote_description(desc).await?;
                self.renegotiate(ep).await
            }
            SignalPayload::Candidate(candidate) => {
                ep.engine.add_remote_candidate(candidate).await?;
                Ok(())
            }
            SignalPayload::NegotiationRequest => {
                if ep.engine.role().await.is_offerer() {
                    ep.engine.mark_negotiation_needed().await;
                    self.renegotiate(ep).await
                } else {
                    warn!(endpoint = %ep.spec.id, "negotiation request sent to the non-offerer, ignored");
                    Ok(())
                }
            }
        }
    }

    // ── Channel and track routing ────────────────────────────────────────────

    fn register_channel(&self, ep: &LocalEndpoint, channel: Arc<dyn DataChannel>) {
        let label = channel.label().to_string();
        ep.channels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(label.clone(), Arc::clone(&channel));

        let events = self.events.clone();
        let endpoint = ep.spec.id.clone();
        let mut state = channel.watch_state();
        let watched_label = label.clone();
        self.spawn(async move {
            let opened = state
                .wait_for(|s| matches!(s, DataChannelState::Open | DataChannelState::Closed))
                .await
                .map(|s| *s == DataChannelState::Open)
                .unwrap_or(false);
            if opened {
                info!(%endpoint, label = %watched_label, "data channel open");
                let _ = events.send(SessionEvent::DataChannelOpen {
                    endpoint,
                    label: watched_label,
                });
            }
        });

        if ep.spec.role == SessionRole::Sharer && label == self.settings.data_channel_label {
            if let Some(injector) = &self.attachments.injector {
                let input = RemoteInputChannel::new(channel);
                let injector = Arc::clone(injector);
                self.spawn(async move {
                    dispatch_remote_input(input, injector).await;
                });
            }
        }
    }

    fn attach_track(&self, ep: &LocalEndpoint, mut track: RemoteVideoTrack) {
        self.publish(SessionEvent::RemoteTrack {
            endpoint: ep.spec.id.clone(),
            track_id: track.track_id.clone(),
        });
        let renderer = self.attachments.renderer.clone();
        if renderer.is_none() {
            warn!(endpoint = %ep.spec.id, track = %track.track_id, "no renderer attached, frames discarded");
        }
        self.spawn(async move {
            while let Some(frame) = track.frames.recv().await {
                if let Some(renderer) = &renderer {
                    renderer.render(frame);
                }
            }
            debug!(track = %track.track_id, "remote track ended");
        });
    }

    // ── Helpers ──────────────────────────────────────────────────────────────

    fn endpoint(&self, id: &EndpointId) -> Result<&Arc<LocalEndpoint>, SessionError> {
        self.endpoints
            .iter()
            .find(|ep| ep.spec.id == *id)
            .ok_or_else(|| SessionError::UnknownEndpoint(id.clone()))
    }

    /// Records the first failure.  Ignored once the session is stopped.
    fn fail(&self, ep: &LocalEndpoint, err: SessionError) {
        if self.is_stopped() {
            return;
        }
        let reason = err.to_string();
        error!(endpoint = %ep.spec.id, "session failed: {reason}");
        let first = self.status.send_if_modified(|status| {
            if matches!(status, SessionStatus::Failed(_) | SessionStatus::Stopped) {
                false
            } else {
                *status = SessionStatus::Failed(reason.clone());
                true
            }
        });
        if first {
            self.publish(SessionEvent::Failed { reason });
        }
    }

    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(future);
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        if self.is_stopped() {
            handle.abort();
        } else {
            tasks.push(handle);
        }
    }

    fn publish(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::infrastructure::loopback_media::LoopbackMediaTransport;
    use crate::infrastructure::signaling::LoopbackSignalingHub;

    async fn two_endpoint_session(transport: Arc<LoopbackMediaTransport>) -> Arc<SessionOrchestrator> {
        let hub = LoopbackSignalingHub::new();
        let a = EndpointId::new("connectionA");
        let b = EndpointId::new("connectionB");
        let sig_a: Arc<dyn SignalingTransport> = hub.register(a.clone());
        let sig_b: Arc<dyn SignalingTransport> = hub.register(b.clone());
        SessionOrchestrator::new(
            SessionSettings::default(),
            transport,
            vec![
                (LocalEndpointSpec::new(a.clone(), SessionRole::Sharer, b.clone()), sig_a),
                (LocalEndpointSpec::new(b, SessionRole::Viewer, a), sig_b),
            ],
            SessionAttachments::default(),
        )
        .await
        .unwrap()
    }

    async fn wait_status(session: &SessionOrchestrator, pred: impl Fn(&SessionStatus) -> bool) -> SessionStatus {
        let mut rx = session.subscribe_status();
        let status = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| pred(s)))
            .await
            .expect("status timeout")
            .expect("status channel closed")
            .clone();
        status
    }

    #[tokio::test]
    async fn test_new_session_is_idle() {
        let session = two_endpoint_session(Arc::new(LoopbackMediaTransport::new())).await;
        assert_eq!(session.status(), SessionStatus::Idle);
    }

    #[tokio::test]
    async fn test_start_reaches_connected_and_stable() {
        // Arrange
        let session = two_endpoint_session(Arc::new(LoopbackMediaTransport::new())).await;

        // Act
        session.start().unwrap();
        let status = wait_status(&session, |s| *s != SessionStatus::Negotiating).await;

        // Assert
        assert_eq!(status, SessionStatus::Connected);
        for id in ["connectionA", "connectionB"] {
            let snapshot = session.endpoint_snapshot(&EndpointId::new(id)).await.unwrap();
            assert_eq!(snapshot.signaling, SignalingState::Stable);
        }
        session.stop().await;
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let session = two_endpoint_session(Arc::new(LoopbackMediaTransport::new())).await;
        session.start().unwrap();

        assert!(matches!(session.start(), Err(SessionError::AlreadyStarted)));
        session.stop().await;
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_final() {
        let session = two_endpoint_session(Arc::new(LoopbackMediaTransport::new())).await;
        session.start().unwrap();

        assert!(session.stop().await);
        assert!(!session.stop().await);

        assert_eq!(session.status(), SessionStatus::Stopped);
        assert!(matches!(session.start(), Err(SessionError::Stopped)));
    }

    #[tokio::test]
    async fn test_unreachable_peer_fails_the_session() {
        let transport = Arc::new(LoopbackMediaTransport::new());
        transport.set_unreachable(true);
        let session = two_endpoint_session(transport).await;

        session.start().unwrap();
        let status = wait_status(&session, |s| matches!(s, SessionStatus::Failed(_))).await;

        let SessionStatus::Failed(reason) = status else {
            unreachable!()
        };
        assert!(reason.contains("connection failed"), "reason: {reason}");
        session.stop().await;
    }

    #[tokio::test]
    async fn test_unknown_endpoint_lookup_fails() {
        let session = two_endpoint_session(Arc::new(LoopbackMediaTransport::new())).await;
        assert!(matches!(
            session.input_channel(&EndpointId::new("nobody")),
            Err(SessionError::UnknownEndpoint(_))
        ));
    }
}
