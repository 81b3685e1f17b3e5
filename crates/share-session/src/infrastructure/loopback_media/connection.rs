//! A loopback peer connection.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use share_core::{
    EndpointId, IceCandidate, IceConnectionState, IceGatheringState, SdpKind, SessionDescription,
    SignalingState,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::channel::{LoopbackDataChannel, LoopbackVideoSender};
use super::LoopbackNetwork;
use crate::application::media::{
    BundlePolicy, ConnectionConfig, DataChannel, MediaConnection, RemoteVideoTrack, TransportError,
    TransportEvent, VideoSink,
};

/// Frames buffered between a paired sender and the remote track.
const TRACK_BUFFER: usize = 8;

struct Outbound<T> {
    item: Arc<T>,
    negotiated: bool,
    linked: bool,
}

impl<T> Outbound<T> {
    fn new(item: Arc<T>) -> Self {
        Self {
            item,
            negotiated: false,
            linked: false,
        }
    }
}

#[derive(Default)]
struct ConnState {
    signaling: SignalingState,
    version: u64,
    local: Option<SessionDescription>,
    previous_local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    remote_ufrag: Option<String>,
    remote_candidates: usize,
    gathering_started: bool,
    ice: IceConnectionState,
    rounds: u64,
    channels: Vec<Outbound<LoopbackDataChannel>>,
    tracks: Vec<Outbound<LoopbackVideoSender>>,
    accepted_channels: Vec<Arc<LoopbackDataChannel>>,
    closed: bool,
}

impl ConnState {
    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        Ok(())
    }

    fn complete_round(&mut self) {
        self.rounds += 1;
        for ch in &mut self.channels {
            ch.negotiated = true;
        }
        for track in &mut self.tracks {
            track.negotiated = true;
        }
    }
}

pub(crate) struct ConnectionInner {
    endpoint_id: EndpointId,
    bundle_policy: BundlePolicy,
    ufrag: String,
    pwd: String,
    session_id: u64,
    network: Arc<LoopbackNetwork>,
    candidate_count: usize,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
    state: Mutex<ConnState>,
}

impl ConnectionInner {
    pub(crate) fn new(config: ConnectionConfig, network: Arc<LoopbackNetwork>, candidate_count: usize) -> Arc<Self> {
        let credentials = Uuid::new_v4().simple().to_string();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            endpoint_id: config.endpoint_id,
            bundle_policy: config.bundle_policy,
            ufrag: credentials[..8].to_string(),
            pwd: credentials[8..].to_string(),
            session_id: Uuid::new_v4().as_u64_pair().0 >> 1,
            network,
            candidate_count,
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            state: Mutex::new(ConnState::default()),
        })
    }

    pub(crate) fn ufrag(&self) -> &str {
        &self.ufrag
    }

    fn lock(&self) -> MutexGuard<'_, ConnState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn emit(&self, event: TransportEvent) {
        // The receiver is gone once the owner stopped pumping; nothing to do.
        let _ = self.events_tx.send(event);
    }

    fn render_sdp(&self, state: &mut ConnState) -> String {
        state.version += 1;
        let mut lines = vec![
            "v=0".to_string(),
            format!("o=- {} {} IN IP4 127.0.0.1", self.session_id, state.version),
            "s=-".to_string(),
            "t=0 0".to_string(),
        ];
        if self.bundle_policy != BundlePolicy::MaxCompat {
            lines.push("a=group:BUNDLE 0".to_string());
        }
        lines.push(format!("a=ice-ufrag:{}", self.ufrag));
        lines.push(format!("a=ice-pwd:{}", self.pwd));
        lines.push("m=application 9 UDP/DTLS/SCTP webrtc-datachannel".to_string());
        lines.push("a=mid:0".to_string());
        for track in &state.tracks {
            lines.push(format!("a=msid:{} {}", self.endpoint_id, track.item.track_id()));
        }
        let mut sdp = lines.join("\r\n");
        sdp.push_str("\r\n");
        sdp
    }

    /// Emits the host candidates of this connection.
    fn gather(&self) {
        self.emit(TransportEvent::GatheringStateChanged(IceGatheringState::Gathering));
        for i in 0..self.candidate_count {
            let port = self.network.allocate_port();
            let priority = 2_130_706_431u32.saturating_sub(i as u32);
            let candidate = IceCandidate::new(format!("candidate:{i} 1 udp {priority} 127.0.0.1 {port} typ host"))
                .with_media_line("0", 0);
            self.emit(TransportEvent::CandidateGenerated(candidate));
        }
        self.emit(TransportEvent::GatheringStateChanged(IceGatheringState::Complete));
        debug!(endpoint = %self.endpoint_id, count = self.candidate_count, "candidate gathering complete");
    }

    /// Runs the connectivity check once everything it needs is present.
    fn try_connect(&self) {
        let remote_ufrag = {
            let mut state = self.lock();
            if state.closed
                || state.ice != IceConnectionState::New
                || state.local.is_none()
                || state.remote_candidates == 0
            {
                return;
            }
            let Some(ufrag) = state.remote_ufrag.clone() else {
                return;
            };
            state.ice = IceConnectionState::Checking;
            ufrag
        };
        self.emit(TransportEvent::ConnectionStateChanged(IceConnectionState::Checking));

        let reachable = !self.network.is_unreachable()
            && self
                .network
                .lookup(&remote_ufrag)
                .is_some_and(|peer| !peer.is_closed());
        let next = if reachable {
            IceConnectionState::Connected
        } else {
            IceConnectionState::Failed
        };
        {
            let mut state = self.lock();
            if state.closed {
                return;
            }
            state.ice = next;
        }
        if reachable {
            info!(endpoint = %self.endpoint_id, "loopback connectivity check succeeded");
        } else {
            warn!(endpoint = %self.endpoint_id, "loopback connectivity check failed");
        }
        self.emit(TransportEvent::ConnectionStateChanged(next));
    }

    /// Pairs negotiated channels and tracks with the peer.
    fn sync_media(&self) {
        let remote_ufrag = {
            let state = self.lock();
            if state.closed || state.signaling != SignalingState::Stable || !state.ice.is_established() {
                return;
            }
            match state.remote_ufrag.clone() {
                Some(ufrag) => ufrag,
                None => return,
            }
        };
        let Some(peer) = self.network.lookup(&remote_ufrag) else {
            warn!(endpoint = %self.endpoint_id, "peer connection is gone, media not paired");
            return;
        };

        let (channels, tracks) = {
            let mut state = self.lock();
            let channels: Vec<_> = state
                .channels
                .iter_mut()
                .filter(|c| c.negotiated && !c.linked)
                .map(|c| {
                    c.linked = true;
                    Arc::clone(&c.item)
                })
                .collect();
            let tracks: Vec<_> = state
                .tracks
                .iter_mut()
                .filter(|t| t.negotiated && !t.linked)
                .map(|t| {
                    t.linked = true;
                    Arc::clone(&t.item)
                })
                .collect();
            (channels, tracks)
        };

        for local in channels {
            let remote = Arc::new(LoopbackDataChannel::new(local.label()));
            LoopbackDataChannel::link(&local, &remote);
            debug!(endpoint = %self.endpoint_id, label = local.label(), "data channel paired");
            peer.accept_channel(remote);
        }
        for sender in tracks {
            let (tx, rx) = mpsc::channel(TRACK_BUFFER);
            sender.attach(tx);
            debug!(endpoint = %self.endpoint_id, track = sender.track_id(), "video track paired");
            peer.emit(TransportEvent::RemoteTrack(RemoteVideoTrack {
                track_id: sender.track_id().to_string(),
                frames: rx,
            }));
        }
    }

    fn accept_channel(&self, channel: Arc<LoopbackDataChannel>) {
        {
            let mut state = self.lock();
            if state.closed {
                channel.shut();
                return;
            }
            state.accepted_channels.push(Arc::clone(&channel));
        }
        self.emit(TransportEvent::DataChannelOpened(channel));
    }

    /// Runs the checks that may have become satisfiable.
    fn progress(&self) {
        self.try_connect();
        self.sync_media();
    }
}

/// Extracts `a=ice-ufrag` from SDP text.
fn parse_ufrag(sdp: &str) -> Result<String, TransportError> {
    let mut lines = sdp.lines();
    if lines.next().map(str::trim) != Some("v=0") {
        return Err(TransportError::DescriptionRejected("SDP must start with v=0".to_string()));
    }
    lines
        .find_map(|line| line.trim().strip_prefix("a=ice-ufrag:"))
        .filter(|ufrag| !ufrag.is_empty())
        .map(str::to_string)
        .ok_or_else(|| TransportError::DescriptionRejected("missing a=ice-ufrag".to_string()))
}

fn is_candidate_line(candidate: &str) -> bool {
    candidate.starts_with("candidate:") && candidate.contains(" typ ")
}

/// [`MediaConnection`] backed by the loopback network.
pub struct LoopbackConnection {
    inner: Arc<ConnectionInner>,
}

impl LoopbackConnection {
    pub(crate) fn from_inner(inner: Arc<ConnectionInner>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl MediaConnection for LoopbackConnection {
    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        let mut state = self.inner.lock();
        state.ensure_open()?;
        if state.signaling != SignalingState::Stable {
            return Err(TransportError::InvalidState(format!(
                "cannot create offer in {}",
                state.signaling
            )));
        }
        Ok(SessionDescription::offer(self.inner.render_sdp(&mut state)))
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        let mut state = self.inner.lock();
        state.ensure_open()?;
        if state.signaling != SignalingState::HaveRemoteOffer {
            return Err(TransportError::InvalidState(format!(
                "cannot create answer in {}",
                state.signaling
            )));
        }
        Ok(SessionDescription::answer(self.inner.render_sdp(&mut state)))
    }

    async fn set_local_description(&self, desc: &SessionDescription) -> Result<(), TransportError> {
        if parse_ufrag(&desc.sdp)? != self.inner.ufrag {
            return Err(TransportError::DescriptionRejected(
                "local description was not created by this connection".to_string(),
            ));
        }
        let start_gathering = {
            let mut state = self.inner.lock();
            state.ensure_open()?;
            match (desc.kind, state.signaling) {
                (SdpKind::Offer, SignalingState::Stable) => {
                    state.previous_local = state.local.replace(desc.clone());
                    state.signaling = SignalingState::HaveLocalOffer;
                }
                (SdpKind::Answer, SignalingState::HaveRemoteOffer) => {
                    state.local = Some(desc.clone());
                    state.signaling = SignalingState::Stable;
                    state.complete_round();
                }
                (kind, signaling) => {
                    return Err(TransportError::InvalidState(format!(
                        "cannot set local {kind} in {signaling}"
                    )));
                }
            }
            !std::mem::replace(&mut state.gathering_started, true)
        };
        if start_gathering {
            self.inner.gather();
        }
        self.inner.progress();
        Ok(())
    }

    async fn set_remote_description(&self, desc: &SessionDescription) -> Result<(), TransportError> {
        let ufrag = parse_ufrag(&desc.sdp)?;
        {
            let mut state = self.inner.lock();
            state.ensure_open()?;
            if state.remote_ufrag.as_ref().is_some_and(|known| *known != ufrag) {
                return Err(TransportError::DescriptionRejected(
                    "ICE restart is not supported".to_string(),
                ));
            }
            match (desc.kind, state.signaling) {
                (SdpKind::Offer, SignalingState::Stable) => {
                    state.signaling = SignalingState::HaveRemoteOffer;
                }
                (SdpKind::Answer, SignalingState::HaveLocalOffer) => {
                    state.signaling = SignalingState::Stable;
                    state.complete_round();
                }
                (kind, signaling) => {
                    return Err(TransportError::InvalidState(format!(
                        "cannot set remote {kind} in {signaling}"
                    )));
                }
            }
            state.remote = Some(desc.clone());
            state.remote_ufrag = Some(ufrag);
        }
        self.inner.progress();
        Ok(())
    }

    async fn rollback(&self) -> Result<(), TransportError> {
        let mut state = self.inner.lock();
        state.ensure_open()?;
        if state.signaling != SignalingState::HaveLocalOffer {
            return Err(TransportError::InvalidState(format!(
                "nothing to roll back in {}",
                state.signaling
            )));
        }
        state.local = state.previous_local.take();
        state.signaling = SignalingState::Stable;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), TransportError> {
        if !is_candidate_line(&candidate.candidate) {
            return Err(TransportError::CandidateRejected(format!(
                "unparseable candidate `{}`",
                candidate.candidate
            )));
        }
        {
            let mut state = self.inner.lock();
            state.ensure_open()?;
            if state.remote.is_none() {
                return Err(TransportError::InvalidState("remote description not set".to_string()));
            }
            state.remote_candidates += 1;
        }
        self.inner.progress();
        Ok(())
    }

    async fn add_video_track(&self, track_id: &str) -> Result<Arc<dyn VideoSink>, TransportError> {
        let sender = Arc::new(LoopbackVideoSender::new(track_id));
        let renegotiate = {
            let mut state = self.inner.lock();
            state.ensure_open()?;
            if state.tracks.iter().any(|t| t.item.track_id() == track_id) {
                return Err(TransportError::InvalidState(format!("track `{track_id}` already added")));
            }
            state.tracks.push(Outbound::new(Arc::clone(&sender)));
            state.rounds > 0
        };
        if renegotiate {
            self.inner.emit(TransportEvent::NegotiationNeeded);
        }
        Ok(sender)
    }

    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannel>, TransportError> {
        let channel = Arc::new(LoopbackDataChannel::new(label));
        let renegotiate = {
            let mut state = self.inner.lock();
            state.ensure_open()?;
            state.channels.push(Outbound::new(Arc::clone(&channel)));
            state.rounds > 0
        };
        if renegotiate {
            self.inner.emit(TransportEvent::NegotiationNeeded);
        }
        Ok(channel)
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.inner.events_rx.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    async fn close(&self) {
        let (channels, accepted, tracks) = {
            let mut state = self.inner.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.signaling = SignalingState::Closed;
            state.ice = IceConnectionState::Closed;
            (
                std::mem::take(&mut state.channels),
                std::mem::take(&mut state.accepted_channels),
                std::mem::take(&mut state.tracks),
            )
        };
        self.inner.network.unregister(&self.inner.ufrag);
        for ch in channels {
            ch.item.close().await;
        }
        for ch in accepted {
            ch.close().await;
        }
        for track in tracks {
            track.item.close();
        }
        debug!(endpoint = %self.inner.endpoint_id, "loopback connection closed");
    }
}
