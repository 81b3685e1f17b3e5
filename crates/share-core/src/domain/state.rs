//! State enums for one negotiation endpoint and its data channel.
//!
//! An endpoint moves along three independent axes:
//!
//! ```text
//! Signaling:       stable ──► have-local-offer ──► stable       (offerer)
//!                  stable ──► have-remote-offer ──► stable      (answerer)
//!
//! ICE gathering:   new ──► gathering ──► complete
//!
//! ICE connection:  new ──► checking ──► connected ──► completed
//!                               │           ▲  │
//!                               ▼           │  ▼
//!                            failed ◄── disconnected
//! ```
//!
//! `disconnected` is transient and may heal back to `connected`; `failed` is
//! terminal for the attempt.  Every axis can finally move to `closed` when the
//! session is torn down.

use std::fmt;

use serde::{Deserialize, Serialize};

// ── Signaling ─────────────────────────────────────────────────────────────────

/// Offer/answer progress of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalingState {
    /// No exchange in progress; descriptions (if any) are committed.
    #[default]
    Stable,
    /// A local offer is set and waits for the remote answer.
    HaveLocalOffer,
    /// A remote offer is set and waits for the local answer.
    HaveRemoteOffer,
    /// The endpoint was torn down.
    Closed,
}

impl fmt::Display for SignalingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Stable => "stable",
            Self::HaveLocalOffer => "have-local-offer",
            Self::HaveRemoteOffer => "have-remote-offer",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

// ── ICE gathering ─────────────────────────────────────────────────────────────

/// Progress of local network-path discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IceGatheringState {
    #[default]
    New,
    Gathering,
    Complete,
}

impl IceGatheringState {
    /// Gathering only moves forward: `new → gathering → complete`.
    pub fn can_transition_to(self, next: IceGatheringState) -> bool {
        matches!(
            (self, next),
            (Self::New, Self::Gathering) | (Self::Gathering, Self::Complete)
        )
    }
}

impl fmt::Display for IceGatheringState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::New => "new",
            Self::Gathering => "gathering",
            Self::Complete => "complete",
        };
        f.write_str(name)
    }
}

// ── ICE connection ────────────────────────────────────────────────────────────

/// Connectivity of the selected network path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IceConnectionState {
    #[default]
    New,
    Checking,
    Connected,
    Completed,
    /// Transient loss of connectivity; may recover.
    Disconnected,
    /// Terminal for this connection attempt.
    Failed,
    Closed,
}

impl IceConnectionState {
    /// Returns `true` if moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: IceConnectionState) -> bool {
        use IceConnectionState::*;
        if next == Closed {
            return self != Closed;
        }
        match self {
            New => matches!(next, Checking | Failed),
            Checking => matches!(next, Connected | Failed | Disconnected),
            Connected => matches!(next, Completed | Disconnected | Failed),
            Completed => matches!(next, Connected | Disconnected | Failed),
            Disconnected => matches!(next, Checking | Connected | Failed),
            Failed | Closed => false,
        }
    }

    /// `connected` or `completed`: media can flow.
    pub fn is_established(self) -> bool {
        matches!(self, Self::Connected | Self::Completed)
    }

    /// `failed` or `closed`: nothing will happen on this attempt anymore.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Closed)
    }
}

impl fmt::Display for IceConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::New => "new",
            Self::Checking => "checking",
            Self::Connected => "connected",
            Self::Completed => "completed",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

// ── Data channel ──────────────────────────────────────────────────────────────

/// Ready state of a bidirectional ordered message channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DataChannelState {
    #[default]
    Connecting,
    Open,
    Closing,
    Closed,
}

impl DataChannelState {
    /// Only an `open` channel accepts outbound messages.
    pub fn is_sendable(self) -> bool {
        matches!(self, Self::Open)
    }

    pub fn can_transition_to(self, next: DataChannelState) -> bool {
        matches!(
            (self, next),
            (Self::Connecting, Self::Open)
                | (Self::Connecting, Self::Closing)
                | (Self::Connecting, Self::Closed)
                | (Self::Open, Self::Closing)
                | (Self::Open, Self::Closed)
                | (Self::Closing, Self::Closed)
        )
    }
}

impl fmt::Display for DataChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}
