//! ICE candidates: opaque network-path descriptors.

use serde::{Deserialize, Serialize};

/// A network path discovered by the transport, forwarded verbatim to the peer.
///
/// The negotiation engine never looks inside `candidate`; it only cares about
/// *when* a candidate may be applied (see
/// [`NegotiationState::accept_remote_candidate`](crate::NegotiationState::accept_remote_candidate)).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    /// Address/protocol fragment, e.g. `candidate:1 1 udp 2130706431 127.0.0.1 50000 typ host`.
    pub candidate: String,
    /// Media stream identification tag the candidate belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    /// Index of the media line the candidate belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
        }
    }

    pub fn with_media_line(mut self, sdp_mid: impl Into<String>, sdp_mline_index: u16) -> Self {
        self.sdp_mid = Some(sdp_mid.into());
        self.sdp_mline_index = Some(sdp_mline_index);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_optional_fields_are_omitted_from_json() {
        let json = serde_json::to_string(&IceCandidate::new("candidate:1")).unwrap();
        assert_eq!(json, r#"{"candidate":"candidate:1"}"#);
    }

    #[test]
    fn test_media_line_round_trips_through_json() {
        let original = IceCandidate::new("candidate:2").with_media_line("0", 0);
        let json = serde_json::to_string(&original).unwrap();
        let parsed: IceCandidate = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, original);
    }
}
