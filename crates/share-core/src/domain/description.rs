//! Session descriptions: the offer and answer payloads.
//!
//! The payload itself (`sdp`) is opaque to the negotiation engine.  Only the
//! `kind` is inspected to decide which state transition applies.  The media
//! transport is the component that actually parses the payload; if it rejects
//! one, the rejection surfaces as [`DescriptionError::Rejected`].

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Whether a description is an offer or an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

impl fmt::Display for SdpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SdpKind::Offer => f.write_str("offer"),
            SdpKind::Answer => f.write_str("answer"),
        }
    }
}

/// A malformed or rejected session description.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DescriptionError {
    /// The negotiation payload was empty or whitespace only.
    #[error("{kind} description has an empty payload")]
    EmptyPayload { kind: SdpKind },

    /// The description kind does not fit the operation (e.g. an answer passed
    /// where an offer was produced).
    #[error("expected {expected} description, got {actual}")]
    UnexpectedKind { expected: SdpKind, actual: SdpKind },

    /// The media transport refused the payload.
    #[error("description rejected by transport: {0}")]
    Rejected(String),
}

/// Immutable offer/answer value exchanged between endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    pub kind: SdpKind,
    /// Protocol-specific negotiation blob.
    pub sdp: String,
}

impl SessionDescription {
    pub fn new(kind: SdpKind, sdp: impl Into<String>) -> Self {
        Self {
            kind,
            sdp: sdp.into(),
        }
    }

    pub fn offer(sdp: impl Into<String>) -> Self {
        Self::new(SdpKind::Offer, sdp)
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self::new(SdpKind::Answer, sdp)
    }

    /// Structural validation performed before any state transition.
    ///
    /// # Errors
    ///
    /// Returns [`DescriptionError::EmptyPayload`] if the payload is blank.
    pub fn validate(&self) -> Result<(), DescriptionError> {
        if self.sdp.trim().is_empty() {
            return Err(DescriptionError::EmptyPayload { kind: self.kind });
        }
        Ok(())
    }

    /// Validates the payload and additionally checks the kind.
    ///
    /// # Errors
    ///
    /// Returns [`DescriptionError::UnexpectedKind`] on a kind mismatch, or the
    /// error from [`validate`](Self::validate).
    pub fn expect_kind(&self, expected: SdpKind) -> Result<(), DescriptionError> {
        if self.kind != expected {
            return Err(DescriptionError::UnexpectedKind {
                expected,
                actual: self.kind,
            });
        }
        self.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_accepts_non_empty_payload() {
        let desc = SessionDescription::offer("v=0\r\n");
        assert!(desc.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_blank_payload() {
        // Arrange
        let desc = SessionDescription::answer("  \r\n");

        // Act
        let result = desc.validate();

        // Assert
        assert_eq!(
            result,
            Err(DescriptionError::EmptyPayload {
                kind: SdpKind::Answer
            })
        );
    }

    #[test]
    fn test_expect_kind_reports_mismatch() {
        let desc = SessionDescription::answer("v=0");
        assert_eq!(
            desc.expect_kind(SdpKind::Offer),
            Err(DescriptionError::UnexpectedKind {
                expected: SdpKind::Offer,
                actual: SdpKind::Answer
            })
        );
    }

    #[test]
    fn test_kind_serializes_lowercase() {
        let json = serde_json::to_string(&SessionDescription::offer("v=0")).unwrap();
        assert!(json.contains("\"kind\":\"offer\""), "got {json}");
    }
}
