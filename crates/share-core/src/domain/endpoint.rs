//! Endpoint identity and the deterministic offerer rule.
//!
//! When both peers decide to renegotiate at the same moment, each sends an
//! offer and each receives an offer while holding its own.  This is called
//! *glare*.  Without a rule to break the tie, both sides would wait for an
//! answer that never comes.
//!
//! ScreenShare breaks the tie deterministically: the endpoint whose id sorts
//! first (plain lexicographic string order) is the **designated offerer**.
//! The other endpoint yields by rolling back its own offer.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier of one logical peer in a negotiation.
///
/// Ordering is lexicographic on the underlying string, which is what the
/// glare tie-break relies on.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointId(String);

impl EndpointId {
    /// Wraps an existing label (e.g. `"connectionA"`).
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    /// Generates a random UUID v4 based identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EndpointId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Which side of the offer/answer exchange an endpoint plays for a pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationRole {
    /// Creates offers and wins glare.
    Offerer,
    /// Answers offers and yields on glare.
    Answerer,
}

impl NegotiationRole {
    /// Returns the role of `local` when paired with `remote`.
    ///
    /// The endpoint with the lexicographically smaller id is the offerer.
    /// Identical ids are a configuration error upstream; `local` is treated
    /// as the offerer so the result is still deterministic.
    pub fn for_pair(local: &EndpointId, remote: &EndpointId) -> Self {
        if local <= remote {
            NegotiationRole::Offerer
        } else {
            NegotiationRole::Answerer
        }
    }

    pub fn is_offerer(self) -> bool {
        matches!(self, NegotiationRole::Offerer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_smaller_id_is_offerer() {
        // Arrange
        let a = EndpointId::new("connectionA");
        let b = EndpointId::new("connectionB");

        // Act / Assert
        assert_eq!(NegotiationRole::for_pair(&a, &b), NegotiationRole::Offerer);
        assert_eq!(NegotiationRole::for_pair(&b, &a), NegotiationRole::Answerer);
    }

    #[test]
    fn test_role_assignment_is_antisymmetric_for_generated_ids() {
        let a = EndpointId::generate();
        let b = EndpointId::generate();

        let a_role = NegotiationRole::for_pair(&a, &b);
        let b_role = NegotiationRole::for_pair(&b, &a);

        // Exactly one side must be the offerer.
        assert_ne!(a_role, b_role);
    }

    #[test]
    fn test_ordering_is_lexicographic_not_length_based() {
        // "Z" sorts before "a" in byte order; "ab" sorts after "a".
        assert!(EndpointId::new("Z") < EndpointId::new("a"));
        assert!(EndpointId::new("a") < EndpointId::new("ab"));
    }

    #[test]
    fn test_endpoint_id_serializes_as_plain_string() {
        let id = EndpointId::new("viewer-1");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"viewer-1\"");
    }
}
