//! External occurrences delivered to waiting tokens

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::OccurrenceKind;
use crate::execution::TokenId;

/// An external message or signal arriving at the runtime
///
/// Occurrences are matched against the subscription index by
/// `(kind, name)`, optionally narrowed to one target token.
///
/// # Example
///
/// ```
/// use procflow::subscription::{Occurrence, OccurrenceKind};
///
/// let occurrence = Occurrence::message("orderApproved", serde_json::json!({"order": 17}));
/// assert_eq!(occurrence.kind, OccurrenceKind::Message);
/// assert!(occurrence.target_token.is_none());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Occurrence {
    pub kind: OccurrenceKind,

    /// Message or signal name
    pub name: String,

    /// Deliver only to this token's subscriptions
    pub target_token: Option<TokenId>,

    /// Occurrence payload (JSON)
    pub payload: serde_json::Value,

    /// When the occurrence was sent
    pub sent_at: DateTime<Utc>,
}

impl Occurrence {
    /// Create a new occurrence
    pub fn new(kind: OccurrenceKind, name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            kind,
            name: name.into(),
            target_token: None,
            payload,
            sent_at: Utc::now(),
        }
    }

    /// Create a message occurrence
    pub fn message(name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self::new(OccurrenceKind::Message, name, payload)
    }

    /// Create a signal occurrence
    pub fn signal(name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self::new(OccurrenceKind::Signal, name, payload)
    }

    /// Narrow delivery to one token
    pub fn for_token(mut self, token_id: TokenId) -> Self {
        self.target_token = Some(token_id);
        self
    }

    pub fn is_broadcast(&self) -> bool {
        self.kind == OccurrenceKind::Signal && self.target_token.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_occurrence() {
        let occurrence = Occurrence::message("orderApproved", serde_json::json!({}));

        assert_eq!(occurrence.kind, OccurrenceKind::Message);
        assert_eq!(occurrence.name, "orderApproved");
        assert!(!occurrence.is_broadcast());
    }

    #[test]
    fn test_signal_broadcast() {
        let occurrence = Occurrence::signal("itemDone", serde_json::json!({}));
        assert!(occurrence.is_broadcast());

        let targeted = occurrence.for_token(TokenId::new());
        assert!(!targeted.is_broadcast());
    }

    #[test]
    fn test_occurrence_serialization() {
        let token = TokenId::new();
        let occurrence =
            Occurrence::signal("itemDone", serde_json::json!({"item": 3})).for_token(token);

        let json = serde_json::to_string(&occurrence).unwrap();
        let parsed: Occurrence = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.kind, OccurrenceKind::Signal);
        assert_eq!(parsed.target_token, Some(token));
        assert_eq!(parsed.payload, occurrence.payload);
    }
}
