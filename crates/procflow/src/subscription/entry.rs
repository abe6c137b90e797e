//! Subscription index entry

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::execution::TokenId;
use crate::scope::ScopeId;

/// Kind of external occurrence a token can wait for
///
/// The set is closed; model tags outside it fail to parse with
/// [`UnsupportedOccurrenceKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OccurrenceKind {
    /// Point-to-point message, correlated to exactly one waiting token
    Message,

    /// Broadcast signal, delivered to every waiting token
    Signal,
}

impl OccurrenceKind {
    pub const ALL: [OccurrenceKind; 2] = [OccurrenceKind::Message, OccurrenceKind::Signal];

    /// Tag used in process models and storage
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::Signal => "signal",
        }
    }
}

impl fmt::Display for OccurrenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind tag outside the supported set
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported occurrence kind: {0}")]
pub struct UnsupportedOccurrenceKind(pub String);

impl FromStr for OccurrenceKind {
    type Err = UnsupportedOccurrenceKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "message" => Ok(Self::Message),
            "signal" => Ok(Self::Signal),
            other => Err(UnsupportedOccurrenceKind(other.to_string())),
        }
    }
}

/// Correlation key of an entry; unique among live entries
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionKey {
    pub token_id: TokenId,
    pub kind: OccurrenceKind,
    pub name: String,
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.token_id, self.kind, self.name)
    }
}

/// A live subscription: `token_id` waits for occurrence `(kind, name)`
///
/// Each materialization produces a new `id` and `created_at`, even when it
/// replaces an entry with the same key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionEntry {
    /// Unique id of this materialization
    pub id: Uuid,

    pub kind: OccurrenceKind,

    /// Occurrence name (message or signal name)
    pub name: String,

    /// Token that waits
    pub token_id: TokenId,

    /// Scope owning the declaration, denormalized for matching
    pub scope_id: Option<ScopeId>,

    /// Resumption should be deferred to a later scheduling point
    pub asynchronous: bool,

    pub created_at: DateTime<Utc>,
}

impl SubscriptionEntry {
    pub fn new(
        kind: OccurrenceKind,
        name: impl Into<String>,
        token_id: TokenId,
        scope_id: Option<ScopeId>,
        asynchronous: bool,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            kind,
            name: name.into(),
            token_id,
            scope_id,
            asynchronous,
            created_at: Utc::now(),
        }
    }

    /// Same correlation, fresh id and timestamp
    pub fn renewed(&self) -> Self {
        Self::new(
            self.kind,
            self.name.clone(),
            self.token_id,
            self.scope_id.clone(),
            self.asynchronous,
        )
    }

    pub fn key(&self) -> SubscriptionKey {
        SubscriptionKey {
            token_id: self.token_id,
            kind: self.kind,
            name: self.name.clone(),
        }
    }

    pub fn matches(&self, kind: OccurrenceKind, name: &str) -> bool {
        self.kind == kind && self.name == name
    }

    pub(crate) fn same_key(&self, other: &SubscriptionEntry) -> bool {
        self.token_id == other.token_id && self.matches(other.kind, &other.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_kinds() {
        assert_eq!("message".parse::<OccurrenceKind>(), Ok(OccurrenceKind::Message));
        assert_eq!("signal".parse::<OccurrenceKind>(), Ok(OccurrenceKind::Signal));

        let err = "timer".parse::<OccurrenceKind>().unwrap_err();
        assert_eq!(err, UnsupportedOccurrenceKind("timer".to_string()));
        assert_eq!(err.to_string(), "unsupported occurrence kind: timer");

        // Tags are case-sensitive, as written in the model
        assert!("Message".parse::<OccurrenceKind>().is_err());
    }

    #[test]
    fn test_kind_tags_round_trip() {
        for kind in OccurrenceKind::ALL {
            assert_eq!(kind.as_str().parse::<OccurrenceKind>(), Ok(kind));
            assert_eq!(
                serde_json::to_value(kind).unwrap(),
                serde_json::json!(kind.as_str())
            );
        }
    }

    #[test]
    fn test_renewed_keeps_key() {
        let token = TokenId::new();
        let entry = SubscriptionEntry::new(
            OccurrenceKind::Signal,
            "itemDone",
            token,
            Some(ScopeId::new("collect")),
            true,
        );

        let renewed = entry.renewed();
        assert_ne!(renewed.id, entry.id);
        assert_eq!(renewed.key(), entry.key());
        assert_eq!(renewed.scope_id, entry.scope_id);
        assert!(renewed.asynchronous);
        assert!(renewed.same_key(&entry));
    }

    #[test]
    fn test_matches() {
        let entry = SubscriptionEntry::new(
            OccurrenceKind::Message,
            "orderApproved",
            TokenId::new(),
            None,
            false,
        );

        assert!(entry.matches(OccurrenceKind::Message, "orderApproved"));
        assert!(!entry.matches(OccurrenceKind::Signal, "orderApproved"));
        assert!(!entry.matches(OccurrenceKind::Message, "orderRejected"));
    }
}
