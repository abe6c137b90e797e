//! Occurrence delivery against the subscription index

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::execution::TokenId;
use crate::persistence::{StoreError, SubscriptionStore};
use crate::subscription::{Occurrence, OccurrenceKind, SubscriptionEntry};

/// Errors from delivery
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// A message without a target matched more than one waiting token
    #[error("message {name:?} correlates to {candidates} subscriptions")]
    AmbiguousCorrelation {
        kind: OccurrenceKind,
        name: String,
        candidates: usize,
    },

    /// Store error
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// A subscription selected for resumption
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedSubscription {
    pub entry: SubscriptionEntry,

    /// Resume at a later scheduling point rather than inline
    pub deferred: bool,
}

impl From<SubscriptionEntry> for MatchedSubscription {
    fn from(entry: SubscriptionEntry) -> Self {
        Self {
            deferred: entry.asynchronous,
            entry,
        }
    }
}

/// Result of delivering one occurrence
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// No live subscription waits for the occurrence
    Unmatched,

    /// Subscriptions to resume, oldest first
    Matched(Vec<MatchedSubscription>),
}

impl DeliveryOutcome {
    pub fn is_matched(&self) -> bool {
        matches!(self, Self::Matched(_))
    }

    /// Tokens the occurrence resumes
    pub fn tokens(&self) -> Vec<TokenId> {
        match self {
            Self::Unmatched => vec![],
            Self::Matched(matched) => matched.iter().map(|m| m.entry.token_id).collect(),
        }
    }
}

/// Read-only matcher of occurrences against live subscriptions
///
/// Signals broadcast to every waiting token. Messages correlate to exactly
/// one token: the target when given, otherwise the single matching entry.
pub struct OccurrenceRouter<S: SubscriptionStore> {
    store: Arc<S>,
}

impl<S: SubscriptionStore> Clone for OccurrenceRouter<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<S: SubscriptionStore> OccurrenceRouter<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Entry for one correlation key
    pub async fn lookup(
        &self,
        kind: OccurrenceKind,
        name: &str,
        token_id: TokenId,
    ) -> Result<Option<SubscriptionEntry>, DeliveryError> {
        Ok(self.store.lookup(kind, name, token_id).await?)
    }

    /// All live entries of a token
    pub async fn all_entries_for(
        &self,
        token_id: TokenId,
    ) -> Result<Vec<SubscriptionEntry>, DeliveryError> {
        Ok(self.store.entries_for(token_id).await?)
    }

    /// Match an occurrence to the subscriptions it resumes
    ///
    /// Never removes entries; consuming a match is up to the caller.
    #[instrument(skip(self, occurrence), fields(kind = %occurrence.kind, name = %occurrence.name, target = ?occurrence.target_token))]
    pub async fn deliver(&self, occurrence: &Occurrence) -> Result<DeliveryOutcome, DeliveryError> {
        let candidates: Vec<SubscriptionEntry> = match occurrence.target_token {
            Some(token_id) => self
                .store
                .lookup(occurrence.kind, &occurrence.name, token_id)
                .await?
                .into_iter()
                .collect(),
            None => {
                self.store
                    .find_by_occurrence(occurrence.kind, &occurrence.name)
                    .await?
            }
        };

        let matched = match occurrence.kind {
            OccurrenceKind::Signal => candidates,
            OccurrenceKind::Message => {
                if candidates.len() > 1 {
                    warn!(candidates = candidates.len(), "ambiguous message correlation");
                    return Err(DeliveryError::AmbiguousCorrelation {
                        kind: occurrence.kind,
                        name: occurrence.name.clone(),
                        candidates: candidates.len(),
                    });
                }
                candidates
            }
        };

        if matched.is_empty() {
            debug!("no subscription waiting for occurrence");
            return Ok(DeliveryOutcome::Unmatched);
        }

        info!(matched = matched.len(), "occurrence delivered");
        Ok(DeliveryOutcome::Matched(
            matched.into_iter().map(MatchedSubscription::from).collect(),
        ))
    }
}
