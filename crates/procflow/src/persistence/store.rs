//! SubscriptionStore trait definition

use async_trait::async_trait;
use uuid::Uuid;

use crate::execution::TokenId;
use crate::subscription::{OccurrenceKind, SubscriptionEntry};

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A live entry already holds this correlation key
    #[error("duplicate subscription key: token {token_id}, {kind} {name:?}")]
    DuplicateKey {
        token_id: TokenId,
        kind: OccurrenceKind,
        name: String,
    },

    /// Subscription not found
    #[error("subscription not found: {0}")]
    SubscriptionNotFound(Uuid),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    pub(crate) fn duplicate(entry: &SubscriptionEntry) -> Self {
        Self::DuplicateKey {
            token_id: entry.token_id,
            kind: entry.kind,
            name: entry.name.clone(),
        }
    }
}

/// Persisted index of live subscriptions
///
/// Entries are keyed by `(token_id, kind, name)`; at most one live entry
/// exists per key. Every operation touching one token is atomic with
/// respect to every other operation on that token, so a reader sees an
/// entry either fully registered or not at all.
///
/// Implementations must be thread-safe and support concurrent access.
#[async_trait]
pub trait SubscriptionStore: Send + Sync + 'static {
    // =========================================================================
    // Write Operations
    // =========================================================================

    /// Register a new entry
    ///
    /// Fails with [`StoreError::DuplicateKey`] if the key is already live.
    async fn insert(&self, entry: SubscriptionEntry) -> Result<(), StoreError>;

    /// Register an entry, replacing any live entry with the same key
    ///
    /// Returns the replaced entry.
    async fn upsert(&self, entry: SubscriptionEntry)
        -> Result<Option<SubscriptionEntry>, StoreError>;

    /// Atomically delete `old_id` and register `entry` for the same token
    ///
    /// Readers observe the old entry or the new one, never neither and
    /// never both. Fails with [`StoreError::SubscriptionNotFound`] if
    /// `old_id` is not live for `entry.token_id`.
    async fn replace(&self, old_id: Uuid, entry: SubscriptionEntry) -> Result<(), StoreError>;

    /// Delete one entry; returns whether it existed
    async fn delete(&self, token_id: TokenId, subscription_id: Uuid) -> Result<bool, StoreError>;

    /// Delete every entry of a token; returns how many were removed
    async fn delete_for_token(&self, token_id: TokenId) -> Result<usize, StoreError>;

    // =========================================================================
    // Read Operations
    // =========================================================================

    /// Entry for one correlation key
    async fn lookup(
        &self,
        kind: OccurrenceKind,
        name: &str,
        token_id: TokenId,
    ) -> Result<Option<SubscriptionEntry>, StoreError>;

    /// All entries of a token, in registration order
    async fn entries_for(&self, token_id: TokenId) -> Result<Vec<SubscriptionEntry>, StoreError>;

    /// All entries waiting for `(kind, name)` across tokens, oldest first
    async fn find_by_occurrence(
        &self,
        kind: OccurrenceKind,
        name: &str,
    ) -> Result<Vec<SubscriptionEntry>, StoreError>;
}
