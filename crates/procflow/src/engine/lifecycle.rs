//! Subscription lifecycle controller
//!
//! The `SubscriptionLifecycle` decides, for a declaration and a running
//! token, whether an index entry should exist and keeps it correct across:
//! - Entering a scope (plain flow)
//! - Parallel multi-instance fan-out (one entry per child, none on the parent)
//! - Sequential multi-instance repetition (entry replaced per iteration)
//! - Token teardown

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, error, instrument, warn};

use crate::config::DuplicatePolicy;
use crate::execution::TokenId;
use crate::persistence::{StoreError, SubscriptionStore};
use crate::scope::{DeclarationId, ScopeId, ScopeTree, SubscriptionDeclaration};
use crate::subscription::{OccurrenceKind, SubscriptionEntry};

/// Errors from lifecycle operations
#[derive(Debug, thiserror::Error)]
pub enum SubscriptionError {
    /// Declaration kind is not a supported occurrence kind
    #[error("found event declaration of unknown kind: {0}")]
    UnsupportedOccurrenceKind(String),

    /// Declaration names a scope missing from the tree
    #[error("declaration references unknown scope: {0}")]
    DanglingScopeReference(ScopeId),

    /// A live entry already holds the key
    #[error("subscription already exists: token {token_id}, {kind} {name:?}")]
    DuplicateSubscriptionKey {
        token_id: TokenId,
        kind: OccurrenceKind,
        name: String,
    },

    /// Store error
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Memoized parallel multi-instance classification per declaration
///
/// Declarations are immutable and shared, so the lazily computed flag lives
/// here rather than on the declaration. A computed value never changes.
#[derive(Debug, Default)]
pub struct ClassificationCache {
    entries: DashMap<DeclarationId, bool>,
}

impl ClassificationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Memoized value, if computed
    pub fn get(&self, id: DeclarationId) -> Option<bool> {
        self.entries.get(&id).map(|v| *v)
    }

    /// Memoized value, computing it on first access
    ///
    /// Concurrent first callers for the same declaration serialize on the
    /// map entry, so `compute` runs at most once per successful result.
    /// Errors are not cached.
    pub fn get_or_try_compute<E>(
        &self,
        id: DeclarationId,
        compute: impl FnOnce() -> Result<bool, E>,
    ) -> Result<bool, E> {
        match self.entries.entry(id) {
            Entry::Occupied(e) => Ok(*e.get()),
            Entry::Vacant(e) => {
                let value = compute()?;
                e.insert(value);
                Ok(value)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Creates, replaces and removes subscription entries as tokens advance
///
/// Declarations passed in must belong to this controller's scope tree.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use procflow::engine::SubscriptionLifecycle;
/// use procflow::execution::TokenId;
/// use procflow::scope::{DeclarationDefinition, ScopeBehavior, ScopeTree};
/// use procflow::InMemorySubscriptionStore;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let mut builder = ScopeTree::builder("process");
/// builder.add_scope("approve", "process", ScopeBehavior::Plain).unwrap();
/// let id = builder
///     .declare("approve", DeclarationDefinition::message("orderApproved").owned_by("approve"))
///     .unwrap();
/// let tree = Arc::new(builder.build());
///
/// let lifecycle = SubscriptionLifecycle::new(tree.clone(), Arc::new(InMemorySubscriptionStore::new()));
/// let declaration = tree.declaration(id).unwrap();
///
/// let entry = lifecycle.create_subscription(declaration, TokenId::new()).await.unwrap();
/// assert_eq!(entry.unwrap().name, "orderApproved");
/// # }
/// ```
pub struct SubscriptionLifecycle<S: SubscriptionStore> {
    scopes: Arc<ScopeTree>,
    store: Arc<S>,
    classifications: ClassificationCache,
    duplicate_policy: DuplicatePolicy,
}

impl<S: SubscriptionStore> SubscriptionLifecycle<S> {
    /// Create a controller rejecting duplicate keys
    pub fn new(scopes: Arc<ScopeTree>, store: Arc<S>) -> Self {
        Self {
            scopes,
            store,
            classifications: ClassificationCache::new(),
            duplicate_policy: DuplicatePolicy::default(),
        }
    }

    /// Set the duplicate-key policy
    pub fn with_duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicate_policy = policy;
        self
    }

    pub fn scopes(&self) -> &Arc<ScopeTree> {
        &self.scopes
    }

    /// Get a reference to the store
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn duplicate_policy(&self) -> DuplicatePolicy {
        self.duplicate_policy
    }

    pub fn classifications(&self) -> &ClassificationCache {
        &self.classifications
    }

    // =========================================================================
    // Lifecycle moments
    // =========================================================================

    /// Create the entry a token needs on entering the declaration's scope
    ///
    /// Returns `None` for start-event declarations and for declarations
    /// owned by a parallel multi-instance scope; those subscribe per child
    /// through [`Self::create_subscription_for_parallel_multi_instance`].
    #[instrument(skip(self, declaration), fields(declaration = %declaration.id(), name = declaration.occurrence_name()))]
    pub async fn create_subscription(
        &self,
        declaration: &SubscriptionDeclaration,
        token_id: TokenId,
    ) -> Result<Option<SubscriptionEntry>, SubscriptionError> {
        match self.prepare_subscription(declaration, token_id)? {
            Some(entry) => self.register(entry).await.map(Some),
            None => Ok(None),
        }
    }

    /// Entry [`Self::create_subscription`] would register, without registering it
    ///
    /// Lets a caller validate every declaration of a scope before touching
    /// the index.
    pub fn prepare_subscription(
        &self,
        declaration: &SubscriptionDeclaration,
        token_id: TokenId,
    ) -> Result<Option<SubscriptionEntry>, SubscriptionError> {
        if declaration.is_start_event() {
            debug!("start event declaration, no subscription");
            return Ok(None);
        }

        if self.is_parallel_multi_instance(declaration)? {
            debug!("parallel multi-instance declaration, deferring to children");
            return Ok(None);
        }

        self.materialize(declaration, token_id).map(Some)
    }

    /// Create the entry for one child of a parallel multi-instance fan-out
    ///
    /// Returns `None` unless the declaration is owned by a parallel
    /// multi-instance scope.
    #[instrument(skip(self, declaration), fields(declaration = %declaration.id(), name = declaration.occurrence_name()))]
    pub async fn create_subscription_for_parallel_multi_instance(
        &self,
        declaration: &SubscriptionDeclaration,
        child_token_id: TokenId,
    ) -> Result<Option<SubscriptionEntry>, SubscriptionError> {
        if !self.is_parallel_multi_instance(declaration)? {
            return Ok(None);
        }

        let entry = self.materialize(declaration, child_token_id)?;
        self.register(entry).await.map(Some)
    }

    /// Replace the token's entries of the declaration's kind for the next iteration
    ///
    /// Each replacement is one atomic store operation: concurrent readers
    /// observe the old entry or its successor, never a gap. Returns the new
    /// entries.
    #[instrument(skip(self, declaration), fields(declaration = %declaration.id()))]
    pub async fn handle_sequential_repeat(
        &self,
        declaration: &SubscriptionDeclaration,
        token_id: TokenId,
    ) -> Result<Vec<SubscriptionEntry>, SubscriptionError> {
        let raw_kind = declaration.occurrence_kind();
        if raw_kind.trim().is_empty() {
            debug!("declaration has no kind, nothing to repeat");
            return Ok(vec![]);
        }

        // No live entry can carry a kind outside the closed set
        let Ok(kind) = raw_kind.parse::<OccurrenceKind>() else {
            debug!(kind = raw_kind, "declaration kind unsupported, nothing to repeat");
            return Ok(vec![]);
        };

        let mut renewed = vec![];
        for old in self.store.entries_for(token_id).await? {
            if old.kind != kind {
                continue;
            }

            let fresh = old.renewed();
            match self.store.replace(old.id, fresh.clone()).await {
                Ok(()) => {}
                // Removed by a concurrent teardown
                Err(StoreError::SubscriptionNotFound(_)) => {
                    debug!(old_id = %old.id, "subscription already removed, skipping");
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
            debug!(old_id = %old.id, new_id = %fresh.id, name = %fresh.name, "renewed subscription");
            renewed.push(fresh);
        }

        Ok(renewed)
    }

    /// Remove every entry of a token; returns how many were removed
    #[instrument(skip(self))]
    pub async fn remove_subscriptions(&self, token_id: TokenId) -> Result<usize, SubscriptionError> {
        let removed = self.store.delete_for_token(token_id).await?;
        if removed > 0 {
            debug!(removed, "removed token subscriptions");
        }
        Ok(removed)
    }

    /// Declarations attached to a scope, in order
    pub fn declarations_for_scope(&self, scope: &ScopeId) -> Vec<&SubscriptionDeclaration> {
        self.scopes.declarations_for_scope(scope).collect()
    }

    // =========================================================================
    // Building blocks
    // =========================================================================

    /// Whether the declaration's owner scope fans out in parallel
    ///
    /// Declarations without an owner scope are never parallel. The result
    /// is memoized per declaration.
    pub fn is_parallel_multi_instance(
        &self,
        declaration: &SubscriptionDeclaration,
    ) -> Result<bool, SubscriptionError> {
        self.classifications
            .get_or_try_compute(declaration.id(), || {
                match declaration.owner_scope_id() {
                    None => Ok(false),
                    Some(owner) => self
                        .scopes
                        .resolve(owner)
                        .map(|node| node.behavior().is_parallel_multi_instance())
                        .ok_or_else(|| dangling(owner)),
                }
            })
    }

    /// Memoized classification, if already computed
    pub fn cached_classification(&self, id: DeclarationId) -> Option<bool> {
        self.classifications.get(id)
    }

    /// Build an entry for `token_id` from a declaration without registering it
    pub fn materialize(
        &self,
        declaration: &SubscriptionDeclaration,
        token_id: TokenId,
    ) -> Result<SubscriptionEntry, SubscriptionError> {
        let kind = declaration
            .occurrence_kind()
            .parse::<OccurrenceKind>()
            .map_err(|e| {
                error!(declaration = %declaration.id(), kind = %e.0, "unsupported occurrence kind");
                SubscriptionError::UnsupportedOccurrenceKind(e.0)
            })?;

        let scope_id = match declaration.owner_scope_id() {
            Some(owner) => match self.scopes.resolve(owner) {
                Some(node) => Some(node.id().clone()),
                None => return Err(dangling(owner)),
            },
            None => None,
        };

        Ok(SubscriptionEntry::new(
            kind,
            declaration.occurrence_name(),
            token_id,
            scope_id,
            declaration.is_asynchronous(),
        ))
    }

    /// Add an entry to the index under the configured duplicate policy
    pub async fn register(
        &self,
        entry: SubscriptionEntry,
    ) -> Result<SubscriptionEntry, SubscriptionError> {
        match self.duplicate_policy {
            DuplicatePolicy::Reject => match self.store.insert(entry.clone()).await {
                Ok(()) => {}
                Err(StoreError::DuplicateKey {
                    token_id,
                    kind,
                    name,
                }) => {
                    error!(%token_id, %kind, %name, "duplicate subscription key");
                    return Err(SubscriptionError::DuplicateSubscriptionKey {
                        token_id,
                        kind,
                        name,
                    });
                }
                Err(e) => return Err(e.into()),
            },
            DuplicatePolicy::Replace => {
                if let Some(previous) = self.store.upsert(entry.clone()).await? {
                    warn!(
                        token_id = %entry.token_id,
                        kind = %entry.kind,
                        name = %entry.name,
                        previous_id = %previous.id,
                        "replaced live subscription with the same key"
                    );
                }
            }
        }

        debug!(subscription_id = %entry.id, token_id = %entry.token_id, "registered subscription");
        Ok(entry)
    }
}

fn dangling(scope: &ScopeId) -> SubscriptionError {
    error!(%scope, "declaration references unknown scope");
    SubscriptionError::DanglingScopeReference(scope.clone())
}
