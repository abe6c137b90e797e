//! Process runtime facade
//!
//! The `ProcessRuntime` owns the scope tree, the token tree, the lifecycle
//! controller and the occurrence router, and drives the lifecycle moments:
//! - Entering a scope
//! - Parallel multi-instance fan-out
//! - Sequential repetition
//! - Cancellation
//! - Occurrence delivery

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::try_join_all;
use tracing::{debug, info, instrument, warn};

use crate::config::RuntimeConfig;
use crate::execution::{TokenError, TokenId, TokenTree};
use crate::persistence::{StoreError, SubscriptionStore};
use crate::scope::{ScopeId, ScopeTree, SubscriptionDeclaration};
use crate::subscription::{Occurrence, SubscriptionEntry};

use super::delivery::{DeliveryError, DeliveryOutcome, OccurrenceRouter};
use super::lifecycle::{SubscriptionError, SubscriptionLifecycle};

/// Errors from runtime operations
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Token error
    #[error("token error: {0}")]
    Token(#[from] TokenError),

    /// Subscription lifecycle error
    #[error("subscription error: {0}")]
    Subscription(#[from] SubscriptionError),

    /// Delivery error
    #[error("delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    /// Store error
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Fan-out asked for more children than allowed
    #[error("fan-out of {requested} exceeds limit of {limit}")]
    FanOutLimitExceeded { requested: usize, limit: usize },

    /// Fan-out target does not execute in parallel
    #[error("scope {0} is not a parallel multi-instance scope")]
    NotParallelMultiInstance(ScopeId),
}

/// Children created by one fan-out and the entries registered for them
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanOut {
    pub children: Vec<TokenId>,
    pub entries: Vec<SubscriptionEntry>,
}

/// Process runtime
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use procflow::prelude::*;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), RuntimeError> {
/// let mut builder = ScopeTree::builder("process");
/// builder
///     .add_scope("review", "process", ScopeBehavior::ParallelMultiInstance)
///     .unwrap();
/// builder
///     .declare("review", DeclarationDefinition::message("orderApproved").owned_by("review"))
///     .unwrap();
///
/// let runtime = ProcessRuntime::new(Arc::new(builder.build()), InMemorySubscriptionStore::new());
/// let root = runtime.start("process")?;
/// let fan_out = runtime.fan_out(root, "review", 3).await?;
///
/// assert_eq!(fan_out.children.len(), 3);
/// assert_eq!(fan_out.entries.len(), 3);
/// # Ok(())
/// # }
/// ```
pub struct ProcessRuntime<S: SubscriptionStore> {
    scopes: Arc<ScopeTree>,
    tokens: TokenTree,
    lifecycle: SubscriptionLifecycle<S>,
    router: OccurrenceRouter<S>,
    config: RuntimeConfig,
}

impl<S: SubscriptionStore> ProcessRuntime<S> {
    /// Create a new runtime with the given scope tree and store
    pub fn new(scopes: Arc<ScopeTree>, store: S) -> Self {
        Self::with_config(scopes, store, RuntimeConfig::default())
    }

    /// Create a new runtime with custom config
    pub fn with_config(scopes: Arc<ScopeTree>, store: S, config: RuntimeConfig) -> Self {
        let store = Arc::new(store);
        Self {
            tokens: TokenTree::new(scopes.clone()),
            lifecycle: SubscriptionLifecycle::new(scopes.clone(), store.clone())
                .with_duplicate_policy(config.duplicate_policy),
            router: OccurrenceRouter::new(store),
            scopes,
            config,
        }
    }

    pub fn scopes(&self) -> &ScopeTree {
        &self.scopes
    }

    pub fn tokens(&self) -> &TokenTree {
        &self.tokens
    }

    pub fn lifecycle(&self) -> &SubscriptionLifecycle<S> {
        &self.lifecycle
    }

    pub fn router(&self) -> &OccurrenceRouter<S> {
        &self.router
    }

    /// Get a reference to the store
    pub fn store(&self) -> &S {
        self.lifecycle.store()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Create a root token at a scope
    pub fn start(&self, scope: impl Into<ScopeId>) -> Result<TokenId, RuntimeError> {
        let token_id = self.tokens.spawn_root(scope)?;
        info!(%token_id, "started process token");
        Ok(token_id)
    }

    /// Move a token into a scope and subscribe it to the scope's declarations
    ///
    /// The transition is all or nothing. Every declaration is validated
    /// before the token moves; if a registration still fails, entries
    /// registered so far are deleted and the token returns to its previous
    /// scope.
    #[instrument(skip(self, scope))]
    pub async fn enter_scope(
        &self,
        token_id: TokenId,
        scope: impl Into<ScopeId>,
    ) -> Result<Vec<SubscriptionEntry>, RuntimeError> {
        let scope = scope.into();
        let previous_scope = self.tokens.active(token_id)?.scope().clone();

        let mut pending = vec![];
        for declaration in self.scopes.declarations_for_scope(&scope) {
            if let Some(entry) = self.lifecycle.prepare_subscription(declaration, token_id)? {
                pending.push(entry);
            }
        }

        self.tokens.move_to(token_id, scope.clone())?;

        let mut entries = Vec::with_capacity(pending.len());
        for entry in pending {
            let registered = match self.lifecycle.register(entry).await {
                Ok(entry) => self.ensure_live(token_id, entry).await,
                Err(e) => Err(e.into()),
            };

            match registered {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    warn!(%scope, error = %e, "scope entry failed, rolling back");
                    self.roll_back_entry(token_id, &previous_scope, &entries)
                        .await;
                    return Err(e);
                }
            }
        }

        debug!(%scope, created = entries.len(), "entered scope");
        Ok(entries)
    }

    /// Spawn `count` children at a parallel multi-instance scope
    ///
    /// Each child is subscribed to the scope's declarations; the parent is
    /// not. Children register concurrently. If any registration fails, the
    /// children created so far are torn down before the error is returned.
    #[instrument(skip(self, scope))]
    pub async fn fan_out(
        &self,
        parent: TokenId,
        scope: impl Into<ScopeId>,
        count: usize,
    ) -> Result<FanOut, RuntimeError> {
        let scope = scope.into();

        if count > self.config.max_fan_out {
            warn!(count, limit = self.config.max_fan_out, "fan-out rejected");
            return Err(RuntimeError::FanOutLimitExceeded {
                requested: count,
                limit: self.config.max_fan_out,
            });
        }

        let node = self
            .scopes
            .resolve(&scope)
            .ok_or_else(|| TokenError::UnknownScope(scope.clone()))?;
        if !node.behavior().is_parallel_multi_instance() {
            return Err(RuntimeError::NotParallelMultiInstance(scope));
        }
        self.tokens.active(parent)?;

        let mut children = Vec::with_capacity(count);
        for _ in 0..count {
            match self.tokens.spawn_child(parent, scope.clone()) {
                Ok(child) => children.push(child),
                Err(e) => {
                    self.discard_children(&children).await;
                    return Err(e.into());
                }
            }
        }

        let declarations: Vec<&SubscriptionDeclaration> =
            self.scopes.declarations_for_scope(&scope).collect();

        let registered = try_join_all(
            children
                .iter()
                .map(|child| self.subscribe_child(*child, &declarations)),
        )
        .await;

        match registered {
            Ok(per_child) => {
                let entries: Vec<SubscriptionEntry> = per_child.into_iter().flatten().collect();
                info!(%scope, children = children.len(), entries = entries.len(), "fanned out");
                Ok(FanOut { children, entries })
            }
            Err(e) => {
                warn!(%scope, error = %e, "fan-out registration failed, discarding children");
                self.discard_children(&children).await;
                Err(e)
            }
        }
    }

    /// Renew the token's subscriptions for the next sequential iteration
    #[instrument(skip(self))]
    pub async fn repeat_sequential(
        &self,
        token_id: TokenId,
    ) -> Result<Vec<SubscriptionEntry>, RuntimeError> {
        let token = self.tokens.active(token_id)?;

        // Each call renews every entry of the kind, so one call per kind
        let mut seen_kinds = HashSet::new();
        let mut renewed = vec![];
        for declaration in self.scopes.declarations_for_scope(token.scope()) {
            if !seen_kinds.insert(declaration.occurrence_kind()) {
                continue;
            }
            renewed.extend(
                self.lifecycle
                    .handle_sequential_repeat(declaration, token_id)
                    .await?,
            );
        }

        debug!(scope = %token.scope(), renewed = renewed.len(), "repeated scope");
        Ok(renewed)
    }

    /// Tear down a token and its subtree
    ///
    /// The subtree is first marked as cancelling so no token in it can
    /// advance, then entries are removed children first, then the tokens.
    /// Returns the removed token ids, children first.
    #[instrument(skip(self))]
    pub async fn cancel_token(&self, token_id: TokenId) -> Result<Vec<TokenId>, RuntimeError> {
        let order = self.tokens.begin_teardown(token_id)?;

        let mut removed_entries = 0;
        for id in &order {
            removed_entries += self.lifecycle.remove_subscriptions(*id).await?;
        }

        let removed = self.tokens.remove_subtree(token_id)?;
        info!(tokens = removed.len(), entries = removed_entries, "cancelled token");
        Ok(removed)
    }

    /// Match an occurrence against live subscriptions
    pub async fn deliver(&self, occurrence: &Occurrence) -> Result<DeliveryOutcome, RuntimeError> {
        Ok(self.router.deliver(occurrence).await?)
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn subscribe_child(
        &self,
        child: TokenId,
        declarations: &[&SubscriptionDeclaration],
    ) -> Result<Vec<SubscriptionEntry>, RuntimeError> {
        let mut entries = vec![];
        for declaration in declarations {
            if let Some(entry) = self
                .lifecycle
                .create_subscription_for_parallel_multi_instance(declaration, child)
                .await?
            {
                entries.push(self.ensure_live(child, entry).await?);
            }
        }
        Ok(entries)
    }

    /// Undo a registration that raced with the token's teardown
    async fn ensure_live(
        &self,
        token_id: TokenId,
        entry: SubscriptionEntry,
    ) -> Result<SubscriptionEntry, RuntimeError> {
        if let Err(e) = self.tokens.active(token_id) {
            self.store().delete(token_id, entry.id).await?;
            warn!(%token_id, subscription_id = %entry.id, "token torn down during registration");
            return Err(e.into());
        }
        Ok(entry)
    }

    async fn roll_back_entry(
        &self,
        token_id: TokenId,
        previous_scope: &ScopeId,
        registered: &[SubscriptionEntry],
    ) {
        for entry in registered {
            if let Err(e) = self.store().delete(token_id, entry.id).await {
                warn!(%token_id, subscription_id = %entry.id, error = %e, "failed to roll back subscription");
            }
        }

        // A token torn down in the meantime stays where it is
        if let Err(e) = self.tokens.move_to(token_id, previous_scope.clone()) {
            debug!(%token_id, error = %e, "token not restored to previous scope");
        }
    }

    async fn discard_children(&self, children: &[TokenId]) {
        for child in children {
            if let Err(e) = self.cancel_token(*child).await {
                warn!(token_id = %child, error = %e, "failed to discard fan-out child");
            }
        }
    }
}
