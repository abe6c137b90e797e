//! Token arena with parent links

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::scope::{ScopeId, ScopeTree};

/// Identifier of an execution token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenId(Uuid);

impl TokenId {
    /// Generate a new time-ordered id
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TokenId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle state of a token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenState {
    /// Token may advance and register subscriptions
    Active,

    /// Token subtree is being torn down
    Cancelling,
}

/// One thread of control positioned at a scope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionToken {
    id: TokenId,
    parent: Option<TokenId>,
    scope: ScopeId,
    children: Vec<TokenId>,
    state: TokenState,
    created_at: DateTime<Utc>,
}

impl ExecutionToken {
    fn new(parent: Option<TokenId>, scope: ScopeId) -> Self {
        Self {
            id: TokenId::new(),
            parent,
            scope,
            children: vec![],
            state: TokenState::Active,
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> TokenId {
        self.id
    }

    pub fn parent(&self) -> Option<TokenId> {
        self.parent
    }

    /// Scope the token is currently positioned at
    pub fn scope(&self) -> &ScopeId {
        &self.scope
    }

    pub fn children(&self) -> &[TokenId] {
        &self.children
    }

    pub fn state(&self) -> TokenState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == TokenState::Active
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Errors from token tree operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    /// Token does not exist (never created or already destroyed)
    #[error("token not found: {0}")]
    TokenNotFound(TokenId),

    /// Token is being torn down and cannot advance
    #[error("token {0} is not active")]
    TokenInactive(TokenId),

    /// Scope does not exist in the scope tree
    #[error("unknown scope: {0}")]
    UnknownScope(ScopeId),
}

/// Flat arena of execution tokens
///
/// Parent owns children: removing a token removes its whole subtree.
/// Every token's scope resolves in the shared [`ScopeTree`].
pub struct TokenTree {
    scopes: Arc<ScopeTree>,
    tokens: RwLock<HashMap<TokenId, ExecutionToken>>,
}

impl TokenTree {
    pub fn new(scopes: Arc<ScopeTree>) -> Self {
        Self {
            scopes,
            tokens: RwLock::new(HashMap::new()),
        }
    }

    /// Create a token without a parent
    pub fn spawn_root(&self, scope: impl Into<ScopeId>) -> Result<TokenId, TokenError> {
        let scope = self.checked_scope(scope.into())?;
        let token = ExecutionToken::new(None, scope);
        let id = token.id;

        self.tokens.write().insert(id, token);
        debug!(token_id = %id, "spawned root token");
        Ok(id)
    }

    /// Create a child token under an active parent
    pub fn spawn_child(
        &self,
        parent: TokenId,
        scope: impl Into<ScopeId>,
    ) -> Result<TokenId, TokenError> {
        let scope = self.checked_scope(scope.into())?;
        let mut tokens = self.tokens.write();

        let parent_token = tokens
            .get_mut(&parent)
            .ok_or(TokenError::TokenNotFound(parent))?;
        if !parent_token.is_active() {
            return Err(TokenError::TokenInactive(parent));
        }

        let token = ExecutionToken::new(Some(parent), scope);
        let id = token.id;
        parent_token.children.push(id);
        tokens.insert(id, token);

        debug!(token_id = %id, parent_id = %parent, "spawned child token");
        Ok(id)
    }

    /// Snapshot of a token
    pub fn get(&self, id: TokenId) -> Option<ExecutionToken> {
        self.tokens.read().get(&id).cloned()
    }

    pub fn contains(&self, id: TokenId) -> bool {
        self.tokens.read().contains_key(&id)
    }

    /// Snapshot of a token that must exist and be active
    pub fn active(&self, id: TokenId) -> Result<ExecutionToken, TokenError> {
        let tokens = self.tokens.read();
        let token = tokens.get(&id).ok_or(TokenError::TokenNotFound(id))?;
        if !token.is_active() {
            return Err(TokenError::TokenInactive(id));
        }
        Ok(token.clone())
    }

    /// Reposition an active token at another scope
    pub fn move_to(&self, id: TokenId, scope: impl Into<ScopeId>) -> Result<(), TokenError> {
        let scope = self.checked_scope(scope.into())?;
        let mut tokens = self.tokens.write();

        let token = tokens.get_mut(&id).ok_or(TokenError::TokenNotFound(id))?;
        if !token.is_active() {
            return Err(TokenError::TokenInactive(id));
        }
        token.scope = scope;
        Ok(())
    }

    pub fn children_of(&self, id: TokenId) -> Result<Vec<TokenId>, TokenError> {
        self.tokens
            .read()
            .get(&id)
            .map(|t| t.children.clone())
            .ok_or(TokenError::TokenNotFound(id))
    }

    /// Mark a subtree as cancelling and return it children-first
    ///
    /// Once marked, no token of the subtree can move or spawn children.
    pub fn begin_teardown(&self, id: TokenId) -> Result<Vec<TokenId>, TokenError> {
        let mut tokens = self.tokens.write();
        let order = post_order(&tokens, id)?;

        for token_id in &order {
            if let Some(token) = tokens.get_mut(token_id) {
                token.state = TokenState::Cancelling;
            }
        }

        Ok(order)
    }

    /// Remove a token and its subtree, returning removed ids children-first
    pub fn remove_subtree(&self, id: TokenId) -> Result<Vec<TokenId>, TokenError> {
        let mut tokens = self.tokens.write();
        let order = post_order(&tokens, id)?;

        let parent = tokens.get(&id).and_then(|t| t.parent);
        if let Some(parent_token) = parent.and_then(|p| tokens.get_mut(&p)) {
            parent_token.children.retain(|child| *child != id);
        }

        for token_id in &order {
            tokens.remove(token_id);
        }

        debug!(token_id = %id, removed = order.len(), "removed token subtree");
        Ok(order)
    }

    /// Number of live tokens
    pub fn len(&self) -> usize {
        self.tokens.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.read().is_empty()
    }

    fn checked_scope(&self, scope: ScopeId) -> Result<ScopeId, TokenError> {
        if self.scopes.contains(&scope) {
            Ok(scope)
        } else {
            Err(TokenError::UnknownScope(scope))
        }
    }
}

impl fmt::Debug for TokenTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenTree")
            .field("tokens", &self.len())
            .finish()
    }
}

/// Subtree of `root` with every child listed before its parent
fn post_order(
    tokens: &HashMap<TokenId, ExecutionToken>,
    root: TokenId,
) -> Result<Vec<TokenId>, TokenError> {
    if !tokens.contains_key(&root) {
        return Err(TokenError::TokenNotFound(root));
    }

    // Pre-order with children pushed in reverse, then reversed: children first.
    let mut stack = vec![root];
    let mut order = vec![];
    while let Some(id) = stack.pop() {
        order.push(id);
        if let Some(token) = tokens.get(&id) {
            stack.extend(token.children.iter().copied());
        }
    }
    order.reverse();
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::ScopeBehavior;

    fn tree() -> TokenTree {
        let mut builder = ScopeTree::builder("process");
        builder
            .add_scope("fan", "process", ScopeBehavior::ParallelMultiInstance)
            .unwrap();
        TokenTree::new(Arc::new(builder.build()))
    }

    #[test]
    fn test_spawn_root_and_child() {
        let tokens = tree();

        let root = tokens.spawn_root("process").unwrap();
        let child = tokens.spawn_child(root, "fan").unwrap();

        let root_token = tokens.get(root).unwrap();
        assert!(root_token.is_root());
        assert_eq!(root_token.children(), &[child]);

        let child_token = tokens.get(child).unwrap();
        assert_eq!(child_token.parent(), Some(root));
        assert_eq!(child_token.scope().as_str(), "fan");
        assert_eq!(tokens.len(), 2);
    }

    #[test]
    fn test_unknown_scope_rejected() {
        let tokens = tree();

        let result = tokens.spawn_root("missing");
        assert_eq!(result, Err(TokenError::UnknownScope(ScopeId::new("missing"))));

        let root = tokens.spawn_root("process").unwrap();
        assert!(matches!(
            tokens.move_to(root, "missing"),
            Err(TokenError::UnknownScope(_))
        ));
        assert_eq!(tokens.get(root).unwrap().scope().as_str(), "process");
    }

    #[test]
    fn test_spawn_child_of_missing_parent() {
        let tokens = tree();
        let ghost = TokenId::new();

        assert_eq!(
            tokens.spawn_child(ghost, "fan"),
            Err(TokenError::TokenNotFound(ghost))
        );
    }

    #[test]
    fn test_teardown_order_is_children_first() {
        let tokens = tree();
        let root = tokens.spawn_root("process").unwrap();
        let a = tokens.spawn_child(root, "fan").unwrap();
        let b = tokens.spawn_child(root, "fan").unwrap();
        let a1 = tokens.spawn_child(a, "fan").unwrap();

        let order = tokens.begin_teardown(root).unwrap();
        assert_eq!(order.len(), 4);
        assert_eq!(*order.last().unwrap(), root);

        let position = |id| order.iter().position(|t| *t == id).unwrap();
        assert!(position(a1) < position(a));
        assert!(position(b) < position(root));

        assert_eq!(tokens.active(a), Err(TokenError::TokenInactive(a)));
        assert_eq!(
            tokens.spawn_child(a, "fan"),
            Err(TokenError::TokenInactive(a))
        );
    }

    #[test]
    fn test_remove_subtree_unlinks_parent() {
        let tokens = tree();
        let root = tokens.spawn_root("process").unwrap();
        let a = tokens.spawn_child(root, "fan").unwrap();
        let a1 = tokens.spawn_child(a, "fan").unwrap();
        let b = tokens.spawn_child(root, "fan").unwrap();

        let removed = tokens.remove_subtree(a).unwrap();
        assert_eq!(removed, vec![a1, a]);

        assert!(!tokens.contains(a));
        assert!(!tokens.contains(a1));
        assert_eq!(tokens.children_of(root).unwrap(), vec![b]);
        assert_eq!(tokens.len(), 2);
    }

    #[test]
    fn test_token_serialization() {
        let tokens = tree();
        let root = tokens.spawn_root("process").unwrap();
        let token = tokens.get(root).unwrap();

        let json = serde_json::to_value(&token).unwrap();
        assert_eq!(json["state"], "active");
        assert_eq!(json["scope"], "process");

        let parsed: ExecutionToken = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, token);
    }
}
