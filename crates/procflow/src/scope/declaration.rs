//! Subscription declarations attached to scopes

use std::fmt;

use serde::{Deserialize, Serialize};

use super::ScopeId;

/// Stable identifier of a declaration inside its [`ScopeTree`](super::ScopeTree)
///
/// Assigned in declaration order when the tree is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeclarationId(u32);

impl DeclarationId {
    /// `None` once the arena outgrows the id space
    pub(crate) fn try_from_index(index: usize) -> Option<Self> {
        u32::try_from(index).ok().map(Self)
    }

    /// Position of the declaration in the tree's declaration arena
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for DeclarationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "decl-{}", self.0)
    }
}

/// Declaration as written by the model builder, before it joins a tree
///
/// # Example
///
/// ```
/// use procflow::scope::DeclarationDefinition;
///
/// let definition = DeclarationDefinition::message("orderApproved")
///     .owned_by("approve_order")
///     .asynchronous(true);
/// assert_eq!(definition.occurrence_kind, "message");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclarationDefinition {
    /// Name of the external message or signal
    pub occurrence_name: String,

    /// Raw kind tag from the model (`message`, `signal`)
    pub occurrence_kind: String,

    /// Scope the declaration belongs to, if any
    pub owner_scope_id: Option<ScopeId>,

    /// Resume on a later scheduling point instead of inline
    #[serde(default)]
    pub asynchronous: bool,

    /// Process-instantiation trigger rather than a mid-execution wait
    #[serde(default)]
    pub start_event: bool,
}

impl DeclarationDefinition {
    /// Create a definition with an arbitrary kind tag
    pub fn new(occurrence_name: impl Into<String>, occurrence_kind: impl Into<String>) -> Self {
        Self {
            occurrence_name: occurrence_name.into(),
            occurrence_kind: occurrence_kind.into(),
            owner_scope_id: None,
            asynchronous: false,
            start_event: false,
        }
    }

    /// Create a message declaration
    pub fn message(occurrence_name: impl Into<String>) -> Self {
        Self::new(occurrence_name, "message")
    }

    /// Create a signal declaration
    pub fn signal(occurrence_name: impl Into<String>) -> Self {
        Self::new(occurrence_name, "signal")
    }

    /// Attach the declaration to an owning scope
    pub fn owned_by(mut self, scope: impl Into<ScopeId>) -> Self {
        self.owner_scope_id = Some(scope.into());
        self
    }

    /// Set asynchronous resumption
    pub fn asynchronous(mut self, asynchronous: bool) -> Self {
        self.asynchronous = asynchronous;
        self
    }

    /// Mark as a start event
    pub fn start_event(mut self) -> Self {
        self.start_event = true;
        self
    }
}

/// Immutable template describing one occurrence a scope's tokens wait for
///
/// Declarations only exist inside a [`ScopeTree`](super::ScopeTree). The
/// kind tag is kept exactly as the model wrote it; it is validated when a
/// subscription is materialized, not when the tree is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionDeclaration {
    id: DeclarationId,
    occurrence_name: String,
    occurrence_kind: String,
    owner_scope_id: Option<ScopeId>,
    asynchronous: bool,
    start_event: bool,
}

impl SubscriptionDeclaration {
    pub(crate) fn from_definition(id: DeclarationId, definition: DeclarationDefinition) -> Self {
        Self {
            id,
            occurrence_name: definition.occurrence_name,
            occurrence_kind: definition.occurrence_kind,
            owner_scope_id: definition.owner_scope_id,
            asynchronous: definition.asynchronous,
            start_event: definition.start_event,
        }
    }

    pub fn id(&self) -> DeclarationId {
        self.id
    }

    pub fn occurrence_name(&self) -> &str {
        &self.occurrence_name
    }

    /// Raw kind tag, possibly outside the supported set
    pub fn occurrence_kind(&self) -> &str {
        &self.occurrence_kind
    }

    pub fn owner_scope_id(&self) -> Option<&ScopeId> {
        self.owner_scope_id.as_ref()
    }

    pub fn is_asynchronous(&self) -> bool {
        self.asynchronous
    }

    pub fn is_start_event(&self) -> bool {
        self.start_event
    }
}
