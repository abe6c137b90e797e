//! Immutable scope tree arena

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::declaration::{DeclarationDefinition, DeclarationId, SubscriptionDeclaration};

/// Identifier of a scope (activity id in the process model)
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScopeId(String);

impl ScopeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ScopeId({})", self.0)
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ScopeId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ScopeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&ScopeId> for ScopeId {
    fn from(id: &ScopeId) -> Self {
        id.clone()
    }
}

/// How a scope executes once a token enters it
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeBehavior {
    /// Single token passes through once
    #[default]
    Plain,

    /// Token forks into concurrent children, one per instance
    ParallelMultiInstance,

    /// Same token repeats the scope once per instance
    SequentialMultiInstance,
}

impl ScopeBehavior {
    pub fn is_parallel_multi_instance(self) -> bool {
        matches!(self, Self::ParallelMultiInstance)
    }

    pub fn is_sequential_multi_instance(self) -> bool {
        matches!(self, Self::SequentialMultiInstance)
    }
}

impl fmt::Display for ScopeBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plain => write!(f, "plain"),
            Self::ParallelMultiInstance => write!(f, "parallel_multi_instance"),
            Self::SequentialMultiInstance => write!(f, "sequential_multi_instance"),
        }
    }
}

/// A node in the scope tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeNode {
    id: ScopeId,
    parent: Option<ScopeId>,
    behavior: ScopeBehavior,
    children: Vec<ScopeId>,
    declarations: Vec<DeclarationId>,
}

impl ScopeNode {
    fn new(id: ScopeId, parent: Option<ScopeId>, behavior: ScopeBehavior) -> Self {
        Self {
            id,
            parent,
            behavior,
            children: vec![],
            declarations: vec![],
        }
    }

    pub fn id(&self) -> &ScopeId {
        &self.id
    }

    pub fn parent(&self) -> Option<&ScopeId> {
        self.parent.as_ref()
    }

    pub fn behavior(&self) -> ScopeBehavior {
        self.behavior
    }

    pub fn children(&self) -> &[ScopeId] {
        &self.children
    }

    /// Declarations attached to this scope, in declaration order
    pub fn declarations(&self) -> &[DeclarationId] {
        &self.declarations
    }
}

/// Errors raised while building a scope tree
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScopeTreeError {
    /// A scope id was added twice
    #[error("duplicate scope: {0}")]
    DuplicateScope(ScopeId),

    /// Parent scope has not been added
    #[error("unknown parent scope: {0}")]
    UnknownParent(ScopeId),

    /// Declaration attached to a scope that does not exist
    #[error("unknown scope: {0}")]
    UnknownScope(ScopeId),

    /// Declaration without an occurrence name
    #[error("declaration on scope {scope} has an empty occurrence name")]
    EmptyOccurrenceName { scope: ScopeId },

    /// Declaration arena is full
    #[error("scope tree declaration ids are exhausted")]
    TooManyDeclarations,
}

/// Read-only, shared tree of scopes
///
/// The tree is an arena keyed by [`ScopeId`]; nodes refer to each other by
/// id only. Once built it never changes, so it is shared behind an `Arc`
/// by every token and by the lifecycle controller.
///
/// # Example
///
/// ```
/// use procflow::scope::{DeclarationDefinition, ScopeBehavior, ScopeTree};
///
/// let mut builder = ScopeTree::builder("order_process");
/// builder
///     .add_scope("approve", "order_process", ScopeBehavior::Plain)
///     .unwrap();
/// builder
///     .declare("approve", DeclarationDefinition::message("orderApproved").owned_by("approve"))
///     .unwrap();
/// let tree = builder.build();
///
/// assert_eq!(tree.declarations_for_scope(&"approve".into()).count(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct ScopeTree {
    root: ScopeId,
    scopes: HashMap<ScopeId, ScopeNode>,
    declarations: Vec<SubscriptionDeclaration>,
}

impl ScopeTree {
    /// Start building a tree with the given root scope
    pub fn builder(root: impl Into<ScopeId>) -> ScopeTreeBuilder {
        ScopeTreeBuilder::new(root)
    }

    pub fn root(&self) -> &ScopeId {
        &self.root
    }

    /// Resolve a scope id to its node
    pub fn resolve(&self, id: &ScopeId) -> Option<&ScopeNode> {
        self.scopes.get(id)
    }

    pub fn contains(&self, id: &ScopeId) -> bool {
        self.scopes.contains_key(id)
    }

    pub fn declaration(&self, id: DeclarationId) -> Option<&SubscriptionDeclaration> {
        self.declarations.get(id.index())
    }

    /// Declarations attached to a scope, in declaration order
    ///
    /// Unknown scopes have no declarations.
    pub fn declarations_for_scope<'a>(
        &'a self,
        scope: &ScopeId,
    ) -> impl Iterator<Item = &'a SubscriptionDeclaration> + 'a {
        self.scopes
            .get(scope)
            .map(|node| node.declarations.as_slice())
            .unwrap_or_default()
            .iter()
            .filter_map(|id| self.declarations.get(id.index()))
    }

    /// All declarations in the tree
    pub fn declarations(&self) -> &[SubscriptionDeclaration] {
        &self.declarations
    }

    /// Number of scopes
    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }
}

/// Incremental builder for [`ScopeTree`]
///
/// Parents must be added before their children.
#[derive(Debug)]
pub struct ScopeTreeBuilder {
    root: ScopeId,
    scopes: HashMap<ScopeId, ScopeNode>,
    declarations: Vec<SubscriptionDeclaration>,
}

impl ScopeTreeBuilder {
    /// Create a builder whose root scope has plain behavior
    pub fn new(root: impl Into<ScopeId>) -> Self {
        let root = root.into();
        let mut scopes = HashMap::new();
        scopes.insert(
            root.clone(),
            ScopeNode::new(root.clone(), None, ScopeBehavior::Plain),
        );

        Self {
            root,
            scopes,
            declarations: vec![],
        }
    }

    /// Add a scope under an existing parent
    pub fn add_scope(
        &mut self,
        id: impl Into<ScopeId>,
        parent: impl Into<ScopeId>,
        behavior: ScopeBehavior,
    ) -> Result<&mut Self, ScopeTreeError> {
        let id = id.into();
        let parent = parent.into();

        if self.scopes.contains_key(&id) {
            return Err(ScopeTreeError::DuplicateScope(id));
        }

        let parent_node = self
            .scopes
            .get_mut(&parent)
            .ok_or_else(|| ScopeTreeError::UnknownParent(parent.clone()))?;
        parent_node.children.push(id.clone());

        self.scopes
            .insert(id.clone(), ScopeNode::new(id, Some(parent), behavior));
        Ok(self)
    }

    /// Attach a declaration to a scope
    ///
    /// The owner scope named by the definition is not checked here; an
    /// owner that does not resolve surfaces when a subscription is created.
    pub fn declare(
        &mut self,
        scope: impl Into<ScopeId>,
        definition: DeclarationDefinition,
    ) -> Result<DeclarationId, ScopeTreeError> {
        let scope = scope.into();

        if definition.occurrence_name.trim().is_empty() {
            return Err(ScopeTreeError::EmptyOccurrenceName { scope });
        }

        let node = self
            .scopes
            .get_mut(&scope)
            .ok_or_else(|| ScopeTreeError::UnknownScope(scope.clone()))?;

        let id = DeclarationId::try_from_index(self.declarations.len())
            .ok_or(ScopeTreeError::TooManyDeclarations)?;
        node.declarations.push(id);
        self.declarations
            .push(SubscriptionDeclaration::from_definition(id, definition));
        Ok(id)
    }

    pub fn build(self) -> ScopeTree {
        ScopeTree {
            root: self.root,
            scopes: self.scopes,
            declarations: self.declarations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree() -> ScopeTree {
        let mut builder = ScopeTree::builder("process");
        builder
            .add_scope("review", "process", ScopeBehavior::ParallelMultiInstance)
            .unwrap()
            .add_scope("review_task", "review", ScopeBehavior::Plain)
            .unwrap();
        builder
            .declare(
                "review",
                DeclarationDefinition::message("reviewDone").owned_by("review"),
            )
            .unwrap();
        builder
            .declare("review", DeclarationDefinition::signal("abort"))
            .unwrap();
        builder.build()
    }

    #[test]
    fn test_resolve_scopes() {
        let tree = sample_tree();

        assert_eq!(tree.len(), 3);
        assert_eq!(tree.root().as_str(), "process");

        let review = tree.resolve(&"review".into()).unwrap();
        assert_eq!(review.behavior(), ScopeBehavior::ParallelMultiInstance);
        assert_eq!(review.parent(), Some(&ScopeId::new("process")));
        assert_eq!(review.children(), &[ScopeId::new("review_task")]);

        assert!(tree.resolve(&"missing".into()).is_none());
    }

    #[test]
    fn test_declarations_in_order() {
        let tree = sample_tree();

        let names: Vec<_> = tree
            .declarations_for_scope(&"review".into())
            .map(|d| d.occurrence_name())
            .collect();
        assert_eq!(names, vec!["reviewDone", "abort"]);

        assert_eq!(tree.declarations_for_scope(&"review_task".into()).count(), 0);
        assert_eq!(tree.declarations_for_scope(&"missing".into()).count(), 0);
    }

    #[test]
    fn test_declaration_ids_index_the_arena() {
        let tree = sample_tree();

        for declaration in tree.declarations() {
            assert_eq!(tree.declaration(declaration.id()), Some(declaration));
        }
    }

    #[test]
    fn test_duplicate_scope_rejected() {
        let mut builder = ScopeTree::builder("process");
        builder
            .add_scope("a", "process", ScopeBehavior::Plain)
            .unwrap();

        let result = builder.add_scope("a", "process", ScopeBehavior::Plain);
        assert_eq!(
            result.err(),
            Some(ScopeTreeError::DuplicateScope(ScopeId::new("a")))
        );
    }

    #[test]
    fn test_unknown_parent_rejected() {
        let mut builder = ScopeTree::builder("process");

        let result = builder.add_scope("a", "nowhere", ScopeBehavior::Plain);
        assert!(matches!(result, Err(ScopeTreeError::UnknownParent(_))));
    }

    #[test]
    fn test_declare_validation() {
        let mut builder = ScopeTree::builder("process");

        let result = builder.declare("process", DeclarationDefinition::message("  "));
        assert!(matches!(
            result,
            Err(ScopeTreeError::EmptyOccurrenceName { .. })
        ));

        let result = builder.declare("nowhere", DeclarationDefinition::message("x"));
        assert!(matches!(result, Err(ScopeTreeError::UnknownScope(_))));
    }

    #[test]
    fn test_behavior_display() {
        assert_eq!(ScopeBehavior::Plain.to_string(), "plain");
        assert_eq!(
            ScopeBehavior::ParallelMultiInstance.to_string(),
            "parallel_multi_instance"
        );
        assert!(ScopeBehavior::SequentialMultiInstance.is_sequential_multi_instance());
        assert!(!ScopeBehavior::Plain.is_parallel_multi_instance());
    }
}
