//! Process-definition scope tree
//!
//! This module contains the static, shared half of the runtime:
//! - [`ScopeTree`] immutable arena of scope nodes keyed by [`ScopeId`]
//! - [`ScopeBehavior`] classification of how a scope executes
//! - [`SubscriptionDeclaration`] templates for what a scope waits for

mod declaration;
mod tree;

pub use declaration::{DeclarationDefinition, DeclarationId, SubscriptionDeclaration};
pub use tree::{ScopeBehavior, ScopeId, ScopeNode, ScopeTree, ScopeTreeBuilder, ScopeTreeError};
