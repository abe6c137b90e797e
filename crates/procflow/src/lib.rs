//! # Procflow
//!
//! Event-subscription lifecycle for a process-execution runtime.
//!
//! ## Features
//!
//! - **Scope tree**: immutable, shared arena of process scopes and their subscription declarations
//! - **Token tree**: concurrent execution tokens with parent links and subtree teardown
//! - **Subscription index**: one live entry per token, occurrence kind and name, in memory or PostgreSQL
//! - **Multi-instance aware**: parallel fan-out subscribes each child, sequential repetition renews entries atomically
//! - **Delivery**: messages correlate to one waiting token, signals broadcast
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      ProcessRuntime                          │
//! │  (moves tokens, fans out, repeats, cancels, delivers)       │
//! └─────────────────────────────────────────────────────────────┘
//!                  │                            │
//!                  ▼                            ▼
//! ┌──────────────────────────────┐ ┌────────────────────────────┐
//! │    SubscriptionLifecycle     │ │     OccurrenceRouter       │
//! │ (create, classify, renew)    │ │ (match messages, signals)  │
//! └──────────────────────────────┘ └────────────────────────────┘
//!                  │                            │
//!                  ▼                            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    SubscriptionStore                         │
//! │  (in-memory or PostgreSQL: procflow_event_subscriptions)    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use procflow::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), RuntimeError> {
//! let mut builder = ScopeTree::builder("process");
//! builder
//!     .add_scope("collect", "process", ScopeBehavior::SequentialMultiInstance)
//!     .unwrap();
//! builder
//!     .declare("collect", DeclarationDefinition::signal("itemDone").owned_by("collect"))
//!     .unwrap();
//!
//! let runtime = ProcessRuntime::new(Arc::new(builder.build()), InMemorySubscriptionStore::new());
//! let token = runtime.start("process")?;
//! runtime.enter_scope(token, "collect").await?;
//!
//! // Each iteration replaces the entry with a fresh one
//! let renewed = runtime.repeat_sequential(token).await?;
//! assert_eq!(renewed.len(), 1);
//!
//! let outcome = runtime
//!     .deliver(&Occurrence::signal("itemDone", serde_json::json!({})))
//!     .await?;
//! assert_eq!(outcome.tokens(), vec![token]);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod execution;
pub mod persistence;
pub mod scope;
pub mod subscription;

/// Prelude for common imports
pub mod prelude {
    pub use crate::config::{DuplicatePolicy, RuntimeConfig};
    pub use crate::engine::{
        DeliveryError, DeliveryOutcome, FanOut, MatchedSubscription, OccurrenceRouter,
        ProcessRuntime, RuntimeError, SubscriptionError, SubscriptionLifecycle,
    };
    pub use crate::execution::{ExecutionToken, TokenError, TokenId, TokenTree};
    pub use crate::persistence::{
        InMemorySubscriptionStore, PostgresSubscriptionStore, StoreError, SubscriptionStore,
    };
    pub use crate::scope::{
        DeclarationDefinition, DeclarationId, ScopeBehavior, ScopeId, ScopeTree,
        SubscriptionDeclaration,
    };
    pub use crate::subscription::{Occurrence, OccurrenceKind, SubscriptionEntry};
}

// Re-export key types at crate root
pub use config::{DuplicatePolicy, RuntimeConfig};
pub use engine::{
    DeliveryError, DeliveryOutcome, OccurrenceRouter, ProcessRuntime, RuntimeError,
    SubscriptionError, SubscriptionLifecycle,
};
pub use execution::{TokenId, TokenTree};
pub use persistence::{
    InMemorySubscriptionStore, PostgresSubscriptionStore, StoreError, SubscriptionStore,
};
pub use scope::{ScopeBehavior, ScopeId, ScopeTree};
pub use subscription::{Occurrence, OccurrenceKind, SubscriptionEntry};
