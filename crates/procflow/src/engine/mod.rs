//! Subscription lifecycle engine
//!
//! The engine module provides the [`SubscriptionLifecycle`] controller, the
//! [`OccurrenceRouter`] that matches arriving occurrences, and the
//! [`ProcessRuntime`] facade that drives both as tokens move.

mod delivery;
mod lifecycle;
mod runtime;

pub use delivery::{DeliveryError, DeliveryOutcome, MatchedSubscription, OccurrenceRouter};
pub use lifecycle::{ClassificationCache, SubscriptionError, SubscriptionLifecycle};
pub use runtime::{FanOut, ProcessRuntime, RuntimeError};
