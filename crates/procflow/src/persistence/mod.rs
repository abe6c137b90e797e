//! Persistence layer for the subscription index
//!
//! This module provides:
//! - [`SubscriptionStore`] trait for live subscription entries
//! - [`InMemorySubscriptionStore`] for testing and embedding
//! - [`PostgresSubscriptionStore`] for production

mod memory;
mod postgres;
mod store;

pub use memory::InMemorySubscriptionStore;
pub use postgres::PostgresSubscriptionStore;
pub use store::{StoreError, SubscriptionStore};
